// Copyright 2024 The Hoshi Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

pub mod analysis;
pub mod node;
pub mod param;
pub mod rollout;
pub mod search;
mod spin;

pub use self::analysis::AnalysisConfig;
pub use self::node::{Edge, Node, NodeEvals, StatusType};
pub use self::param::Param;
pub use self::search::{Search, SearchError, SearchReport};

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

#[macro_use] extern crate lazy_static;

mod benson;
mod board;
mod color;
pub mod symmetry;
pub mod zobrist;

pub use self::board::GameState;
pub use self::color::Color;

/// An integer encoding of a board intersection, `y * board_size + x`. The
/// pass move is encoded as `num_intersections`, see
/// `GameState::pass_vertex`.
pub type Vertex = i32;

/// The vertex of the move that leads to the root of a search tree.
pub const NULL_VERTEX: Vertex = -1;

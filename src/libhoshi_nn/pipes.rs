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

//! Forward pipes without any actual network behind them. These are mainly
//! intended for testing and bring-up.

use crate::network::{ForwardPipe, NetworkError, RawOutput};

use hoshi_go::GameState;

use rand::{thread_rng, Rng};
use std::sync::atomic::{AtomicUsize, Ordering};

fn raw_output(state: &GameState, stm_winrate: f32, final_score: f32) -> RawOutput {
    let num_intersections = state.num_intersections();

    RawOutput {
        policy_logits: vec! [0.0; num_intersections],
        pass_logit: 0.0,
        wdl: [stm_winrate, 0.0, 1.0 - stm_winrate],
        stm_winrate,
        ownership: vec! [0.0; num_intersections],
        final_score
    }
}

/// A pipe that returns a uniform policy and a fixed value for every
/// position.
#[derive(Clone)]
pub struct UniformPipe {
    stm_winrate: f32,
    final_score: f32
}

impl UniformPipe {
    pub fn new(stm_winrate: f32, final_score: f32) -> Self {
        Self { stm_winrate, final_score }
    }
}

impl Default for UniformPipe {
    fn default() -> Self {
        Self::new(0.5, 0.0)
    }
}

impl ForwardPipe for UniformPipe {
    fn forward(&self, state: &GameState, _symmetry: usize) -> Result<RawOutput, NetworkError> {
        Ok(raw_output(state, self.stm_winrate, self.final_score))
    }
}

/// A pipe that returns random logits, useful for smoke testing the search
/// without any weights.
#[derive(Clone, Default)]
pub struct RandomPipe;

impl ForwardPipe for RandomPipe {
    fn forward(&self, state: &GameState, _symmetry: usize) -> Result<RawOutput, NetworkError> {
        let mut out = raw_output(state, 0.5, 0.0);

        for logit in out.policy_logits.iter_mut() {
            *logit = thread_rng().gen_range(-1.0..1.0);
        }

        Ok(out)
    }
}

/// A uniform pipe that counts how many times it has been asked for a
/// forward pass.
#[derive(Default)]
pub struct CountingPipe {
    num_calls: AtomicUsize
}

impl CountingPipe {
    pub fn num_calls(&self) -> usize {
        self.num_calls.load(Ordering::SeqCst)
    }
}

impl ForwardPipe for CountingPipe {
    fn forward(&self, state: &GameState, _symmetry: usize) -> Result<RawOutput, NetworkError> {
        self.num_calls.fetch_add(1, Ordering::SeqCst);

        Ok(raw_output(state, 0.5, 0.0))
    }
}

/// A pipe that always fails, as if the weights were missing.
#[derive(Clone, Default)]
pub struct BrokenPipe;

impl ForwardPipe for BrokenPipe {
    fn forward(&self, _state: &GameState, _symmetry: usize) -> Result<RawOutput, NetworkError> {
        Err(NetworkError::Unavailable)
    }
}

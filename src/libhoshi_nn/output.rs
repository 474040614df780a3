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

use std::mem;

/// A flat record of everything the network has to say about a position. All
/// spatial fields are in the identity orientation, all value heads are in
/// the side-to-move perspective.
#[derive(Clone, Debug)]
pub struct NetworkResult {
    pub board_size: usize,
    pub komi: f32,

    /// The probability that each intersection is the best move.
    pub probabilities: Vec<f32>,

    /// The probability that passing is the best move.
    pub pass_probability: f32,

    /// Win / draw / loss probabilities.
    pub wdl: [f32; 3],

    /// The winrate derived from the win / draw / loss head.
    pub wdl_winrate: f32,

    /// The winrate head of the side to move.
    pub stm_winrate: f32,

    /// The expected owner of each intersection, `1.0` is the side to move.
    pub ownership: Vec<f32>,

    /// The expected score difference in favour of the side to move.
    pub final_score: f32
}

impl NetworkResult {
    /// Returns an all-zero result for the given board size.
    pub fn with_board_size(board_size: usize, komi: f32) -> Self {
        let num_intersections = board_size * board_size;

        Self {
            board_size,
            komi,
            probabilities: vec! [0.0; num_intersections],
            pass_probability: 0.0,
            wdl: [0.5, 0.0, 0.5],
            wdl_winrate: 0.5,
            stm_winrate: 0.5,
            ownership: vec! [0.0; num_intersections],
            final_score: 0.0
        }
    }

    /// Returns an estimate of the number of bytes this result occupies,
    /// including its heap allocations. Used to size the evaluation cache.
    pub fn estimated_bytes(&self) -> usize {
        mem::size_of::<Self>() +
            self.probabilities.capacity() * mem::size_of::<f32>() +
            self.ownership.capacity() * mem::size_of::<f32>()
    }
}

/// Returns the softmax of `values` at the given temperature.
pub fn softmax(values: &[f32], temperature: f32) -> Vec<f32> {
    debug_assert!(temperature > 0.0);

    let max = values.iter().cloned().fold(::std::f32::NEG_INFINITY, |a, b| if b > a { b } else { a });
    let mut out = values.iter()
        .map(|&v| ((v - max) / temperature).exp())
        .collect::<Vec<_>>();
    let total: f32 = out.iter().sum();

    if total > 0.0 {
        for v in out.iter_mut() {
            *v /= total;
        }
    }

    out
}

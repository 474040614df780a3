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

use crate::cache::EvaluationCache;
use crate::output::{softmax, NetworkResult};

use hoshi_go::{symmetry, zobrist, GameState};

use rand::{thread_rng, Rng};
use thiserror::Error;

/// The errors that the evaluator collaborators may surface. They abort the
/// current search cycle but leave the tree consistent.
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("the forward pipe failed: {0}")]
    Pipe(String),

    #[error("no network weights have been loaded")]
    Unavailable
}

/// How the symmetry of the board position should be chosen when querying
/// the network.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ensemble {
    /// Use the identity orientation.
    None,

    /// Use the given symmetry.
    Direct(usize),

    /// Use a randomly chosen symmetry.
    Random
}

/// The raw head outputs of a single forward pass, in the orientation the
/// features were presented in. The policy is unactivated logits, all other
/// heads are final.
#[derive(Clone, Debug)]
pub struct RawOutput {
    pub policy_logits: Vec<f32>,
    pub pass_logit: f32,
    pub wdl: [f32; 3],
    pub stm_winrate: f32,
    pub ownership: Vec<f32>,
    pub final_score: f32
}

/// The forward pass of the neural network. Implementations hide the device
/// kernels, weight storage and any batching.
pub trait ForwardPipe: Send + Sync {
    fn forward(&self, state: &GameState, symmetry: usize) -> Result<RawOutput, NetworkError>;
}

/// The evaluator contract required by the search core. Implementations are
/// expected to consult an evaluation cache internally.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, state: &GameState, ensemble: Ensemble, temperature: f32) -> Result<NetworkResult, NetworkError>;
}

/// The network facade that the search talks to. It fronts a `ForwardPipe`
/// with the evaluation cache, picks the ensemble symmetry, activates the
/// policy head at the requested temperature, and maps all spatial output
/// back to the identity orientation.
pub struct Network<P: ForwardPipe> {
    pipe: P,
    cache: EvaluationCache
}

impl<P: ForwardPipe> Network<P> {
    pub fn new(pipe: P, cache_size_mib: usize) -> Self {
        Self {
            pipe,
            cache: EvaluationCache::new(cache_size_mib)
        }
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.cache
    }

    pub fn pipe(&self) -> &P {
        &self.pipe
    }

    pub fn set_cache_size(&self, mib: usize) {
        tracing::info!(mib, "resizing the evaluation cache");
        self.cache.resize(mib);
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Returns a 64-bit fingerprint of everything that affects the result
    /// of an evaluation: the stones, the komi, the side to move, the
    /// symmetry, and the policy temperature.
    fn fingerprint(&self, state: &GameState, symm: usize, temperature: f32) -> u64 {
        let mut h = state.ko_hash() ^
            state.komi_hash() ^
            zobrist::TO_MOVE[state.to_move().index()] ^
            (symm as u64).wrapping_mul(0x9e3779b97f4a7c15);

        h ^= (temperature.to_bits() as u64).wrapping_mul(0xbf58476d1ce4e5b9);
        h
    }

    /// Builds the identity-orientation result from a raw forward pass that
    /// was computed in the given symmetry.
    fn build_result(&self, state: &GameState, raw: RawOutput, symm: usize, temperature: f32) -> NetworkResult {
        let board_size = state.board_size();
        let num_intersections = state.num_intersections();
        debug_assert_eq!(raw.policy_logits.len(), num_intersections);

        // activate the policy head, the pass logit participates in the same
        // softmax
        let mut logits = raw.policy_logits;
        logits.push(raw.pass_logit);

        let activated = softmax(&logits, temperature);

        // de-transform the spatial heads back to the identity orientation
        let mut out = NetworkResult::with_board_size(board_size, state.komi());
        let inverse = symmetry::inverse(symm);

        for t in 0..num_intersections {
            let v = symmetry::transform_vertex(inverse, board_size, t as i32) as usize;

            out.probabilities[v] = activated[t];
            out.ownership[v] = raw.ownership[t];
        }

        out.pass_probability = activated[num_intersections];
        out.wdl = raw.wdl;
        out.wdl_winrate = (raw.wdl[0] - raw.wdl[2] + 1.0) / 2.0;
        out.stm_winrate = raw.stm_winrate;
        out.final_score = raw.final_score;
        out
    }
}

impl<P: ForwardPipe> Evaluator for Network<P> {
    fn evaluate(&self, state: &GameState, ensemble: Ensemble, temperature: f32) -> Result<NetworkResult, NetworkError> {
        let symm = match ensemble {
            Ensemble::None => symmetry::IDENTITY_SYMMETRY,
            Ensemble::Direct(symm) => symm,
            Ensemble::Random => thread_rng().gen_range(0..symmetry::NUM_SYMMETRIES)
        };
        let fingerprint = self.fingerprint(state, symm, temperature);

        self.cache.get_or_compute(fingerprint, || {
            let raw = self.pipe.forward(state, symm)?;

            Ok(self.build_result(state, raw, symm, temperature))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipes::{CountingPipe, UniformPipe};

    #[test]
    fn uniform_pipe_yields_uniform_policy() {
        let network = Network::new(UniformPipe::new(0.5, 0.0), 16);
        let state = GameState::new(9, 7.5);
        let result = network.evaluate(&state, Ensemble::None, 1.0).unwrap();

        let expected = 1.0 / 82.0;
        for &p in result.probabilities.iter() {
            assert!((p - expected).abs() < 1e-6);
        }
        assert!((result.pass_probability - expected).abs() < 1e-6);
    }

    #[test]
    fn results_are_cached() {
        let network = Network::new(CountingPipe::default(), 16);
        let state = GameState::new(9, 7.5);

        network.evaluate(&state, Ensemble::None, 1.0).unwrap();
        network.evaluate(&state, Ensemble::None, 1.0).unwrap();

        assert_eq!(network.pipe.num_calls(), 1);
    }

    #[test]
    fn different_symmetries_are_distinct_entries() {
        let network = Network::new(CountingPipe::default(), 16);
        let state = GameState::new(9, 7.5);

        network.evaluate(&state, Ensemble::Direct(0), 1.0).unwrap();
        network.evaluate(&state, Ensemble::Direct(1), 1.0).unwrap();

        assert_eq!(network.pipe.num_calls(), 2);
    }

    #[test]
    fn fingerprint_depends_on_side_to_move() {
        let network = Network::new(CountingPipe::default(), 16);
        let mut state = GameState::new(9, 7.5);

        network.evaluate(&state, Ensemble::None, 1.0).unwrap();
        state.play_move(state.pass_vertex());
        network.evaluate(&state, Ensemble::None, 1.0).unwrap();

        assert_eq!(network.pipe.num_calls(), 2);
    }

    #[test]
    fn clear_cache_forces_recompute() {
        let network = Network::new(CountingPipe::default(), 16);
        let state = GameState::new(9, 7.5);

        network.evaluate(&state, Ensemble::None, 1.0).unwrap();
        network.clear_cache();
        network.evaluate(&state, Ensemble::None, 1.0).unwrap();

        assert_eq!(network.pipe.num_calls(), 2);
    }
}

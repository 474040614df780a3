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

use hoshi_go::{Color, GameState};
use hoshi_mcts::{Param, Search};
use hoshi_nn::pipes::{CountingPipe, UniformPipe};
use hoshi_nn::{Ensemble, Evaluator, Network, NetworkError, NetworkResult};

use std::sync::Arc;

/// An evaluator that hands out a fixed prior distribution, bypassing the
/// softmax of the real network facade.
struct FixedEvaluator {
    probabilities: Vec<f32>,
    pass_probability: f32
}

impl FixedEvaluator {
    fn uniform(board_size: usize) -> Self {
        Self {
            probabilities: vec! [0.012345; board_size * board_size],
            pass_probability: 0.1
        }
    }
}

impl Evaluator for FixedEvaluator {
    fn evaluate(&self, state: &GameState, _ensemble: Ensemble, _temperature: f32) -> Result<NetworkResult, NetworkError> {
        let mut out = NetworkResult::with_board_size(state.board_size(), state.komi());

        out.probabilities = self.probabilities.clone();
        out.pass_probability = self.pass_probability;
        Ok(out)
    }
}

/// Empty 9x9 board, uniform prior, one playout. The root is visited once
/// and the wide open board suppresses the pass child, so the best move is
/// one of the (equally likely) intersections.
#[test]
fn scenario_single_playout_on_uniform_prior() {
    let state = GameState::new(9, 7.5);
    let mut search = Search::new(state, FixedEvaluator::uniform(9), Arc::new(Param::default()));

    search.set_seed(42);

    let report = search.think(1, 1).unwrap();
    let root = search.root().unwrap();

    assert_eq!(report.root_visits, 1);
    assert_eq!(root.get_visits(), 1);

    // 81 candidates > 3 * 81 / 4, so no pass child
    let pass = search.root_state().pass_vertex();

    assert_eq!(root.children().len(), 81);
    assert!(root.children().iter().all(|c| c.vertex() != pass));

    // with nothing visited the best move falls back to the highest prior,
    // which is never the (suppressed) pass
    assert!(report.best_move >= 0 && report.best_move < 81);
}

/// Empty 19x19 board with symmetry pruning: the 361 first moves collapse
/// into 55 orbits under the dihedral group, plus the pass child.
#[test]
fn scenario_symmetry_pruned_opening() {
    let state = GameState::new(19, 7.5);
    let network = Network::new(UniformPipe::default(), 64);
    let mut param = Param::default();
    param.symm_pruning = true;

    let mut search = Search::new(state, network, Arc::new(param));

    search.set_seed(42);

    let report = search.think(128, 1).unwrap();
    let root = search.root().unwrap();
    let pass = search.root_state().pass_vertex();

    assert_eq!(report.root_visits, 128);
    assert_eq!(root.children().len(), 56);
    assert_eq!(root.children().iter().filter(|c| c.vertex() == pass).count(), 1);

    // the pruned orbits keep their policy mass in the renormalization sum,
    // so the 56 representatives hold 56 / 362 of the uniform prior
    let total: f32 = root.children().iter().map(|c| c.policy()).sum();

    assert!((total - 56.0 / 362.0).abs() < 1e-3, "total prior {}", total);
    assert!(root.children().iter().any(|c| c.vertex() == report.best_move));
}

/// Two threads sharing one tree: the playout budget is exact, and the
/// evaluator is consulted at most once per playout.
#[test]
fn scenario_two_threads_share_the_tree() {
    let state = GameState::new(9, 7.5);
    let network = Network::new(CountingPipe::default(), 64);
    let mut search = Search::new(state, network, Arc::new(Param::default()));

    search.set_seed(42);

    let report = search.think(2000, 2).unwrap();

    assert_eq!(report.root_visits, 2000);
    assert_eq!(search.root().unwrap().get_visits(), 2000);
    assert!(
        search.evaluator().pipe().num_calls() <= 2000,
        "the evaluator must not be consulted more than once per playout"
    );
}

/// Sequential halving at the root: with a playout budget of 8 and four
/// considered moves, the first epoch spreads its visits as 3, 3, 1, 1 over
/// exactly four children, then control returns to the regular selection.
#[test]
fn scenario_gumbel_opening_visits() {
    let mut evaluator = FixedEvaluator::uniform(5);

    // distinct priors so that the considered set is stable
    evaluator.probabilities = (0..25).map(|i| (50.0 - i as f32) / 1000.0).collect();
    evaluator.pass_probability = 0.001;

    let mut param = Param::default();
    param.gumbel = true;
    param.gumbel_playouts = 8;
    param.gumbel_considered_moves = 4;

    let state = GameState::new(5, 0.5);
    let mut search = Search::new(state, evaluator, Arc::new(param));

    search.set_seed(42);

    // one root visit from the expansion plus eight gumbel playouts
    search.think(9, 1).unwrap();

    {
        let root = search.root().unwrap();
        let mut visit_counts = root.children().iter()
            .filter_map(|c| c.get())
            .map(|n| n.get_visits())
            .filter(|&v| v > 0)
            .collect::<Vec<_>>();

        visit_counts.sort_unstable_by(|a, b| b.cmp(a));

        assert_eq!(visit_counts, vec! [3, 3, 1, 1]);
        assert!(root.should_apply_gumbel() == false);
    }

    // the budget is consumed, further playouts run the regular selection
    let report = search.think(12, 1).unwrap();

    assert_eq!(report.root_visits, 12);
}

/// Builds a 7x7 position with three single-stone kos, five plies into the
/// six-move capture cycle; the sixth move would repeat the position.
fn triple_ko_position() -> GameState {
    let mut state = GameState::new(7, 7.5);
    let moves: [(usize, usize, Color); 17] = [
        (1, 1, Color::Black), (0, 1, Color::White),
        (2, 0, Color::Black), (0, 5, Color::White),
        (2, 6, Color::Black), (6, 1, Color::White),
        (1, 5, Color::Black), (1, 6, Color::White),
        (4, 0, Color::Black), (3, 3, Color::White),
        (5, 1, Color::Black), (3, 4, Color::White),
        (0, 0, Color::Black), (2, 3, Color::White),
        (6, 0, Color::Black), (2, 4, Color::White),
        (4, 4, Color::Black)
    ];

    for &(x, y, color) in moves.iter() {
        state.play(state.get_vertex(x, y), color);
    }

    state.play(state.get_vertex(1, 0), Color::White);
    state.play(state.get_vertex(0, 6), Color::Black);
    state.play(state.get_vertex(5, 0), Color::White);
    state.play(state.get_vertex(0, 0), Color::Black);
    state.play(state.get_vertex(1, 6), Color::White);

    assert_eq!(state.to_move(), Color::Black);
    state
}

/// Root preparation removes the move that would complete the triple ko
/// cycle, and only that move.
#[test]
fn scenario_superko_child_is_removed() {
    let state = triple_ko_position();
    let repeat = state.get_vertex(6, 0);
    let network = Network::new(UniformPipe::default(), 16);
    let mut search = Search::new(state, network, Arc::new(Param::default()));

    search.set_seed(42);
    search.think(1, 1).unwrap();

    let root = search.root().unwrap();
    let children = root.children();

    assert!(
        children.iter().all(|c| c.vertex() != repeat),
        "the superko move must be removed from the root"
    );

    // an uninvolved legal move is untouched, and the pass child is kept on
    // a board this crowded
    let other = search.root_state().get_vertex(5, 5);
    let pass = search.root_state().pass_vertex();

    assert!(children.iter().any(|c| c.vertex() == other));
    assert!(children.iter().any(|c| c.vertex() == pass));

    // exactly one intersection disappeared: the candidates are the legal
    // moves plus the pass child, minus the superko move
    let legal = {
        let state = search.root_state();
        (0..state.num_intersections() as i32)
            .filter(|&v| state.is_legal_move(v, Color::Black))
            .count()
    };

    assert_eq!(children.len(), legal + 1 - 1);
}

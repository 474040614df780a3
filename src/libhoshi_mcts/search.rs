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

use crate::analysis::AnalysisConfig;
use crate::node::{Node, NodeEvals};
use crate::param::Param;

use hoshi_go::{GameState, Vertex, NULL_VERTEX};
use hoshi_nn::{Evaluator, NetworkError};

use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Error)]
pub enum SearchError {
    #[error("the evaluator failed: {0}")]
    Evaluator(#[from] NetworkError)
}

/// The outcome of a search, all values in the perspective of the side to
/// move at the root.
#[derive(Clone, Debug)]
pub struct SearchReport {
    pub best_move: Vertex,
    pub root_visits: i32,
    pub winrate: f32,
    pub final_score: f32,
    pub pv: String
}

/// One walk from the given node down to a leaf: select with the configured
/// rule, expand (or seal) the leaf, and back the resulting evaluation up
/// along the unwound recursion. Returns the leaf evaluation, or `None`
/// when the walk collided with a concurrent expansion and had no effect.
pub fn play_simulation<E, R>(
    state: &mut GameState,
    node: &Node,
    evaluator: &E,
    param: &Arc<Param>,
    config: &AnalysisConfig,
    depth: usize,
    rng: &mut R
) -> Result<Option<NodeEvals>, SearchError>
    where E: Evaluator, R: Rng
{
    node.increment_threads();

    let result = simulate_inner(state, node, evaluator, param, config, depth, rng);

    if let Ok(Some(ref evals)) = result {
        node.update(evals);
    }

    node.decrement_threads();
    result
}

fn simulate_inner<E, R>(
    state: &mut GameState,
    node: &Node,
    evaluator: &E,
    param: &Arc<Param>,
    config: &AnalysisConfig,
    depth: usize,
    rng: &mut R
) -> Result<Option<NodeEvals>, SearchError>
    where E: Evaluator, R: Rng
{
    if node.expandable() {
        if state.passes() >= 2 {
            // the game is over, seal the node instead of expanding it
            if node.set_terminal() {
                Ok(Some(evals_from_score(state)))
            } else {
                Ok(None)
            }
        } else {
            let mut node_evals = NodeEvals::default();

            if node.expand_children(evaluator, state, &mut node_evals, config, depth == 0, rng)? {
                Ok(Some(node_evals))
            } else {
                Ok(None)
            }
        }
    } else if node.has_children() {
        let color = state.to_move();
        let next = if param.no_dcnn {
            node.uct_select_child(color, depth == 0, state)
        } else {
            node.puct_select_child(color, depth == 0, rng)
        };

        state.play(next.vertex(), color);
        play_simulation(state, next, evaluator, param, config, depth + 1, rng)
    } else if state.passes() >= 2 {
        // a sealed terminal leaf, rescore the final position
        Ok(Some(evals_from_score(state)))
    } else {
        // another thread is mid-expansion here, back off and retry
        Ok(None)
    }
}

/// Returns the terminal evaluation of a finished game.
fn evals_from_score(state: &GameState) -> NodeEvals {
    let black_final_score = state.final_score();
    let black_wl = if black_final_score > 1e-4 {
        1.0
    } else if black_final_score < -1e-4 {
        0.0
    } else {
        0.5
    };

    NodeEvals {
        black_wl,
        draw: if black_wl == 0.5 { 1.0 } else { 0.0 },
        black_final_score,
        black_ownership: state.ownership()
    }
}

/// A search over a single game position: the root state, the tree (re-used
/// between moves), the parameter block, and the evaluator.
pub struct Search<E: Evaluator> {
    root_state: GameState,
    evaluator: E,
    param: Arc<Param>,
    root: Option<Box<Node>>,
    analysis_config: AnalysisConfig,
    stop: AtomicBool,
    seed: u64
}

impl<E: Evaluator> Search<E> {
    pub fn new(root_state: GameState, evaluator: E, param: Arc<Param>) -> Self {
        Self {
            root_state,
            evaluator,
            param,
            root: None,
            analysis_config: AnalysisConfig::default(),
            stop: AtomicBool::new(false),
            seed: thread_rng().gen()
        }
    }

    /// Fixes the seed of every random draw of this search, for
    /// reproducible runs.
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn analysis_config_mut(&mut self) -> &mut AnalysisConfig {
        &mut self.analysis_config
    }

    pub fn root(&self) -> Option<&Node> {
        self.root.as_deref()
    }

    pub fn root_state(&self) -> &GameState {
        &self.root_state
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Asks the running search to finish after the playouts currently in
    /// flight. A playout in progress always completes.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Runs playouts until the root has accumulated `playouts` visits (or
    /// the stop flag is raised), then returns the best move and a summary.
    ///
    /// The worker pool shares the tree; every worker claims a playout
    /// ticket before descending so that the budget is exact, and returns a
    /// ticket whenever a walk collides with a concurrent expansion.
    pub fn think(&mut self, playouts: usize, num_threads: usize) -> Result<SearchReport, SearchError> {
        let to_move = self.root_state.to_move();

        if self.root_state.passes() >= 2 {
            // nothing to search, the game is over
            return Ok(SearchReport {
                best_move: self.root_state.pass_vertex(),
                root_visits: 0,
                winrate: 0.5,
                final_score: 0.0,
                pv: String::new()
            });
        }

        let mut root = match self.root.take() {
            Some(root) => root,
            None => Box::new(Node::new(NULL_VERTEX, 1.0, self.param.clone()))
        };
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let mut root_evals = NodeEvals::default();
        let expanded = root.prepare_root_node(
            &self.evaluator,
            &self.root_state,
            &mut root_evals,
            &self.analysis_config,
            &mut rng
        )?;

        if expanded {
            root.update(&root_evals);
        }

        self.stop.store(false, Ordering::Relaxed);

        let playouts = playouts as i32;
        let tickets = AtomicI32::new(root.get_visits());
        let result: Result<(), SearchError> = thread::scope(|scope| {
            let handles = (0..num_threads.max(1)).map(|t| {
                let root = &*root;
                let evaluator = &self.evaluator;
                let param = &self.param;
                let config = &self.analysis_config;
                let root_state = &self.root_state;
                let tickets = &tickets;
                let stop = &self.stop;
                let seed = self.seed.wrapping_add((t as u64 + 1).wrapping_mul(0x9e3779b97f4a7c15));

                scope.spawn(move || -> Result<(), SearchError> {
                    let mut rng = SmallRng::seed_from_u64(seed);

                    loop {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }

                        let ticket = tickets.fetch_add(1, Ordering::Relaxed);

                        if ticket >= playouts {
                            tickets.fetch_sub(1, Ordering::Relaxed);
                            break;
                        }

                        let mut fork = root_state.clone();

                        match play_simulation(&mut fork, root, evaluator, param, config, 0, &mut rng) {
                            Ok(Some(_)) => {},
                            Ok(None) => {
                                // the walk had no effect, return the ticket
                                tickets.fetch_sub(1, Ordering::Relaxed);
                                thread::yield_now();
                            },
                            Err(err) => {
                                tickets.fetch_sub(1, Ordering::Relaxed);
                                stop.store(true, Ordering::Relaxed);
                                return Err(err);
                            }
                        }
                    }

                    Ok(())
                })
            }).collect::<Vec<_>>();

            let mut out = Ok(());

            for handle in handles {
                if let Err(err) = handle.join().expect("search worker panicked") {
                    out = Err(err);
                }
            }

            out
        });

        result?;

        let best_move = if self.param.gumbel {
            root.get_gumbel_move(&mut rng)
        } else {
            root.get_best_move()
        };
        let report = SearchReport {
            best_move,
            root_visits: root.get_visits(),
            winrate: root.get_wl(to_move, false),
            final_score: root.get_final_score(to_move),
            pv: root.get_pv_string(&self.root_state)
        };

        tracing::debug!(
            visits = report.root_visits,
            winrate = report.winrate,
            best_move = %self.root_state.vertex_to_text(report.best_move),
            "search finished"
        );

        self.root = Some(root);
        Ok(report)
    }

    /// Picks an opening move stochastically, with the probability of each
    /// move proportional to its visit count raised to `1 / temperature`.
    pub fn randomize_best_move(&self, temperature: f32, min_visits: i32) -> Vertex {
        let mut rng = SmallRng::seed_from_u64(self.seed);

        match self.root.as_ref() {
            Some(root) => root.randomize_first_proportionally(temperature, min_visits, &mut rng),
            None => self.root_state.pass_vertex()
        }
    }

    /// Plays the given move on the root state, re-rooting the tree onto
    /// the matching child (sub-tree reuse). Everything else is released.
    pub fn advance(&mut self, vertex: Vertex) {
        if let Some(mut root) = self.root.take() {
            if let Some(child) = root.pop_child(vertex) {
                child.set_score_bonus(0.0);
                self.root = Some(child);
            }
        }

        self.root_state.play_move(vertex);
    }

    /// Returns the search list and tree status of the current tree.
    pub fn to_verbose_string(&self) -> String {
        match self.root.as_ref() {
            Some(root) => root.to_verbose_string(&self.root_state, self.root_state.to_move()),
            None => " * Search List: N/A\n".to_string()
        }
    }

    /// Returns the `info move ...` analysis lines of the current tree.
    pub fn to_analysis_string(&self) -> String {
        match self.root.as_ref() {
            Some(root) => root.to_analysis_string(&self.root_state, self.root_state.to_move(), &self.analysis_config),
            None => String::new()
        }
    }
}

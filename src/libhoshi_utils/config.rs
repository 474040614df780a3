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

use std::env;
use std::str::FromStr;

lazy_static! {
    /// The total number of parallel probes to perform for every search tree.
    pub static ref NUM_THREADS: usize = get_opt("--num-threads").unwrap_or(1);

    /// The target number of playouts for each search tree.
    pub static ref PLAYOUTS: usize = get_opt("--playouts").unwrap_or(1600);

    /// The size of the neural network evaluation cache, in MiB.
    pub static ref CACHE_MEMORY_MIB: usize = get_opt("--cache-memory-mib").unwrap_or(400);

    /// The initial exploration rate of the PUCT formula.
    pub static ref CPUCT_INIT: f32 = get_env("CPUCT_INIT").unwrap_or(0.5);

    /// The visit count at which the exploration rate starts to grow.
    pub static ref CPUCT_BASE: f32 = get_env("CPUCT_BASE").unwrap_or(19652.0);

    /// The growth factor of the exploration rate.
    pub static ref CPUCT_BASE_FACTOR: f32 = get_env("CPUCT_BASE_FACTOR").unwrap_or(1.0);

    /// The first play urgency reduction applied to unvisited children.
    pub static ref FPU_REDUCTION: f32 = get_env("FPU_REDUCTION").unwrap_or(0.25);

    /// The first play urgency reduction applied to unvisited children of the
    /// root node.
    pub static ref FPU_ROOT_REDUCTION: f32 = get_env("FPU_ROOT_REDUCTION").unwrap_or(0.25);

    /// How strongly a draw should be rewarded in the Q value.
    pub static ref DRAW_FACTOR: f32 = get_env("DRAW_FACTOR").unwrap_or(0.0);

    /// The weight of the score lead utility in the selection value.
    pub static ref SCORE_UTILITY_FACTOR: f32 = get_env("SCORE_UTILITY_FACTOR").unwrap_or(0.1);

    /// The divisor of the score lead before it is squashed by `tanh`.
    pub static ref SCORE_UTILITY_DIV: f32 = get_env("SCORE_UTILITY_DIV").unwrap_or(20.0);

    /// The weight of the score lead utility in the best move criterion.
    pub static ref LCB_UTILITY_FACTOR: f32 = get_env("LCB_UTILITY_FACTOR").unwrap_or(0.1);

    /// How much of the best move criterion is the visit ratio instead of the
    /// lower confidence bound.
    pub static ref LCB_REDUCTION: f32 = get_env("LCB_REDUCTION").unwrap_or(0.02);

    /// The two-sided complement probability of the confidence interval table.
    pub static ref CI_ALPHA: f32 = get_env("CI_ALPHA").unwrap_or(1e-5);

    /// Whether to add dirichlet noise to the root node priors.
    pub static ref DIRICHLET_NOISE: bool = has_opt("--noise");

    /// The mixing weight of the dirichlet noise.
    pub static ref DIRICHLET_EPSILON: f32 = get_env("DIRICHLET_EPSILON").unwrap_or(0.25);

    /// The base concentration of the dirichlet distribution.
    pub static ref DIRICHLET_INIT: f32 = get_env("DIRICHLET_INIT").unwrap_or(0.03);

    /// The concentration is scaled by this factor divided by the number of
    /// legal moves.
    pub static ref DIRICHLET_FACTOR: f32 = get_env("DIRICHLET_FACTOR").unwrap_or(361.0);

    /// The softmax temperature applied to the policy of the root node.
    pub static ref ROOT_POLICY_TEMP: f32 = get_env("ROOT_POLICY_TEMP").unwrap_or(1.0);

    /// The softmax temperature applied to the policy of every other node.
    pub static ref POLICY_TEMP: f32 = get_env("POLICY_TEMP").unwrap_or(1.0);

    /// Whether to deduplicate candidate moves over the board symmetries
    /// during the opening.
    pub static ref SYMM_PRUNING: bool = has_opt("--symm-pruning");

    /// Whether to give the pass child at the root half a point of score
    /// bonus.
    pub static ref FIRST_PASS_BONUS: bool = has_opt("--first-pass-bonus");

    /// Whether to use sequential halving with gumbel noise at the root.
    pub static ref GUMBEL: bool = has_opt("--gumbel");

    /// The number of playouts spent inside the gumbel selection at the root.
    pub static ref GUMBEL_PLAYOUTS: usize = get_opt("--gumbel-playouts").unwrap_or(400);

    /// The number of moves considered by sequential halving.
    pub static ref GUMBEL_CONSIDERED_MOVES: usize = get_opt("--gumbel-considered-moves").unwrap_or(16);

    /// The weight of the score lead utility inside the completed Q value.
    pub static ref COMPLETED_Q_UTILITY_FACTOR: f32 = get_env("COMPLETED_Q_UTILITY_FACTOR").unwrap_or(0.0);

    /// Whether the Q value is sourced from the side-to-move winrate head
    /// instead of the win/draw/loss head.
    pub static ref USE_STM_WINRATE: bool = has_opt("--use-stm-winrate");

    /// Whether to disable the neural network and fall back to the classical
    /// policy and rollouts.
    pub static ref NO_DCNN: bool = has_opt("--no-dcnn");

    /// Whether to use the neural network for the root node even when it is
    /// disabled everywhere else.
    pub static ref ROOT_DCNN: bool = has_opt("--root-dcnn");

    /// Whether to blend a rollout result into the network evaluation.
    pub static ref USE_ROLLOUT: bool = has_opt("--use-rollout");
}

fn args() -> ::std::vec::IntoIter<String> {
    let mut out = env::args().collect::<Vec<_>>();

    if let Ok(opts) = env::var("HOSHI_OPTS") {
        for opt in opts.split_whitespace() {
            out.push(opt.to_string());
        }
    }

    out.into_iter()
}

/// Returns true if any command-line argument with the given name is present.
pub fn has_opt(name: &str) -> bool {
    args().skip(1).any(|arg| arg == name)
}

/// Returns the value of the command-line argument that follows `name`, if
/// present and parsable.
pub fn get_opt<T: FromStr>(name: &str) -> Option<T> {
    args().skip(1).zip(args().skip(2))
        .filter_map(|(arg, value)| {
            if arg == name {
                T::from_str(&value).ok()
            } else {
                None
            }
        })
        .next()
}

/// Returns the value of the environment variable `name`, if present and
/// parsable.
pub fn get_env<T: FromStr>(name: &str) -> Option<T> {
    match env::var(name) {
        Ok(value) => T::from_str(&value).ok(),
        _ => None
    }
}

/// Returns a description of the configuration of this engine.
pub fn get_description() -> String {
    vec! [
        format!("NUM_THREADS {}", *NUM_THREADS),
        format!("PLAYOUTS {}", *PLAYOUTS),
        format!("CACHE_MEMORY_MIB {}", *CACHE_MEMORY_MIB),
        format!("DIRICHLET_NOISE {}", *DIRICHLET_NOISE),
        format!("SYMM_PRUNING {}", *SYMM_PRUNING),
        format!("GUMBEL {}", *GUMBEL),
        format!("NO_DCNN {}", *NO_DCNN)
    ].join("\n")
}

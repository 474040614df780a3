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

use hoshi_utils::config;
use hoshi_utils::lcb::LcbEntries;

/// The immutable parameter block of a search. It is shared by every node of
/// the tree (installed through edge inflation) and read-only while the
/// search is running.
#[derive(Clone)]
pub struct Param {
    pub cpuct_init: f32,
    pub cpuct_base: f32,
    pub cpuct_base_factor: f32,

    pub fpu_reduction: f32,
    pub fpu_root_reduction: f32,

    pub draw_factor: f32,
    pub score_utility_factor: f32,
    pub score_utility_div: f32,

    pub lcb_utility_factor: f32,
    pub lcb_reduction: f32,
    pub ci_alpha: f32,

    pub dirichlet_noise: bool,
    pub dirichlet_epsilon: f32,
    pub dirichlet_init: f32,
    pub dirichlet_factor: f32,

    pub root_policy_temp: f32,
    pub policy_temp: f32,

    pub symm_pruning: bool,
    pub first_pass_bonus: bool,

    pub gumbel: bool,
    pub gumbel_playouts: i32,
    pub gumbel_considered_moves: usize,
    pub completed_q_utility_factor: f32,

    pub use_stm_winrate: bool,
    pub no_dcnn: bool,
    pub root_dcnn: bool,
    pub use_rollout: bool,

    /// The Student-t quantile table, pre-computed from `ci_alpha`.
    pub lcb_entries: LcbEntries
}

impl Default for Param {
    fn default() -> Self {
        let ci_alpha = 1e-5;

        Self {
            cpuct_init: 0.5,
            cpuct_base: 19652.0,
            cpuct_base_factor: 1.0,
            fpu_reduction: 0.25,
            fpu_root_reduction: 0.25,
            draw_factor: 0.0,
            score_utility_factor: 0.1,
            score_utility_div: 20.0,
            lcb_utility_factor: 0.1,
            lcb_reduction: 0.02,
            ci_alpha,
            dirichlet_noise: false,
            dirichlet_epsilon: 0.25,
            dirichlet_init: 0.03,
            dirichlet_factor: 361.0,
            root_policy_temp: 1.0,
            policy_temp: 1.0,
            symm_pruning: false,
            first_pass_bonus: false,
            gumbel: false,
            gumbel_playouts: 400,
            gumbel_considered_moves: 16,
            completed_q_utility_factor: 0.0,
            use_stm_winrate: false,
            no_dcnn: false,
            root_dcnn: false,
            use_rollout: false,
            lcb_entries: LcbEntries::new(ci_alpha)
        }
    }
}

impl Param {
    /// Returns a parameter block built from the process configuration.
    pub fn from_config() -> Self {
        let ci_alpha = (*config::CI_ALPHA).max(1e-8).min(1.0 - 1e-8);

        Self {
            cpuct_init: *config::CPUCT_INIT,
            cpuct_base: *config::CPUCT_BASE,
            cpuct_base_factor: *config::CPUCT_BASE_FACTOR,
            fpu_reduction: *config::FPU_REDUCTION,
            fpu_root_reduction: *config::FPU_ROOT_REDUCTION,
            draw_factor: *config::DRAW_FACTOR,
            score_utility_factor: *config::SCORE_UTILITY_FACTOR,
            score_utility_div: *config::SCORE_UTILITY_DIV,
            lcb_utility_factor: *config::LCB_UTILITY_FACTOR,
            lcb_reduction: *config::LCB_REDUCTION,
            ci_alpha,
            dirichlet_noise: *config::DIRICHLET_NOISE,
            dirichlet_epsilon: *config::DIRICHLET_EPSILON,
            dirichlet_init: *config::DIRICHLET_INIT,
            dirichlet_factor: *config::DIRICHLET_FACTOR,
            root_policy_temp: *config::ROOT_POLICY_TEMP,
            policy_temp: *config::POLICY_TEMP,
            symm_pruning: *config::SYMM_PRUNING,
            first_pass_bonus: *config::FIRST_PASS_BONUS,
            gumbel: *config::GUMBEL,
            gumbel_playouts: *config::GUMBEL_PLAYOUTS as i32,
            gumbel_considered_moves: *config::GUMBEL_CONSIDERED_MOVES,
            completed_q_utility_factor: *config::COMPLETED_Q_UTILITY_FACTOR,
            use_stm_winrate: *config::USE_STM_WINRATE,
            no_dcnn: *config::NO_DCNN,
            root_dcnn: *config::ROOT_DCNN,
            use_rollout: *config::USE_ROLLOUT,
            lcb_entries: LcbEntries::new(ci_alpha)
        }
    }
}

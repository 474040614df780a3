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
use crate::param::Param;
use crate::rollout;
use crate::search::SearchError;
use crate::spin;

use hoshi_go::{symmetry, Color, GameState, Vertex};
use hoshi_nn::{softmax, Ensemble, Evaluator, NetworkResult};
use hoshi_utils::atomic::{AtomicF32, AtomicF64};

use crossbeam_utils::Backoff;
use ordered_float::OrderedFloat;
use rand::Rng;
use rand_distr::{Distribution, Gamma, Gumbel};

use std::cell::UnsafeCell;
use std::fmt::Write as _;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicI8, AtomicPtr, AtomicU8, Ordering};
use std::sync::Arc;

/// The number of virtual visits a single in-flight selection path adds to
/// every node it occupies.
const VIRTUAL_LOSS_COUNT: i32 = 3;

/// The status of a node. `Active` nodes participate in selection, `Pruned`
/// nodes are skipped but may be re-activated, `Invalid` is terminal and
/// marks the node for physical removal at the root.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusType {
    Active = 0,
    Pruned = 1,
    Invalid = 2
}

const EXPAND_INITIAL: u8 = 0;
const EXPAND_EXPANDING: u8 = 1;
const EXPAND_EXPANDED: u8 = 2;

/// A flat value record produced by expansion and consumed by backup. All
/// fields are in black's perspective.
#[derive(Clone, Debug, Default)]
pub struct NodeEvals {
    pub black_wl: f32,
    pub draw: f32,
    pub black_final_score: f32,
    pub black_ownership: Vec<f32>
}

/// A child slot of a node: a vertex and a prior policy, plus a lazily
/// allocated node that the edge exclusively owns. An uninflated edge is a
/// first-play-urgency slot that costs nothing beyond the slot itself.
pub struct Edge {
    vertex: Vertex,
    policy: f32,
    ptr: AtomicPtr<Node>
}

unsafe impl Send for Edge {}
unsafe impl Sync for Edge {}

impl Drop for Edge {
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Acquire);

        if !ptr.is_null() {
            unsafe { drop(Box::from_raw(ptr)); }
        }
    }
}

impl Edge {
    fn new(vertex: Vertex, policy: f32) -> Edge {
        Edge {
            vertex,
            policy,
            ptr: AtomicPtr::new(ptr::null_mut())
        }
    }

    pub fn vertex(&self) -> Vertex {
        self.vertex
    }

    pub fn policy(&self) -> f32 {
        self.policy
    }

    /// Returns the inflated node of this edge, if any.
    pub fn get(&self) -> Option<&Node> {
        let ptr = self.ptr.load(Ordering::Acquire);

        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    /// Materializes the node of this edge, propagating the parent's
    /// parameter block. Racing callers agree on a single winner, the losing
    /// allocation is dropped.
    pub fn inflate(&self, param: &Arc<Param>) -> &Node {
        let current = self.ptr.load(Ordering::Acquire);

        if !current.is_null() {
            return unsafe { &*current };
        }

        let node = Box::into_raw(Box::new(Node::new(self.vertex, self.policy, param.clone())));

        match self.ptr.compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => unsafe { &*node },
            Err(existing) => {
                unsafe { drop(Box::from_raw(node)); }

                unsafe { &*existing }
            }
        }
    }

    /// Takes the owned node out of this edge, leaving it uninflated.
    fn take(&self) -> Option<Box<Node>> {
        let ptr = self.ptr.swap(ptr::null_mut(), Ordering::AcqRel);

        if ptr.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(ptr) })
        }
    }
}

/// A single position of the search tree.
///
/// The statistics are all atomics updated by `update` with relaxed
/// ordering. The children list is written exactly once by the expanding
/// thread and published by the release store in `expand_done`; any thread
/// that observes `Expanded` therefore sees the fully populated list.
pub struct Node {
    vertex: Vertex,
    policy: f32,

    /// The side to move at this node, `-1` until expansion. A node that was
    /// sealed as terminal keeps the sentinel and has no children.
    color: AtomicI8,

    /// The raw network winrate of this position, in black's perspective.
    black_wl: AtomicF32,

    /// A small bias added to the final score utility of this node.
    score_bonus: AtomicF32,

    visits: AtomicI32,
    accumulated_black_wl: AtomicF64,
    accumulated_draw: AtomicF64,
    accumulated_black_fs: AtomicF64,

    /// Welford running sum of squared distances, for the value variance.
    squared_eval_diff: AtomicF64,

    /// Per-intersection running mean of the ownership, in black's
    /// perspective. An array update, hence the mutex.
    avg_black_ownership: spin::Mutex<Vec<f32>>,

    status: AtomicU8,
    expand_state: AtomicU8,

    /// The number of in-flight selection paths currently occupying this
    /// node, the basis of the virtual loss.
    running_threads: AtomicI32,

    children: UnsafeCell<Vec<Edge>>,

    /// The root exploration noise, indexed by vertex. Empty on every node
    /// that is not a prepared root.
    dirichlet: Vec<f32>,

    param: Arc<Param>
}

unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Drop for Node {
    fn drop(&mut self) {
        debug_assert_eq!(self.running_threads.load(Ordering::Relaxed), 0);
    }
}

impl Node {
    pub fn new(vertex: Vertex, policy: f32, param: Arc<Param>) -> Node {
        Node {
            vertex,
            policy,
            color: AtomicI8::new(-1),
            black_wl: AtomicF32::new(0.5),
            score_bonus: AtomicF32::new(0.0),
            visits: AtomicI32::new(0),
            accumulated_black_wl: AtomicF64::new(0.0),
            accumulated_draw: AtomicF64::new(0.0),
            accumulated_black_fs: AtomicF64::new(0.0),
            squared_eval_diff: AtomicF64::new(0.0),
            avg_black_ownership: spin::Mutex::new(vec! []),
            status: AtomicU8::new(StatusType::Active as u8),
            expand_state: AtomicU8::new(EXPAND_INITIAL),
            running_threads: AtomicI32::new(0),
            children: UnsafeCell::new(vec! []),
            dirichlet: vec! [],
            param
        }
    }

    pub fn vertex(&self) -> Vertex {
        self.vertex
    }

    pub fn policy(&self) -> f32 {
        self.policy
    }

    pub fn param(&self) -> &Arc<Param> {
        &self.param
    }

    /// Returns the side to move at this node, or `None` for an unexpanded
    /// or terminal node.
    pub fn color(&self) -> Option<Color> {
        match self.color.load(Ordering::Relaxed) {
            0 => Some(Color::Black),
            1 => Some(Color::White),
            _ => None
        }
    }

    /// Returns the children of this node. Valid for the expanding thread,
    /// and for any thread after it has observed `Expanded`.
    pub fn children(&self) -> &[Edge] {
        unsafe { &*self.children.get() }
    }

    fn children_mut(&mut self) -> &mut Vec<Edge> {
        unsafe { &mut *self.children.get() }
    }

    /* -------- expand state machine -------- */

    /// Tries to move this node from `Initial` to `Expanding`, returning
    /// whether this thread became the owner of the expansion.
    pub fn acquire_expanding(&self) -> bool {
        self.expand_state.compare_exchange(
            EXPAND_INITIAL,
            EXPAND_EXPANDING,
            Ordering::Acquire,
            Ordering::Relaxed
        ).is_ok()
    }

    /// Publishes the children list and moves this node to `Expanded`.
    fn expand_done(&self) {
        let was = self.expand_state.swap(EXPAND_EXPANDED, Ordering::Release);
        debug_assert_eq!(was, EXPAND_EXPANDING);
    }

    /// Reverts a failed expansion back to `Initial` so that another thread
    /// may retry.
    fn expand_cancel(&self) {
        let was = self.expand_state.swap(EXPAND_INITIAL, Ordering::Release);
        debug_assert_eq!(was, EXPAND_EXPANDING);
    }

    /// Spins (yielding) while another thread is expanding this node.
    pub fn wait_expanded(&self) {
        let backoff = Backoff::new();

        while self.expand_state.load(Ordering::Acquire) == EXPAND_EXPANDING {
            backoff.snooze();
        }
    }

    pub fn expandable(&self) -> bool {
        self.expand_state.load(Ordering::Relaxed) == EXPAND_INITIAL
    }

    pub fn is_expanding(&self) -> bool {
        self.expand_state.load(Ordering::Relaxed) == EXPAND_EXPANDING
    }

    pub fn is_expanded(&self) -> bool {
        self.expand_state.load(Ordering::Acquire) == EXPAND_EXPANDED
    }

    /* -------- status -------- */

    /// Prunes or re-activates this node. Invalid nodes stay invalid.
    pub fn set_active(&self, active: bool) {
        if self.is_valid() {
            let status = if active { StatusType::Active } else { StatusType::Pruned };

            self.status.store(status as u8, Ordering::Relaxed);
        }
    }

    /// Marks this node as logically removed.
    pub fn invalidate(&self) {
        if self.is_valid() {
            self.status.store(StatusType::Invalid as u8, Ordering::Relaxed);
        }
    }

    pub fn is_pruned(&self) -> bool {
        self.status.load(Ordering::Relaxed) == StatusType::Pruned as u8
    }

    pub fn is_active(&self) -> bool {
        self.status.load(Ordering::Relaxed) == StatusType::Active as u8
    }

    pub fn is_valid(&self) -> bool {
        self.status.load(Ordering::Relaxed) != StatusType::Invalid as u8
    }

    /* -------- thread accounting -------- */

    pub fn increment_threads(&self) {
        self.running_threads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_threads(&self) {
        self.running_threads.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get_virtual_loss(&self) -> i32 {
        VIRTUAL_LOSS_COUNT * self.running_threads.load(Ordering::Relaxed)
    }

    /* -------- statistics -------- */

    pub fn get_visits(&self) -> i32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn has_children(&self) -> bool {
        self.color().is_some()
    }

    /// Returns the raw network winrate for `color`.
    pub fn get_net_wl(&self, color: Color) -> f32 {
        let black_wl = self.black_wl.load();

        if color == Color::Black { black_wl } else { 1.0 - black_wl }
    }

    /// Returns the accumulated winrate for `color`, optionally punishing
    /// the node for the selection paths currently inside its sub-tree.
    pub fn get_wl(&self, color: Color, use_virtual_loss: bool) -> f32 {
        let virtual_loss = if use_virtual_loss { self.get_virtual_loss() } else { 0 };
        let visits = self.get_visits() + virtual_loss;
        let mut accumulated_wl = self.accumulated_black_wl.load();

        if color == Color::White && use_virtual_loss {
            accumulated_wl += virtual_loss as f64;
        }

        let eval = (accumulated_wl / visits as f64) as f32;

        if color == Color::Black { eval } else { 1.0 - eval }
    }

    pub fn get_draw(&self) -> f32 {
        (self.accumulated_draw.load() / self.get_visits() as f64) as f32
    }

    pub fn get_final_score(&self, color: Color) -> f32 {
        let score = (self.accumulated_black_fs.load() / self.get_visits() as f64) as f32;

        if color == Color::Black { score } else { -score }
    }

    pub fn set_score_bonus(&self, value: f32) {
        self.score_bonus.store(value);
    }

    /// Returns the squashed score lead of this node relative to
    /// `parent_score`.
    pub fn get_score_utility(&self, color: Color, div: f32, parent_score: f32) -> f32 {
        let score = self.get_final_score(color) + self.score_bonus.load();

        ((score - parent_score) / div).tanh()
    }

    pub fn get_lcb_variance(&self, default_var: f32, visits: i32) -> f32 {
        if visits > 1 {
            (self.squared_eval_diff.load() / (visits - 1) as f64) as f32
        } else {
            default_var
        }
    }

    /// Returns the lower confidence bound of the winrate for `color`. With
    /// a single visit there is no variance yet, so the prior minus a large
    /// constant is returned instead.
    pub fn get_lcb(&self, color: Color) -> f32 {
        let visits = self.get_visits();

        if visits <= 1 {
            return self.policy - 1e6;
        }

        let mean = self.get_wl(color, false);
        let variance = self.get_lcb_variance(1.0, visits);
        let stddev = (variance / visits as f32).sqrt();
        let z = self.param.lcb_entries.cached_t_quantile(visits - 1);

        mean - z * stddev
    }

    /// Returns the running mean ownership for `color`.
    pub fn get_ownership(&self, color: Color) -> Vec<f32> {
        let avg = self.avg_black_ownership.lock();

        avg.iter()
            .map(|&owner| if color == Color::White { -owner } else { owner })
            .collect()
    }

    /// Adds one evaluation to every accumulator of this node. The variance
    /// uses Welford's online algorithm, and the ownership a running mean
    /// with the pre-increment visit count (an acknowledged approximation).
    pub fn update(&self, evals: &NodeEvals) {
        let eval = evals.black_wl as f64;
        let draw = evals.draw as f64;
        let black_final_score = evals.black_final_score as f64;
        let old_acc_eval = self.accumulated_black_wl.load();
        let old_visits = self.visits.load(Ordering::Relaxed);

        let old_delta = if old_visits > 0 { eval - old_acc_eval / old_visits as f64 } else { 0.0 };
        let new_delta = eval - (old_acc_eval + eval) / (old_visits + 1) as f64;
        let delta = old_delta * new_delta;

        self.visits.fetch_add(1, Ordering::Relaxed);
        self.squared_eval_diff.fetch_add(delta);
        self.accumulated_black_wl.fetch_add(eval);
        self.accumulated_draw.fetch_add(draw);
        self.accumulated_black_fs.fetch_add(black_final_score);

        {
            let mut avg = self.avg_black_ownership.lock();

            if avg.len() < evals.black_ownership.len() {
                avg.resize(evals.black_ownership.len(), 0.0);
            }

            for (idx, &eval_owner) in evals.black_ownership.iter().enumerate() {
                let diff_owner = (eval_owner as f64 - avg[idx] as f64) / (old_visits + 1) as f64;

                avg[idx] += diff_owner as f32;
            }
        }
    }

    /// Replaces the raw network winrate, used when a re-used sub-tree
    /// becomes the new root.
    pub fn apply_evals(&self, evals: &NodeEvals) {
        self.black_wl.store(evals.black_wl);
    }

    /* -------- expansion -------- */

    /// Seals this node as terminal: no children, the color sentinel stays
    /// invalid. Returns false if another thread already owns the
    /// expansion.
    pub fn set_terminal(&self) -> bool {
        if !self.acquire_expanding() {
            return false;
        }

        self.expand_done();
        true
    }

    /// Populates the children of this node from a network (or fallback)
    /// evaluation of `state`. Exactly one caller succeeds, every other
    /// caller observes no side effects and gets `false` back.
    ///
    /// On evaluator failure the expansion is cancelled so that another
    /// thread may retry, and the error is propagated.
    pub fn expand_children<E, R>(
        &self,
        evaluator: &E,
        state: &GameState,
        node_evals: &mut NodeEvals,
        config: &AnalysisConfig,
        is_root: bool,
        rng: &mut R
    ) -> Result<bool, SearchError>
        where E: Evaluator, R: Rng
    {
        debug_assert!(state.passes() < 2);

        if self.has_children() {
            return Ok(false);
        }
        if !self.acquire_expanding() {
            return Ok(false);
        }

        let param = &self.param;
        let temp = if is_root { param.root_policy_temp } else { param.policy_temp };
        let color = state.to_move();

        let raw_netlist = if param.no_dcnn && !(param.root_dcnn && is_root) {
            no_dcnn_result(state, color)
        } else {
            match evaluator.evaluate(state, Ensemble::Random, temp) {
                Ok(result) => result,
                Err(err) => {
                    self.expand_cancel();
                    return Err(SearchError::Evaluator(err));
                }
            }
        };

        self.apply_net_output(state, &raw_netlist, node_evals, color, rng);

        let board_size = state.board_size();
        let num_intersections = state.num_intersections();
        let move_number = state.move_number();
        let safe_area = state.strict_safe_area();

        let apply_symm_pruning = param.symm_pruning && board_size as i32 >= move_number;
        let mut moves_hash: Vec<u64> = vec! [];
        let mut symm_base_hash = vec! [0u64; symmetry::NUM_SYMMETRIES];

        for symm in 0..symmetry::NUM_SYMMETRIES {
            if apply_symm_pruning {
                symm_base_hash[symm] = state.compute_symmetry_hash(symm);
            }
        }

        let mut nodelist: Vec<(f32, Vertex)> = vec! [];
        let mut allow_pass = true;
        let mut legal_accumulate = 0.0f32;

        for idx in 0..num_intersections {
            let vtx = idx as Vertex;
            let policy = raw_netlist.probabilities[idx];

            if !state.is_legal_move(vtx, color) ||
                safe_area[idx] ||
                !config.is_move_allowed(vtx, color, move_number)
            {
                continue;
            }

            if apply_symm_pruning {
                let mut hash_found = false;

                for symm in (symmetry::IDENTITY_SYMMETRY + 1)..symmetry::NUM_SYMMETRIES {
                    let symm_vtx = symmetry::transform_vertex(symm, board_size, vtx);
                    let symm_hash = symm_base_hash[symm] ^ state.move_hash(symm_vtx, color);

                    if moves_hash.contains(&symm_hash) {
                        hash_found = true;
                        break;
                    }
                }

                if !hash_found {
                    // the candidate hash ignores captures, which is fine in
                    // the opening where the pruning applies
                    moves_hash.push(state.ko_hash() ^ state.move_hash(vtx, color));
                } else {
                    // the pruned move is still legal, its policy mass goes
                    // into the renormalization sum
                    legal_accumulate += policy;
                    continue;
                }
            }

            nodelist.push((policy, vtx));
            legal_accumulate += policy;
        }

        // too many candidates means pass is likely pointless
        if nodelist.len() > 3 * num_intersections / 4 {
            allow_pass = false;
        }

        if allow_pass || nodelist.is_empty() {
            nodelist.push((raw_netlist.pass_probability, state.pass_vertex()));
            legal_accumulate += raw_netlist.pass_probability;
        }

        if legal_accumulate < 1e-8 {
            // the network focused on the illegal moves
            let uniform = 1.0 / nodelist.len() as f32;

            for node in nodelist.iter_mut() {
                node.0 = uniform;
            }
        } else {
            for node in nodelist.iter_mut() {
                node.0 /= legal_accumulate;
            }
        }

        nodelist.sort_by(|a, b| OrderedFloat(b.0).cmp(&OrderedFloat(a.0)));
        debug_assert!(!nodelist.is_empty());

        let edges = nodelist.into_iter()
            .map(|(policy, vertex)| Edge::new(vertex, policy))
            .collect::<Vec<_>>();

        unsafe { *self.children.get() = edges; }
        self.color.store(color.index() as i8, Ordering::Relaxed);
        self.expand_done();

        Ok(true)
    }

    /// Stores the network output in black's perspective, optionally
    /// blending in a rollout.
    fn apply_net_output<R: Rng>(
        &self,
        state: &GameState,
        raw_netlist: &NetworkResult,
        node_evals: &mut NodeEvals,
        color: Color,
        rng: &mut R
    ) {
        let num_intersections = state.num_intersections();
        let draw = raw_netlist.wdl[1];

        let mut wl = if self.param.use_stm_winrate {
            raw_netlist.stm_winrate
        } else {
            (raw_netlist.wdl[0] - raw_netlist.wdl[2] + 1.0) / 2.0
        };
        let mut final_score = raw_netlist.final_score;

        if color == Color::White {
            wl = 1.0 - wl;
            final_score = -final_score;
        }

        let mut black_ownership = vec! [0.0f32; num_intersections];

        for idx in 0..num_intersections {
            let owner = raw_netlist.ownership[idx];

            black_ownership[idx] = if color == Color::White { -owner } else { owner };
        }

        {
            let mut avg = self.avg_black_ownership.lock();

            avg.clear();
            avg.resize(num_intersections, 0.0);
        }

        let mut black_wl = wl;
        let mut black_fs = final_score;

        if self.param.use_rollout || self.param.no_dcnn {
            let (mc_black_rollout_res, mc_black_rollout_score) =
                rollout::get_black_rollout_result(state, &mut black_ownership, rng);

            if self.param.no_dcnn {
                black_wl = mc_black_rollout_res;
                black_fs = mc_black_rollout_score;
            }
        }

        self.black_wl.store(black_wl);

        node_evals.black_wl = black_wl;
        node_evals.draw = draw;
        node_evals.black_final_score = black_fs;
        node_evals.black_ownership = black_ownership;
    }

    /* -------- root management -------- */

    /// Expands the root and applies the root-only policies: mandatory
    /// inflation, Dirichlet noise, superko removal and the pass score
    /// bonus.
    pub fn prepare_root_node<E, R>(
        &mut self,
        evaluator: &E,
        state: &GameState,
        node_evals: &mut NodeEvals,
        config: &AnalysisConfig,
        rng: &mut R
    ) -> Result<bool, SearchError>
        where E: Evaluator, R: Rng
    {
        let is_root = true;
        let success = self.expand_children(evaluator, state, node_evals, config, is_root, rng)?;

        self.wait_expanded();
        debug_assert!(self.has_children());

        self.inflate_all_children();

        if self.param.dirichlet_noise {
            let legal_move = self.children().len();
            let alpha = self.param.dirichlet_init * self.param.dirichlet_factor / legal_move as f32;

            self.apply_dirichlet_noise(alpha, rng);
        }

        self.kill_root_superkos(state);

        self.set_score_bonus(0.0);

        let pass_vertex = state.pass_vertex();
        let first_pass_bonus = self.param.first_pass_bonus;

        for child in self.children() {
            let node = child.get().expect("root children are inflated");

            // half a point of bonus may efficiently end the game
            node.set_score_bonus(
                if first_pass_bonus && child.vertex() == pass_vertex { 0.5 } else { 0.0 }
            );
        }

        Ok(success)
    }

    pub fn inflate_all_children(&self) {
        let param = self.param.clone();

        for child in self.children() {
            child.inflate(&param);
        }
    }

    /// Draws the root exploration noise: `Gamma(alpha, 1)` per child,
    /// normalized into a distribution over the children's vertices.
    pub fn apply_dirichlet_noise<R: Rng>(&mut self, alpha: f32, rng: &mut R) {
        let vertices = self.children().iter().map(|c| c.vertex()).collect::<Vec<_>>();
        let gamma = Gamma::new(alpha as f64, 1.0).expect("the concentration must be positive");
        let mut buffer = vertices.iter()
            .map(|_| gamma.sample(rng) as f32)
            .collect::<Vec<_>>();
        let sample_sum: f32 = buffer.iter().sum();

        let size = vertices.iter().cloned().max().unwrap_or(0) as usize + 1;

        self.dirichlet = vec! [0.0; size];

        // if the noise vector sums to zero or a denormal, do not try to
        // normalize it
        if sample_sum < ::std::f32::MIN_POSITIVE {
            return;
        }

        for value in buffer.iter_mut() {
            *value /= sample_sum;
        }

        for (i, &vertex) in vertices.iter().enumerate() {
            self.dirichlet[vertex as usize] = buffer[i];
        }
    }

    /// Returns the noise buffer of a prepared root, indexed by vertex.
    pub fn dirichlet(&self) -> &[f32] {
        &self.dirichlet
    }

    /// Returns the prior of the given child as seen by the selection, with
    /// the root noise mixed in when enabled.
    fn get_search_policy(&self, child: &Edge, noise: bool) -> f32 {
        let policy = child.policy();

        if noise {
            let vertex = child.vertex() as usize;

            if vertex < self.dirichlet.len() {
                let epsilon = self.param.dirichlet_epsilon;

                return policy * (1.0 - epsilon) + epsilon * self.dirichlet[vertex];
            }
        }

        policy
    }

    /// Invalidates and physically removes every root child whose move would
    /// repeat an earlier position.
    pub fn kill_root_superkos(&mut self, state: &GameState) {
        let pass_vertex = state.pass_vertex();
        let param = self.param.clone();

        for child in self.children() {
            let vtx = child.vertex();
            let mut fork_state = state.clone();

            fork_state.play_move(vtx);

            if vtx != pass_vertex && fork_state.is_superko() {
                child.inflate(&param).invalidate();
            }
        }

        self.children_mut().retain(|child| {
            child.get().map_or(true, |node| node.is_valid())
        });
    }

    /// Extracts the child for `vertex`, for sub-tree reuse. The returned
    /// node becomes the caller's to own.
    pub fn pop_child(&mut self, vertex: Vertex) -> Option<Box<Node>> {
        let param = self.param.clone();
        let children = self.children_mut();
        let position = children.iter().position(|child| child.vertex() == vertex)?;

        children[position].inflate(&param);

        let node = children[position].take();

        children.remove(position);
        node
    }

    pub fn get_child(&self, vertex: Vertex) -> Option<&Node> {
        let param = self.param.clone();

        self.children().iter()
            .find(|child| child.vertex() == vertex)
            .map(|child| child.inflate(&param))
    }

    /* -------- selection -------- */

    /// Returns the child with the highest prior. Used when no statistics
    /// are available yet. Children that are being expanded are penalized by
    /// subtracting one from their prior.
    pub fn prob_select_child(&self) -> &Node {
        self.wait_expanded();
        debug_assert!(self.has_children());

        let mut best_node: Option<&Edge> = None;
        let mut best_prob = ::std::f32::MIN;

        for child in self.children() {
            let node = child.get();

            // the node is pruned or invalid, skip it
            if let Some(node) = node {
                if !node.is_active() {
                    continue;
                }
            }

            let mut prob = child.policy();

            if let Some(node) = node {
                if node.is_expanding() {
                    prob = -1.0 + prob;
                }
            }

            if prob > best_prob {
                best_prob = prob;
                best_node = Some(child);
            }
        }

        best_node.expect("no active children").inflate(&self.param)
    }

    /// AlphaZero-style selection. At the root the Gumbel selection takes
    /// over for as long as its playout budget lasts.
    pub fn puct_select_child<R: Rng>(&self, color: Color, is_root: bool, rng: &mut R) -> &Node {
        self.wait_expanded();
        debug_assert!(self.has_children());

        if is_root && self.should_apply_gumbel() {
            return self.gumbel_select_child(color, false, rng);
        }

        let mut parentvisits = 0;
        let mut total_visited_policy = 0.0f32;

        for child in self.children() {
            if let Some(node) = child.get() {
                if node.is_valid() {
                    let visits = node.get_visits();

                    parentvisits += visits;
                    if visits > 0 {
                        total_visited_policy += child.policy();
                    }
                }
            }
        }

        let param = &self.param;
        let noise = is_root && param.dirichlet_noise;
        let fpu_reduction_factor = if is_root { param.fpu_root_reduction } else { param.fpu_reduction };

        let cpuct = param.cpuct_init + param.cpuct_base_factor *
            ((parentvisits as f32 + param.cpuct_base + 1.0) / param.cpuct_base).ln();
        let numerator = (parentvisits as f32).sqrt();
        let fpu_reduction = fpu_reduction_factor * total_visited_policy.sqrt();
        let fpu_value = self.get_net_wl(color) - fpu_reduction;
        let parent_score = self.get_final_score(color);

        let mut best_node: Option<&Edge> = None;
        let mut best_value = ::std::f32::MIN;

        for child in self.children() {
            let node = child.get();

            // the node is pruned or invalid, skip it
            if let Some(node) = node {
                if !node.is_active() {
                    continue;
                }
            }

            // unvisited children take the first play urgency value
            let mut q_value = fpu_value;
            let mut denom = 1.0f32;
            let mut utility = 0.0f32;

            if let Some(node) = node {
                let visits = node.get_visits();

                if node.is_expanding() {
                    // like virtual loss, there is another thread inside
                    q_value = -1.0 - fpu_reduction;
                } else if visits > 0 {
                    let eval = node.get_wl(color, true);
                    let draw_value = node.get_draw() * param.draw_factor;

                    q_value = eval + draw_value;
                    utility += param.score_utility_factor *
                        node.get_score_utility(color, param.score_utility_div, parent_score);
                }

                denom += visits as f32;
            }

            let psa = self.get_search_policy(child, noise);
            let puct = cpuct * psa * (numerator / denom);
            let value = q_value + puct + utility;

            if value > best_value {
                best_value = value;
                best_node = Some(child);
            }
        }

        best_node.expect("no active children").inflate(&self.param)
    }

    /// Classical UCB1 selection for the rollout mode, over a width-limited
    /// candidate window that grows with the parent visits and extends on
    /// capture moves.
    pub fn uct_select_child(&self, color: Color, _is_root: bool, state: &GameState) -> &Node {
        self.wait_expanded();
        debug_assert!(self.has_children());

        let mut parentvisits = 0;

        for child in self.children() {
            if let Some(node) = child.get() {
                if node.is_valid() {
                    parentvisits += node.get_visits();
                }
            }
        }

        let cpuct = self.param.cpuct_init;
        let parent_qvalue = self.get_wl(color, false);
        let numerator = ((parentvisits + 1) as f32).ln();

        let mut best_node: Option<&Edge> = None;
        let mut best_value = ::std::f32::MIN;
        let mut width = compute_width(parentvisits).max(1);
        let mut i = 0;

        // TODO: sort the candidate buffer according to a priority value,
        // for now the stored (policy descending) order is scanned
        for child in self.children() {
            if state.is_capture_move(child.vertex(), color) {
                width += 1;
            }

            i += 1;
            if i > width {
                break;
            }

            let node = child.get();

            if let Some(node) = node {
                if !node.is_active() {
                    continue;
                }
            }

            let mut q_value = parent_qvalue;
            let mut visits = 0;

            if let Some(node) = node {
                visits = node.get_visits();

                if node.is_expanding() {
                    q_value = -1.0;
                } else if visits > 0 {
                    q_value = node.get_wl(color, true);
                }
            }

            let denom = 1.0 + visits as f32;
            let psa = child.policy();
            let bonus = (1000.0 / (parentvisits as f32 + 1000.0)).sqrt() * psa;
            let uct = cpuct * (numerator / denom).sqrt();
            let value = q_value + uct + bonus;

            if value > best_value {
                best_value = value;
                best_node = Some(child);
            }
        }

        best_node.expect("no active children").inflate(&self.param)
    }

    /* -------- gumbel selection -------- */

    /// Returns true while the root playout budget of the Gumbel selection
    /// has not been consumed.
    pub fn should_apply_gumbel(&self) -> bool {
        // the parent's perspective visit count excludes the root visit
        let visits = self.get_visits() - 1;

        self.param.gumbel && self.param.gumbel_playouts > visits
    }

    /// Returns the non-normalized completed Q value: the winrate mixed with
    /// the score lead so that winning positions also optimize the margin.
    pub fn get_gumbel_q_value(&self, color: Color, parent_score: f32) -> f32 {
        let param = &self.param;

        self.get_wl(color, false) + param.completed_q_utility_factor *
            self.get_score_utility(color, param.score_utility_div, parent_score)
    }

    /// Progressively increases the scale of the Q value relative to the
    /// prior policy.
    fn normalize_completed_q(&self, completed_q: f32, max_visits: i32) -> f32 {
        (50.0 + max_visits as f32) * 0.1 * completed_q
    }

    /// Sequential-halving selection over the Gumbel-perturbed priors.
    pub fn gumbel_select_child<R: Rng>(&self, color: Color, only_max_visit: bool, rng: &mut R) -> &Node {
        self.wait_expanded();
        debug_assert!(self.has_children());

        let gumbel_type1: Gumbel<f32> = Gumbel::new(0.0, 1.0).expect("valid gumbel scale");
        let size = self.children().iter().map(|c| c.vertex()).max().unwrap_or(0) as usize + 1;
        let mut gumbel_logits = vec! [-1e6f32; size];
        let mut parentvisits = 0;
        let mut max_visits = 0;

        for child in self.children() {
            gumbel_logits[child.vertex() as usize] =
                gumbel_type1.sample(rng) + ((child.policy() as f64 + 1e-8).ln()) as f32;

            if let Some(node) = child.get() {
                if node.is_valid() {
                    let visits = node.get_visits();

                    parentvisits += visits;
                    max_visits = max_visits.max(visits);
                }
            }
        }

        let considered_moves = self.param.gumbel_considered_moves.min(self.children().len());

        self.process_gumbel_logits(
            &mut gumbel_logits,
            color,
            parentvisits,
            max_visits,
            considered_moves,
            -1e6,
            only_max_visit
        );

        let mut best_node: Option<&Edge> = None;
        let mut best_value = ::std::f32::MIN;

        for child in self.children() {
            let value = gumbel_logits[child.vertex() as usize];

            if value > best_value {
                best_value = value;
                best_node = Some(child);
            }
        }

        best_node.expect("no active children").inflate(&self.param)
    }

    /// Restricts the Gumbel logits to the children whose visit count equals
    /// the sequential halving target, adding the normalized completed Q of
    /// the visited ones.
    fn process_gumbel_logits(
        &self,
        gumbel_logits: &mut [f32],
        color: Color,
        root_visits: i32,
        max_visits: i32,
        considered_moves: usize,
        mval: f32,
        only_max_visit: bool
    ) {
        let parent_score = self.get_final_score(color);
        let considered_visits = if only_max_visit {
            max_visits
        } else {
            sequential_halving_visits(root_visits, considered_moves)
        };

        for child in self.children() {
            let node = child.get();

            if let Some(node) = node {
                if !node.is_active() {
                    continue;
                }
            }

            let visits = node.map_or(0, |n| n.get_visits());

            if visits == considered_visits {
                if visits > 0 {
                    let node = node.expect("a visited child is inflated");

                    gumbel_logits[child.vertex() as usize] += self.normalize_completed_q(
                        node.get_gumbel_q_value(color, parent_score),
                        max_visits
                    );
                }
                // every completed Q is the same when the target is zero
            } else {
                gumbel_logits[child.vertex() as usize] = mval;
            }
        }
    }

    /// Returns the final move of the Gumbel root: the child with the
    /// maximum visit count wins the last comparison.
    pub fn get_gumbel_move<R: Rng>(&self, rng: &mut R) -> Vertex {
        self.wait_expanded();
        debug_assert!(self.has_children());

        let color = self.color().expect("an expanded node has a color");

        self.gumbel_select_child(color, true, rng).vertex()
    }

    /// Returns the normalized prior distribution over all children mixed
    /// with their completed Q values, indexed by intersection with the pass
    /// move last.
    pub fn get_prob_logits_completed_q(&self, state: &GameState) -> Vec<f32> {
        let num_intersections = state.num_intersections();
        let mut prob = vec! [0.0f32; num_intersections + 1];
        let mut acc = 0.0f32;

        for child in self.children() {
            let vtx = child.vertex();
            let idx = if vtx == state.pass_vertex() { num_intersections } else { vtx as usize };

            acc += child.policy();
            prob[idx] = child.policy();
        }

        for value in prob.iter_mut() {
            *value /= acc;
        }

        self.mix_logits_completed_q(state, &mut prob);
        prob
    }

    /// Mixes the completed Q values into the given probability vector, as
    /// used for the improved policy target.
    pub fn mix_logits_completed_q(&self, state: &GameState, prob: &mut Vec<f32>) {
        let num_intersections = state.num_intersections();
        let color = state.to_move();

        if num_intersections + 1 != prob.len() {
            return;
        }

        let parent_score = self.get_final_score(color);
        let mut max_visits = 0;
        let mut parentvisits = 0;
        let mut weighted_q = 0.0f32;
        let mut weighted_pi = 0.0f32;

        for child in self.children() {
            let node = child.get();
            let visits = match node {
                Some(node) if node.is_active() => node.get_visits(),
                _ => 0
            };

            parentvisits += visits;
            max_visits = max_visits.max(visits);

            if visits > 0 {
                let node = node.expect("a visited child is inflated");

                weighted_q += child.policy() * node.get_gumbel_q_value(color, parent_score);
                weighted_pi += child.policy();
            }
        }

        // the completed Q of every child, the unvisited ones approximated
        // by the parent-weighted mean
        let raw_value = self.get_gumbel_q_value(color, parent_score);
        let mut completed_q_list = vec! [];
        let mut max_completed_q = ::std::f32::NEG_INFINITY;
        let mut min_completed_q = ::std::f32::INFINITY;

        for child in self.children() {
            let node = child.get();
            let visits = match node {
                Some(node) if node.is_active() => node.get_visits(),
                _ => 0
            };

            let completed_q = if visits == 0 {
                if weighted_pi > 0.0 {
                    (raw_value + (parentvisits as f32 / weighted_pi) * weighted_q) /
                        (1 + parentvisits) as f32
                } else {
                    raw_value
                }
            } else {
                node.expect("a visited child is inflated").get_gumbel_q_value(color, parent_score)
            };

            max_completed_q = max_completed_q.max(completed_q);
            min_completed_q = min_completed_q.min(completed_q);
            completed_q_list.push(completed_q);
        }

        // min-max rescale before mixing
        for q in completed_q_list.iter_mut() {
            *q = (*q - min_completed_q) / (max_completed_q - min_completed_q).max(1e-8);
        }

        let mut logits_q = vec! [-1e6f32; num_intersections + 1];

        for (i, child) in self.children().iter().enumerate() {
            let vtx = child.vertex();
            let idx = if vtx == state.pass_vertex() { num_intersections } else { vtx as usize };
            let logits = ((prob[idx] as f64 + 1e-8).ln()) as f32;

            logits_q[idx] = logits + self.normalize_completed_q(completed_q_list[i], max_visits);
        }

        *prob = softmax(&logits_q, 1.0);

        // prune the noise floor and renormalize
        let psize = prob.len() as f64;
        let noise_threshold = 1.0 / (psize * psize);
        let mut remaining = 0.0f64;

        for value in prob.iter_mut() {
            if (*value as f64) < noise_threshold {
                *value = 0.0;
            } else {
                remaining += *value as f64;
            }
        }

        for value in prob.iter_mut() {
            *value = (*value as f64 / remaining) as f32;
        }
    }

    /* -------- best move and reporting -------- */

    /// Returns the utility-adjusted lower confidence bound of every active,
    /// visited child, sorted best first.
    pub fn get_lcb_utility_list(&self, color: Color) -> Vec<(f32, Vertex)> {
        self.wait_expanded();
        debug_assert!(self.has_children());

        let param = &self.param;
        let lcb_utility_factor = param.lcb_utility_factor.max(0.0);
        let lcb_reduction = param.lcb_reduction.max(0.0).min(1.0);
        let score = self.get_final_score(color);
        let score_utility_div = param.score_utility_div;

        let mut parentvisits = 0;

        for child in self.children() {
            if let Some(node) = child.get() {
                if node.is_active() {
                    parentvisits += node.get_visits();
                }
            }
        }

        let mut list = vec! [];

        for child in self.children() {
            // uninflated, pruned or invalid children are skipped
            let node = match child.get() {
                Some(node) if node.is_active() => node,
                _ => continue
            };

            let visits = node.get_visits();

            if visits > 0 {
                let lcb = node.get_lcb(color);
                let utility = lcb_utility_factor *
                    node.get_score_utility(color, score_utility_div, score);
                let ulcb = (lcb + utility) * (1.0 - lcb_reduction) +
                    lcb_reduction * (visits as f32 / parentvisits as f32);

                list.push((ulcb, node.vertex()));
            }
        }

        list.sort_by(|a, b| OrderedFloat(b.0).cmp(&OrderedFloat(a.0)));
        list
    }

    /// Returns the best move of this node by the LCB utility criterion,
    /// falling back to the prior when nothing has been visited yet.
    pub fn get_best_move(&self) -> Vertex {
        self.wait_expanded();
        debug_assert!(self.has_children());

        let color = self.color().expect("an expanded node has a color");
        let lcblist = self.get_lcb_utility_list(color);

        match lcblist.first() {
            Some(&(_, vertex)) => vertex,
            None => self.prob_select_child().vertex()
        }
    }

    /// Picks a move with probability proportional to the visit counts
    /// raised to `1 / temp`, ignoring children with at most `min_visits`
    /// visits.
    pub fn randomize_first_proportionally<R: Rng>(&self, temp: f32, min_visits: i32, rng: &mut R) -> Vertex {
        let mut accum = 0.0f64;
        let mut accum_vector = vec! [];

        for child in self.children() {
            if let Some(node) = child.get() {
                let visits = node.get_visits();

                if visits > min_visits {
                    accum += (visits as f64).powf(1.0 / temp as f64);
                    accum_vector.push((accum, child.vertex()));
                }
            }
        }

        if accum_vector.is_empty() {
            if min_visits > 0 {
                return self.randomize_first_proportionally(temp, 0, rng);
            }

            return self.get_best_move();
        }

        let pick = rng.gen_range(0.0..accum);

        for &(threshold, vertex) in accum_vector.iter() {
            if pick < threshold {
                return vertex;
            }
        }

        accum_vector.last().unwrap().1
    }

    /// Returns `-log(best_visits / parent_visits)`, or `-1` when it is not
    /// defined yet.
    pub fn compute_kl_divergence(&self) -> f32 {
        let vtx = self.get_best_move();
        let mut parentvisits = 0;
        let mut best_visits = 0;

        for child in self.children() {
            if let Some(node) = child.get() {
                if node.is_active() {
                    let visits = node.get_visits();

                    parentvisits += visits;
                    if child.vertex() == vtx {
                        best_visits = visits;
                    }
                }
            }
        }

        if parentvisits == best_visits {
            0.0
        } else if parentvisits == 0 || best_visits == 0 {
            -1.0
        } else {
            -((best_visits as f32) / (parentvisits as f32)).ln()
        }
    }

    /// Returns `sqrt(100 * variance)` of the accumulated evaluations.
    pub fn compute_tree_complexity(&self) -> f32 {
        let visits = self.get_visits();

        if visits <= 1 {
            return 0.0;
        }

        let variance = self.get_lcb_variance(1.0, visits);

        (100.0 * variance).sqrt()
    }

    /// Counts the inflated nodes and the uninflated edges of this sub-tree.
    pub fn compute_node_count(&self) -> (usize, usize) {
        let mut nodes = 1;
        let mut edges = 0;
        let mut stack: Vec<&Node> = vec! [self];

        while let Some(current) = stack.pop() {
            if !current.is_expanded() {
                continue;
            }

            for child in current.children() {
                match child.get() {
                    Some(node) => {
                        nodes += 1;

                        if !node.is_expanding() {
                            stack.push(node);
                        }
                    },
                    None => { edges += 1; }
                }
            }
        }

        (nodes, edges)
    }

    /// Returns the estimated memory of this sub-tree in MiB. There is some
    /// error because expanding sub-trees are not fully counted.
    pub fn estimated_memory_mib(&self) -> f64 {
        let (nodes, edges) = self.compute_node_count();
        let node_mem = mem::size_of::<Node>() + mem::size_of::<Edge>();
        let edge_mem = mem::size_of::<Edge>();

        (nodes * node_mem + edges * edge_mem) as f64 / (1024.0 * 1024.0)
    }

    /// Returns the principal variation: the best move of every node along
    /// the way until a node without children.
    pub fn get_pv_string(&self, state: &GameState) -> String {
        let mut pvlist = vec! [];
        let mut next = self;

        while next.has_children() {
            let vtx = next.get_best_move();

            pvlist.push(state.vertex_to_text(vtx));

            match next.get_child(vtx) {
                Some(child) => { next = child; },
                None => break
            }
        }

        pvlist.join(" ")
    }

    /// Returns the averaged ownership of `node` as a whitespace separated
    /// list, row by row from the top.
    pub fn ownership_to_string(&self, state: &GameState, color: Color, name: &str) -> String {
        let board_size = state.board_size();
        let ownership = self.get_ownership(color);
        let mut out = format!("{} ", name);

        for y in (0..board_size).rev() {
            for x in 0..board_size {
                let idx = state.get_index(x, y);
                let owner = ownership.get(idx).cloned().unwrap_or(0.0);

                write!(out, "{:.6} ", owner).unwrap();
            }
        }

        out
    }

    /// Returns a table of the search list and the tree status, suitable for
    /// logging.
    pub fn to_verbose_string(&self, state: &GameState, color: Color) -> String {
        let lcblist = self.get_lcb_utility_list(color);
        let parentvisits = (self.get_visits() - 1).max(1);
        let mut out = String::new();

        if lcblist.is_empty() {
            out.push_str(" * Search List: N/A\n");
            return out;
        }

        out.push_str(" * Search List:\n");
        out.push_str(&format!(
            "{:>6}{:>10}{:>7}{:>7}{:>7}{:>7}{:>7}{:>7}\n",
            "move", "visits", "WL(%)", "LCB(%)", "D(%)", "P(%)", "N(%)", "S"
        ));

        for &(lcb, vertex) in lcblist.iter() {
            let lcb = lcb.max(0.0);
            let child = self.get_child(vertex).expect("a listed child is inflated");
            let visits = child.get_visits();
            let probability = child.policy();
            let final_score = child.get_final_score(color);
            let eval = child.get_wl(color, false);
            let draw = child.get_draw();
            let visit_ratio = visits as f32 / parentvisits as f32;
            let pv_string = format!("{} {}", state.vertex_to_text(vertex), child.get_pv_string(state));

            out.push_str(&format!(
                "{:>6}{:>10}{:>7.2}{:>7.2}{:>7.2}{:>7.2}{:>7.2}{:>7.2}{:>6} {}\n",
                state.vertex_to_text(vertex),
                visits,
                100.0 * eval,
                100.0 * lcb,
                100.0 * draw,
                100.0 * probability,
                100.0 * visit_ratio,
                final_score,
                "| PV:",
                pv_string
            ));
        }

        let (nodes, edges) = self.compute_node_count();

        out.push_str(" * Tree Status:\n");
        out.push_str(&format!("{:>10} {:.4}\n", "root KL:", self.compute_kl_divergence()));
        out.push_str(&format!("{:>10} {:.4}\n", "root C:", self.compute_tree_complexity()));
        out.push_str(&format!("{:>10} {}\n", "nodes:", nodes));
        out.push_str(&format!("{:>10} {}\n", "edges:", edges));
        out.push_str(&format!("{:>10} {:.4} (MiB)\n", "memory:", self.estimated_memory_mib()));

        out
    }

    /// Returns the analysis lines of the current tree, one `info move` per
    /// reported child.
    pub fn to_analysis_string(&self, state: &GameState, color: Color, config: &AnalysisConfig) -> String {
        let lcblist = self.get_lcb_utility_list(color);

        if lcblist.is_empty() {
            return String::new();
        }

        let root_visits = ((self.get_visits() - 1).max(1)) as f32;
        let mut out = String::new();
        let mut order = 0;

        for &(lcb, vertex) in lcblist.iter() {
            if order + 1 > config.max_moves {
                break;
            }

            let lcb = lcb.max(0.0);
            let child = self.get_child(vertex).expect("a listed child is inflated");
            let visits = child.get_visits();

            if self.param.no_dcnn && (visits as f32 / root_visits) < 0.01 {
                // cut off children below one percent
                continue;
            }

            let winrate = child.get_wl(color, false);
            let final_score = child.get_final_score(color);
            let prior = child.policy();
            let kl = child.compute_kl_divergence();
            let complexity = child.compute_tree_complexity();
            let pv_string = format!("{} {}", state.vertex_to_text(vertex), child.get_pv_string(state));

            write!(
                out,
                "info move {} visits {} winrate {:.6} scorelead {:.6} prior {:.6} lcb {:.6} kl {:.6} complexity {:.6} order {} pv {}",
                state.vertex_to_text(vertex),
                visits,
                winrate,
                final_score,
                prior,
                lcb,
                kl,
                complexity,
                order,
                pv_string
            ).unwrap();

            if config.show_moves_ownership {
                out.push_str(&child.ownership_to_string(state, color, "movesownership"));
            }

            order += 1;
        }

        if config.show_ownership {
            out.push_str(&self.ownership_to_string(state, color, "ownership"));
        }

        out.push('\n');
        out
    }
}

/// Returns the width of the UCT candidate window for the given parent
/// visit count, roughly one extra candidate per doubling.
fn compute_width(parentvisits: i32) -> usize {
    ((parentvisits + 1) as f32).log2() as usize + 1
}

/// Returns the visit count a child must have to be considered by the
/// sequential halving scheduler at the given root visit count.
///
/// Each epoch spends `log2(m) * m` playouts over `m` considered moves
/// (rounded up to a power of two): every round halves the candidate set and
/// doubles the visits handed to the survivors.
fn sequential_halving_visits(root_visits: i32, considered_moves: usize) -> i32 {
    let n = (considered_moves.max(1) as f32).log2() as i32 + 1;
    let adj_considered_moves = 1i32 << (n - 1);

    let mut table = vec! [0i32; adj_considered_moves as usize];

    {
        let mut w = adj_considered_moves;
        let mut r = 1;

        for _ in 0..n {
            for j in 0..w {
                table[(adj_considered_moves - j - 1) as usize] += r;
            }

            w /= 2;
            r *= 2;
        }
    }

    let visits_per_round = n * adj_considered_moves;
    let rounds = root_visits / visits_per_round;
    let visits_this_round = root_visits - rounds * visits_per_round;
    let m = visits_this_round / adj_considered_moves;

    let mut height = 0;
    let mut width = adj_considered_moves;
    let mut offset = 0;

    {
        let mut t = 1;

        for _ in 0..m {
            height += t;
            t *= 2;
            width /= 2;
            offset += width;
        }
    }

    let idx = offset + root_visits % width;

    table[idx as usize] * rounds + height + (visits_this_round - m * adj_considered_moves) / width
}

/// Returns a synthesized network result from the classical policy, used
/// when the neural network is disabled.
fn no_dcnn_result(state: &GameState, color: Color) -> NetworkResult {
    let mut out = NetworkResult::with_board_size(state.board_size(), state.komi());

    out.probabilities = state.gammas_policy(color);

    // a little mass on the pass move avoids a dead end when there is no
    // legal move left
    out.pass_probability = 0.1 / state.num_intersections() as f32;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoshi_nn::NetworkError;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use std::thread;

    /// An evaluator with a fixed prior distribution, in the spirit of a
    /// pre-canned network.
    struct FakeEvaluator {
        probabilities: Vec<f32>,
        pass_probability: f32,
        stm_winrate: f32,
        final_score: f32
    }

    impl FakeEvaluator {
        fn uniform(board_size: usize) -> Self {
            let num_intersections = board_size * board_size;

            Self {
                probabilities: vec! [0.012345; num_intersections],
                pass_probability: 0.1,
                stm_winrate: 0.5,
                final_score: 0.0
            }
        }
    }

    impl Evaluator for FakeEvaluator {
        fn evaluate(&self, state: &GameState, _ensemble: Ensemble, _temperature: f32) -> Result<NetworkResult, NetworkError> {
            let mut out = NetworkResult::with_board_size(state.board_size(), state.komi());

            out.probabilities = self.probabilities.clone();
            out.pass_probability = self.pass_probability;
            out.stm_winrate = self.stm_winrate;
            out.wdl = [self.stm_winrate, 0.0, 1.0 - self.stm_winrate];
            out.final_score = self.final_score;
            Ok(out)
        }
    }

    struct BrokenEvaluator;

    impl Evaluator for BrokenEvaluator {
        fn evaluate(&self, _state: &GameState, _ensemble: Ensemble, _temperature: f32) -> Result<NetworkResult, NetworkError> {
            Err(NetworkError::Unavailable)
        }
    }

    fn expand(node: &Node, state: &GameState, evaluator: &FakeEvaluator) -> NodeEvals {
        let mut evals = NodeEvals::default();
        let mut rng = SmallRng::seed_from_u64(42);
        let expanded = node.expand_children(
            evaluator,
            state,
            &mut evals,
            &AnalysisConfig::default(),
            false,
            &mut rng
        ).unwrap();

        assert!(expanded);
        evals
    }

    #[test]
    fn expansion_succeeds_at_most_once() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        let num_expanded = thread::scope(|scope| {
            let handles = (0..8).map(|i| {
                let node = &node;
                let state = &state;
                let evaluator = &evaluator;

                scope.spawn(move || {
                    let mut evals = NodeEvals::default();
                    let mut rng = SmallRng::seed_from_u64(i);

                    node.expand_children(
                        evaluator,
                        state,
                        &mut evals,
                        &AnalysisConfig::default(),
                        false,
                        &mut rng
                    ).unwrap()
                })
            }).collect::<Vec<_>>();

            handles.into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|&expanded| expanded)
                .count()
        });

        assert_eq!(num_expanded, 1);
        assert!(node.is_expanded());
    }

    #[test]
    fn children_are_sorted_by_policy() {
        let state = GameState::new(9, 7.5);
        let mut evaluator = FakeEvaluator::uniform(9);

        for (i, p) in evaluator.probabilities.iter_mut().enumerate() {
            *p = (i as f32) / 1000.0;
        }

        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);

        let children = node.children();

        for i in 1..children.len() {
            assert!(children[i - 1].policy() >= children[i].policy());
        }
    }

    #[test]
    fn policy_sums_to_one() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);

        let total: f32 = node.children().iter().map(|c| c.policy()).sum();

        assert!((total - 1.0).abs() < 1e-5, "total policy {}", total);
    }

    #[test]
    fn pass_is_suppressed_when_board_is_open() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);

        // 81 candidates > 3 * 81 / 4
        assert_eq!(node.children().len(), 81);
        assert!(node.children().iter().all(|c| c.vertex() != state.pass_vertex()));
    }

    #[test]
    fn pass_is_forced_when_no_candidate_remains() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));

        // veto every intersection
        let mut config = AnalysisConfig::default();
        for v in 0..81 {
            config.avoid(Color::Black, v, 0, i32::max_value());
        }

        let mut evals = NodeEvals::default();
        let mut rng = SmallRng::seed_from_u64(42);
        assert!(node.expand_children(&evaluator, &state, &mut evals, &config, false, &mut rng).unwrap());

        assert_eq!(node.children().len(), 1);
        assert_eq!(node.children()[0].vertex(), state.pass_vertex());
        assert!((node.children()[0].policy() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn zero_policy_mass_falls_back_to_uniform() {
        let state = GameState::new(9, 7.5);
        let mut evaluator = FakeEvaluator::uniform(9);

        for p in evaluator.probabilities.iter_mut() {
            *p = 0.0;
        }
        evaluator.pass_probability = 0.0;

        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);

        let children = node.children();
        let uniform = 1.0 / children.len() as f32;

        for child in children.iter() {
            assert!((child.policy() - uniform).abs() < 1e-6);
        }
    }

    #[test]
    fn symmetry_pruning_keeps_one_candidate_per_orbit() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let mut param = Param::default();
        param.symm_pruning = true;

        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(param));
        expand(&node, &state, &evaluator);

        // the 81 first moves collapse into 15 orbits under the dihedral
        // group, and with so few candidates the pass child is kept
        let children = node.children();
        let num_pass = children.iter().filter(|c| c.vertex() == state.pass_vertex()).count();

        assert_eq!(children.len(), 16);
        assert_eq!(num_pass, 1);

        // the pruned orbits keep their mass in the renormalization sum, so
        // the kept representatives sum to less than one
        let total: f32 = children.iter().map(|c| c.policy()).sum();
        let expected = (15.0 * 0.012345 + 0.1) / (81.0 * 0.012345 + 0.1);

        assert!((total - expected).abs() < 1e-5, "total {} expected {}", total, expected);
    }

    #[test]
    fn expansion_failure_is_retryable() {
        let state = GameState::new(9, 7.5);
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        let mut evals = NodeEvals::default();
        let mut rng = SmallRng::seed_from_u64(42);

        let result = node.expand_children(
            &BrokenEvaluator,
            &state,
            &mut evals,
            &AnalysisConfig::default(),
            false,
            &mut rng
        );

        assert!(result.is_err());
        assert!(node.expandable(), "a failed expansion must be retryable");

        // and the retry works
        expand(&node, &state, &FakeEvaluator::uniform(9));
        assert!(node.is_expanded());
    }

    #[test]
    fn terminal_nodes_have_no_children() {
        let node = Node::new(81, 0.5, Arc::new(Param::default()));

        assert!(node.set_terminal());
        assert!(!node.set_terminal());
        assert!(node.is_expanded());
        assert!(!node.has_children());
    }

    #[test]
    fn update_accumulates_and_stays_bounded() {
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        let mut evals = NodeEvals::default();
        evals.black_ownership = vec! [0.0; 25];

        for i in 0..100 {
            evals.black_wl = if i % 2 == 0 { 1.0 } else { 0.0 };
            evals.draw = 0.25;
            evals.black_final_score = 2.0;
            node.update(&evals);

            let visits = node.get_visits();

            assert_eq!(visits, i + 1);
            assert!(node.accumulated_black_wl.load().abs() <= visits as f64);
            assert!(node.accumulated_draw.load().abs() <= visits as f64);
        }

        assert!((node.get_wl(Color::Black, false) - 0.5).abs() < 1e-6);
        assert!((node.get_draw() - 0.25).abs() < 1e-6);
        assert!((node.get_final_score(Color::Black) - 2.0).abs() < 1e-6);
        assert!((node.get_final_score(Color::White) + 2.0).abs() < 1e-6);
    }

    #[test]
    fn welford_variance_matches_direct_computation() {
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        let values = [0.1f32, 0.9, 0.4, 0.7, 0.2, 0.8, 0.5, 0.5, 0.3, 0.6];
        let mut evals = NodeEvals::default();

        for &v in values.iter() {
            evals.black_wl = v;
            node.update(&evals);
        }

        let mean: f64 = values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64;
        let direct: f64 = values.iter().map(|&v| (v as f64 - mean) * (v as f64 - mean)).sum();
        let welford = node.squared_eval_diff.load();

        assert!(
            (welford - direct).abs() < 1e-9 * values.len() as f64,
            "welford {} direct {}",
            welford,
            direct
        );
    }

    #[test]
    fn ownership_mean_tracks_the_samples() {
        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        let mut evals = NodeEvals::default();

        evals.black_ownership = vec! [1.0; 4];
        node.update(&evals);
        evals.black_ownership = vec! [0.0; 4];
        node.update(&evals);

        let ownership = node.get_ownership(Color::Black);

        for &o in ownership.iter() {
            assert!((o - 0.5).abs() < 1e-6);
        }

        let flipped = node.get_ownership(Color::White);

        for &o in flipped.iter() {
            assert!((o + 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn dirichlet_noise_is_normalized() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let mut param = Param::default();
        param.dirichlet_noise = true;

        let mut node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(param));
        expand(&node, &state, &evaluator);
        node.inflate_all_children();

        let mut rng = SmallRng::seed_from_u64(42);
        node.apply_dirichlet_noise(0.03, &mut rng);

        let total: f32 = node.dirichlet().iter().sum();

        assert!((total - 1.0).abs() < 1e-6, "noise sums to {}", total);
    }

    #[test]
    fn tiny_alpha_concentrates_the_noise() {
        let state = GameState::new(9, 7.5);
        let evaluator = FakeEvaluator::uniform(9);
        let mut node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);
        node.inflate_all_children();

        let mut rng = SmallRng::seed_from_u64(42);
        node.apply_dirichlet_noise(0.01, &mut rng);

        let max = node.dirichlet().iter().cloned().fold(0.0f32, f32::max);

        assert!(max > 0.99, "mass should concentrate, max {}", max);
    }

    #[test]
    fn lcb_with_one_visit_is_prior_minus_large_constant() {
        let node = Node::new(42, 0.25, Arc::new(Param::default()));
        let mut evals = NodeEvals::default();
        evals.black_wl = 0.5;
        node.update(&evals);

        assert_eq!(node.get_lcb(Color::Black), 0.25 - 1e6);
    }

    #[test]
    fn lcb_ordering_follows_the_mean_for_many_visits() {
        let param = Arc::new(Param::default());
        let good = Node::new(1, 0.1, param.clone());
        let bad = Node::new(2, 0.1, param.clone());
        let mut evals = NodeEvals::default();

        for i in 0..2000 {
            evals.black_wl = if i % 2 == 0 { 0.9 } else { 0.7 };
            good.update(&evals);
            evals.black_wl = if i % 2 == 0 { 0.5 } else { 0.3 };
            bad.update(&evals);
        }

        // identical variances, so the ordering is the ordering of the means
        assert!(good.get_lcb(Color::Black) > bad.get_lcb(Color::Black));
        assert!(good.get_lcb(Color::White) < bad.get_lcb(Color::White));
    }

    #[test]
    fn sequential_halving_schedule_for_four_moves() {
        let expected = [0, 0, 0, 0, 1, 1, 2, 2, 3, 4, 5, 6, 1, 1, 3, 7];

        for (v, &want) in expected.iter().enumerate() {
            assert_eq!(
                sequential_halving_visits(v as i32, 4),
                want,
                "target mismatch at root visit {}",
                v
            );
        }
    }

    #[test]
    fn sequential_halving_schedule_shapes() {
        // the first adjusted-considered-moves playouts of every epoch visit
        // unvisited children
        for &considered in &[2usize, 4, 8, 16] {
            let adj = considered.next_power_of_two() as i32;

            for v in 0..adj {
                assert_eq!(sequential_halving_visits(v, considered), 0, "considered {}", considered);
            }
        }

        // the last playout of an epoch goes to the leader, which by then
        // has accumulated 2 * adj - 2 visits
        for &considered in &[2usize, 4, 8, 16] {
            let n = (considered as f32).log2() as i32 + 1;
            let adj = considered.next_power_of_two() as i32;
            let per_round = n * adj;
            let last = sequential_halving_visits(per_round - 1, considered);

            assert_eq!(last, 2 * adj - 2, "considered {}", considered);
        }
    }

    #[test]
    fn puct_prefers_the_prior_without_statistics() {
        let state = GameState::new(5, 0.5);
        let mut evaluator = FakeEvaluator::uniform(5);

        evaluator.probabilities = (0..25).map(|i| if i == 12 { 0.9 } else { 0.004 }).collect();

        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        let evals = expand(&node, &state, &evaluator);
        node.update(&evals);

        let mut rng = SmallRng::seed_from_u64(42);
        let picked = node.puct_select_child(Color::Black, false, &mut rng);

        assert_eq!(picked.vertex(), 12);
    }

    #[test]
    fn prob_select_penalizes_expanding_children() {
        let state = GameState::new(5, 0.5);
        let mut evaluator = FakeEvaluator::uniform(5);

        evaluator.probabilities = (0..25).map(|i| if i == 12 { 0.9 } else { 0.004 }).collect();

        let node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);

        // fake a concurrent expansion of the best child
        let best = node.get_child(12).unwrap();
        assert!(best.acquire_expanding());

        let picked = node.prob_select_child();
        assert_ne!(picked.vertex(), 12);
    }

    #[test]
    fn pop_child_extracts_the_sub_tree() {
        let state = GameState::new(5, 0.5);
        let evaluator = FakeEvaluator::uniform(5);
        let mut node = Node::new(hoshi_go::NULL_VERTEX, 1.0, Arc::new(Param::default()));
        expand(&node, &state, &evaluator);

        let before = node.children().len();
        let child = node.pop_child(12).expect("child must exist");

        assert_eq!(child.vertex(), 12);
        assert_eq!(node.children().len(), before - 1);
        assert!(node.get_child(12).is_none());
    }
}

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

//! Benson's algorithm for unconditional life [1]. A chain is pass-alive if
//! it keeps at least two vital regions under any sequence of opponent moves,
//! where a region is vital if all of its empty points are liberties of the
//! chain.
//!
//! [1] D. B. Benson, "Life in the Game of Go"

use crate::{Color, GameState, Vertex};

struct Labels {
    id: Vec<i32>,
    members: Vec<Vec<Vertex>>
}

/// Labels the connected components of all vertices that satisfy the given
/// predicate.
fn label_components<F: Fn(Vertex) -> bool>(state: &GameState, pred: F) -> Labels {
    let n = state.num_intersections();
    let mut id = vec! [-1; n];
    let mut members = vec! [];

    for v in 0..n {
        let vertex = v as Vertex;

        if id[v] >= 0 || !pred(vertex) {
            continue;
        }

        let label = members.len() as i32;
        let mut component = vec! [vertex];
        let mut i = 0;

        id[v] = label;

        while i < component.len() {
            for other in adjacent(state, component[i]) {
                if id[other as usize] < 0 && pred(other) {
                    id[other as usize] = label;
                    component.push(other);
                }
            }

            i += 1;
        }

        members.push(component);
    }

    Labels { id, members }
}

fn adjacent(state: &GameState, vertex: Vertex) -> Vec<Vertex> {
    let bs = state.board_size();
    let x = vertex as usize % bs;
    let y = vertex as usize / bs;
    let mut out = Vec::with_capacity(4);

    if x > 0 { out.push(vertex - 1); }
    if x < bs - 1 { out.push(vertex + 1); }
    if y > 0 { out.push(vertex - bs as Vertex); }
    if y < bs - 1 { out.push(vertex + bs as Vertex); }

    out
}

/// Marks every intersection that belongs to a pass-alive chain of `color`,
/// or to one of the regions those chains enclose.
fn mark_pass_alive(state: &GameState, color: Color, out: &mut [bool]) {
    let chains = label_components(state, |v| state.at(v) == Some(color));
    let regions = label_components(state, |v| state.at(v) != Some(color));

    if chains.members.is_empty() {
        return;
    }

    // for every region, the chains it touches and the chains it is vital
    // to (every empty point of the region is a liberty of the chain). Only
    // small regions participate: every empty point must be a liberty of at
    // least one enclosing chain, which excludes the open part of the board.
    let num_chains = chains.members.len();
    let mut touches = vec! [vec! []; regions.members.len()];
    let mut vital = vec! [vec! []; regions.members.len()];
    let mut small = vec! [false; regions.members.len()];

    for (r, members) in regions.members.iter().enumerate() {
        let mut touched = vec! [false; num_chains];

        for &v in members.iter() {
            for other in adjacent(state, v) {
                let ch = chains.id[other as usize];

                if ch >= 0 {
                    touched[ch as usize] = true;
                }
            }
        }

        small[r] = members.iter().all(|&v| {
            state.at(v).is_some() || adjacent(state, v).iter().any(|&other| {
                chains.id[other as usize] >= 0
            })
        });

        if !small[r] {
            continue;
        }

        for ch in 0..num_chains {
            if !touched[ch] {
                continue;
            }

            touches[r].push(ch);

            let is_vital = members.iter().all(|&v| {
                state.at(v).is_some() || adjacent(state, v).iter().any(|&other| {
                    chains.id[other as usize] == ch as i32
                })
            });

            if is_vital {
                vital[r].push(ch);
            }
        }
    }

    // iteratively remove chains with fewer than two vital regions, and
    // regions that touch a removed chain, until a fixpoint
    let mut chain_alive = vec! [true; num_chains];
    let mut region_alive = small;

    loop {
        let mut changed = false;

        for ch in 0..num_chains {
            if !chain_alive[ch] {
                continue;
            }

            let num_vital = (0..regions.members.len())
                .filter(|&r| region_alive[r] && vital[r].contains(&ch))
                .count();

            if num_vital < 2 {
                chain_alive[ch] = false;
                changed = true;
            }
        }

        for r in 0..regions.members.len() {
            if region_alive[r] && touches[r].iter().any(|&ch| !chain_alive[ch]) {
                region_alive[r] = false;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    for ch in 0..num_chains {
        if chain_alive[ch] {
            for &v in chains.members[ch].iter() {
                out[v as usize] = true;
            }
        }
    }

    for r in 0..regions.members.len() {
        if region_alive[r] && !touches[r].is_empty() {
            for &v in regions.members[r].iter() {
                out[v as usize] = true;
            }
        }
    }
}

/// Returns a bitmap of the intersections where play is pointless because the
/// surrounding stones are unconditionally alive.
pub fn strict_safe_area(state: &GameState) -> Vec<bool> {
    let mut out = vec! [false; state.num_intersections()];

    mark_pass_alive(state, Color::Black, &mut out);
    mark_pass_alive(state, Color::White, &mut out);

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_board_has_no_safe_area() {
        let state = GameState::new(9, 7.5);

        assert!(state.strict_safe_area().iter().all(|&safe| !safe));
    }

    #[test]
    fn single_chain_is_not_pass_alive() {
        let mut state = GameState::new(9, 7.5);

        state.play(state.get_vertex(4, 4), Color::Black);

        assert!(state.strict_safe_area().iter().all(|&safe| !safe));
    }

    #[test]
    fn two_eyed_corner_group_is_pass_alive() {
        let mut state = GameState::new(9, 7.5);

        // a black group in the corner with eyes at (0,0) and (2,0):
        //
        //   X X X X
        //   . X . X
        //
        for &(x, y) in &[(0, 1), (1, 1), (2, 1), (3, 1), (1, 0), (3, 0)] {
            state.play(state.get_vertex(x, y), Color::Black);
        }

        let safe = state.strict_safe_area();

        assert!(safe[state.get_index(0, 0)], "eye should be safe");
        assert!(safe[state.get_index(2, 0)], "eye should be safe");
        assert!(safe[state.get_index(1, 1)], "stone should be safe");
        assert!(!safe[state.get_index(5, 5)], "open board should not be safe");
    }

    #[test]
    fn one_eyed_group_is_not_pass_alive() {
        let mut state = GameState::new(9, 7.5);

        //   X X X
        //   . X .     <- (2,0) is an open skirt, not an enclosed eye
        for &(x, y) in &[(0, 1), (1, 1), (2, 1), (1, 0)] {
            state.play(state.get_vertex(x, y), Color::Black);
        }

        let safe = state.strict_safe_area();

        assert!(!safe[state.get_index(0, 0)]);
        assert!(!safe[state.get_index(1, 1)]);
    }
}

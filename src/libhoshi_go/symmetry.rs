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

//! The eight symmetries of the square board (the dihedral group D4). The
//! identity is index `0`, indices `1..=3` are the rotations, and `4..=7` the
//! reflections.

use crate::Vertex;

pub const NUM_SYMMETRIES: usize = 8;
pub const IDENTITY_SYMMETRY: usize = 0;

/// Applies the given symmetry to the coordinates `(x, y)` on a board of the
/// given size.
pub fn transform_xy(symm: usize, board_size: usize, x: usize, y: usize) -> (usize, usize) {
    let n = board_size - 1;

    match symm {
        0 => (x, y),
        1 => (y, n - x),
        2 => (n - x, n - y),
        3 => (n - y, x),
        4 => (y, x),
        5 => (n - x, y),
        6 => (n - y, n - x),
        7 => (x, n - y),
        _ => unreachable!("unknown symmetry {}", symm)
    }
}

/// Applies the given symmetry to a vertex. The pass move maps to itself.
pub fn transform_vertex(symm: usize, board_size: usize, vertex: Vertex) -> Vertex {
    if vertex as usize >= board_size * board_size {
        return vertex;
    }

    let x = vertex as usize % board_size;
    let y = vertex as usize / board_size;
    let (tx, ty) = transform_xy(symm, board_size, x, y);

    (ty * board_size + tx) as Vertex
}

/// Returns the symmetry that undoes `symm`.
pub fn inverse(symm: usize) -> usize {
    match symm {
        1 => 3,
        3 => 1,
        other => other
    }
}

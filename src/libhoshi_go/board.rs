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

use crate::benson;
use crate::symmetry;
use crate::zobrist;
use crate::{Color, Vertex, NULL_VERTEX};

use std::fmt;

/// A go position together with the move history needed to answer repetition
/// queries. Captures, suicide and the simple ko rule are enforced by
/// `is_legal_move`; positional superko is answered separately by
/// `is_superko` over the stones-only hash history.
#[derive(Clone)]
pub struct GameState {
    board_size: usize,
    komi: f32,
    to_move: Color,
    stones: Vec<Option<Color>>,
    ko: Option<Vertex>,
    passes: i32,
    move_number: i32,
    last_move: Vertex,
    ko_hash: u64,
    history: Vec<u64>
}

impl GameState {
    /// Returns an empty board of the given size with black to move.
    pub fn new(board_size: usize, komi: f32) -> Self {
        assert!(board_size >= 3 && board_size <= zobrist::MAX_BOARD_SIZE);

        let num_intersections = board_size * board_size;

        Self {
            board_size,
            komi,
            to_move: Color::Black,
            stones: vec! [None; num_intersections],
            ko: None,
            passes: 0,
            move_number: 0,
            last_move: NULL_VERTEX,
            ko_hash: 0,
            history: vec! [0]
        }
    }

    pub fn board_size(&self) -> usize {
        self.board_size
    }

    pub fn num_intersections(&self) -> usize {
        self.board_size * self.board_size
    }

    pub fn komi(&self) -> f32 {
        self.komi
    }

    pub fn to_move(&self) -> Color {
        self.to_move
    }

    pub fn passes(&self) -> i32 {
        self.passes
    }

    pub fn move_number(&self) -> i32 {
        self.move_number
    }

    /// Returns the vertex that encodes the pass move on this board.
    pub fn pass_vertex(&self) -> Vertex {
        self.num_intersections() as Vertex
    }

    pub fn get_x(&self, vertex: Vertex) -> usize {
        vertex as usize % self.board_size
    }

    pub fn get_y(&self, vertex: Vertex) -> usize {
        vertex as usize / self.board_size
    }

    pub fn get_vertex(&self, x: usize, y: usize) -> Vertex {
        (y * self.board_size + x) as Vertex
    }

    /// Returns the index of the given coordinates, which for this encoding
    /// coincides with the vertex.
    pub fn get_index(&self, x: usize, y: usize) -> usize {
        y * self.board_size + x
    }

    /// Returns the color of the stone at the given vertex, if any.
    pub fn at(&self, vertex: Vertex) -> Option<Color> {
        self.stones[vertex as usize]
    }

    /// Returns the stones-only position hash.
    pub fn ko_hash(&self) -> u64 {
        self.ko_hash
    }

    /// Returns the hash material of this position's komi.
    pub fn komi_hash(&self) -> u64 {
        zobrist::komi_hash(self.komi)
    }

    fn adjacent(&self, vertex: Vertex) -> Vec<Vertex> {
        let bs = self.board_size;
        let x = self.get_x(vertex);
        let y = self.get_y(vertex);
        let mut out = Vec::with_capacity(4);

        if x > 0 { out.push(vertex - 1); }
        if x < bs - 1 { out.push(vertex + 1); }
        if y > 0 { out.push(vertex - bs as Vertex); }
        if y < bs - 1 { out.push(vertex + bs as Vertex); }

        out
    }

    /// Returns the stones and the liberties of the chain that contains
    /// `vertex`.
    fn chain_and_liberties(&self, vertex: Vertex) -> (Vec<Vertex>, Vec<Vertex>) {
        let color = self.stones[vertex as usize];
        debug_assert!(color.is_some());

        let mut visited = vec! [false; self.num_intersections()];
        let mut liberties = vec! [];
        let mut chain = vec! [vertex];
        let mut i = 0;

        visited[vertex as usize] = true;

        while i < chain.len() {
            for other in self.adjacent(chain[i]) {
                if visited[other as usize] {
                    continue;
                }
                visited[other as usize] = true;

                match self.stones[other as usize] {
                    None => { liberties.push(other); },
                    c if c == color => { chain.push(other); },
                    _ => {}
                }
            }

            i += 1;
        }

        (chain, liberties)
    }

    fn count_liberties(&self, vertex: Vertex) -> usize {
        self.chain_and_liberties(vertex).1.len()
    }

    /// Returns true if the given move is legal for `color`: the vertex is
    /// empty, it is not the simple ko point, and the stone would not be
    /// placed into self-capture. Positional superko is not checked here.
    pub fn is_legal_move(&self, vertex: Vertex, color: Color) -> bool {
        if vertex == self.pass_vertex() {
            return true;
        }
        if vertex < 0 || vertex as usize >= self.num_intersections() {
            return false;
        }
        if self.stones[vertex as usize].is_some() || self.ko == Some(vertex) {
            return false;
        }

        let mut has_liberty = false;
        let mut captures_something = false;
        let mut joins_living_chain = false;

        for other in self.adjacent(vertex) {
            match self.stones[other as usize] {
                None => { has_liberty = true; },
                Some(c) if c == color => {
                    if self.count_liberties(other) > 1 {
                        joins_living_chain = true;
                    }
                },
                Some(_) => {
                    if self.count_liberties(other) == 1 {
                        captures_something = true;
                    }
                }
            }
        }

        has_liberty || captures_something || joins_living_chain
    }

    /// Returns true if playing `vertex` as `color` would capture at least
    /// one opponent stone.
    pub fn is_capture_move(&self, vertex: Vertex, color: Color) -> bool {
        if vertex < 0 || vertex as usize >= self.num_intersections() || self.stones[vertex as usize].is_some() {
            return false;
        }

        self.adjacent(vertex).into_iter().any(|other| {
            self.stones[other as usize] == Some(color.opposite()) &&
                self.count_liberties(other) == 1
        })
    }

    fn is_vertex_filled(&self, color: Color, x: isize, y: isize) -> bool {
        let bs = self.board_size as isize;

        x >= 0 && x < bs && y >= 0 && y < bs &&
            self.stones[(y * bs + x) as usize] == Some(color)
    }

    /// Returns true if the given empty vertex is an eye of `color` that it
    /// would be pointless (or harmful) to fill. This will miss some
    /// complicated eyes, but it is good enough for the heuristic.
    pub fn is_real_eye(&self, vertex: Vertex, color: Color) -> bool {
        const CROSS: [(isize, isize); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
        const DIAGONAL: [(isize, isize); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

        if self.stones[vertex as usize].is_some() {
            return false;
        }

        let x = self.get_x(vertex) as isize;
        let y = self.get_y(vertex) as isize;
        let num_cross = CROSS.iter()
            .filter(|(dx, dy)| self.is_vertex_filled(color, x + dx, y + dy))
            .count();
        let num_diagonal = DIAGONAL.iter()
            .filter(|(dx, dy)| self.is_vertex_filled(color, x + dx, y + dy))
            .count();

        let n = self.board_size as isize - 1;
        let on_edge_x = x == 0 || x == n;
        let on_edge_y = y == 0 || y == n;

        if on_edge_x && on_edge_y {
            num_cross >= 2 && num_diagonal >= 1
        } else if on_edge_x || on_edge_y {
            num_cross >= 3 && num_diagonal >= 2
        } else {
            num_cross >= 4 && num_diagonal >= 3
        }
    }

    /// Plays the given move for the side to move.
    pub fn play_move(&mut self, vertex: Vertex) {
        let color = self.to_move;

        self.play(vertex, color);
    }

    /// Plays the given move. The move must be legal according to
    /// `is_legal_move`.
    pub fn play(&mut self, vertex: Vertex, color: Color) {
        debug_assert!(self.is_legal_move(vertex, color), "illegal move {} {}", color, vertex);

        if vertex == self.pass_vertex() {
            self.passes += 1;
            self.ko = None;
        } else {
            self.passes = 0;
            self.stones[vertex as usize] = Some(color);
            self.ko_hash ^= zobrist::STONE[color.index()][vertex as usize];

            let mut captured = vec! [];

            for other in self.adjacent(vertex) {
                if self.stones[other as usize] == Some(color.opposite()) {
                    let (chain, liberties) = self.chain_and_liberties(other);

                    if liberties.is_empty() {
                        for stone in chain {
                            self.stones[stone as usize] = None;
                            self.ko_hash ^= zobrist::STONE[color.opposite().index()][stone as usize];
                            captured.push(stone);
                        }
                    }
                }
            }

            // the simple ko rule forbids the immediate recapture of a lone
            // stone that captured a lone stone
            let (chain, liberties) = self.chain_and_liberties(vertex);

            self.ko = if captured.len() == 1 && chain.len() == 1 && liberties.len() == 1 {
                Some(captured[0])
            } else {
                None
            };
        }

        self.to_move = color.opposite();
        self.move_number += 1;
        self.last_move = vertex;
        self.history.push(self.ko_hash);
    }

    /// Returns the move that produced the current position, or
    /// `NULL_VERTEX` for the initial one.
    pub fn last_move(&self) -> Vertex {
        self.last_move
    }

    /// Returns true if the last move repeated an earlier position. A pass
    /// leaves the stones untouched and never counts as a repetition.
    pub fn is_superko(&self) -> bool {
        if self.last_move == NULL_VERTEX || self.last_move == self.pass_vertex() {
            return false;
        }

        let n = self.history.len();

        self.history[..n - 1].contains(&self.ko_hash)
    }

    /// Returns the hash material of the move `vertex` for `color`, used for
    /// incremental candidate hashes.
    pub fn move_hash(&self, vertex: Vertex, color: Color) -> u64 {
        zobrist::STONE[color.index()][vertex as usize]
    }

    /// Returns the position hash after applying the given symmetry to every
    /// stone on the board.
    pub fn compute_symmetry_hash(&self, symm: usize) -> u64 {
        let mut hash = 0;

        for v in 0..self.num_intersections() {
            if let Some(color) = self.stones[v] {
                let t = symmetry::transform_vertex(symm, self.board_size, v as Vertex);

                hash ^= zobrist::STONE[color.index()][t as usize];
            }
        }

        hash
    }

    /// Returns a bitmap of the intersections that are pointless to play at
    /// because they lie inside unconditionally alive territory.
    pub fn strict_safe_area(&self) -> Vec<bool> {
        benson::strict_safe_area(self)
    }

    /// Returns the final score of the board in black's perspective, using
    /// area scoring. Empty regions that touch both colors count for
    /// neither.
    pub fn final_score(&self) -> f32 {
        let ownership = self.ownership();
        let area: f32 = ownership.iter().sum();

        area - self.komi
    }

    /// Returns the owner of every intersection, `1.0` for black, `-1.0` for
    /// white and `0.0` for neutral points.
    pub fn ownership(&self) -> Vec<f32> {
        let n = self.num_intersections();
        let mut out = vec! [0.0; n];
        let mut visited = vec! [false; n];

        for v in 0..n {
            match self.stones[v] {
                Some(Color::Black) => { out[v] = 1.0; },
                Some(Color::White) => { out[v] = -1.0; },
                None if !visited[v] => {
                    // flood fill the empty region and figure out which
                    // colors it borders
                    let mut region = vec! [v as Vertex];
                    let mut touches_black = false;
                    let mut touches_white = false;
                    let mut i = 0;

                    visited[v] = true;

                    while i < region.len() {
                        for other in self.adjacent(region[i]) {
                            match self.stones[other as usize] {
                                Some(Color::Black) => { touches_black = true; },
                                Some(Color::White) => { touches_white = true; },
                                None if !visited[other as usize] => {
                                    visited[other as usize] = true;
                                    region.push(other);
                                },
                                None => {}
                            }
                        }

                        i += 1;
                    }

                    let owner = match (touches_black, touches_white) {
                        (true, false) => 1.0,
                        (false, true) => -1.0,
                        _ => 0.0
                    };

                    for r in region {
                        out[r as usize] = owner;
                    }
                },
                None => {}
            }
        }

        out
    }

    /// Returns a classical policy over the intersections for `color`, used
    /// when the neural network is disabled. Capture moves are preferred,
    /// illegal moves and own eyes get zero mass.
    pub fn gammas_policy(&self, color: Color) -> Vec<f32> {
        let n = self.num_intersections();
        let mut out = vec! [0.0f32; n];
        let mut total = 0.0f32;

        for v in 0..n {
            let vertex = v as Vertex;

            if self.is_legal_move(vertex, color) && !self.is_real_eye(vertex, color) {
                let gamma = if self.is_capture_move(vertex, color) { 4.0 } else { 1.0 };

                out[v] = gamma;
                total += gamma;
            }
        }

        if total > 0.0 {
            for v in out.iter_mut() {
                *v /= total;
            }
        }

        out
    }

    /// Returns the text representation of the given vertex, e.g. `D4` or
    /// `pass`.
    pub fn vertex_to_text(&self, vertex: Vertex) -> String {
        const LETTERS: [char; 19] = [
            'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K',
            'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T'
        ];

        if vertex == self.pass_vertex() {
            "pass".to_string()
        } else if vertex < 0 {
            "null".to_string()
        } else {
            format!("{}{}", LETTERS[self.get_x(vertex)], self.get_y(vertex) + 1)
        }
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for y in (0..self.board_size).rev() {
            for x in 0..self.board_size {
                let ch = match self.stones[self.get_index(x, y)] {
                    Some(Color::Black) => 'X',
                    Some(Color::White) => 'O',
                    None => '.'
                };

                write!(f, "{} ", ch)?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_single_stone() {
        let mut state = GameState::new(9, 7.5);

        state.play(state.get_vertex(1, 1), Color::White);
        state.play(state.get_vertex(0, 1), Color::Black);
        state.play(state.get_vertex(2, 1), Color::Black);
        state.play(state.get_vertex(1, 0), Color::Black);
        state.play(state.get_vertex(1, 2), Color::Black);

        assert_eq!(state.at(state.get_vertex(1, 1)), None);
    }

    #[test]
    fn suicide_is_illegal() {
        let mut state = GameState::new(9, 7.5);

        state.play(state.get_vertex(1, 0), Color::White);
        state.play(state.get_vertex(0, 1), Color::White);

        assert!(!state.is_legal_move(state.get_vertex(0, 0), Color::Black));
        assert!(state.is_legal_move(state.get_vertex(0, 0), Color::White));
    }

    #[test]
    fn simple_ko_is_illegal() {
        let mut state = GameState::new(9, 7.5);

        // black: (1,0), (0,1), (2,1); white: (1,1), (1,2), (0,2)? build the
        // classic ko shape around (1,1) / (1,2)
        state.play(state.get_vertex(1, 0), Color::Black);
        state.play(state.get_vertex(1, 1), Color::White);
        state.play(state.get_vertex(0, 1), Color::Black);
        state.play(state.get_vertex(0, 2), Color::White);
        state.play(state.get_vertex(2, 1), Color::Black);
        state.play(state.get_vertex(2, 2), Color::White);
        state.play(state.get_vertex(8, 8), Color::Black);
        state.play(state.get_vertex(1, 3), Color::White);

        // black takes the ko
        let ko_point = state.get_vertex(1, 1);
        let recapture = state.get_vertex(1, 2);

        state.play(recapture, Color::Black);
        assert_eq!(state.at(ko_point), None);

        // white may not retake immediately
        assert!(!state.is_legal_move(ko_point, Color::White));

        // after a move elsewhere the ko is open again
        state.play(state.get_vertex(8, 0), Color::White);
        state.play(state.get_vertex(7, 8), Color::Black);
        assert!(state.is_legal_move(ko_point, Color::White));
    }

    #[test]
    fn pass_does_not_change_the_position() {
        let mut state = GameState::new(9, 7.5);
        let hash = state.ko_hash();

        state.play_move(state.pass_vertex());

        assert_eq!(state.ko_hash(), hash);
        assert_eq!(state.passes(), 1);

        state.play_move(state.pass_vertex());
        assert_eq!(state.passes(), 2);
    }

    #[test]
    fn pass_is_not_a_repetition() {
        let mut state = GameState::new(9, 7.5);

        assert!(!state.is_superko());

        state.play(state.get_vertex(2, 2), Color::Black);
        state.play_move(state.pass_vertex());

        // the stones hash matches the previous position, but a pass does
        // not repeat anything
        assert!(!state.is_superko());
    }

    #[test]
    fn symmetry_hash_of_empty_board_is_stable() {
        let state = GameState::new(9, 7.5);

        for symm in 0..crate::symmetry::NUM_SYMMETRIES {
            assert_eq!(state.compute_symmetry_hash(symm), 0);
        }
    }

    #[test]
    fn symmetry_hash_matches_transformed_board() {
        let mut a = GameState::new(9, 7.5);
        let mut b = GameState::new(9, 7.5);

        // the same position rotated by 180 degrees
        a.play(a.get_vertex(2, 3), Color::Black);
        a.play(a.get_vertex(4, 4), Color::White);
        b.play(b.get_vertex(6, 5), Color::Black);
        b.play(b.get_vertex(4, 4), Color::White);

        assert_eq!(a.compute_symmetry_hash(2), b.ko_hash());
        assert_eq!(b.compute_symmetry_hash(2), a.ko_hash());
    }

    #[test]
    fn area_scoring() {
        let mut state = GameState::new(5, 0.5);

        // a black wall on the middle column, white on the column next to it
        for y in 0..5 {
            state.play(state.get_vertex(2, y), Color::Black);
            state.play(state.get_vertex(3, y), Color::White);
        }

        // black owns 3 columns, white 2
        assert_eq!(state.final_score(), 15.0 - 10.0 - 0.5);

        let ownership = state.ownership();
        assert_eq!(ownership[state.get_index(0, 0)], 1.0);
        assert_eq!(ownership[state.get_index(4, 0)], -1.0);
    }

    #[test]
    fn ownership_of_empty_board_is_neutral() {
        let state = GameState::new(5, 0.5);

        assert!(state.ownership().iter().all(|&o| o == 0.0));
    }

    /// Builds a position on a 7x7 board with three single-stone kos, five
    /// plies into the six-move capture cycle. The move `(6, 0)` for black
    /// completes the cycle and repeats the position.
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

        // the capture cycle, stopping one move short of the repetition
        state.play(state.get_vertex(1, 0), Color::White);
        state.play(state.get_vertex(0, 6), Color::Black);
        state.play(state.get_vertex(5, 0), Color::White);
        state.play(state.get_vertex(0, 0), Color::Black);
        state.play(state.get_vertex(1, 6), Color::White);

        assert_eq!(state.to_move(), Color::Black);
        state
    }

    #[test]
    fn triple_ko_cycle_is_superko() {
        let state = triple_ko_position();
        let repeat = state.get_vertex(6, 0);

        assert!(state.is_legal_move(repeat, Color::Black));

        let mut fork = state.clone();
        fork.play_move(repeat);
        assert!(fork.is_superko());

        // an uninvolved move does not repeat anything
        let mut other = state.clone();
        other.play_move(other.get_vertex(5, 5));
        assert!(!other.is_superko());
    }

    #[test]
    fn vertex_text_skips_i_column() {
        let state = GameState::new(19, 7.5);

        assert_eq!(state.vertex_to_text(state.get_vertex(0, 0)), "A1");
        assert_eq!(state.vertex_to_text(state.get_vertex(8, 3)), "J4");
        assert_eq!(state.vertex_to_text(state.pass_vertex()), "pass");
    }
}

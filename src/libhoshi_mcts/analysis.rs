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

use hoshi_go::{Color, Vertex};

/// A move restriction over an interval of move numbers.
#[derive(Clone, Debug)]
pub struct MoveRestriction {
    pub color: Color,
    pub vertex: Vertex,
    pub from_move: i32,
    pub to_move: i32
}

impl MoveRestriction {
    fn applies(&self, color: Color, move_number: i32) -> bool {
        self.color == color &&
            move_number >= self.from_move &&
            move_number <= self.to_move
    }
}

/// External constraints on the search, e.g. from an analysis front-end:
/// moves the expansion must not consider, moves it must restrict itself to,
/// and how much of the tree the reports should show.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    avoid_moves: Vec<MoveRestriction>,
    allow_moves: Vec<MoveRestriction>,

    /// The maximum number of moves reported by the analysis string.
    pub max_moves: usize,

    /// Whether to append the averaged ownership map of the root.
    pub show_ownership: bool,

    /// Whether to append the averaged ownership map of every reported move.
    pub show_moves_ownership: bool
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            avoid_moves: vec! [],
            allow_moves: vec! [],
            max_moves: usize::max_value(),
            show_ownership: false,
            show_moves_ownership: false
        }
    }
}

impl AnalysisConfig {
    /// Forbids the given move for `color` over the move number interval.
    pub fn avoid(&mut self, color: Color, vertex: Vertex, from_move: i32, to_move: i32) {
        self.avoid_moves.push(MoveRestriction { color, vertex, from_move, to_move });
    }

    /// Restricts `color` to the given move over the move number interval.
    pub fn allow(&mut self, color: Color, vertex: Vertex, from_move: i32, to_move: i32) {
        self.allow_moves.push(MoveRestriction { color, vertex, from_move, to_move });
    }

    /// Returns true if the expansion may add the given move as a candidate.
    pub fn is_move_allowed(&self, vertex: Vertex, color: Color, move_number: i32) -> bool {
        if self.avoid_moves.iter().any(|r| r.applies(color, move_number) && r.vertex == vertex) {
            return false;
        }

        let restricted = self.allow_moves.iter().any(|r| r.applies(color, move_number));

        if restricted {
            self.allow_moves.iter().any(|r| r.applies(color, move_number) && r.vertex == vertex)
        } else {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_restrictions_allows_everything() {
        let config = AnalysisConfig::default();

        assert!(config.is_move_allowed(42, Color::Black, 0));
    }

    #[test]
    fn avoided_move_is_rejected_inside_interval() {
        let mut config = AnalysisConfig::default();

        config.avoid(Color::Black, 42, 0, 10);

        assert!(!config.is_move_allowed(42, Color::Black, 5));
        assert!(config.is_move_allowed(42, Color::Black, 11));
        assert!(config.is_move_allowed(42, Color::White, 5));
        assert!(config.is_move_allowed(43, Color::Black, 5));
    }

    #[test]
    fn allow_list_excludes_everything_else() {
        let mut config = AnalysisConfig::default();

        config.allow(Color::White, 7, 0, 100);

        assert!(config.is_move_allowed(7, Color::White, 3));
        assert!(!config.is_move_allowed(8, Color::White, 3));
        assert!(config.is_move_allowed(8, Color::Black, 3));
    }
}

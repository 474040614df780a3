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

use hoshi_go::{GameState, Vertex};

use rand::prelude::SliceRandom;
use rand::Rng;

/// Plays uniformly random moves (eyes excluded) until two consecutive
/// passes or the move budget runs out, then scores the final position.
///
/// Returns the black win / loss result and the black final score, and
/// overwrites `black_ownership` with the terminal ownership.
pub fn get_black_rollout_result<R: Rng>(
    state: &GameState,
    black_ownership: &mut [f32],
    rng: &mut R
) -> (f32, f32) {
    let mut board = state.clone();
    let budget = 2 * board.num_intersections();
    let mut moves_played = 0;

    while board.passes() < 2 && moves_played < budget {
        let to_move = board.to_move();
        let mut candidates = (0..board.num_intersections() as Vertex)
            .filter(|&v| board.is_legal_move(v, to_move) && !board.is_real_eye(v, to_move))
            .collect::<Vec<_>>();

        let vertex = match candidates.choose_mut(rng) {
            Some(&mut v) => v,
            None => board.pass_vertex()
        };

        board.play_move(vertex);
        moves_played += 1;
    }

    let black_score = board.final_score();
    let ownership = board.ownership();

    for (out, owner) in black_ownership.iter_mut().zip(ownership.into_iter()) {
        *out = owner;
    }

    let black_result = if black_score > 1e-4 {
        1.0
    } else if black_score < -1e-4 {
        0.0
    } else {
        0.5
    };

    (black_result, black_score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoshi_go::Color;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn rollout_terminates_and_scores() {
        let state = GameState::new(5, 0.5);
        let mut ownership = vec! [0.0; 25];
        let mut rng = SmallRng::seed_from_u64(42);
        let (result, score) = get_black_rollout_result(&state, &mut ownership, &mut rng);

        assert!(result == 0.0 || result == 0.5 || result == 1.0);
        assert!(score.abs() <= 25.5);
        assert!(ownership.iter().all(|&o| o >= -1.0 && o <= 1.0));
    }

    #[test]
    fn rollout_of_decided_position_scores_it() {
        let mut state = GameState::new(5, 0.5);

        // black owns the whole board except a white prisoner line that is
        // already dead; play black stones on every other intersection
        for y in 0..5 {
            for x in 0..5 {
                if (x + y) % 2 == 0 {
                    state.play(state.get_vertex(x, y), Color::Black);
                    if state.to_move() == Color::White {
                        state.play_move(state.pass_vertex());
                    }
                }
            }
        }

        let mut ownership = vec! [0.0; 25];
        let mut rng = SmallRng::seed_from_u64(42);
        let (result, score) = get_black_rollout_result(&state, &mut ownership, &mut rng);

        assert_eq!(result, 1.0, "black should win, score {}", score);
    }
}

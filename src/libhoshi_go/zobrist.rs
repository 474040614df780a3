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

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// The largest supported board size.
pub const MAX_BOARD_SIZE: usize = 19;

const NUM_CELLS: usize = MAX_BOARD_SIZE * MAX_BOARD_SIZE;

lazy_static! {
    /// One token per `(color, intersection)` pair. The tables are generated
    /// from a fixed seed so that hashes are reproducible between runs.
    pub static ref STONE: Vec<Vec<u64>> = {
        let mut rng = SmallRng::seed_from_u64(0x9e3779b97f4a7c15);

        (0..2).map(|_| (0..NUM_CELLS).map(|_| rng.gen::<u64>()).collect()).collect()
    };

    /// One token per side to move.
    pub static ref TO_MOVE: Vec<u64> = {
        let mut rng = SmallRng::seed_from_u64(0x6a09e667f3bcc909);

        (0..2).map(|_| rng.gen::<u64>()).collect()
    };
}

/// Returns the hash material of the given komi, mixed so that nearby komi
/// values produce unrelated hashes.
pub fn komi_hash(komi: f32) -> u64 {
    let mut h = (komi.to_bits() as u64).wrapping_add(0x9e3779b97f4a7c15);

    h = (h ^ (h >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d049bb133111eb);
    h ^ (h >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_distinct() {
        assert_ne!(STONE[0][0], STONE[1][0]);
        assert_ne!(STONE[0][0], STONE[0][1]);
        assert_ne!(TO_MOVE[0], TO_MOVE[1]);
    }

    #[test]
    fn komi_hash_is_sensitive() {
        assert_ne!(komi_hash(7.5), komi_hash(6.5));
        assert_ne!(komi_hash(0.5), komi_hash(-0.5));
    }

    #[test]
    fn tokens_are_stable() {
        assert_eq!(STONE[0][0], STONE[0][0]);
        assert_eq!(komi_hash(7.5), komi_hash(7.5));
    }
}

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

/// Abramowitz and Stegun formula 26.2.23. The absolute value of the error
/// should be less than 4.5e-4.
fn rational_approx(t: f64) -> f64 {
    const C: [f64; 3] = [2.515517, 0.802853, 0.010328];
    const D: [f64; 3] = [1.432788, 0.189269, 0.001308];

    t - ((C[2] * t + C[1]) * t + C[0]) /
            (((D[2] * t + D[1]) * t + D[0]) * t + 1.0)
}

/// Returns `phi^-1(p)`, the quantile function of the standard normal
/// distribution, for `p` in the open interval (0, 1).
pub fn normal_cdf_inverse(p: f64) -> f64 {
    debug_assert!(p > 0.0 && p < 1.0, "invalid input argument ({})", p);

    if p < 0.5 {
        // F^-1(p) = - G^-1(p)
        -rational_approx((-2.0 * p.ln()).sqrt())
    } else {
        // F^-1(p) = G^-1(1-p)
        rational_approx((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Converts a normal quantile `z` into a Student-t quantile with the given
/// number of degrees of freedom.
pub fn norm_to_t_approx(z: f64, degrees_of_freedom: f64) -> f64 {
    let mut n = degrees_of_freedom + 2.0;

    if degrees_of_freedom > 8.0 {
        n -= 1.0;
        (n * (z * z * (n - 1.5) / ((n - 1.0) * (n - 1.0))).exp() - n).sqrt()
    } else {
        (n * (z * z * (n - 0.853999327911) / ((n - 1.044042304114) * (n - 0.954115472059))).exp() - n).sqrt()
    }
}

/// The number of pre-computed quantiles. The quantile approaches a constant
/// for large visit counts, so the last entry is re-used beyond the table.
const ENTRY_SIZE: usize = 1000;

/// A pre-computed table of Student-t quantiles, indexed by the number of
/// visits that produced the sample variance.
#[derive(Clone)]
pub struct LcbEntries {
    z_lookup_table: Vec<f32>
}

impl LcbEntries {
    /// Returns a quantile table for the given two-sided complement
    /// probability.
    pub fn new(complement_probability: f32) -> Self {
        let z = normal_cdf_inverse(1.0 - complement_probability as f64);
        let z_lookup_table = (0..ENTRY_SIZE)
            .map(|i| norm_to_t_approx(z, i as f64) as f32)
            .collect();

        Self { z_lookup_table }
    }

    /// Returns the cached quantile for `v` degrees of freedom.
    pub fn cached_t_quantile(&self, v: i32) -> f32 {
        if v < 1 {
            self.z_lookup_table[0]
        } else if (v as usize) < ENTRY_SIZE {
            self.z_lookup_table[v as usize - 1]
        } else {
            self.z_lookup_table[ENTRY_SIZE - 1]
        }
    }
}

// Copyright 2021 DeepMind Technologies Limited.
// Copyright 2024 The rust-enformer Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Relative positional basis
//!
//! Fixed (non-learned) features describing the signed distance between every pair of positions
//! of a window of length `L`. Rows are indexed by the relative distance `d` in `-(L-1)..=L-1`.
//! Three families of basis functions are evaluated on `|d|`:
//! - exponential decays with log-spaced half lives,
//! - central masks (multi-scale "within radius" indicators),
//! - gamma probability densities with linearly spaced means.
//!
//! The resulting block is concatenated with a copy multiplied by `sign(d)` so that left and
//! right neighbours at the same distance can be told apart.

use crate::EnformerError;
use std::f64::consts::LN_2;
use tch::{Device, Kind, Tensor};

/// Number of basis families (exponential, central mask, gamma) times the signed duplication.
pub const NUM_BASIS_COMPONENTS: i64 = 6;

/// Default minimum half life exponent of the exponential family (half life of `2^3` positions).
pub const DEFAULT_MIN_HALF_LIFE: f64 = 3.0;

/// Additive floor of the gamma family, keeps far-away curves from collapsing to zero.
pub const GAMMA_EPS: f64 = 1e-8;

/// Relative distances `[-(L-1), ..., 0, ..., L-1]` (`Int64`, length `2L - 1`).
pub fn get_relative_distances(seq_len: i64, device: Device) -> Tensor {
    Tensor::arange_start(-seq_len + 1, seq_len, (Kind::Int64, device))
}

/// Exponentially decaying features, `exp(-ln2 / half_life * |d|)`.
///
/// Half lives are `2^e` with exponents linearly spaced between `min_half_life` and `log2(seq_len)`.
/// Returns a `[positions, features]` tensor.
pub fn get_positional_features_exponential(
    positions: &Tensor,
    features: i64,
    seq_len: i64,
    min_half_life: f64,
) -> Tensor {
    let max_range = (seq_len as f64).log2();
    let half_life = Tensor::linspace(
        min_half_life,
        max_range,
        features,
        (Kind::Float, positions.device()),
    )
    .exp2()
    .unsqueeze(0);
    let positions = positions.abs().to_kind(Kind::Float).unsqueeze(-1);
    (half_life.reciprocal() * positions * (-LN_2)).exp()
}

/// Central mask features: `1.0` when `|d| < 2^i - 1` for `i` in `1..=features`, `0.0` otherwise.
pub fn get_positional_features_central_mask(positions: &Tensor, features: i64) -> Tensor {
    let center_widths =
        Tensor::arange_start(1, features + 1, (Kind::Float, positions.device())).exp2() - 1.0;
    center_widths
        .unsqueeze(0)
        .gt_tensor(&positions.abs().to_kind(Kind::Float).unsqueeze(-1))
        .to_kind(Kind::Float)
}

fn gamma_pdf(x: &Tensor, concentration: &Tensor, rate: &Tensor) -> Tensor {
    let log_unnormalized_prob = (concentration - 1.0).xlogy(x) - rate * x;
    let log_normalization = concentration.lgamma() - concentration * rate.log();
    (log_unnormalized_prob - log_normalization).exp()
}

/// Gamma density features with means linearly spaced between `start_mean` and `seq_len`.
///
/// `stddev` defaults to `seq_len / (2 * features)` and `start_mean` to `seq_len / features`.
/// An `eps` floor is added to every density before each distance row is divided by its maximum
/// over the features, so every row peaks at 1. Rows where all densities vanish become all ones.
pub fn get_positional_features_gamma(
    positions: &Tensor,
    features: i64,
    seq_len: i64,
    stddev: Option<f64>,
    start_mean: Option<f64>,
    eps: f64,
) -> Tensor {
    let device = positions.device();
    let stddev = stddev.unwrap_or(seq_len as f64 / (2 * features) as f64);
    let start_mean = start_mean.unwrap_or(seq_len as f64 / features as f64);

    let mean = Tensor::linspace(start_mean, seq_len as f64, features, (Kind::Float, device))
        .unsqueeze(0);
    let concentration = (&mean / stddev).square();
    let rate = &mean / (stddev * stddev);
    let probabilities = gamma_pdf(
        &positions.abs().to_kind(Kind::Float).unsqueeze(-1),
        &concentration,
        &rate,
    ) + eps;
    &probabilities / probabilities.amax([-1].as_slice(), true)
}

/// Builds the `[2 * seq_len - 1, feature_size]` relative positional basis.
///
/// Each basis family contributes `feature_size / 6` columns; the unsigned block is followed by
/// the same block multiplied by `sign(d)` (exactly zero on the `d = 0` row).
///
/// # Arguments
///
/// * `seq_len` - length of the attention window `L`
/// * `feature_size` - number of features, must be a multiple of 6
/// * `device` - device on which the basis is created
///
/// # Example
///
/// ```no_run
/// use rust_enformer::enformer::get_positional_embed;
/// use tch::Device;
///
/// let basis = get_positional_embed(4, 6, Device::Cpu)?;
/// assert_eq!(basis.size(), vec![7, 6]);
/// # Ok::<(), rust_enformer::EnformerError>(())
/// ```
pub fn get_positional_embed(
    seq_len: i64,
    feature_size: i64,
    device: Device,
) -> Result<Tensor, EnformerError> {
    if feature_size <= 0 || feature_size % NUM_BASIS_COMPONENTS != 0 {
        return Err(EnformerError::InvalidConfigurationError(format!(
            "feature size ({feature_size}) is not divisible by number of components ({NUM_BASIS_COMPONENTS})"
        )));
    }
    if seq_len < 1 {
        return Err(EnformerError::ShapeMismatchError(format!(
            "cannot build a positional basis for a window of length {seq_len}"
        )));
    }
    let num_basis_per_class = feature_size / NUM_BASIS_COMPONENTS;
    let distances = get_relative_distances(seq_len, device);

    let embeddings = Tensor::cat(
        &[
            get_positional_features_exponential(
                &distances,
                num_basis_per_class,
                seq_len,
                DEFAULT_MIN_HALF_LIFE,
            ),
            get_positional_features_central_mask(&distances, num_basis_per_class),
            get_positional_features_gamma(
                &distances,
                num_basis_per_class,
                seq_len,
                None,
                None,
                GAMMA_EPS,
            ),
        ],
        -1,
    );
    let signed = distances.sign().to_kind(Kind::Float).unsqueeze(-1) * &embeddings;
    Ok(Tensor::cat(&[&embeddings, &signed], -1))
}

#[derive(Debug, Clone, Copy)]
/// # Relative positional basis encoder
/// Validated holder of the basis width. The basis itself is recomputed for every window length.
pub struct PositionalBasisEncoder {
    num_features: i64,
}

impl PositionalBasisEncoder {
    pub fn new(num_features: i64) -> Result<PositionalBasisEncoder, EnformerError> {
        if num_features <= 0 || num_features % NUM_BASIS_COMPONENTS != 0 {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "num_rel_pos_features ({num_features}) must be a positive multiple of {NUM_BASIS_COMPONENTS}"
            )));
        }
        Ok(PositionalBasisEncoder { num_features })
    }

    pub fn num_features(&self) -> i64 {
        self.num_features
    }

    /// Returns the `[2 * seq_len - 1, num_features]` basis for a window of length `seq_len`.
    pub fn encode(&self, seq_len: i64, device: Device) -> Result<Tensor, EnformerError> {
        get_positional_embed(seq_len, self.num_features, device)
    }
}

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

use crate::EnformerError;
use tch::{Kind, Tensor};

fn check_same_size(prediction: &Tensor, target: &Tensor) -> Result<(), EnformerError> {
    if prediction.size() != target.size() {
        return Err(EnformerError::ShapeMismatchError(format!(
            "prediction {:?} and target {:?} shapes differ",
            prediction.size(),
            target.size()
        )));
    }
    Ok(())
}

/// Poisson negative log likelihood (up to a constant) of non-negative rate predictions,
/// `mean(prediction - target * log(prediction))`. Predictions are clamped to `1e-20` inside the log.
pub fn poisson_loss(prediction: &Tensor, target: &Tensor) -> Result<Tensor, EnformerError> {
    check_same_size(prediction, target)?;
    Ok((prediction - target * prediction.clamp_min(1e-20).log()).mean(prediction.kind()))
}

/// Pearson correlation between `x` and `y` computed along axis 1 (the sequence axis of
/// `[batch, length, tracks]` tensors), averaged over the last axis.
///
/// Returns a `[batch]` tensor for 3-D inputs and a scalar for 2-D `[batch, length]` inputs.
pub fn pearson_corr_coef(x: &Tensor, y: &Tensor) -> Result<Tensor, EnformerError> {
    check_same_size(x, y)?;
    if x.dim() < 2 {
        return Err(EnformerError::ShapeMismatchError(format!(
            "pearson correlation needs at least 2 dimensions, got {}",
            x.dim()
        )));
    }
    let x_centered = x - x.mean_dim([1].as_slice(), true, Kind::Float);
    let y_centered = y - y.mean_dim([1].as_slice(), true, Kind::Float);
    let correlation = Tensor::cosine_similarity(&x_centered, &y_centered, 1, 1e-8);
    Ok(correlation.mean_dim([-1].as_slice(), false, Kind::Float))
}

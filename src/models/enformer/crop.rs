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
use tch::Tensor;

/// Target length disabling the crop.
pub const NO_CROP: i64 = -1;

#[derive(Debug, Clone, Copy)]
/// # Centered crop along the sequence axis
/// Crops `[..., length, dim]` inputs to `target_length` positions around their center.
pub struct TargetLengthCrop {
    target_length: Option<i64>,
}

impl TargetLengthCrop {
    /// Creates a crop to `target_length` positions, `-1` disables cropping.
    pub fn new(target_length: i64) -> Result<TargetLengthCrop, EnformerError> {
        let target_length = match target_length {
            NO_CROP => None,
            value if value >= 0 => Some(value),
            value => {
                return Err(EnformerError::InvalidConfigurationError(format!(
                    "target_length must be positive or {NO_CROP}, got {value}"
                )))
            }
        };
        Ok(TargetLengthCrop { target_length })
    }

    pub fn target_length(&self) -> Option<i64> {
        self.target_length
    }

    /// Keeps `target_length` positions starting at `(length - target_length) / 2`.
    /// When the surplus is odd, the extra position is removed from the end.
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor, EnformerError> {
        let target_length = match self.target_length {
            Some(value) => value,
            None => return Ok(hidden_states.shallow_clone()),
        };
        if hidden_states.dim() < 2 {
            return Err(EnformerError::ShapeMismatchError(format!(
                "cannot crop a tensor of rank {}",
                hidden_states.dim()
            )));
        }
        let seq_len = hidden_states.size()[hidden_states.dim() - 2];
        if seq_len < target_length {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "sequence length {seq_len} is less than target length {target_length}"
            )));
        }
        if seq_len == target_length {
            return Ok(hidden_states.shallow_clone());
        }
        let trim = (seq_len - target_length) / 2;
        Ok(hidden_states.narrow(-2, trim, target_length))
    }
}

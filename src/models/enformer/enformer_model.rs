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

use crate::{Config, EnformerError};
use serde::{Deserialize, Serialize};

/// Input sequence length (in base pairs) of the reference model.
pub const SEQUENCE_LENGTH: i64 = 196_608;
/// Number of output bins of the reference model after cropping.
pub const TARGET_LENGTH: i64 = 896;

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
/// # Attention variant used in the transformer tower
pub enum AttentionType {
    /// Multi-head attention with a relative positional basis (`MultiHeadRelativeAttention`)
    #[serde(alias = "enformer")]
    relative,
    /// Multi-head attention with a learned, fixed-size absolute positional table (`AbsolutePositionAttention`)
    #[serde(alias = "abs_param")]
    absolute,
}

impl Default for AttentionType {
    fn default() -> Self {
        AttentionType::relative
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
/// # Enformer attention configuration
/// Defines the attention tower of the model (width, number of heads, key and value sizes, dropouts...).
/// Options missing from a configuration file fall back to the reference model values.
#[serde(default)]
pub struct EnformerConfig {
    pub dim: i64,
    pub depth: i64,
    pub heads: i64,
    pub dim_key: i64,
    pub dim_value: Option<i64>,
    /// Dropout applied to the attention weights
    pub dropout: f64,
    /// Dropout applied to the relative positional basis
    pub pos_dropout: f64,
    /// Dropout applied inside the transformer blocks
    pub dropout_rate: f64,
    pub num_rel_pos_features: Option<i64>,
    pub input_length: Option<i64>,
    pub attention_type: AttentionType,
    pub pool_size: i64,
    pub target_length: i64,
    pub layer_norm_eps: Option<f64>,
    pub output_attentions: Option<bool>,
    pub checkpoint_segments: Option<i64>,
}

impl Config for EnformerConfig {}

impl Default for EnformerConfig {
    fn default() -> Self {
        EnformerConfig {
            dim: 1536,
            depth: 11,
            heads: 8,
            dim_key: 64,
            dim_value: None,
            dropout: 0.05,
            pos_dropout: 0.01,
            dropout_rate: 0.4,
            num_rel_pos_features: None,
            input_length: None,
            attention_type: AttentionType::relative,
            pool_size: 2,
            target_length: TARGET_LENGTH,
            layer_norm_eps: Some(1e-5),
            output_attentions: None,
            checkpoint_segments: None,
        }
    }
}

impl EnformerConfig {
    /// Value dimension per head, defaults to `dim / heads`.
    pub fn dim_value(&self) -> i64 {
        self.dim_value.unwrap_or(self.dim / self.heads.max(1))
    }

    /// Width of the relative positional basis, defaults to `dim / heads`.
    pub fn num_rel_pos_features(&self) -> i64 {
        self.num_rel_pos_features
            .unwrap_or(self.dim / self.heads.max(1))
    }

    /// Checks the invariants of the configuration, returning an `InvalidConfigurationError`
    /// naming the first offending option.
    pub fn validate(&self) -> Result<(), EnformerError> {
        let positive = [
            ("dim", self.dim),
            ("heads", self.heads),
            ("dim_key", self.dim_key),
            ("dim_value", self.dim_value()),
            ("pool_size", self.pool_size),
        ];
        for (name, value) in positive {
            if value < 1 {
                return Err(EnformerError::InvalidConfigurationError(format!(
                    "{name} must be strictly positive, got {value}"
                )));
            }
        }
        if self.depth < 0 {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "depth must be positive, got {}",
                self.depth
            )));
        }
        for (name, value) in [
            ("dropout", self.dropout),
            ("pos_dropout", self.pos_dropout),
            ("dropout_rate", self.dropout_rate),
        ] {
            if !(0.0..1.0).contains(&value) {
                return Err(EnformerError::InvalidConfigurationError(format!(
                    "{name} must be in [0, 1), got {value}"
                )));
            }
        }
        let num_rel_pos_features = self.num_rel_pos_features();
        if num_rel_pos_features < 6 || num_rel_pos_features % 6 != 0 {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "num_rel_pos_features ({num_rel_pos_features}) must be a positive multiple of 6"
            )));
        }
        if self.attention_type == AttentionType::absolute {
            match self.input_length {
                Some(input_length) if input_length > 0 => {}
                _ => {
                    return Err(EnformerError::InvalidConfigurationError(
                        "absolute attention requires a positive input_length".to_string(),
                    ))
                }
            }
        }
        if self.target_length < -1 {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "target_length must be positive or -1, got {}",
                self.target_length
            )));
        }
        if let Some(segments) = self.checkpoint_segments {
            if segments < 1 {
                return Err(EnformerError::InvalidConfigurationError(format!(
                    "checkpoint_segments must be strictly positive, got {segments}"
                )));
            }
        }
        Ok(())
    }
}

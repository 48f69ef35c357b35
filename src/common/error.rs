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

use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnformerError {
    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    /// Tensor shapes produced inside the attention / pooling layers do not line up.
    /// This points at an implementation defect or a caller passing a tensor of the wrong rank.
    #[error("Shape mismatch error: {0}")]
    ShapeMismatchError(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

impl From<std::io::Error> for EnformerError {
    fn from(error: std::io::Error) -> Self {
        EnformerError::IOError(error.to_string())
    }
}

impl From<TchError> for EnformerError {
    fn from(error: TchError) -> Self {
        EnformerError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for EnformerError {
    fn from(error: serde_json::Error) -> Self {
        EnformerError::InvalidConfigurationError(error.to_string())
    }
}

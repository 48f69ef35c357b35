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
use tch::{Kind, Scalar};

/// Most negative finite value representable by a floating point `Kind`.
///
/// Used as a masking value before a softmax: the masked entries receive exactly zero weight
/// while avoiding the `NaN`s that `-inf` produces on fully masked rows.
pub(crate) fn get_min(kind: Kind) -> Result<Scalar, EnformerError> {
    Ok(match kind {
        Kind::Half => Scalar::float(half::f16::MIN.into()),
        Kind::BFloat16 => Scalar::float(half::bf16::MIN.into()),
        Kind::Float => Scalar::float(f32::MIN.into()),
        Kind::Double => Scalar::float(f64::MIN),
        _ => {
            return Err(EnformerError::ValueError(format!(
                "Type not supported: attempted to get the minimum value for {kind:?}"
            )))
        }
    })
}

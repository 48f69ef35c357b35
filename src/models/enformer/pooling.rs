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

use crate::common::kind::get_min;
use crate::enformer::EnformerConfig;
use crate::EnformerError;
use std::borrow::Borrow;
use tch::{nn, Kind, Tensor};

#[derive(Debug)]
/// # Attention pooling
///
/// Downsamples a `[batch, dim, length]` sequence by `pool_size` with a softmax-weighted sum over
/// every window. Window logits come from a 1x1 convolution initialized to `2 * I`.
/// Inputs whose length is not a multiple of `pool_size` are right-padded and the padded
/// positions are masked out of the softmax.
pub struct AttentionPool {
    dim: i64,
    pool_size: i64,
    to_attn_logits: nn::Conv2D,
}

impl AttentionPool {
    /// Build a new `AttentionPool`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the pooling layer
    /// * `dim` - number of channels
    /// * `pool_size` - downsampling factor (>= 1)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_enformer::enformer::AttentionPool;
    /// use tch::{nn, Device, Kind, Tensor};
    ///
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let pool = AttentionPool::new(&vs.root() / "pool", 8, 2)?;
    /// let input = Tensor::rand([1, 8, 5], (Kind::Float, Device::Cpu));
    /// let output = pool.forward(&input)?;
    /// assert_eq!(output.size(), vec![1, 8, 3]);
    /// # Ok::<(), rust_enformer::EnformerError>(())
    /// ```
    pub fn new<'p, P>(p: P, dim: i64, pool_size: i64) -> Result<AttentionPool, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        if pool_size < 1 {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "pool_size must be strictly positive, got {pool_size}"
            )));
        }
        if dim < 1 {
            return Err(EnformerError::InvalidConfigurationError(format!(
                "dim must be strictly positive, got {dim}"
            )));
        }
        let p = p.borrow();
        let mut to_attn_logits = nn::conv2d(
            p / "to_attn_logits",
            dim,
            dim,
            1,
            nn::ConvConfig {
                bias: false,
                ..Default::default()
            },
        );
        let kind = to_attn_logits.ws.kind();
        let dirac = (Tensor::eye(dim, (kind, p.device())) * 2.0).view([dim, dim, 1, 1]);
        tch::no_grad(|| to_attn_logits.ws.copy_(&dirac));

        tracing::debug!(dim, pool_size, "building attention pooling layer");
        Ok(AttentionPool {
            dim,
            pool_size,
            to_attn_logits,
        })
    }

    /// Builds the pooling layer over `config.dim` channels with a factor of `config.pool_size`.
    pub fn from_config<'p, P>(p: P, config: &EnformerConfig) -> Result<AttentionPool, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        AttentionPool::new(p, config.dim, config.pool_size)
    }

    pub fn pool_size(&self) -> i64 {
        self.pool_size
    }

    /// Forward pass through the pooling layer
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - input of shape (*batch size*, *dim*, *length*)
    ///
    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *dim*, ceil(*length* / *pool_size*))
    pub fn forward(&self, hidden_states: &Tensor) -> Result<Tensor, EnformerError> {
        Ok(self.forward_with_weights(hidden_states)?.0)
    }

    /// Same as `forward`, also returning the pooling weights of shape
    /// (*batch size*, *dim*, *windows*, *pool_size*). Padded positions carry a weight of exactly 0.
    pub fn forward_with_weights(
        &self,
        hidden_states: &Tensor,
    ) -> Result<(Tensor, Tensor), EnformerError> {
        let size = hidden_states.size();
        let (batch_size, seq_len) = match size.as_slice() {
            &[batch_size, dim, seq_len] if dim == self.dim => (batch_size, seq_len),
            _ => {
                return Err(EnformerError::ShapeMismatchError(format!(
                    "expected an input of shape [batch, {}, length], got {:?}",
                    self.dim, size
                )))
            }
        };
        let remainder = seq_len % self.pool_size;
        let padding = if remainder > 0 {
            self.pool_size - remainder
        } else {
            0
        };
        let num_windows = (seq_len + padding) / self.pool_size;
        let device = hidden_states.device();

        let windows = if padding > 0 {
            tracing::debug!(seq_len, padding, "padding attention pooling input");
            hidden_states.pad([0, padding], "constant", 0.0)
        } else {
            hidden_states.shallow_clone()
        }
        .reshape([batch_size, self.dim, num_windows, self.pool_size]);

        let mut logits = windows.apply(&self.to_attn_logits);
        if padding > 0 {
            let mask = Tensor::cat(
                &[
                    Tensor::zeros([batch_size, 1, seq_len], (Kind::Bool, device)),
                    Tensor::ones([batch_size, 1, padding], (Kind::Bool, device)),
                ],
                -1,
            )
            .view([batch_size, 1, num_windows, self.pool_size]);
            logits = logits.masked_fill(&mask, get_min(logits.kind())?);
        }

        let attention = logits.softmax(-1, logits.kind());
        let pooled = (&windows * &attention).sum_dim_intlist([-1].as_slice(), false, windows.kind());
        Ok((pooled, attention))
    }
}

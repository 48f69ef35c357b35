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

use crate::common::dropout::Dropout;
use crate::enformer::positional::PositionalBasisEncoder;
use crate::enformer::{AttentionType, EnformerConfig};
use crate::EnformerError;
use std::borrow::Borrow;
use tch::nn::Init;
use tch::{nn, Tensor};

/// Realigns logits indexed by relative offset to logits indexed by absolute key position.
///
/// The input is `[batch, heads, query_len, offsets]` (or `[batch, segments, heads, query_len, offsets]`)
/// where the offset axis enumerates `key - query` from `-(L-1)` to `L-1`. The output is
/// `[..., query_len, L]`, entry `[.., i, j]` holding the input logit at offset `j - i`.
///
/// This is the reshape/slice "skew" trick: an odd offset axis is left-padded with a zero
/// column, the `(query, offset)` plane is reinterpreted as `(offset, query)`, its first row
/// is dropped and the result is reinterpreted back, which shifts each query row by one
/// position relative to the previous one.
pub fn relative_shift(x: &Tensor) -> Result<Tensor, EnformerError> {
    let input_size = x.size();
    let segments = match input_size.len() {
        4 => None,
        5 => Some(input_size[1]),
        rank => {
            return Err(EnformerError::ShapeMismatchError(format!(
                "relative shift expects a 4-D or 5-D tensor, got rank {rank}"
            )))
        }
    };
    let x = match segments {
        Some(_) => x.flatten(0, 1),
        None => x.shallow_clone(),
    };
    let x = if input_size[input_size.len() - 1] % 2 != 0 {
        Tensor::cat(&[&x.narrow(-1, 0, 1).zeros_like(), &x], -1)
    } else {
        x
    };

    let (batch, heads, t1, t2) = x.size4()?;
    let kept = (t2 + 1) / 2;
    if kept != t1 {
        return Err(EnformerError::ShapeMismatchError(format!(
            "relative shift expects {} or {} offsets for {} queries, got {}",
            2 * t1 - 1,
            2 * t1,
            t1,
            input_size[input_size.len() - 1]
        )));
    }
    let x = x
        .reshape([batch, heads, t2, t1])
        .narrow(2, 1, t2 - 1)
        .reshape([batch, heads, t1, t2 - 1]);
    let x = match segments {
        Some(segments) => x.reshape([batch / segments, segments, heads, t1, t2 - 1]),
        None => x,
    };
    Ok(x.narrow(-1, 0, kept))
}

#[derive(Debug)]
/// # Attention logits
/// Pre-softmax attention scores of an attention layer, `[batch, heads, L, L]`.
pub struct AttentionScores {
    /// Content-based logits, `(q + content bias) . k`
    pub content_logits: Tensor,
    /// Positional logits after the relative shift (relative attention only)
    pub positional_logits: Option<Tensor>,
    /// Logits the softmax is taken over
    pub logits: Tensor,
}

#[derive(Debug)]
/// # Output of an attention layer
pub struct AttentionOutput {
    /// Attention output, `[batch, L, dim]`
    pub hidden_states: Tensor,
    /// Attention weights `[batch, heads, L, L]`, returned when `output_attentions` is set
    pub attention_weights: Option<Tensor>,
}

pub(crate) fn sequence_size(
    hidden_states: &Tensor,
    dim: i64,
) -> Result<(i64, i64, i64), EnformerError> {
    let size = hidden_states.size();
    match size.as_slice() {
        &[batch_size, seq_len, hidden_dim] if hidden_dim == dim => {
            Ok((batch_size, seq_len, hidden_dim))
        }
        _ => Err(EnformerError::ShapeMismatchError(format!(
            "expected an input of shape [batch, length, {dim}], got {size:?}"
        ))),
    }
}

/// Query, key, value and output projections shared by the attention variants.
#[derive(Debug)]
struct AttentionProjections {
    dim: i64,
    heads: i64,
    dim_key: i64,
    dim_value: i64,
    scale: f64,
    to_q: nn::Linear,
    to_k: nn::Linear,
    to_v: nn::Linear,
    to_out: nn::Linear,
    rel_content_bias: Tensor,
    dropout: Dropout,
    output_attentions: bool,
}

struct HeadProjections {
    batch_size: i64,
    seq_len: i64,
    query: Tensor,
    key: Tensor,
    value: Tensor,
}

impl AttentionProjections {
    fn new(p: &nn::Path, config: &EnformerConfig) -> Result<AttentionProjections, EnformerError> {
        config.validate()?;
        let dim_value = config.dim_value();
        let no_bias = nn::LinearConfig {
            bias: false,
            ..Default::default()
        };

        let to_q = nn::linear(p / "to_q", config.dim, config.dim_key * config.heads, no_bias);
        let to_k = nn::linear(p / "to_k", config.dim, config.dim_key * config.heads, no_bias);
        let to_v = nn::linear(p / "to_v", config.dim, dim_value * config.heads, no_bias);

        // Starts as a no-op inside the residual connection
        let to_out = nn::linear(
            p / "to_out",
            dim_value * config.heads,
            config.dim,
            nn::LinearConfig {
                ws_init: Init::Const(0.0),
                bs_init: Some(Init::Const(0.0)),
                bias: true,
            },
        );
        let rel_content_bias = p.var(
            "rel_content_bias",
            &[1, config.heads, 1, config.dim_key],
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        );

        Ok(AttentionProjections {
            dim: config.dim,
            heads: config.heads,
            dim_key: config.dim_key,
            dim_value,
            scale: (config.dim_key as f64).powf(-0.5),
            to_q,
            to_k,
            to_v,
            to_out,
            rel_content_bias,
            dropout: Dropout::new(config.dropout)?,
            output_attentions: config.output_attentions.unwrap_or(false),
        })
    }

    fn split_heads(&self, x: &Tensor, batch_size: i64, seq_len: i64, head_dim: i64) -> Tensor {
        x.view([batch_size, seq_len, self.heads, head_dim])
            .permute([0, 2, 1, 3])
    }

    /// Projects `[batch, L, dim]` inputs to per-head `[batch, heads, L, d]` queries (scaled), keys and values.
    fn project(&self, hidden_states: &Tensor) -> Result<HeadProjections, EnformerError> {
        let (batch_size, seq_len, _) = sequence_size(hidden_states, self.dim)?;
        let query = self.split_heads(
            &hidden_states.apply(&self.to_q),
            batch_size,
            seq_len,
            self.dim_key,
        ) * self.scale;
        let key = self.split_heads(
            &hidden_states.apply(&self.to_k),
            batch_size,
            seq_len,
            self.dim_key,
        );
        let value = self.split_heads(
            &hidden_states.apply(&self.to_v),
            batch_size,
            seq_len,
            self.dim_value,
        );
        Ok(HeadProjections {
            batch_size,
            seq_len,
            query,
            key,
            value,
        })
    }

    fn content_logits(&self, heads: &HeadProjections) -> Tensor {
        Tensor::einsum(
            "bhid,bhjd->bhij",
            &[&(&heads.query + &self.rel_content_bias), &heads.key],
            None::<i64>,
        )
    }

    /// Softmax over the key axis, weighted sum of the values, heads merge and output projection.
    fn mix(&self, logits: &Tensor, heads: &HeadProjections, train: bool) -> AttentionOutput {
        let attention_weights = logits.softmax(-1, logits.kind());
        let context = Tensor::einsum(
            "bhij,bhjd->bhid",
            &[&attention_weights.apply_t(&self.dropout, train), &heads.value],
            None::<i64>,
        )
        .permute([0, 2, 1, 3])
        .contiguous()
        .view([heads.batch_size, heads.seq_len, self.heads * self.dim_value]);

        AttentionOutput {
            hidden_states: context.apply(&self.to_out),
            attention_weights: if self.output_attentions {
                Some(attention_weights)
            } else {
                None
            },
        }
    }
}

#[derive(Debug)]
/// # Multi-head attention with relative positional encodings
///
/// Positional logits are computed from a fixed relative positional basis projected to the key
/// space of every head, then realigned with `relative_shift`. Nothing depends on a maximum
/// sequence length: the basis is rebuilt for the length of every input.
pub struct MultiHeadRelativeAttention {
    projections: AttentionProjections,
    positional_encoder: PositionalBasisEncoder,
    to_rel_k: nn::Linear,
    rel_pos_bias: Tensor,
    pos_dropout: Dropout,
}

impl MultiHeadRelativeAttention {
    /// Build a new `MultiHeadRelativeAttention`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the attention layer
    /// * `config` - `EnformerConfig` object defining the layer dimensions
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_enformer::enformer::{EnformerConfig, MultiHeadRelativeAttention};
    /// use tch::{nn, Device};
    ///
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let config = EnformerConfig::default();
    /// let attention = MultiHeadRelativeAttention::new(&vs.root() / "attention", &config)?;
    /// # Ok::<(), rust_enformer::EnformerError>(())
    /// ```
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<Self, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let projections = AttentionProjections::new(p, config)?;
        let positional_encoder = PositionalBasisEncoder::new(config.num_rel_pos_features())?;

        let to_rel_k = nn::linear(
            p / "to_rel_k",
            positional_encoder.num_features(),
            config.dim_key * config.heads,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );
        let rel_pos_bias = p.var(
            "rel_pos_bias",
            &[1, config.heads, 1, config.dim_key],
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        );

        Ok(MultiHeadRelativeAttention {
            projections,
            positional_encoder,
            to_rel_k,
            rel_pos_bias,
            pos_dropout: Dropout::new(config.pos_dropout)?,
        })
    }

    fn scores(&self, heads: &HeadProjections, train: bool) -> Result<AttentionScores, EnformerError> {
        let content_logits = self.projections.content_logits(heads);

        let positions = self
            .positional_encoder
            .encode(heads.seq_len, heads.query.device())?
            .to_kind(self.to_rel_k.ws.kind())
            .apply_t(&self.pos_dropout, train);
        let rel_k = positions
            .apply(&self.to_rel_k)
            .view([
                2 * heads.seq_len - 1,
                self.projections.heads,
                self.projections.dim_key,
            ])
            .permute([1, 0, 2]);
        let rel_logits = Tensor::einsum(
            "bhid,hjd->bhij",
            &[&(&heads.query + &self.rel_pos_bias), &rel_k],
            None::<i64>,
        );
        let positional_logits = relative_shift(&rel_logits)?;

        if positional_logits.size() != content_logits.size() {
            return Err(EnformerError::ShapeMismatchError(format!(
                "positional logits {:?} do not match content logits {:?}",
                positional_logits.size(),
                content_logits.size()
            )));
        }
        let logits = &content_logits + &positional_logits;
        Ok(AttentionScores {
            content_logits,
            positional_logits: Some(positional_logits),
            logits,
        })
    }

    /// Computes the content, positional and combined attention logits for `[batch, L, dim]` inputs.
    pub fn score_t(&self, hidden_states: &Tensor, train: bool) -> Result<AttentionScores, EnformerError> {
        let heads = self.projections.project(hidden_states)?;
        self.scores(&heads, train)
    }

    /// Forward pass through the attention layer
    ///
    /// # Arguments
    ///
    /// * `hidden_states` - input of shape (*batch size*, *sequence_length*, *dim*)
    /// * `train` - boolean flag to turn on/off the dropout layers
    ///
    /// # Returns
    ///
    /// * `AttentionOutput` containing the output of shape (*batch size*, *sequence_length*, *dim*)
    ///   and optionally the attention weights (*batch size*, *heads*, *sequence_length*, *sequence_length*)
    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Result<AttentionOutput, EnformerError> {
        let heads = self.projections.project(hidden_states)?;
        let scores = self.scores(&heads, train)?;
        Ok(self.projections.mix(&scores.logits, &heads, train))
    }
}

#[derive(Debug)]
/// # Multi-head attention with a learned absolute positional table
///
/// Alternate to `MultiHeadRelativeAttention` for fixed-length inputs: a `[heads, input_length, dim_key]`
/// parameter is added to the queries before scoring them against the keys.
pub struct AbsolutePositionAttention {
    projections: AttentionProjections,
    input_length: i64,
    pos_embed: Tensor,
}

impl AbsolutePositionAttention {
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<Self, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        let input_length = match config.input_length {
            Some(value) if value > 0 => value,
            _ => {
                return Err(EnformerError::InvalidConfigurationError(
                    "absolute position attention requires a positive input_length".to_string(),
                ))
            }
        };
        let projections = AttentionProjections::new(p, config)?;
        let pos_embed = p.var(
            "pos_embed",
            &[config.heads, input_length, config.dim_key],
            Init::Const(0.0),
        );
        Ok(AbsolutePositionAttention {
            projections,
            input_length,
            pos_embed,
        })
    }

    fn scores(&self, heads: &HeadProjections) -> Result<AttentionScores, EnformerError> {
        if heads.seq_len != self.input_length {
            return Err(EnformerError::ShapeMismatchError(format!(
                "absolute position attention was built for inputs of length {}, got {}",
                self.input_length, heads.seq_len
            )));
        }
        let content_logits = self.projections.content_logits(heads);
        let logits = Tensor::einsum(
            "bhid,bhjd->bhij",
            &[
                &(&heads.query + &self.pos_embed + &self.projections.rel_content_bias),
                &heads.key,
            ],
            None::<i64>,
        );
        Ok(AttentionScores {
            content_logits,
            positional_logits: None,
            logits,
        })
    }

    pub fn score_t(&self, hidden_states: &Tensor, _train: bool) -> Result<AttentionScores, EnformerError> {
        let heads = self.projections.project(hidden_states)?;
        self.scores(&heads)
    }

    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Result<AttentionOutput, EnformerError> {
        let heads = self.projections.project(hidden_states)?;
        let scores = self.scores(&heads)?;
        Ok(self.projections.mix(&scores.logits, &heads, train))
    }
}

#[derive(Debug)]
/// # Attention layer selected by `AttentionType`
pub enum AttentionVariant {
    Relative(MultiHeadRelativeAttention),
    Absolute(AbsolutePositionAttention),
}

impl AttentionVariant {
    /// Builds the attention layer named by `config.attention_type`.
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<Self, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        tracing::debug!(
            attention_type = ?config.attention_type,
            heads = config.heads,
            dim_key = config.dim_key,
            "building attention layer"
        );
        Ok(match config.attention_type {
            AttentionType::relative => {
                AttentionVariant::Relative(MultiHeadRelativeAttention::new(p, config)?)
            }
            AttentionType::absolute => {
                AttentionVariant::Absolute(AbsolutePositionAttention::new(p, config)?)
            }
        })
    }

    pub fn attention_type(&self) -> AttentionType {
        match self {
            AttentionVariant::Relative(_) => AttentionType::relative,
            AttentionVariant::Absolute(_) => AttentionType::absolute,
        }
    }

    pub fn score_t(&self, hidden_states: &Tensor, train: bool) -> Result<AttentionScores, EnformerError> {
        match self {
            AttentionVariant::Relative(attention) => attention.score_t(hidden_states, train),
            AttentionVariant::Absolute(attention) => attention.score_t(hidden_states, train),
        }
    }

    pub fn forward_t(&self, hidden_states: &Tensor, train: bool) -> Result<AttentionOutput, EnformerError> {
        match self {
            AttentionVariant::Relative(attention) => attention.forward_t(hidden_states, train),
            AttentionVariant::Absolute(attention) => attention.forward_t(hidden_states, train),
        }
    }
}

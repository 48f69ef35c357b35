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
use crate::enformer::attention::AttentionVariant;
use crate::enformer::crop::TargetLengthCrop;
use crate::enformer::EnformerConfig;
use crate::EnformerError;
use std::borrow::Borrow;
use std::sync::Once;
use tch::{nn, Tensor};

/// Sequence to sequence computation with a fallible forward pass.
pub trait SequenceModule {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError>;
}

#[derive(Debug)]
/// # Residual connection
/// Adds the input of the wrapped module to its output.
pub struct Residual<M> {
    inner: M,
}

impl<M: SequenceModule> Residual<M> {
    pub fn new(inner: M) -> Residual<M> {
        Residual { inner }
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: SequenceModule> SequenceModule for Residual<M> {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError> {
        Ok(self.inner.forward_t(xs, train)? + xs)
    }
}

impl SequenceModule for AttentionVariant {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError> {
        Ok(AttentionVariant::forward_t(self, xs, train)?.hidden_states)
    }
}

impl SequenceModule for TargetLengthCrop {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Result<Tensor, EnformerError> {
        self.forward(xs)
    }
}

fn layer_norm(p: nn::Path, config: &EnformerConfig) -> nn::LayerNorm {
    let layer_norm_config = nn::LayerNormConfig {
        eps: config.layer_norm_eps.unwrap_or(1e-5),
        ..Default::default()
    };
    nn::layer_norm(p, vec![config.dim], layer_norm_config)
}

#[derive(Debug)]
/// Pre-norm attention sub-block: LayerNorm, attention, dropout.
pub struct AttentionBlock {
    layer_norm: nn::LayerNorm,
    attention: AttentionVariant,
    dropout: Dropout,
}

impl AttentionBlock {
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<AttentionBlock, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        Ok(AttentionBlock {
            layer_norm: layer_norm(p / "layer_norm", config),
            attention: AttentionVariant::new(p / "attention", config)?,
            dropout: Dropout::new(config.dropout_rate)?,
        })
    }

    pub fn attention(&self) -> &AttentionVariant {
        &self.attention
    }
}

impl SequenceModule for AttentionBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError> {
        let hidden_states = self
            .attention
            .forward_t(&xs.apply(&self.layer_norm), train)?
            .hidden_states;
        Ok(hidden_states.apply_t(&self.dropout, train))
    }
}

#[derive(Debug)]
/// Pre-norm feed-forward sub-block expanding the width by a factor 2.
pub struct FeedForwardBlock {
    layer_norm: nn::LayerNorm,
    linear_1: nn::Linear,
    linear_2: nn::Linear,
    dropout: Dropout,
}

impl FeedForwardBlock {
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<FeedForwardBlock, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        Ok(FeedForwardBlock {
            layer_norm: layer_norm(p / "layer_norm", config),
            linear_1: nn::linear(p / "linear_1", config.dim, 2 * config.dim, Default::default()),
            linear_2: nn::linear(p / "linear_2", 2 * config.dim, config.dim, Default::default()),
            dropout: Dropout::new(config.dropout_rate)?,
        })
    }
}

impl SequenceModule for FeedForwardBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError> {
        Ok(xs
            .apply(&self.layer_norm)
            .apply(&self.linear_1)
            .apply_t(&self.dropout, train)
            .relu()
            .apply(&self.linear_2)
            .apply_t(&self.dropout, train))
    }
}

#[derive(Debug)]
/// Attention and feed-forward sub-blocks, each wrapped in a residual connection.
pub struct TransformerLayer {
    attention: Residual<AttentionBlock>,
    feed_forward: Residual<FeedForwardBlock>,
}

impl TransformerLayer {
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<TransformerLayer, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let p = p.borrow();
        Ok(TransformerLayer {
            attention: Residual::new(AttentionBlock::new(p / "attention", config)?),
            feed_forward: Residual::new(FeedForwardBlock::new(p / "feed_forward", config)?),
        })
    }

    pub fn attention(&self) -> &AttentionVariant {
        self.attention.inner().attention()
    }
}

impl SequenceModule for TransformerLayer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError> {
        let hidden_states = self.attention.forward_t(xs, train)?;
        self.feed_forward.forward_t(&hidden_states, train)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// # Evaluation strategy of a stack of layers
pub enum ExecutionStrategy {
    /// Layers are applied one after the other
    Sequential,
    /// Layers are evaluated in `segments` consecutive groups. Activations are not recomputed,
    /// so outputs, gradients and memory use match `Sequential`.
    Segmented { segments: i64 },
}

impl ExecutionStrategy {
    pub fn from_config(config: &EnformerConfig) -> ExecutionStrategy {
        match config.checkpoint_segments {
            Some(segments) if segments > 1 => ExecutionStrategy::Segmented { segments },
            _ => ExecutionStrategy::Sequential,
        }
    }
}

/// # Enformer transformer tower
/// Stack of `depth` transformer layers followed by a centered crop to `target_length`.
pub struct EnformerTransformer {
    layers: Vec<TransformerLayer>,
    crop: TargetLengthCrop,
    execution: ExecutionStrategy,
    checkpoint_warning: Once,
}

impl EnformerTransformer {
    /// Build a new `EnformerTransformer`
    ///
    /// # Arguments
    ///
    /// * `p` - Variable store path for the root of the transformer tower
    /// * `config` - `EnformerConfig` object defining the tower
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rust_enformer::enformer::{EnformerConfig, EnformerTransformer, SequenceModule};
    /// use tch::{nn, Device, Kind, Tensor};
    ///
    /// let vs = nn::VarStore::new(Device::Cpu);
    /// let config = EnformerConfig {
    ///     dim: 48,
    ///     depth: 2,
    ///     heads: 4,
    ///     dim_key: 8,
    ///     target_length: 8,
    ///     ..Default::default()
    /// };
    /// let transformer = EnformerTransformer::new(&vs.root() / "transformer", &config)?;
    /// let input = Tensor::rand([1, 16, 48], (Kind::Float, Device::Cpu));
    /// let output = tch::no_grad(|| transformer.forward_t(&input, false))?;
    /// assert_eq!(output.size(), vec![1, 8, 48]);
    /// # Ok::<(), rust_enformer::EnformerError>(())
    /// ```
    pub fn new<'p, P>(p: P, config: &EnformerConfig) -> Result<EnformerTransformer, EnformerError>
    where
        P: Borrow<nn::Path<'p>>,
    {
        config.validate()?;
        let p = p.borrow();
        let p_layers = p / "layers";
        let mut layers: Vec<TransformerLayer> = Vec::with_capacity(config.depth as usize);
        for layer_index in 0..config.depth {
            layers.push(TransformerLayer::new(&p_layers / layer_index, config)?);
        }
        let execution = ExecutionStrategy::from_config(config);
        tracing::debug!(
            depth = config.depth,
            execution = ?execution,
            target_length = config.target_length,
            "building transformer tower"
        );
        Ok(EnformerTransformer {
            layers,
            crop: TargetLengthCrop::new(config.target_length)?,
            execution,
            checkpoint_warning: Once::new(),
        })
    }

    pub fn layers(&self) -> &[TransformerLayer] {
        &self.layers
    }

    pub fn execution(&self) -> ExecutionStrategy {
        self.execution
    }

    /// Overrides the evaluation strategy, the layers are left untouched.
    pub fn set_execution(&mut self, execution: ExecutionStrategy) {
        self.execution = execution;
    }

    fn run_layers(
        layers: &[TransformerLayer],
        xs: &Tensor,
        train: bool,
    ) -> Result<Tensor, EnformerError> {
        let mut hidden_states = xs.shallow_clone();
        for layer in layers {
            hidden_states = layer.forward_t(&hidden_states, train)?;
        }
        Ok(hidden_states)
    }
}

impl SequenceModule for EnformerTransformer {
    /// Forward pass through the tower
    ///
    /// # Arguments
    ///
    /// * `xs` - input of shape (*batch size*, *sequence_length*, *dim*)
    /// * `train` - boolean flag to turn on/off the dropout layers
    ///
    /// # Returns
    ///
    /// * `Tensor` of shape (*batch size*, *target_length*, *dim*)
    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor, EnformerError> {
        let hidden_states = match self.execution {
            ExecutionStrategy::Sequential => Self::run_layers(&self.layers, xs, train)?,
            ExecutionStrategy::Segmented { segments } => {
                self.checkpoint_warning.call_once(|| {
                    tracing::warn!(
                        segments,
                        "activation recomputation is not available, segments keep their activations"
                    )
                });
                let segment_size =
                    ((self.layers.len() as i64 + segments - 1) / segments).max(1) as usize;
                let mut hidden_states = xs.shallow_clone();
                for (segment_index, segment) in self.layers.chunks(segment_size).enumerate() {
                    tracing::trace!(segment_index, layers = segment.len(), "evaluating segment");
                    hidden_states = Self::run_layers(segment, &hidden_states, train)?;
                }
                hidden_states
            }
        };
        self.crop.forward(&hidden_states)
    }
}

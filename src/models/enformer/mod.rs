//! # Enformer attention core
//!
//! Attention layers of the Enformer sequence-to-function model ([Effective gene expression prediction from sequence by integrating long-range interactions](https://www.nature.com/articles/s41592-021-01252-x) Avsec, Agarwal, Visentin, Ledsam, Grabska-Barwinska, Taylor, Assael, Jumper, Kohli, Kelley, 2021).
//! The crate covers the components that let attention span inputs of hundreds of thousands of positions:
//! - `get_positional_embed` / `PositionalBasisEncoder`: relative positional basis (exponential, central mask and gamma features)
//! - `relative_shift`: realignment of offset-indexed logits to absolute key positions
//! - `MultiHeadRelativeAttention` and its fixed-length alternate `AbsolutePositionAttention`, selected through `AttentionType`
//! - `AttentionPool`: learned softmax pooling over windows
//! - `TargetLengthCrop`: centered crop to the label length
//! - `EnformerTransformer`: residual attention / feed-forward stack followed by the crop
//!
//! # Model set-up
//!
//! The configuration file follows the structure of `EnformerConfig`; missing entries take the
//! values of the reference model. Weights are expected in the `.ot` format with parameter names
//! matching the variable store paths used below.
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! #
//! use rust_enformer::enformer::{EnformerConfig, EnformerTransformer, SequenceModule};
//! use rust_enformer::Config;
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let device = Device::cuda_if_available();
//! let mut vs = nn::VarStore::new(device);
//! let config = EnformerConfig::from_file("path/to/config.json")?;
//! let transformer = EnformerTransformer::new(&vs.root() / "transformer", &config)?;
//! vs.load("path/to/model.ot")?;
//!
//! let input = Tensor::rand([1, 1536, config.dim], (Kind::Float, device));
//! let output = tch::no_grad(|| transformer.forward_t(&input, false))?;
//! # Ok(())
//! # }
//! ```

mod attention;
mod crop;
mod enformer_model;
mod losses;
mod pooling;
mod positional;
mod transformer;

pub use attention::{
    relative_shift, AbsolutePositionAttention, AttentionOutput, AttentionScores,
    AttentionVariant, MultiHeadRelativeAttention,
};
pub use crop::{TargetLengthCrop, NO_CROP};
pub use enformer_model::{AttentionType, EnformerConfig, SEQUENCE_LENGTH, TARGET_LENGTH};
pub use losses::{pearson_corr_coef, poisson_loss};
pub use pooling::AttentionPool;
pub use positional::{
    get_positional_embed, get_positional_features_central_mask,
    get_positional_features_exponential, get_positional_features_gamma,
    get_relative_distances, PositionalBasisEncoder, DEFAULT_MIN_HALF_LIFE, GAMMA_EPS,
    NUM_BASIS_COMPONENTS,
};
pub use transformer::{
    AttentionBlock, EnformerTransformer, ExecutionStrategy, FeedForwardBlock, Residual,
    SequenceModule, TransformerLayer,
};

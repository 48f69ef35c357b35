//! # Long-range attention layers for sequence-to-function models
//!
//! Rust implementation of the attention core of the Enformer genomics model (Avsec et al., 2021),
//! built on [tch-rs](https://github.com/LaurentMazare/tch-rs) (bindings to the C++ API of PyTorch).
//!
//! The crate provides:
//! - a relative positional basis that scales to windows of hundreds of thousands of positions
//! - multi-head relative attention (and a fixed-length absolute-position alternate)
//! - learned attention pooling handling inputs that are not a multiple of the pooling factor
//! - centered cropping to a target length
//! - a transformer tower assembling these layers with residual connections
//!
//! # Loading pre-trained weights
//!
//! Model weights follow the `tch` variable store format (`.ot`). Parameters are named after
//! the variable store paths of each layer (e.g. `transformer.layers.0.attention.attention.to_q.weight`).
//!
//! # Example
//!
//! ```no_run
//! # fn main() -> anyhow::Result<()> {
//! use rust_enformer::enformer::{AttentionPool, EnformerConfig, MultiHeadRelativeAttention};
//! use tch::{nn, Device, Kind, Tensor};
//!
//! let device = Device::Cpu;
//! let vs = nn::VarStore::new(device);
//! let config = EnformerConfig {
//!     dim: 64,
//!     heads: 4,
//!     dim_key: 16,
//!     output_attentions: Some(true),
//!     ..Default::default()
//! };
//!
//! let attention = MultiHeadRelativeAttention::new(&vs.root() / "attention", &config)?;
//! let input = Tensor::rand([2, 100, 64], (Kind::Float, device));
//! let output = attention.forward_t(&input, false)?;
//!
//! let pool = AttentionPool::new(&vs.root() / "pool", 64, 2)?;
//! let pooled = pool.forward(&output.hidden_states.transpose(1, 2))?;
//! # Ok(())
//! # }
//! ```

mod common;
mod models;

pub use common::error::EnformerError;
pub use common::Config;
pub use models::enformer;

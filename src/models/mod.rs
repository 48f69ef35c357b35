//! # Torch implementation of sequence-to-function models

pub mod enformer;

pub mod config;
pub(crate) mod dropout;
pub mod error;
pub(crate) mod kind;

pub use config::Config;

//! A digit-image classifier for the MNIST dataset: IDX data loading, a
//! fixed 784 -> 128 -> 10 feed-forward network with dropout, a mini-batch
//! Adam training loop with sparse categorical cross-entropy from logits,
//! and a softmax probability wrapper for inference.

pub mod error;
pub mod mnist;
pub mod network;
pub mod optimizer;
pub mod train;

pub use error::Error;

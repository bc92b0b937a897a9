#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

// -----------------------------------------------------------------------------
// Modules

mod error;
mod executor;
mod task;

// -----------------------------------------------------------------------------
// Exports

pub use error::ExecutorError;
pub use executor::{ExecutorBuilder, UnboundedQueueExecutor};
pub use task::Task;

// -----------------------------------------------------------------------------
// Re-Exports

pub use futures_lite;
pub use futures_lite::future::block_on;

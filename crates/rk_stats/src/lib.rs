#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

// -----------------------------------------------------------------------------
// Modules

mod error;
mod group;
mod hash;
mod stat;

// -----------------------------------------------------------------------------
// Exports

pub use error::StatsError;
pub use group::{Snapshot, StatsGroup, StatsRegistry};
pub use hash::FixedHashState;
pub use stat::{Counter, DurationScope, DurationStat, Stat};

#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

pub use rk_os as os;
pub use rk_ptr as ptr;

#[cfg(feature = "std")]
pub use rk_stats as stats;
#[cfg(feature = "std")]
pub use rk_task as task;

//! Process table queries for Darwin kernels.
//!
//! [`sysctl`] reads process records and the raw `KERN_PROCARGS2` buffer of a
//! process, [`procargs`] decodes that buffer into the invocation path,
//! arguments and environment. The decoder is platform independent.

mod error;
pub mod procargs;
#[cfg(target_vendor = "apple")]
pub mod sysctl;

pub use error::{Error, Result};
pub use procargs::{decode, ProcArgs};
#[cfg(target_vendor = "apple")]
pub use sysctl::{fetch_args, fetch_info, fetch_ppid, ProcessInfo, RawArgBuffer};

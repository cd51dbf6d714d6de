//! Process-wide `tracing` setup. The subscriber is installed once in `main`;
//! components receive spans rather than configuring logging themselves.

mod logger;
pub use logger::*;

pub use tracing::{debug, error, info, trace, warn};

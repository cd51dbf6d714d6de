//! Command line and TOML settings.
//! See `bin/settings_demo.rs` for a binary that loads them.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;

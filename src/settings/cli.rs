use super::Parser;
use crate::logger::LogFormat;

#[derive(Parser, Debug)]
#[command(about = "Access token and refresh session service")]
pub struct Cli {
    /// Path to a TOML settings file.
    #[arg(long)]
    pub settings: Option<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

mod error;
mod handler;
mod router;

pub use error::recover_error;
pub use handler::{ApiConfig, ApiResponse};
pub use router::{request_log, routes};

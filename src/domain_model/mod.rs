mod deadline;
mod principal;
mod session;

pub use deadline::*;
pub use principal::*;
pub use session::*;

mod credential_generator_jwt;
mod secret_hasher_argon2;
mod session_service_impl;

pub use credential_generator_jwt::*;
pub use secret_hasher_argon2::*;
pub use session_service_impl::*;

pub mod auth;
pub mod encoding;
pub mod mime;
pub mod range;
pub mod session_locks;
pub mod token;

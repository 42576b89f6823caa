//! Minimal HTTP/1.1 client framing: one request, one response, then close.

pub mod request;
pub mod response;

pub use request::{RequestSpec, DEFAULT_USER_AGENT};
pub use response::{read_response, ResponseResult};

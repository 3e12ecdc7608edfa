//! Execution sandbox client implementations.

pub mod http;

pub use http::HttpSandboxClient;

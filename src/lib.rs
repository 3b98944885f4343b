//! homeport-httpd - event-driven HTTP/1.1 server core
//!
//! Connection management on tokio, incremental request and URL parsers, and a
//! streaming response writer, tied together by a callback-based dispatcher.

pub mod config;
pub mod http;
pub mod server;

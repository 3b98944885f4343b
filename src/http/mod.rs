//! HTTP protocol implementation.
//!
//! This module turns the byte stream of a connection into dispatcher
//! callbacks and streams responses back. Every connection carries exactly one
//! request and is closed after its response (`Connection: close`).
//!
//! # Architecture
//!
//! The HTTP layer is organized into several submodules:
//!
//! - **`parser`**: Incremental request parser reporting events through hooks
//! - **`url`**: Incremental URL parser (protocol, host, port, path, query)
//! - **`request`**: Method and the accumulated view of a request
//! - **`response`**: Status codes, cookies and a one-shot response builder
//! - **`writer`**: Streams a response into a connection's outbound queue
//! - **`dispatch`**: Connects the parsers to an application `Dispatcher`
//!
//! # Request Flow
//!
//! ```text
//!   socket bytes
//!        │
//!        ▼
//!  ┌──────────────┐  on_url chunks  ┌────────────┐
//!  │ RequestParser│ ───────────────▶│ UrlParser  │
//!  └──────┬───────┘                 └─────┬──────┘
//!         │ events                        │ path, arguments
//!         ▼                               ▼
//!  ┌──────────────┐   &mut Request  ┌────────────┐
//!  │  Dispatcher  │ ◀────────────── │  Request   │
//!  └──────┬───────┘                 └────────────┘
//!         │ ResponseWriter::create / send / destroy
//!         ▼
//!   outbound queue ─▶ socket
//! ```
//!
//! # Example
//!
//! ```ignore
//! use homeport_httpd::config::ServerConfig;
//! use homeport_httpd::http::dispatch::{Dispatcher, Httpd};
//! use homeport_httpd::http::request::Request;
//! use homeport_httpd::http::response::Response;
//! use homeport_httpd::http::Flow;
//! use homeport_httpd::server::TcpServer;
//!
//! struct Hello;
//!
//! impl Dispatcher for Hello {
//!     type Context = ();
//!
//!     fn on_complete(&self, req: &mut Request, _ctx: &mut ()) -> Flow {
//!         let _ = Response::ok("hello\n").send(req);
//!         Flow::Continue
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::default();
//!     let server = TcpServer::bind(config.clone(), Httpd::new(Hello, &config)).await?;
//!     server.run().await
//! }
//! ```

pub mod dispatch;
pub mod parser;
pub mod request;
pub mod response;
pub mod url;
pub mod writer;

pub use parser::Flow;

//! Callback-driven WebSockets server endpoint for the Tokio stack.
//!
//! This library accepts inbound TCP connections, performs the HTTP upgrade
//! handshake of the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455),
//! and exchanges framed messages with each peer until one side closes the
//! connection. Register handlers for the events you care about, then call
//! [`Server::listen`]; every connection runs on its own tokio task, reading
//! frames, parsing masks, assembling fragmented messages and handing the
//! results to your handlers, with optional permessage-deflate compression
//! ([RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692)).
//!
//! ```no_run
//! use socket_harbor::Server;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = Server::new("127.0.0.1", 8080);
//!     server.on_text(|client, text| async move {
//!         let _ = client.text(&text).await;
//!     });
//!     server.listen().await.expect("server failed");
//! }
//! ```

mod callbacks;
mod codec;
mod compression;
mod connection;
mod handshake;
mod message;

pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod server;

pub use client::Client;
pub use config::ServerConfig;
pub use error::{Error, ErrorInfo};
pub use frame::{CloseCode, Frame, OpCode};
pub use server::{Server, DEFAULT_PORT};

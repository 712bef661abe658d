//! JSON-RPC 2.0 server for the toolforge runtime.
//!
//! Messages are newline-delimited JSON on stdin and stdout; logs go to
//! stderr.

#![warn(missing_docs, clippy::pedantic)]

pub mod cli;
pub mod handlers;
pub mod rpc;
pub mod transport;

pub use cli::Cli;
pub use handlers::{ForgeHandler, HandlerContext, HandlerError, Method, RequestHandler, dispatch_request};
pub use transport::serve;

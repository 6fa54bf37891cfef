//! HTTP surface of the rewrite service.
//!
//! `api_router()` returns a composable `Router` nested under `/api/`;
//! `start_server()` binds it and runs it until shutdown.

pub mod endpoints;
pub mod error;
pub mod router;
pub mod server;
pub mod types;

pub use router::api_router;
pub use server::{start_server, ApiServer, ServerSession};
pub use types::ApiContext;

//! Pipelined request/response dispatch for ACE Pro serial links.
//!
//! The dispatcher owns the link, two bounded priority queues and the table of
//! in-flight requests. Callers get a future per request that resolves with the
//! device response, or with "no response" once the request times out.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod health;
pub mod protocol;

pub use config::DispatchConfig;
pub use dispatcher::{
    dispatcher, ConnectionState, Dispatcher, DispatcherHandle, Priority, Reply, ResponseFuture,
};
pub use error::{DispatchError, Result};
pub use events::{DispatchEvent, EventStream};
pub use health::{ConnectionStatus, StabilityConfig};
pub use protocol::{Request, Response, FORBIDDEN};

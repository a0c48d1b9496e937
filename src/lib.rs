//! rosy-rpc: a compact RPC runtime.
//!
//! Wire framing and codec ([`codec`], [`framed`]), pluggable payload
//! encoding and compression ([`serializer`], [`compressor`]), a connection
//! pool ([`pool`]), and the client/server halves of a method call
//! ([`client`], [`proxy`], [`server`], [`service`]) — enough to declare a
//! service once and get both a typed client and a typed dispatcher for it,
//! via the [`rpc_client!`] and [`rpc_service!`] macros.
pub mod client;
pub mod codec;
pub mod compressor;
pub mod context;
pub mod error;
pub mod framed;
pub mod message;
pub mod pool;
pub mod proxy;
pub mod serializer;
pub mod server;
pub mod service;

pub use context::Context;
pub use error::{Result, RpcError};
pub use message::Message;
pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
pub use server::{Endpoint, EndpointBuilder};

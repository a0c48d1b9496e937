//! Crate-wide error currency.
use thiserror::Error;

/// Every failure mode the wire protocol, pool, dispatcher, and stub
/// synthesizer can surface to a caller. `Oneway` is a sentinel, not a true
/// failure: it means "no response by design".
#[derive(Debug, Error)]
pub enum RpcError {
  #[error("malformed frame: {0}")]
  MalformedFrame(String),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("connection closed")]
  TransportClosed,

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("unknown serializer code {0}")]
  UnknownSerializer(u8),

  #[error("unknown compressor code {0}")]
  UnknownCompressor(u8),

  #[error("unknown service {0:?}")]
  UnknownService(String),

  #[error("unknown method {method:?} on service {service:?}")]
  UnknownMethod { service: String, method: String },

  #[error("invalid service descriptor: {0}")]
  InvalidServiceDescriptor(String),

  #[error("context cancelled")]
  ContextCancelled,

  #[error("one-way call, no response expected")]
  Oneway,

  #[error("remote error: {0}")]
  Remote(String),

  #[error("code {0} already registered")]
  DuplicateRegistration(u8),

  #[error("connection pool closed")]
  PoolClosed,

  #[error("serialize failed: {0}")]
  Serialize(String),

  #[error("deserialize failed: {0}")]
  Deserialize(String),

  #[error("compress failed: {0}")]
  Compress(String),

  #[error("decompress failed: {0}")]
  Decompress(String),
}

pub type Result<T> = std::result::Result<T, RpcError>;

//! Remote proxy (spec §4.F): turns one typed call into wire traffic and
//! back, against a borrowed pooled connection.
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::codec::{decode_response, encode_request, Request};
use crate::compressor::{CompressorRegistry, NO_COMPRESSION};
use crate::context::Context;
use crate::error::{Result, RpcError};
use crate::framed::read_frame;
use crate::message::Message;
use crate::pool::ConnectionPool;
use crate::serializer::SerializerKind;

const PROTOCOL_VERSION: u8 = 1;
const META_ONEWAY: &str = "sys_oneway";
const META_TIMEOUT: &str = "sys_timeout";

/// Drives one request/response exchange against a service reachable through
/// a [`ConnectionPool`]. Shared by every [`crate::client::MethodStub`] of a
/// generated client.
pub struct RemoteProxy {
  pool: Arc<ConnectionPool>,
  service: String,
  compressor_registry: CompressorRegistry,
  next_message_id: AtomicU32,
}

impl RemoteProxy {
  pub fn new(pool: Arc<ConnectionPool>, service: impl Into<String>) -> Self {
    Self {
      pool,
      service: service.into(),
      compressor_registry: CompressorRegistry::with_builtins(),
      next_message_id: AtomicU32::new(1),
    }
  }

  /// Encode, send, and (unless `ctx` is one-way) read back and decode the
  /// response for `method`. Returns `Err(RpcError::Oneway)` for one-way
  /// calls that were sent successfully — callers that don't want that
  /// surfaced (e.g. a generated stub) should translate it into a default
  /// response.
  ///
  /// A remote error does not short-circuit the payload: the response is
  /// always deserialized (falling back to `Resp::default()` if the remote
  /// sent no payload at all) and returned alongside the error, if any, so a
  /// handler that filled in a partial response *and* failed is not forced
  /// to lose the content.
  pub async fn invoke<Req: Message, Resp: Message>(
    &self,
    ctx: &Context,
    method: &str,
    serializer: SerializerKind,
    req: &Req,
  ) -> Result<(Resp, Option<RpcError>)> {
    if ctx.is_expired() {
      return Err(RpcError::ContextCancelled);
    }

    let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
    let raw = serializer.serialize(req)?;
    let (compressor_code, payload) = match ctx.compressor_code() {
      None => (NO_COMPRESSION, raw),
      Some(code) => {
        let compressor = self.compressor_registry.get(code)?;
        (code, compressor.compress(&raw)?)
      }
    };

    let mut metadata = BTreeMap::new();
    if ctx.is_oneway() {
      metadata.insert(META_ONEWAY.to_string(), "true".to_string());
    }
    if let Some(ms) = ctx.deadline_as_sys_timeout_millis() {
      metadata.insert(META_TIMEOUT.to_string(), ms.to_string());
    }
    let metadata = if metadata.is_empty() { None } else { Some(metadata) };

    let request = Request {
      message_id,
      version: PROTOCOL_VERSION,
      compressor: compressor_code,
      serializer: serializer.code(),
      service: self.service.clone(),
      method: method.to_string(),
      metadata,
      payload: Some(payload),
    };
    let encoded = encode_request(&request);

    let mut conn = self.pool.get(ctx).await?;

    let exchange = async {
      if let Err(e) = conn.stream_mut().write_all(&encoded).await {
        conn.mark_broken();
        return Err(RpcError::Transport(e.to_string()));
      }

      if ctx.is_oneway() {
        return Err(RpcError::Oneway);
      }

      let frame = match read_frame(conn.stream_mut()).await {
        Ok(frame) => frame,
        Err(e) => {
          conn.mark_broken();
          return Err(e);
        }
      };
      let response = decode_response(&frame)?;

      let resp: Resp = match &response.payload {
        None => Resp::default(),
        Some(raw_payload) => {
          let decompressed = if response.compressor == NO_COMPRESSION {
            raw_payload.clone()
          } else {
            self
              .compressor_registry
              .get(response.compressor)?
              .decompress(raw_payload)?
          };
          serializer.deserialize(&decompressed)?
        }
      };

      let error = if response.error.is_empty() {
        None
      } else {
        Some(RpcError::Remote(response.error))
      };
      Ok((resp, error))
    };

    // One-way calls never reach the point of awaiting a reply, so only the
    // read half needs deadline enforcement here; the pool wait above already
    // honored it on the way in (spec §5: the same two join points).
    match ctx.deadline() {
      None => exchange.await,
      Some(deadline) => match tokio::time::timeout_at(deadline, exchange).await {
        Ok(result) => result,
        Err(_) => {
          conn.mark_broken();
          Err(RpcError::ContextCancelled)
        }
      },
    }
  }
}

//! Client stub synthesis (spec §4.G, §9 Design Notes strategy (a)).
//!
//! A [`MethodStub`] pins one method's request/response types and wire name
//! to a shared [`RemoteProxy`]; `rpc_client!` generates one such field per
//! declared method, plus a matching inherent method, on a service-specific
//! client struct.
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{Result, RpcError};
use crate::message::Message;
use crate::proxy::RemoteProxy;
use crate::serializer::SerializerKind;

/// One method of a generated client: request type, response type, and the
/// wire method name, bound to a shared proxy.
pub struct MethodStub<Req, Resp> {
  proxy: Arc<RemoteProxy>,
  method: &'static str,
  serializer: SerializerKind,
  _marker: PhantomData<fn() -> (Req, Resp)>,
}

impl<Req: Message, Resp: Message> MethodStub<Req, Resp> {
  pub fn new(proxy: Arc<RemoteProxy>, method: &'static str, serializer: SerializerKind) -> Self {
    Self {
      proxy,
      method,
      serializer,
      _marker: PhantomData,
    }
  }

  /// Invoke the method. One-way calls (`ctx.oneway()`) return a
  /// default-valued response immediately after the request is written; no
  /// reply is read. A remote error does not suppress the response: the
  /// (possibly only partially filled) response and the error, if any, are
  /// both returned to the caller.
  pub async fn call(&self, ctx: &Context, req: &Req) -> Result<(Resp, Option<RpcError>)> {
    match self.proxy.invoke(ctx, self.method, self.serializer, req).await {
      Err(RpcError::Oneway) => Ok((Resp::default(), None)),
      other => other,
    }
  }
}

/// Declares a client struct with one [`MethodStub`] field (and matching
/// inherent method) per entry. The field identifier is used verbatim as the
/// wire method name — no reflection, the mapping is fixed at compile time.
#[macro_export]
macro_rules! rpc_client {
  ($client:ident, $service_name:expr, { $($method:ident : ($req:ty, $resp:ty)),* $(,)? }) => {
    pub struct $client {
      #[allow(dead_code)]
      proxy: std::sync::Arc<$crate::proxy::RemoteProxy>,
      $($method: $crate::client::MethodStub<$req, $resp>,)*
    }

    impl $client {
      pub fn new(pool: std::sync::Arc<$crate::pool::ConnectionPool>) -> Self {
        let proxy = std::sync::Arc::new($crate::proxy::RemoteProxy::new(pool, $service_name));
        Self {
          $(
            $method: $crate::client::MethodStub::new(
              std::sync::Arc::clone(&proxy),
              stringify!($method),
              $crate::serializer::SerializerKind::Json,
            ),
          )*
          proxy,
        }
      }

      $(
        pub async fn $method(&self, ctx: &$crate::context::Context, req: &$req) -> $crate::error::Result<($resp, Option<$crate::error::RpcError>)> {
          self.$method.call(ctx, req).await
        }
      )*
    }
  };
}

//! Endpoint-side dispatch (spec §4.I) and the `rpc_service!` registration
//! macro (spec §9 Design Notes, strategy (a)).
//!
//! A registered method is a [`TypedMethod`]: a concrete `(T, Req, Resp)`
//! triple bound to a handler closure at registration time. Dispatch never
//! reconstructs an argument type by reflection — the macro already knows
//! every method's request/response types at compile time, so the "typed
//! argument" the source builds dynamically is here just a monomorphized
//! closure call.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use log::warn;

use crate::codec::{Request, Response};
use crate::compressor::{CompressorRegistry, NO_COMPRESSION};
use crate::context::Context;
use crate::error::{Result, RpcError};
use crate::message::Message;
use crate::serializer::{SerializerKind, SerializerRegistry};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe handler for one method: takes the already-decompressed
/// request payload and the serializer code it arrived under, returns the
/// serialized (not yet compressed) response payload together with the
/// handler-level error text, if any — the two are not mutually exclusive,
/// a handler may return a filled response *and* an error.
pub trait MethodHandler: Send + Sync {
  fn call<'a>(
    &'a self,
    ctx: Context,
    payload: &'a [u8],
    serializer: SerializerKind,
  ) -> BoxFuture<'a, Result<(Vec<u8>, String)>>;
}

/// Lets a handler return either the ergonomic `Result<Resp, RpcError>` (the
/// common case: failure means a default-valued response) or
/// `(Resp, Option<RpcError>)` directly, for handlers that need to hand back
/// a partially- or fully-filled response *together with* an error, mirroring
/// the source's `(*Response, error)` return shape.
pub trait IntoCallOutcome<Resp> {
  fn into_call_outcome(self) -> (Resp, Option<RpcError>);
}

impl<Resp: Message> IntoCallOutcome<Resp> for Result<Resp> {
  fn into_call_outcome(self) -> (Resp, Option<RpcError>) {
    match self {
      Ok(resp) => (resp, None),
      Err(e) => (Resp::default(), Some(e)),
    }
  }
}

impl<Resp> IntoCallOutcome<Resp> for (Resp, Option<RpcError>) {
  fn into_call_outcome(self) -> (Resp, Option<RpcError>) {
    self
  }
}

/// Binds a service target, a handler closure, and concrete request/response
/// types into an object-safe [`MethodHandler`].
pub struct TypedMethod<T, Req, Resp, F> {
  target: Arc<T>,
  handler: F,
  _marker: std::marker::PhantomData<fn() -> (Req, Resp)>,
}

impl<T, Req, Resp, F> TypedMethod<T, Req, Resp, F> {
  pub fn new(target: Arc<T>, handler: F) -> Self {
    Self {
      target,
      handler,
      _marker: std::marker::PhantomData,
    }
  }
}

impl<T, Req, Resp, F, Fut> MethodHandler for TypedMethod<T, Req, Resp, F>
where
  T: Send + Sync + 'static,
  Req: Message,
  Resp: Message,
  F: Fn(Arc<T>, Context, Req) -> Fut + Send + Sync,
  Fut: Future + Send + 'static,
  Fut::Output: IntoCallOutcome<Resp>,
{
  fn call<'a>(
    &'a self,
    ctx: Context,
    payload: &'a [u8],
    serializer: SerializerKind,
  ) -> BoxFuture<'a, Result<(Vec<u8>, String)>> {
    Box::pin(async move {
      let req: Req = serializer.deserialize(payload)?;
      let target = Arc::clone(&self.target);
      let (resp, error) = (self.handler)(target, ctx, req).await.into_call_outcome();
      let bytes = serializer.serialize(&resp)?;
      Ok((bytes, error.map(|e| e.to_string()).unwrap_or_default()))
    })
  }
}

/// Result of dispatching one request: a response to write back, or a signal
/// that none should be written at all — either the call was one-way, or its
/// deadline expired while the handler was running (the caller has already
/// detached; writing a response at that point would just be wasted I/O).
pub enum DispatchOutcome {
  Response(Response),
  Oneway,
  Expired,
}

/// Routes decoded requests to registered service methods.
#[derive(Default)]
pub struct Dispatcher {
  services: HashMap<String, HashMap<String, Box<dyn MethodHandler>>>,
  serializer_registry: SerializerRegistry,
  compressor_registry: CompressorRegistry,
}

impl Dispatcher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register_service(
    &mut self,
    name: impl Into<String>,
    methods: HashMap<String, Box<dyn MethodHandler>>,
  ) {
    self.services.insert(name.into(), methods);
  }

  /// Decode, decompress, invoke, and (re-)compress one request, honoring
  /// one-way and deadline metadata (spec §3, §4.I).
  pub async fn dispatch(&self, request: Request) -> DispatchOutcome {
    let message_id = request.message_id;
    let version = request.version;
    let serializer_code = request.serializer;
    let is_oneway = request
      .metadata
      .as_ref()
      .and_then(|m| m.get("sys_oneway"))
      .map(|v| v == "true")
      .unwrap_or(false);
    let ctx = request
      .metadata
      .as_ref()
      .and_then(|m| m.get("sys_timeout"))
      .and_then(|v| v.parse::<u64>().ok())
      .map(Context::from_sys_timeout_millis)
      .unwrap_or_else(Context::background);
    let ctx = if is_oneway { ctx.oneway() } else { ctx };

    let result = self.dispatch_inner(&request, &ctx).await;

    if is_oneway {
      if let Err(e) = &result {
        warn!("one-way call to {}/{} failed: {e}", request.service, request.method);
      }
      return DispatchOutcome::Oneway;
    }

    // The handler may have run past the deadline; don't write a response the
    // caller has already given up waiting for (spec §4.H).
    if ctx.is_expired() {
      return DispatchOutcome::Expired;
    }

    let response = match result {
      Ok((compressor, payload, error)) => Response {
        message_id,
        version,
        compressor,
        serializer: serializer_code,
        error,
        payload: Some(payload),
      },
      Err(e) => Response {
        message_id,
        version,
        compressor: NO_COMPRESSION,
        serializer: serializer_code,
        error: e.to_string(),
        payload: None,
      },
    };
    DispatchOutcome::Response(response)
  }

  async fn dispatch_inner(&self, request: &Request, ctx: &Context) -> Result<(u8, Vec<u8>, String)> {
    if ctx.is_expired() {
      return Err(RpcError::ContextCancelled);
    }
    let methods = self
      .services
      .get(&request.service)
      .ok_or_else(|| RpcError::UnknownService(request.service.clone()))?;
    let handler = methods.get(&request.method).ok_or_else(|| RpcError::UnknownMethod {
      service: request.service.clone(),
      method: request.method.clone(),
    })?;
    let serializer = self.serializer_registry.get(request.serializer)?;

    let raw_payload = request.payload.clone().unwrap_or_default();
    let decompressed = if request.compressor == NO_COMPRESSION {
      raw_payload
    } else {
      self.compressor_registry.get(request.compressor)?.decompress(&raw_payload)?
    };

    let (resp_bytes, error_text) = handler.call(ctx.clone(), &decompressed, serializer).await?;

    // Same compressor code as the request, per spec §4.I.
    if request.compressor == NO_COMPRESSION {
      Ok((NO_COMPRESSION, resp_bytes, error_text))
    } else {
      let compressed = self.compressor_registry.get(request.compressor)?.compress(&resp_bytes)?;
      Ok((request.compressor, compressed, error_text))
    }
  }
}

/// Registers one service's methods on a [`Dispatcher`], generating one
/// [`TypedMethod`] per method entry. The method identifier is used verbatim
/// as the wire method name (spec §9: no reflection needed, the mapping is
/// fixed at compile time).
#[macro_export]
macro_rules! rpc_service {
  ($dispatcher:expr, $service_name:expr, $target:expr, { $($method:ident : ($req:ty, $resp:ty) => $handler:expr),* $(,)? }) => {{
    let target = std::sync::Arc::new($target);
    #[allow(unused_mut)]
    let mut methods: std::collections::HashMap<String, Box<dyn $crate::service::MethodHandler>> =
      std::collections::HashMap::new();
    $(
      methods.insert(
        stringify!($method).to_string(),
        Box::new($crate::service::TypedMethod::<_, $req, $resp, _>::new(
          std::sync::Arc::clone(&target),
          $handler,
        )) as Box<dyn $crate::service::MethodHandler>,
      );
    )*
    $dispatcher.register_service($service_name, methods);
  }};
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::Request;
  use crate::serializer::SerializerKind;
  use std::collections::BTreeMap;

  struct Greeter;

  impl Greeter {
    async fn say_hello(self: Arc<Self>, _ctx: Context, req: String) -> Result<String> {
      Ok(format!("hello, {req}"))
    }

    async fn always_fails(self: Arc<Self>, _ctx: Context, _req: String) -> Result<String> {
      Err(RpcError::Remote("deliberate failure".into()))
    }

    async fn fails_with_partial_content(self: Arc<Self>, _ctx: Context, _req: String) -> (String, Option<RpcError>) {
      ("partial".to_string(), Some(RpcError::Remote("service unavailable".into())))
    }

    async fn outlives_deadline(self: Arc<Self>, _ctx: Context, req: String) -> Result<String> {
      tokio::time::sleep(std::time::Duration::from_millis(50)).await;
      Ok(req)
    }
  }

  fn build_dispatcher() -> Dispatcher {
    let mut dispatcher = Dispatcher::new();
    rpc_service!(dispatcher, "Greeter", Greeter, {
      say_hello: (String, String) => Greeter::say_hello,
      always_fails: (String, String) => Greeter::always_fails,
      fails_with_partial_content: (String, String) => Greeter::fails_with_partial_content,
      outlives_deadline: (String, String) => Greeter::outlives_deadline,
    });
    dispatcher
  }

  fn request(method: &str, metadata: Option<BTreeMap<String, String>>) -> Request {
    Request {
      message_id: 1,
      version: 1,
      compressor: NO_COMPRESSION,
      serializer: SerializerKind::Json.code(),
      service: "Greeter".into(),
      method: method.into(),
      metadata,
      payload: Some(serde_json::to_vec("world").unwrap()),
    }
  }

  #[tokio::test]
  async fn dispatches_to_registered_method() {
    let dispatcher = build_dispatcher();
    match dispatcher.dispatch(request("say_hello", None)).await {
      DispatchOutcome::Response(resp) => {
        assert!(resp.error.is_empty());
        let reply: String = serde_json::from_slice(&resp.payload.unwrap()).unwrap();
        assert_eq!(reply, "hello, world");
      }
      other => panic!("expected a response, got {}", outcome_name(&other)),
    }
  }

  #[tokio::test]
  async fn unknown_method_surfaces_as_remote_error_text() {
    let dispatcher = build_dispatcher();
    match dispatcher.dispatch(request("missing", None)).await {
      DispatchOutcome::Response(resp) => assert!(resp.error.contains("missing")),
      other => panic!("expected a response, got {}", outcome_name(&other)),
    }
  }

  #[tokio::test]
  async fn unknown_service_surfaces_as_error() {
    let dispatcher = build_dispatcher();
    let mut req = request("say_hello", None);
    req.service = "Nope".into();
    match dispatcher.dispatch(req).await {
      DispatchOutcome::Response(resp) => assert!(resp.error.contains("Nope")),
      other => panic!("expected a response, got {}", outcome_name(&other)),
    }
  }

  #[tokio::test]
  async fn one_way_call_never_produces_a_response() {
    let dispatcher = build_dispatcher();
    let mut metadata = BTreeMap::new();
    metadata.insert("sys_oneway".into(), "true".into());
    match dispatcher.dispatch(request("say_hello", Some(metadata))).await {
      DispatchOutcome::Oneway => {}
      other => panic!("one-way call must not produce a response, got {}", outcome_name(&other)),
    }
  }

  #[tokio::test]
  async fn handler_error_becomes_remote_error_text() {
    let dispatcher = build_dispatcher();
    match dispatcher.dispatch(request("always_fails", None)).await {
      DispatchOutcome::Response(resp) => assert!(resp.error.contains("deliberate failure")),
      other => panic!("expected a response, got {}", outcome_name(&other)),
    }
  }

  /// A handler can hand back a filled response *and* an error together
  /// (spec scenario 4): both must survive onto the wire response.
  #[tokio::test]
  async fn handler_can_return_filled_response_and_error_together() {
    let dispatcher = build_dispatcher();
    match dispatcher.dispatch(request("fails_with_partial_content", None)).await {
      DispatchOutcome::Response(resp) => {
        assert_eq!(resp.error, "service unavailable");
        let reply: String = serde_json::from_slice(&resp.payload.unwrap()).unwrap();
        assert_eq!(reply, "partial");
      }
      other => panic!("expected a response, got {}", outcome_name(&other)),
    }
  }

  #[tokio::test]
  async fn expired_deadline_is_rejected_before_dispatch() {
    let dispatcher = build_dispatcher();
    let mut metadata = BTreeMap::new();
    metadata.insert("sys_timeout".into(), "1".into()); // 1ms past the epoch: always expired
    match dispatcher.dispatch(request("say_hello", Some(metadata))).await {
      DispatchOutcome::Response(resp) => assert!(resp.error.contains("cancelled")),
      other => panic!("expected a response, got {}", outcome_name(&other)),
    }
  }

  /// The deadline can also expire *during* dispatch: a handler that outlives
  /// it must suppress the response rather than writing one (spec §4.H).
  #[tokio::test]
  async fn deadline_expiring_mid_handler_suppresses_the_response() {
    let dispatcher = build_dispatcher();
    let mut metadata = BTreeMap::new();
    let deadline_ms = std::time::SystemTime::now()
      .duration_since(std::time::UNIX_EPOCH)
      .unwrap()
      .as_millis() as u64
      + 10;
    metadata.insert("sys_timeout".into(), deadline_ms.to_string());
    match dispatcher.dispatch(request("outlives_deadline", Some(metadata))).await {
      DispatchOutcome::Expired => {}
      other => panic!("expected Expired, got {}", outcome_name(&other)),
    }
  }

  fn outcome_name(outcome: &DispatchOutcome) -> &'static str {
    match outcome {
      DispatchOutcome::Response(_) => "Response",
      DispatchOutcome::Oneway => "Oneway",
      DispatchOutcome::Expired => "Expired",
    }
  }
}

//! Endpoint server (spec §4.H): accepts connections and runs one dispatch
//! loop per connection as a separate task.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::codec::{decode_request, encode_response};
use crate::error::{Result, RpcError};
use crate::framed::read_frame;
use crate::service::{Dispatcher, DispatchOutcome, MethodHandler};

/// Accumulates registered services before binding a listener.
#[derive(Default)]
pub struct EndpointBuilder {
  dispatcher: Dispatcher,
}

impl EndpointBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Direct registration path for a pre-built method map (used by the
  /// `rpc_service!` macro via [`EndpointBuilder::dispatcher_mut`], or
  /// directly when assembling handlers by hand).
  #[must_use]
  pub fn register_service(mut self, name: impl Into<String>, methods: HashMap<String, Box<dyn MethodHandler>>) -> Self {
    self.dispatcher.register_service(name, methods);
    self
  }

  pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
    &mut self.dispatcher
  }

  pub async fn bind(self, addr: SocketAddr) -> Result<Endpoint> {
    let listener = TcpListener::bind(addr).await?;
    Ok(Endpoint {
      listener,
      dispatcher: Arc::new(self.dispatcher),
    })
  }
}

/// A bound, ready-to-serve endpoint. One task per accepted connection (spec
/// §5's "parallel tasks" scheduling model).
pub struct Endpoint {
  listener: TcpListener,
  dispatcher: Arc<Dispatcher>,
}

impl Endpoint {
  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Accept connections until the listener errors. Each connection is
  /// served on its own task and runs until the peer closes it or a
  /// malformed frame is seen.
  pub async fn serve(self) -> Result<()> {
    loop {
      let (stream, peer) = self.listener.accept().await?;
      debug!("accepted connection from {peer}");
      let dispatcher = Arc::clone(&self.dispatcher);
      tokio::spawn(async move {
        match handle_connection(stream, dispatcher).await {
          Ok(()) => debug!("connection from {peer} closed"),
          Err(e) => debug!("connection from {peer} closed: {e}"),
        }
      });
    }
  }
}

async fn handle_connection(mut stream: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<()> {
  loop {
    let frame = match read_frame(&mut stream).await {
      Ok(frame) => frame,
      Err(RpcError::TransportClosed) => return Ok(()),
      Err(e) => return Err(e),
    };
    let request = decode_request(&frame)?;

    match dispatcher.dispatch(request).await {
      DispatchOutcome::Oneway => continue,
      // The deadline passed while the handler was running; the caller has
      // already detached, so writing a response now would be wasted I/O.
      DispatchOutcome::Expired => continue,
      DispatchOutcome::Response(response) => {
        let encoded = encode_response(&response);
        if let Err(e) = stream.write_all(&encoded).await {
          warn!("failed to write response: {e}");
          return Err(RpcError::from(e));
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::client::MethodStub;
  use crate::context::Context;
  use crate::pool::{ConnectionPool, PoolConfig};
  use crate::proxy::RemoteProxy;
  use crate::rpc_service;
  use std::time::Duration;

  struct Echo;

  impl Echo {
    async fn echo(self: Arc<Self>, _ctx: Context, req: String) -> Result<String> {
      Ok(req)
    }
  }

  #[tokio::test]
  async fn serves_and_echoes_a_request() {
    let mut builder = EndpointBuilder::new();
    rpc_service!(builder.dispatcher_mut(), "Echo", Echo, {
      echo: (String, String) => Echo::echo,
    });
    let endpoint = builder.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = endpoint.local_addr().unwrap();
    tokio::spawn(endpoint.serve());

    let pool = ConnectionPool::connect(addr, PoolConfig::default());
    let proxy = Arc::new(RemoteProxy::new(pool, "Echo"));
    let stub: MethodStub<String, String> =
      MethodStub::new(proxy, "echo", crate::serializer::SerializerKind::Json);

    let ctx = Context::background().with_timeout(Duration::from_secs(2));
    let (reply, error) = stub.call(&ctx, &"ping".to_string()).await.unwrap();
    assert_eq!(reply, "ping");
    assert!(error.is_none());
  }
}

//! Bounded, fair-waiting connection pool (spec §4.E, §5, §8).
//!
//! Idle connections are reused FIFO; when the pool is saturated, callers
//! queue as waiters and are served in arrival order ahead of any idle
//! connection a concurrent `put` might otherwise buffer — handing a
//! returning connection straight to the longest-waiting caller is
//! prioritized over parking it in the idle list. A `PooledConnection`
//! returns itself to the pool on drop, so there is no "forgot to return the
//! connection" exit path to audit by hand.
use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::{Result, RpcError};

const EVICTION_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

type DialFuture = Pin<Box<dyn Future<Output = Result<TcpStream>> + Send>>;
type DialFn = Arc<dyn Fn() -> DialFuture + Send + Sync>;

/// Pool sizing and idle-lifetime policy.
#[derive(Clone, Copy, Debug)]
pub struct PoolConfig {
  pub max_active: usize,
  pub max_idle_time: Duration,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      max_active: 16,
      max_idle_time: Duration::from_secs(60),
    }
  }
}

struct IdleConn {
  stream: TcpStream,
  idle_since: Instant,
}

#[derive(Default)]
struct Inner {
  idle: VecDeque<IdleConn>,
  active: usize,
  waiters: VecDeque<(u64, oneshot::Sender<TcpStream>)>,
  next_waiter_seq: u64,
  closed: bool,
}

/// A pool of connections to a single remote address.
pub struct ConnectionPool {
  inner: Mutex<Inner>,
  dial: DialFn,
  config: PoolConfig,
}

impl ConnectionPool {
  /// Build a pool that dials `addr` with plain `TcpStream::connect` whenever
  /// a fresh connection is needed.
  pub fn connect(addr: SocketAddr, config: PoolConfig) -> Arc<Self> {
    let dial: DialFn = Arc::new(move || -> DialFuture {
      Box::pin(async move { TcpStream::connect(addr).await.map_err(RpcError::from) })
    });
    Self::with_dialer(dial, config)
  }

  /// Build a pool with a custom dial function — useful for tests that need
  /// a loopback listener bound to an OS-assigned port.
  pub fn with_dialer(dial: DialFn, config: PoolConfig) -> Arc<Self> {
    let pool = Arc::new(Self {
      inner: Mutex::new(Inner::default()),
      dial,
      config,
    });
    let weak = Arc::downgrade(&pool);
    tokio::spawn(async move {
      let mut interval = tokio::time::interval(EVICTION_SWEEP_INTERVAL);
      loop {
        interval.tick().await;
        match weak.upgrade() {
          Some(pool) => pool.evict_idle(),
          None => return,
        }
      }
    });
    pool
  }

  /// Borrow a connection, dialing a fresh one if the pool has spare
  /// capacity, reusing an idle one FIFO, or queueing as a waiter if the
  /// pool is saturated. Honors `ctx`'s deadline while waiting; on
  /// cancellation, a connection that is handed to this waiter just as it
  /// gives up is routed back into the pool rather than dropped.
  pub async fn get(self: &Arc<Self>, ctx: &Context) -> Result<PooledConnection> {
    if ctx.is_expired() {
      return Err(RpcError::ContextCancelled);
    }
    loop {
      let mut inner = self.inner.lock().unwrap();
      if inner.closed {
        return Err(RpcError::PoolClosed);
      }
      if let Some(idle) = inner.idle.pop_front() {
        if idle.idle_since.elapsed() > self.config.max_idle_time {
          inner.active -= 1;
          trace!("dropping expired idle connection on checkout");
          continue;
        }
        return Ok(PooledConnection::new(Arc::clone(self), idle.stream));
      }
      if inner.active < self.config.max_active {
        inner.active += 1;
        drop(inner);
        return match (self.dial)().await {
          Ok(stream) => Ok(PooledConnection::new(Arc::clone(self), stream)),
          Err(e) => {
            self.inner.lock().unwrap().active -= 1;
            Err(e)
          }
        };
      }

      let (tx, mut rx) = oneshot::channel();
      let seq = inner.next_waiter_seq;
      inner.next_waiter_seq += 1;
      inner.waiters.push_back((seq, tx));
      drop(inner);

      return match ctx.deadline() {
        None => rx
          .await
          .map(|stream| PooledConnection::new(Arc::clone(self), stream))
          .map_err(|_| RpcError::PoolClosed),
        Some(deadline) => {
          tokio::select! {
            res = &mut rx => res
              .map(|stream| PooledConnection::new(Arc::clone(self), stream))
              .map_err(|_| RpcError::PoolClosed),
            _ = tokio::time::sleep_until(deadline) => {
              if let Ok(stream) = rx.try_recv() {
                debug!("connection arrived after waiter cancellation, returning to pool");
                self.put(stream);
              }
              Err(RpcError::ContextCancelled)
            }
          }
        }
      };
    }
  }

  /// Return a healthy connection: hand it straight to the longest-waiting
  /// caller if one exists, otherwise park it at the back of the idle queue.
  fn put(&self, mut stream: TcpStream) {
    let mut inner = self.inner.lock().unwrap();
    while let Some((_, tx)) = inner.waiters.pop_front() {
      match tx.send(stream) {
        Ok(()) => return,
        Err(returned) => {
          stream = returned; // waiter gave up between enqueue and send; try the next one
          continue;
        }
      }
    }
    inner.idle.push_back(IdleConn {
      stream,
      idle_since: Instant::now(),
    });
  }

  /// Drop a broken connection without returning it to the pool.
  fn discard(&self) {
    let mut inner = self.inner.lock().unwrap();
    inner.active = inner.active.saturating_sub(1);
  }

  fn evict_idle(&self) {
    let mut inner = self.inner.lock().unwrap();
    let max_idle_time = self.config.max_idle_time;
    let before = inner.idle.len();
    inner.idle.retain(|c| c.idle_since.elapsed() <= max_idle_time);
    let evicted = before - inner.idle.len();
    if evicted > 0 {
      inner.active -= evicted;
      debug!("evicted {evicted} idle connection(s) past max_idle_time");
    }
  }

  /// Stop serving new checkouts; waiters still queued receive `PoolClosed`
  /// once woken, but this does not forcibly wake them.
  pub fn close(&self) {
    let mut inner = self.inner.lock().unwrap();
    inner.closed = true;
    inner.idle.clear();
  }
}

/// An RAII handle on a pooled `TcpStream`. Returns itself to the pool on
/// drop unless [`PooledConnection::mark_broken`] was called, in which case
/// the stream is discarded and the pool's active count is released instead.
pub struct PooledConnection {
  pool: Arc<ConnectionPool>,
  stream: Option<TcpStream>,
  broken: bool,
}

impl PooledConnection {
  fn new(pool: Arc<ConnectionPool>, stream: TcpStream) -> Self {
    Self {
      pool,
      stream: Some(stream),
      broken: false,
    }
  }

  pub fn stream_mut(&mut self) -> &mut TcpStream {
    self.stream.as_mut().expect("stream taken only on drop")
  }

  /// Mark this connection as unusable; it will be discarded instead of
  /// returned to the pool when dropped. Call this after any I/O error.
  pub fn mark_broken(&mut self) {
    self.broken = true;
  }
}

impl Drop for PooledConnection {
  fn drop(&mut self) {
    if let Some(stream) = self.stream.take() {
      if self.broken {
        warn!("discarding broken pooled connection");
        self.pool.discard();
      } else {
        self.pool.put(stream);
      }
    }
  }
}

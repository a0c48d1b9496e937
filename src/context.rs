//! [`Context`] carries the per-call markers that flow through every stage of
//! a request: the absolute deadline, the one-way flag, and an optional
//! client-requested compressor. It plays the role the source's `Context`
//! argument plays in every `(Context, *Request) -> (*Response, Error)`
//! method shape (spec §3), but here it is a concrete, owned value instead of
//! an opaque handle.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Per-call metadata: deadline, one-way intent, and compression request.
///
/// Builder-style, same shape as the teacher's own `ContextOptions`/
/// `NodeOptions`: start from [`Context::background`] and chain setters.
#[derive(Clone, Debug, Default)]
pub struct Context {
  deadline: Option<Instant>,
  oneway: bool,
  compressor: Option<u8>,
}

impl Context {
  /// A context with no deadline, not one-way, uncompressed. The process
  /// background context the spec refers to in §4.H.
  pub fn background() -> Self {
    Self::default()
  }

  /// Set an absolute deadline.
  #[must_use]
  pub fn with_deadline(mut self, deadline: Instant) -> Self {
    self.deadline = Some(deadline);
    self
  }

  /// Set a deadline `timeout` from now.
  #[must_use]
  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  /// Mark this call one-way: no response will be read or written.
  #[must_use]
  pub fn oneway(mut self) -> Self {
    self.oneway = true;
    self
  }

  /// Request the given compressor code for the outgoing payload.
  #[must_use]
  pub fn compress_with(mut self, code: u8) -> Self {
    self.compressor = Some(code);
    self
  }

  pub fn is_oneway(&self) -> bool {
    self.oneway
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  pub fn compressor_code(&self) -> Option<u8> {
    self.compressor
  }

  /// True if the deadline has already elapsed.
  pub fn is_expired(&self) -> bool {
    self.deadline.is_some_and(|d| Instant::now() >= d)
  }

  /// Reconstruct a server-side context from the `sys_timeout` metadata value
  /// (an absolute unix-millisecond deadline, per spec §3/§6). Any
  /// pre-existing base context is the process background (spec §4.H).
  pub fn from_sys_timeout_millis(unix_ms: u64) -> Self {
    let now_ms = unix_millis_now();
    let deadline = if unix_ms <= now_ms {
      Instant::now() // already elapsed; expires on first check
    } else {
      Instant::now() + Duration::from_millis(unix_ms - now_ms)
    };
    Self::background().with_deadline(deadline)
  }

  /// Render this context's deadline as an absolute unix-millisecond value
  /// suitable for the `sys_timeout` metadata entry.
  pub fn deadline_as_sys_timeout_millis(&self) -> Option<u64> {
    self.deadline.map(|deadline| {
      let now = Instant::now();
      let now_ms = unix_millis_now();
      if deadline <= now {
        now_ms
      } else {
        now_ms + (deadline - now).as_millis() as u64
      }
    })
  }
}

fn unix_millis_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

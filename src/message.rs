//! Defines the [`Message`] trait: the bound every request/response type must
//! satisfy to cross the wire.
use serde::{de::DeserializeOwned, Serialize};

/// Trait bound for anything that can travel as an RPC request or response.
///
/// `Default` stands in for "the stub synthesizer always allocates a
/// zero-valued response instance before the call is made" (so the caller
/// gets a usable value even when the call fails before a reply arrives).
pub trait Message: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl Message for () {}
impl Message for String {}

impl Message for i8 {}
impl Message for i16 {}
impl Message for i32 {}
impl Message for i64 {}

impl Message for u8 {}
impl Message for u16 {}
impl Message for u32 {}
impl Message for u64 {}

impl<T: Message> Message for Vec<T> {}
impl<T: Message> Message for Option<T> {}

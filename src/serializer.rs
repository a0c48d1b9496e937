//! Serializer registry (spec §4.B).
//!
//! `Serializer::serialize`/`deserialize` would naturally be generic over
//! `T: Message`, which rules out `Box<dyn Serializer>` — a generic method
//! can't appear in a trait object's vtable. Every call site that needs a
//! serializer already knows its concrete `T` statically (it is inside a
//! method stub or handler closure generated by `rpc_client!`/`rpc_service!`),
//! so no erasure is actually needed: the registry only has to pick *which*
//! codec a wire code names. A closed enum does that without reaching for an
//! erasure crate the rest of the stack doesn't use.
use std::collections::HashMap;

use crate::error::{Result, RpcError};
use crate::message::Message;

/// A concrete, built-in wire encoding. Adding a new built-in means adding a
/// variant here; adding a third-party encoding means registering it under
/// an unused code (see [`SerializerRegistry::register`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerializerKind {
  /// Code 1: `serde_json`, human-readable, self-describing.
  Json,
  /// Code 2: `bincode`, compact, schema-based.
  Bincode,
}

impl SerializerKind {
  pub fn code(self) -> u8 {
    match self {
      SerializerKind::Json => 1,
      SerializerKind::Bincode => 2,
    }
  }

  pub fn serialize<T: Message>(self, value: &T) -> Result<Vec<u8>> {
    match self {
      SerializerKind::Json => {
        serde_json::to_vec(value).map_err(|e| RpcError::Serialize(e.to_string()))
      }
      SerializerKind::Bincode => {
        bincode::serialize(value).map_err(|e| RpcError::Serialize(e.to_string()))
      }
    }
  }

  pub fn deserialize<T: Message>(self, bytes: &[u8]) -> Result<T> {
    match self {
      SerializerKind::Json => {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Deserialize(e.to_string()))
      }
      SerializerKind::Bincode => {
        bincode::deserialize(bytes).map_err(|e| RpcError::Deserialize(e.to_string()))
      }
    }
  }
}

/// Maps a wire code to a [`SerializerKind`]. Codes 1 and 2 are reserved for
/// the built-ins and always present; a registry is otherwise open for
/// additional codes, though in practice every variant this crate knows about
/// is a built-in, since the enum is closed.
#[derive(Clone, Debug)]
pub struct SerializerRegistry {
  kinds: HashMap<u8, SerializerKind>,
}

impl SerializerRegistry {
  /// A registry pre-populated with the built-in JSON and bincode codecs.
  pub fn with_builtins() -> Self {
    let mut kinds = HashMap::new();
    kinds.insert(SerializerKind::Json.code(), SerializerKind::Json);
    kinds.insert(SerializerKind::Bincode.code(), SerializerKind::Bincode);
    Self { kinds }
  }

  /// Register an additional code. Rejects re-registering a code already in
  /// use (spec §4.B: codes 1/2 reserved for built-ins on each side).
  pub fn register(&mut self, code: u8, kind: SerializerKind) -> Result<()> {
    if self.kinds.contains_key(&code) {
      return Err(RpcError::DuplicateRegistration(code));
    }
    self.kinds.insert(code, kind);
    Ok(())
  }

  pub fn get(&self, code: u8) -> Result<SerializerKind> {
    self.kinds.get(&code).copied().ok_or(RpcError::UnknownSerializer(code))
  }
}

impl Default for SerializerRegistry {
  fn default() -> Self {
    Self::with_builtins()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
  struct Sample {
    n: u32,
    s: String,
  }
  impl Message for Sample {}

  #[test]
  fn json_round_trips() {
    let value = Sample { n: 7, s: "hi".into() };
    let bytes = SerializerKind::Json.serialize(&value).unwrap();
    let back: Sample = SerializerKind::Json.deserialize(&bytes).unwrap();
    assert_eq!(value, back);
  }

  #[test]
  fn bincode_round_trips() {
    let value = Sample { n: 7, s: "hi".into() };
    let bytes = SerializerKind::Bincode.serialize(&value).unwrap();
    let back: Sample = SerializerKind::Bincode.deserialize(&bytes).unwrap();
    assert_eq!(value, back);
  }

  #[test]
  fn builtins_are_preregistered_under_their_codes() {
    let registry = SerializerRegistry::with_builtins();
    assert_eq!(registry.get(1).unwrap(), SerializerKind::Json);
    assert_eq!(registry.get(2).unwrap(), SerializerKind::Bincode);
  }

  #[test]
  fn unknown_code_is_an_error() {
    let registry = SerializerRegistry::with_builtins();
    assert!(matches!(registry.get(99), Err(RpcError::UnknownSerializer(99))));
  }

  #[test]
  fn duplicate_registration_is_rejected() {
    let mut registry = SerializerRegistry::with_builtins();
    assert!(matches!(
      registry.register(1, SerializerKind::Json),
      Err(RpcError::DuplicateRegistration(1))
    ));
  }
}

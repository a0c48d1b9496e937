//! Compressor registry (spec §4.C).
//!
//! Unlike the serializer, `Compressor` operates purely on byte slices, so it
//! is naturally object-safe and is registered as `Arc<dyn Compressor>` —
//! genuinely pluggable at runtime, no enum needed.
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, RpcError};

/// A pluggable payload compressor, keyed on the wire by a `u8` code.
pub trait Compressor: Send + Sync {
  fn code(&self) -> u8;
  fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;
  fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Code 1: gzip via `flate2`.
pub struct GzipCompressor;

impl Compressor for GzipCompressor {
  fn code(&self) -> u8 {
    1
  }

  fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
      .write_all(data)
      .map_err(|e| RpcError::Compress(e.to_string()))?;
    encoder.finish().map_err(|e| RpcError::Compress(e.to_string()))
  }

  fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
      .read_to_end(&mut out)
      .map_err(|e| RpcError::Decompress(e.to_string()))?;
    Ok(out)
  }
}

/// Code 2: zstd.
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
  fn code(&self) -> u8 {
    2
  }

  fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
    zstd::encode_all(data, 0).map_err(|e| RpcError::Compress(e.to_string()))
  }

  fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
    zstd::decode_all(data).map_err(|e| RpcError::Decompress(e.to_string()))
  }
}

/// Maps a wire code to a compressor implementation. Code 0 is reserved
/// (spec §4.C: "no compression") and may never be registered.
#[derive(Clone)]
pub struct CompressorRegistry {
  compressors: HashMap<u8, Arc<dyn Compressor>>,
}

pub const NO_COMPRESSION: u8 = 0;

impl CompressorRegistry {
  pub fn with_builtins() -> Self {
    let mut registry = Self {
      compressors: HashMap::new(),
    };
    registry
      .register(Arc::new(GzipCompressor))
      .expect("builtin codes do not collide");
    registry
      .register(Arc::new(ZstdCompressor))
      .expect("builtin codes do not collide");
    registry
  }

  pub fn register(&mut self, compressor: Arc<dyn Compressor>) -> Result<()> {
    let code = compressor.code();
    if code == NO_COMPRESSION {
      return Err(RpcError::DuplicateRegistration(code));
    }
    if self.compressors.contains_key(&code) {
      return Err(RpcError::DuplicateRegistration(code));
    }
    self.compressors.insert(code, compressor);
    Ok(())
  }

  pub fn get(&self, code: u8) -> Result<Arc<dyn Compressor>> {
    self
      .compressors
      .get(&code)
      .cloned()
      .ok_or(RpcError::UnknownCompressor(code))
  }
}

impl Default for CompressorRegistry {
  fn default() -> Self {
    Self::with_builtins()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn gzip_round_trips() {
    let c = GzipCompressor;
    let data = b"hello hello hello hello hello";
    let compressed = c.compress(data).unwrap();
    assert_eq!(c.decompress(&compressed).unwrap(), data);
  }

  #[test]
  fn zstd_round_trips() {
    let c = ZstdCompressor;
    let data = b"hello hello hello hello hello";
    let compressed = c.compress(data).unwrap();
    assert_eq!(c.decompress(&compressed).unwrap(), data);
  }

  #[test]
  fn builtins_preregistered_under_their_codes() {
    let registry = CompressorRegistry::with_builtins();
    assert_eq!(registry.get(1).unwrap().code(), 1);
    assert_eq!(registry.get(2).unwrap().code(), 2);
  }

  #[test]
  fn code_zero_cannot_be_registered() {
    struct Noop;
    impl Compressor for Noop {
      fn code(&self) -> u8 {
        0
      }
      fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
      }
      fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
      }
    }
    let mut registry = CompressorRegistry::with_builtins();
    assert!(matches!(
      registry.register(Arc::new(Noop)),
      Err(RpcError::DuplicateRegistration(0))
    ));
  }

  #[test]
  fn unknown_code_is_an_error() {
    let registry = CompressorRegistry::with_builtins();
    assert!(matches!(registry.get(99), Err(RpcError::UnknownCompressor(99))));
  }
}

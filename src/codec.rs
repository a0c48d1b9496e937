//! Wire framing and the request/response envelope codec (spec §3, §4.A).
//!
//! A frame on the wire is `Header (15 bytes) || HeaderData || Payload`, where
//! `HeaderData` holds the service name, method name, and metadata, and
//! `Payload` is the (possibly compressed) serialized message body.
use std::collections::BTreeMap;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, RpcError};

/// Fixed-size frame header. 15 bytes, big-endian throughout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
  /// Total header length: this fixed 15-byte header *plus* the variable
  /// tail that follows it (service/method/metadata for a request, the raw
  /// error string for a response). Always `>= HEADER_SIZE`.
  pub header_len: u32,
  /// Length of the payload section that follows the header tail.
  pub data_len: u32,
  pub message_id: u32,
  pub version: u8,
  pub compressor: u8,
  pub serializer: u8,
}

pub const HEADER_SIZE: usize = 15;

impl Header {
  fn encode(&self, buf: &mut BytesMut) {
    buf.put_u32(self.header_len);
    buf.put_u32(self.data_len);
    buf.put_u32(self.message_id);
    buf.put_u8(self.version);
    buf.put_u8(self.compressor);
    buf.put_u8(self.serializer);
  }

  fn decode(buf: &[u8]) -> Result<Header> {
    if buf.len() < HEADER_SIZE {
      return Err(RpcError::MalformedFrame(format!(
        "header too short: {} bytes",
        buf.len()
      )));
    }
    let mut cursor = buf;
    let header = Header {
      header_len: cursor.get_u32(),
      data_len: cursor.get_u32(),
      message_id: cursor.get_u32(),
      version: cursor.get_u8(),
      compressor: cursor.get_u8(),
      serializer: cursor.get_u8(),
    };
    if (header.header_len as usize) < HEADER_SIZE {
      return Err(RpcError::MalformedFrame(format!(
        "header_len {} is smaller than the fixed header ({HEADER_SIZE})",
        header.header_len
      )));
    }
    Ok(header)
  }
}

/// A decoded, not-yet-dispatched request: everything needed to look up and
/// invoke a method handler, plus the raw (still encoded/compressed) payload.
#[derive(Clone, Debug)]
pub struct Request {
  pub message_id: u32,
  pub version: u8,
  pub compressor: u8,
  pub serializer: u8,
  pub service: String,
  pub method: String,
  pub metadata: Option<BTreeMap<String, String>>,
  pub payload: Option<Vec<u8>>,
}

/// A decoded response envelope. `error` is empty for a successful call.
#[derive(Clone, Debug)]
pub struct Response {
  pub message_id: u32,
  pub version: u8,
  pub compressor: u8,
  pub serializer: u8,
  pub error: String,
  pub payload: Option<Vec<u8>>,
}

const METADATA_VALUE_SEP: u8 = b'\r'; // key SEP value TERM
const METADATA_ENTRY_TERM: u8 = b'\n';
const NAME_TERM: u8 = b'\n';

/// Encode a request envelope: `Header || ServiceName \n MethodName \n
/// (key \r value \n)* || Payload`.
pub fn encode_request(req: &Request) -> BytesMut {
  let mut header_data = BytesMut::new();
  header_data.extend_from_slice(req.service.as_bytes());
  header_data.put_u8(NAME_TERM);
  header_data.extend_from_slice(req.method.as_bytes());
  header_data.put_u8(NAME_TERM);
  if let Some(metadata) = &req.metadata {
    for (key, value) in metadata {
      header_data.extend_from_slice(key.as_bytes());
      header_data.put_u8(METADATA_VALUE_SEP);
      header_data.extend_from_slice(value.as_bytes());
      header_data.put_u8(METADATA_ENTRY_TERM);
    }
  }

  let payload_len = req.payload.as_ref().map_or(0, Vec::len);
  let mut out = BytesMut::with_capacity(HEADER_SIZE + header_data.len() + payload_len);
  let header = Header {
    header_len: HEADER_SIZE as u32 + header_data.len() as u32,
    data_len: payload_len as u32,
    message_id: req.message_id,
    version: req.version,
    compressor: req.compressor,
    serializer: req.serializer,
  };
  header.encode(&mut out);
  out.extend_from_slice(&header_data);
  if let Some(payload) = &req.payload {
    out.extend_from_slice(payload);
  }
  out
}

/// Decode a full frame (fixed header + header data + payload, already read
/// off the wire) into a [`Request`].
///
/// Decoding is tolerant of ill-formed metadata pairs: an entry missing the
/// `key \r value` separator is skipped rather than failing the whole frame
/// (spec §4.A policy). The service/method name line is not optional; a frame
/// missing either terminator is `MalformedFrame`.
pub fn decode_request(frame: &[u8]) -> Result<Request> {
  let header = Header::decode(frame)?;
  let header_data_start = HEADER_SIZE;
  let header_data_end = header.header_len as usize;
  let payload_end = header_data_end + header.data_len as usize;
  if frame.len() < payload_end {
    return Err(RpcError::MalformedFrame(format!(
      "frame truncated: expected {} bytes, got {}",
      payload_end,
      frame.len()
    )));
  }
  let header_data = &frame[header_data_start..header_data_end];

  let mut rest = header_data;
  let service = take_name_field(&mut rest)?;
  let method = take_name_field(&mut rest)?;
  let metadata = parse_metadata(rest);

  let payload = if header.data_len == 0 {
    None
  } else {
    Some(frame[header_data_end..payload_end].to_vec())
  };

  Ok(Request {
    message_id: header.message_id,
    version: header.version,
    compressor: header.compressor,
    serializer: header.serializer,
    service,
    method,
    metadata,
    payload,
  })
}

fn take_name_field(rest: &mut &[u8]) -> Result<String> {
  let idx = rest
    .iter()
    .position(|&b| b == NAME_TERM)
    .ok_or_else(|| RpcError::MalformedFrame("missing name terminator".into()))?;
  let field = String::from_utf8_lossy(&rest[..idx]).into_owned();
  *rest = &rest[idx + 1..];
  Ok(field)
}

fn parse_metadata(mut rest: &[u8]) -> Option<BTreeMap<String, String>> {
  if rest.is_empty() {
    return None;
  }
  let mut metadata = BTreeMap::new();
  while !rest.is_empty() {
    let entry_end = match rest.iter().position(|&b| b == METADATA_ENTRY_TERM) {
      Some(idx) => idx,
      None => break, // trailing ill-formed entry with no terminator: drop it
    };
    let entry = &rest[..entry_end];
    if let Some(sep) = entry.iter().position(|&b| b == METADATA_VALUE_SEP) {
      let key = String::from_utf8_lossy(&entry[..sep]).into_owned();
      let value = String::from_utf8_lossy(&entry[sep + 1..]).into_owned();
      metadata.insert(key, value);
    } // else: ill-formed pair, skipped per tolerant-decode policy
    rest = &rest[entry_end + 1..];
  }
  if metadata.is_empty() {
    None
  } else {
    Some(metadata)
  }
}

/// Encode a response envelope: `Header || Error || Payload`. `Error` is the
/// raw UTF-8 error string with no framing of its own; its length is implied
/// by `header_len`.
pub fn encode_response(resp: &Response) -> BytesMut {
  let error_bytes = resp.error.as_bytes();
  let payload_len = resp.payload.as_ref().map_or(0, Vec::len);
  let mut out = BytesMut::with_capacity(HEADER_SIZE + error_bytes.len() + payload_len);
  let header = Header {
    header_len: HEADER_SIZE as u32 + error_bytes.len() as u32,
    data_len: payload_len as u32,
    message_id: resp.message_id,
    version: resp.version,
    compressor: resp.compressor,
    serializer: resp.serializer,
  };
  header.encode(&mut out);
  out.extend_from_slice(error_bytes);
  if let Some(payload) = &resp.payload {
    out.extend_from_slice(payload);
  }
  out
}

pub fn decode_response(frame: &[u8]) -> Result<Response> {
  let header = Header::decode(frame)?;
  let error_start = HEADER_SIZE;
  let error_end = header.header_len as usize;
  let payload_end = error_end + header.data_len as usize;
  if frame.len() < payload_end {
    return Err(RpcError::MalformedFrame(format!(
      "frame truncated: expected {} bytes, got {}",
      payload_end,
      frame.len()
    )));
  }
  let error = String::from_utf8_lossy(&frame[error_start..error_end]).into_owned();
  let payload = if header.data_len == 0 {
    None
  } else {
    Some(frame[error_end..payload_end].to_vec())
  };
  Ok(Response {
    message_id: header.message_id,
    version: header.version,
    compressor: header.compressor,
    serializer: header.serializer,
    error,
    payload,
  })
}

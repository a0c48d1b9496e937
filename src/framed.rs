//! Frame reader (spec §4.D).
//!
//! Reads one full frame — fixed header, then header data, then payload —
//! off an `AsyncRead`. Every read is a `read_exact`; a bare `read` can
//! return fewer bytes than requested on a TCP stream, which would silently
//! desynchronize the frame boundary (spec §9 Open Question).
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::HEADER_SIZE;
use crate::error::{Result, RpcError};

/// Read one complete frame and return it as a contiguous buffer, header
/// included, ready for [`crate::codec::decode_request`] or
/// [`crate::codec::decode_response`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
  let mut header_buf = [0u8; HEADER_SIZE];
  read_exact_mapped(reader, &mut header_buf).await?;

  let header_len = u32::from_be_bytes(header_buf[0..4].try_into().unwrap()) as usize;
  let data_len = u32::from_be_bytes(header_buf[4..8].try_into().unwrap()) as usize;

  let mut frame = Vec::with_capacity(HEADER_SIZE + header_len + data_len);
  frame.extend_from_slice(&header_buf);
  frame.resize(HEADER_SIZE + header_len + data_len, 0);
  read_exact_mapped(reader, &mut frame[HEADER_SIZE..]).await?;

  Ok(frame)
}

async fn read_exact_mapped<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
  match reader.read_exact(buf).await {
    Ok(_) => Ok(()),
    Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(RpcError::TransportClosed),
    Err(e) => Err(RpcError::Transport(e.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::codec::{decode_request, encode_request, Request};
  use std::io::Cursor;

  #[tokio::test]
  async fn reads_exactly_one_frame() {
    let req = Request {
      message_id: 1,
      version: 1,
      compressor: 0,
      serializer: 1,
      service: "Greeter".into(),
      method: "SayHello".into(),
      metadata: None,
      payload: Some(b"hi".to_vec()),
    };
    let encoded = encode_request(&req);
    let mut cursor = Cursor::new(encoded.to_vec());
    let frame = read_frame(&mut cursor).await.unwrap();
    let decoded = decode_request(&frame).unwrap();
    assert_eq!(decoded.service, "Greeter");
    assert_eq!(decoded.payload, Some(b"hi".to_vec()));
  }

  #[tokio::test]
  async fn eof_before_header_is_transport_closed() {
    let mut cursor = Cursor::new(Vec::<u8>::new());
    assert!(matches!(
      read_frame(&mut cursor).await,
      Err(RpcError::TransportClosed)
    ));
  }

  #[tokio::test]
  async fn eof_mid_payload_is_transport_closed() {
    let req = Request {
      message_id: 1,
      version: 1,
      compressor: 0,
      serializer: 1,
      service: "Greeter".into(),
      method: "SayHello".into(),
      metadata: None,
      payload: Some(b"hello world".to_vec()),
    };
    let mut encoded = encode_request(&req).to_vec();
    encoded.truncate(encoded.len() - 3);
    let mut cursor = Cursor::new(encoded);
    assert!(matches!(
      read_frame(&mut cursor).await,
      Err(RpcError::TransportClosed)
    ));
  }
}

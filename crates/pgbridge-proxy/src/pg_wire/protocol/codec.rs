//! Wire framing and primitive encoders
//!
//! Every regular message is `<id:byte><length:i32 BE><payload>` where the
//! length counts itself but not the id byte; the startup packet omits the
//! id. Payload primitives are big-endian i16/i32, NUL-terminated strings,
//! and i32-length-prefixed blobs where -1 means NULL.

use tokio::io::{AsyncRead, AsyncReadExt};

use pgbridge_common::{BridgeError, Result};

use super::constants::{MAX_MESSAGE_SIZE, MAX_STARTUP_SIZE};

/// Read one framed message: id byte plus payload.
///
/// An EOF before the id byte surfaces as an `Io` error so the session can
/// treat it as a plain disconnect.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<(u8, Vec<u8>)> {
    let id = r.read_u8().await?;
    let len = r.read_i32().await? as i64;
    if len < 4 || len as usize > MAX_MESSAGE_SIZE {
        return Err(BridgeError::protocol(format!("invalid message length {len}")));
    }
    let mut payload = vec![0u8; len as usize - 4];
    r.read_exact(&mut payload).await?;
    Ok((id, payload))
}

/// Read one startup-phase packet (no id byte). Returns the payload after the
/// length word, which starts with the 4-byte version/magic.
pub async fn read_startup_frame<R: AsyncRead + Unpin>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_i32().await? as i64;
    if len < 8 || len as usize > MAX_STARTUP_SIZE {
        return Err(BridgeError::protocol(format!("invalid startup length {len}")));
    }
    let mut payload = vec![0u8; len as usize - 4];
    r.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Sequential reader over one message payload. Truncated payloads are
/// protocol errors, never panics.
pub struct MessageBody<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MessageBody<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(BridgeError::protocol("message payload truncated"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_i16(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// NUL-terminated UTF-8 string; the terminator is consumed but excluded
    /// from the value.
    pub fn get_cstring(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| BridgeError::protocol("unterminated string in message"))?;
        let s = std::str::from_utf8(&rest[..nul])
            .map_err(|_| BridgeError::protocol("invalid UTF-8 in message"))?
            .to_string();
        self.pos += nul + 1;
        Ok(s)
    }

    /// i32-length-prefixed blob; -1 means NULL.
    pub fn get_blob(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.get_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(BridgeError::protocol(format!("invalid blob length {len}")));
        }
        Ok(Some(self.take(len as usize)?.to_vec()))
    }
}

/// Append a NUL-terminated string.
pub fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Frame a payload under the given id: id byte, then length (counting
/// itself), then the payload.
pub fn frame(id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(id);
    out.extend_from_slice(&((payload.len() + 4) as i32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_frame() {
        // 'Q' | len=9 | "sql\0" padded to 5 payload bytes
        let wire = frame(b'Q', b"sql\0x");
        let (id, payload) = read_frame(&mut Cursor::new(wire)).await.unwrap();
        assert_eq!(id, b'Q');
        assert_eq!(payload, b"sql\0x");
    }

    #[tokio::test]
    async fn test_read_frame_rejects_huge_length() {
        let mut wire = vec![b'Q'];
        wire.extend_from_slice(&(i32::MAX).to_be_bytes());
        let err = read_frame(&mut Cursor::new(wire)).await.unwrap_err();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_read_frame_rejects_short_length() {
        let mut wire = vec![b'Q'];
        wire.extend_from_slice(&2i32.to_be_bytes());
        assert!(read_frame(&mut Cursor::new(wire)).await.is_err());
    }

    #[test]
    fn test_body_cstring_and_blob() {
        let mut payload = Vec::new();
        put_cstring(&mut payload, "hello");
        payload.extend_from_slice(&3i32.to_be_bytes());
        payload.extend_from_slice(b"abc");
        payload.extend_from_slice(&(-1i32).to_be_bytes());

        let mut body = MessageBody::new(&payload);
        assert_eq!(body.get_cstring().unwrap(), "hello");
        assert_eq!(body.get_blob().unwrap(), Some(b"abc".to_vec()));
        assert_eq!(body.get_blob().unwrap(), None);
        assert_eq!(body.remaining(), 0);
    }

    #[test]
    fn test_body_truncation_is_protocol_error() {
        let mut body = MessageBody::new(&[0, 1]);
        assert!(body.get_i32().is_err());

        let mut body = MessageBody::new(b"no-terminator");
        assert!(body.get_cstring().is_err());
    }
}

//! Length-prefixed JSON framing: `<byte length>#<json>`.

use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Largest frame accepted from a peer.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const DELIMITER: u8 = b'#';
const MAX_PREFIX_DIGITS: usize = 10;

/// Codec for the request/reply socket protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(hash) = src.iter().position(|b| *b == DELIMITER) else {
            if src.len() > MAX_PREFIX_DIGITS {
                return Err(invalid("frame length prefix too long"));
            }
            return Ok(None);
        };

        let prefix = std::str::from_utf8(&src[..hash])
            .map_err(|_| invalid("frame length prefix is not utf-8"))?;
        let len: usize = prefix
            .parse()
            .map_err(|_| invalid(format!("bad frame length prefix '{prefix}'")))?;
        if len > MAX_FRAME_LEN {
            return Err(invalid(format!("frame of {len} bytes exceeds limit")));
        }

        let total = hash + 1 + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(hash + 1);
        let payload = src.split_to(len);
        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|_| invalid("frame payload is not utf-8"))
    }
}

impl Encoder<String> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let prefix = item.len().to_string();
        dst.reserve(prefix.len() + 1 + item.len());
        dst.put_slice(prefix.as_bytes());
        dst.put_u8(DELIMITER);
        dst.put_slice(item.as_bytes());
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_length_prefix() {
        let mut buf = BytesMut::new();
        FrameCodec.encode("{\"a\":1}".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"7#{\"a\":1}");
    }

    #[test]
    fn decodes_across_partial_reads() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&b"11#{\"ok\":"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"true}5#[1,2]");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "{\"ok\":true}");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), "[1,2]");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn length_counts_bytes_not_chars() {
        let mut buf = BytesMut::new();
        FrameCodec.encode("\"đ\"".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..2], b"4#");

        assert_eq!(FrameCodec.decode(&mut buf).unwrap().unwrap(), "\"đ\"");
    }

    #[test]
    fn rejects_garbage_prefix() {
        let mut buf = BytesMut::from(&b"x1#{}"[..]);
        assert!(FrameCodec.decode(&mut buf).is_err());

        let mut buf = BytesMut::from(&b"123456789012345"[..]);
        assert!(FrameCodec.decode(&mut buf).is_err());
    }
}

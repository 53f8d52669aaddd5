//! Meta framing (C1): the destination descriptor written once per tunnel
//! connection, length-prefixed so a reader never has to guess where it ends.
//!
//! Wire format: `u32` big-endian length `L`, then `L` bytes of a record
//! encoding `{ net, address }`. The record itself is a minimal hand-rolled
//! layout rather than a general-purpose serialization: a one-byte net tag
//! followed by a `u16`-length-prefixed UTF-8 address string. Both the pool's
//! tunnel producers and the relay's forwarder must agree byte-for-byte on
//! this layout.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Ceiling on the framed length, guarding against a peer claiming an
/// unbounded allocation.
pub const MAX_FRAME_LEN: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Net {
    Tcp,
    Udp,
}

impl Net {
    fn tag(self) -> u8 {
        match self {
            Net::Tcp => 0,
            Net::Udp => 1,
        }
    }

    fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Net::Tcp),
            1 => Ok(Net::Udp),
            other => Err(Error::protocol(format!("bad frame: unknown net tag {other}"))),
        }
    }
}

impl std::fmt::Display for Net {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Net::Tcp => write!(f, "tcp"),
            Net::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub net: Net,
    pub address: String,
}

impl Meta {
    pub fn tcp(address: impl Into<String>) -> Self {
        Meta {
            net: Net::Tcp,
            address: address.into(),
        }
    }

    fn encode(&self) -> Result<BytesMut> {
        let addr_bytes = self.address.as_bytes();
        if addr_bytes.len() > u16::MAX as usize {
            return Err(Error::protocol("bad frame: address too long"));
        }
        let mut body = BytesMut::with_capacity(1 + 2 + addr_bytes.len());
        body.put_u8(self.net.tag());
        body.put_u16(addr_bytes.len() as u16);
        body.put_slice(addr_bytes);
        if body.len() > MAX_FRAME_LEN {
            return Err(Error::protocol("oversize frame"));
        }
        Ok(body)
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 3 {
            return Err(Error::protocol("bad frame: short record"));
        }
        let mut cursor = buf;
        let net = Net::from_tag(cursor.get_u8())?;
        let addr_len = cursor.get_u16() as usize;
        if cursor.len() != addr_len {
            return Err(Error::protocol("bad frame: address length mismatch"));
        }
        let address = String::from_utf8(cursor.to_vec())
            .map_err(|_| Error::protocol("bad frame: address is not utf-8"))?;
        Ok(Meta { net, address })
    }
}

/// Writes the length prefix then the encoded record.
pub async fn write_meta<W: AsyncWrite + Unpin>(w: &mut W, meta: &Meta) -> Result<()> {
    let body = meta.encode()?;
    w.write_u32(body.len() as u32).await?;
    w.write_all(&body).await?;
    w.flush().await?;
    Ok(())
}

/// Reads the length prefix (rejecting anything past `MAX_FRAME_LEN`) then
/// the record. Premature EOF surfaces as `ProtocolError` ("short read").
pub async fn read_meta<R: AsyncRead + Unpin>(r: &mut R) -> Result<Meta> {
    let len = match r.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::protocol("short read: eof before length prefix"))
        }
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(Error::protocol(format!(
            "oversize frame: {len} bytes exceeds {MAX_FRAME_LEN}"
        )));
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .await
        .map_err(|_| Error::protocol("short read: eof before full frame"))?;
    Meta::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_is_byte_identical() {
        let meta = Meta::tcp("example.com:443");
        let mut buf = Vec::new();
        write_meta(&mut buf, &meta).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let decoded = read_meta(&mut cursor).await.unwrap();
        assert_eq!(meta, decoded);
    }

    #[tokio::test]
    async fn rejects_oversize_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        let err = read_meta(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn short_read_is_protocol_error() {
        let mut cursor = std::io::Cursor::new(vec![0u8, 0, 0]);
        let err = read_meta(&mut cursor).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn udp_net_round_trips_through_tag() {
        let meta = Meta {
            net: Net::Udp,
            address: "10.0.0.1:53".into(),
        };
        let body = meta.encode().unwrap();
        let decoded = Meta::decode(&body).unwrap();
        assert_eq!(meta, decoded);
    }
}

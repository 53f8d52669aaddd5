//! The "reject" synthetic transport: never dials anything. HTTP gets a
//! 403 with a fixed body; CONNECT/SOCKS gets the same bytes written to
//! the client socket before it's closed.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{BoxedStream, Transport};
use crate::error::Result;
use crate::meta::Meta;

const BODY: &[u8] = b"reject";

pub struct Reject;

#[async_trait]
impl Transport for Reject {
    fn name(&self) -> &str {
        "reject"
    }

    async fn connect(&self, mut client: BoxedStream, _meta: Meta) -> Result<()> {
        let _ = client.write_all(BODY).await;
        let _ = client.shutdown().await;
        Ok(())
    }

    async fn http(&self, mut client: BoxedStream, _meta: Meta, _request_bytes: Vec<u8>) -> Result<()> {
        let response = format!(
            "HTTP/1.1 403 Forbidden\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            BODY.len()
        );
        let _ = client.write_all(response.as_bytes()).await;
        let _ = client.write_all(BODY).await;
        let _ = client.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn connect_writes_reject_and_closes() {
        let (client, mut peer) = duplex(64);
        let reject = Reject;
        let meta = Meta::tcp("ad.example:443");
        reject.connect(Box::new(client), meta).await.unwrap();

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut peer, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, BODY);
    }

    #[tokio::test]
    async fn http_returns_403() {
        let (client, mut peer) = duplex(256);
        let reject = Reject;
        let meta = Meta::tcp("ad.example:80");
        reject
            .http(Box::new(client), meta, Vec::new())
            .await
            .unwrap();

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut peer, &mut buf)
            .await
            .unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.starts_with("HTTP/1.1 403 Forbidden"));
        assert!(text.ends_with("reject"));
    }
}

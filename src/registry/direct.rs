//! The "direct" synthetic transport: dials the destination itself,
//! bypassing every relay. HTTP strips proxy headers first (the front
//! already did that before handing the request down); tunnel just
//! splices straight through.

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{BoxedStream, Dialer};
use crate::error::{Error, Result};
use crate::meta::{Meta, Net};

pub struct Direct;

#[async_trait]
impl Dialer for Direct {
    fn name(&self) -> &str {
        "direct"
    }

    async fn dial(&self, meta: &Meta) -> Result<BoxedStream> {
        if meta.net != Net::Tcp {
            return Err(Error::dial("direct transport only dials tcp"));
        }
        let stream = TcpStream::connect(&meta.address)
            .await
            .map_err(|e| Error::dial(format!("{}: {}", meta.address, e)))?;
        stream.set_nodelay(true).ok();
        Ok(Box::new(stream))
    }
}

//! Raw-tunnel transport (§4.6): dials through a [`Pool`] of pre-warmed
//! mutual-TLS connections to one relay. `dial` gets a warm connection
//! (1 s deadline, per the open question in SPEC_FULL §9) and writes the
//! meta frame before handing the connection back as a plain byte
//! stream — from there on it behaves exactly like any other dialer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{BoxedStream, Dialer};
use crate::error::Result;
use crate::meta::{write_meta, Meta};
use crate::pool::Pool;

/// Pool-get deadline. Bounds how long a caller waits for a warm tunnel,
/// not the TLS handshake itself (handshakes happen off the hot path, in
/// producers) — see SPEC_FULL §9's open question.
const GET_DEADLINE: Duration = Duration::from_secs(1);

pub struct RawTunnel {
    name: String,
    pool: Arc<Pool>,
}

impl RawTunnel {
    pub fn new(name: impl Into<String>, pool: Arc<Pool>) -> Self {
        RawTunnel {
            name: name.into(),
            pool,
        }
    }
}

#[async_trait]
impl Dialer for RawTunnel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dial(&self, meta: &Meta) -> Result<BoxedStream> {
        let mut conn = self.pool.get(GET_DEADLINE).await?;
        write_meta(&mut conn, meta).await?;
        Ok(Box::new(conn))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

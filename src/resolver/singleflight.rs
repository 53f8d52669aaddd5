//! Singleflight (§9): collapses concurrent duplicate lookups for the
//! same host into one in-flight execution. The creator runs the future
//! and broadcasts the result; late callers just await the broadcast.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::Result;

type Shared = broadcast::Sender<Option<IpAddr>>;

#[derive(Default)]
pub struct Singleflight {
    inflight: Mutex<HashMap<String, Shared>>,
}

impl Singleflight {
    pub fn new() -> Arc<Self> {
        Arc::new(Singleflight::default())
    }

    /// Runs `f` at most once per `key` among concurrent callers. Late
    /// callers attach to the in-flight broadcast instead of calling `f`
    /// again; the creator removes the entry on completion.
    pub async fn do_once<F, Fut>(&self, key: &str, f: F) -> Result<Option<IpAddr>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Option<IpAddr>>>,
    {
        // Subscribing while still holding the lock closes the window
        // where a creator could send its result before a late caller
        // gets a chance to subscribe to it.
        let (is_creator, mut rx) = {
            let mut inflight = self.inflight.lock();
            if let Some(tx) = inflight.get(key) {
                (false, tx.subscribe())
            } else {
                let (tx, rx) = broadcast::channel(1);
                inflight.insert(key.to_string(), tx);
                (true, rx)
            }
        };

        if is_creator {
            let result = f().await;
            let tx = self.inflight.lock().remove(key);
            let to_send = result.as_ref().ok().copied();
            if let Some(tx) = tx {
                let _ = tx.send(to_send);
            }
            return result;
        }

        match rx.recv().await {
            Ok(value) => Ok(value),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_collapse_to_one_execution() {
        let sf = Singleflight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ip = IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.do_once("host", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    Ok(Some(ip))
                })
                .await
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), Some(ip));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

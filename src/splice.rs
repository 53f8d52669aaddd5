//! Bidirectional splice: the primitive every transport uses to join a
//! client connection with whatever the registry dialed.
//!
//! Two concurrent copy tasks run `a -> b` and `b -> a`. Each, on
//! completion (clean EOF or error), shuts down its destination's write
//! half. A shared cancellation signal closes the gap a plain
//! `tokio::io::split` can't: a `ReadHalf` has no `shutdown` of its own,
//! so on a read error the failing task instead cancels its sibling,
//! aborting its in-flight `io::copy` rather than leaving it blocked
//! reading from a source whose peer already died. The function returns
//! only once both directions have finished, so callers can rely on both
//! sides being shut down and dropped when `splice` returns.

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

pub async fn splice<A, B>(a: A, b: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ar, mut aw) = tokio::io::split(a);
    let (mut br, mut bw) = tokio::io::split(b);
    let cancel = CancellationToken::new();

    let a_to_b = async {
        let result = tokio::select! {
            res = io::copy(&mut ar, &mut bw) => res,
            _ = cancel.cancelled() => Ok(0),
        };
        let _ = bw.shutdown().await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    };
    let b_to_a = async {
        let result = tokio::select! {
            res = io::copy(&mut br, &mut aw) => res,
            _ = cancel.cancelled() => Ok(0),
        };
        let _ = aw.shutdown().await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    };

    let (sent, received) = tokio::join!(a_to_b, b_to_a);
    Ok((sent.unwrap_or(0), received.unwrap_or(0)))
}

use std::sync::Arc;

use garble_impair::{impair, Config, Decision};
use rand::Rng;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time::sleep,
};
use tracing::debug;

use crate::{stats::ProxyStats, Direction};

/// Maximum size of a single relay read.
pub(crate) const CHUNK_SIZE: usize = 4096;

/// Relays all bytes from `src` to `dst`, applying the configured
/// impairments chunk by chunk, until EOF or an error on either side.
///
/// Chunk order is preserved. On every exit path the write side of `dst` is
/// shut down, so the peer observes EOF while the opposite direction of the
/// connection keeps flowing.
pub(crate) async fn forward<S, D, R>(
    mut src: S,
    mut dst: D,
    config: Arc<Config>,
    stats: Arc<ProxyStats>,
    direction: Direction,
    mut rng: R,
) where
    S: AsyncRead + Unpin,
    D: AsyncWrite + Unpin,
    R: Rng,
{
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let n = match src.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(%direction, "read failed: {}", e);
                break;
            }
        };

        match impair(n, &config, &mut rng) {
            Decision::Drop => {
                stats.record_drop(direction);
                debug!(%direction, bytes = n, "dropped chunk");
            }
            Decision::Relay { copies, throttle, delay } => {
                if !throttle.is_zero() {
                    sleep(throttle).await;
                }
                if !delay.is_zero() {
                    sleep(delay).await;
                }

                let mut write_failed = false;
                for _ in 0..copies {
                    if let Err(e) = dst.write_all(&buf[..n]).await {
                        debug!(%direction, "write failed: {}", e);
                        write_failed = true;
                        break;
                    }
                }
                if write_failed {
                    break;
                }

                if copies > 1 {
                    debug!(%direction, copies, "duplicated chunk");
                }

                // The counters reflect logical traffic, not wire traffic:
                // one increment per chunk regardless of the copy count.
                stats.record_bytes(direction, n as u64);
            }
        }
    }

    let _ = dst.shutdown().await;
}

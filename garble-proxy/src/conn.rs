use std::sync::Arc;

use garble_impair::Config;
use rand::{rngs::StdRng, SeedableRng};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{forward::forward, stats::ProxyStats, Direction};

/// Releases an active connection slot when dropped, so the counter is
/// decremented on every exit path out of [`handle`].
struct ConnectionGuard(Arc<ProxyStats>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connection_closed();
    }
}

/// Drives one client connection end to end: dials the upstream, relays both
/// directions with impairments and tears everything down when both sides
/// are done.
pub(crate) async fn handle(client: TcpStream, config: Arc<Config>, stats: Arc<ProxyStats>) {
    stats.connection_opened();
    let _guard = ConnectionGuard(Arc::clone(&stats));

    let upstream =
        match TcpStream::connect((config.target_host.as_str(), config.target_port)).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!("failed to reach {}:{}: {}", config.target_host, config.target_port, e);
                // Dropping the client socket closes it; nothing was started.
                return;
            }
        };

    if let Err(e) = upstream.set_nodelay(true) {
        debug!("failed to set nodelay on upstream: {}", e);
    }

    debug!(
        peer = ?client.peer_addr().ok(),
        "relaying to {}:{}", config.target_host, config.target_port
    );

    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let request = tokio::spawn(forward(
        client_read,
        upstream_write,
        Arc::clone(&config),
        Arc::clone(&stats),
        Direction::Request,
        StdRng::from_entropy(),
    ));
    let response = tokio::spawn(forward(
        upstream_read,
        client_write,
        Arc::clone(&config),
        Arc::clone(&stats),
        Direction::Response,
        StdRng::from_entropy(),
    ));

    // One direction hitting EOF must not cut the other short: the half-close
    // propagated by its forwarder lets the peer wind the second one down.
    let _ = tokio::join!(request, response);

    debug!("connection finished");
}

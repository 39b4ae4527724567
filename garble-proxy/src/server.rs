use std::{net::SocketAddr, sync::Arc};

use garble_impair::Config;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::{conn, stats::ProxyStats, ProxyError};

/// A TCP proxy that forwards every accepted connection to the configured
/// upstream while degrading the traffic in both directions.
///
/// ```no_run
/// use garble_impair::Config;
/// use garble_proxy::Proxy;
///
/// # async fn run() -> Result<(), garble_proxy::ProxyError> {
/// let mut proxy = Proxy::new(Config::new("example.org", 80))?;
/// proxy.bind().await?;
/// proxy.run().await
/// # }
/// ```
pub struct Proxy {
    /// Resolved parameters, shared read-only with every forwarder.
    config: Arc<Config>,
    /// Counters, shared with the forwarders and any reporting consumer.
    stats: Arc<ProxyStats>,
    /// The listening socket, populated by [`bind`](Self::bind).
    listener: Option<TcpListener>,
}

impl Proxy {
    /// Creates a proxy for the given configuration.
    ///
    /// The configuration is validated here, before any socket is opened.
    pub fn new(config: Config) -> Result<Self, ProxyError> {
        config.validate()?;

        Ok(Self {
            config: Arc::new(config),
            stats: Arc::new(ProxyStats::default()),
            listener: None,
        })
    }

    /// Returns a handle to the shared counters, safe to poll from a
    /// reporting task at any time.
    pub fn stats(&self) -> Arc<ProxyStats> {
        Arc::clone(&self.stats)
    }

    /// Binds the listening socket on `0.0.0.0` at the configured local
    /// port. A bind failure is fatal: it is surfaced here, before the proxy
    /// serves anything.
    pub async fn bind(&mut self) -> Result<(), ProxyError> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.local_port)).await?;

        info!(
            local_addr = %listener.local_addr()?,
            "proxy ready, relaying to {}:{}", self.config.target_host, self.config.target_port
        );

        self.listener = Some(listener);

        Ok(())
    }

    /// Returns the local address this proxy is bound to. `None` before
    /// [`bind`](Self::bind).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Accepts connections until the future is dropped.
    ///
    /// Every accepted connection is served on its own task, so a slow or
    /// stalled connection never blocks the accept loop, and a failure on
    /// one connection never reaches another. Dropping this future stops new
    /// accepts; connections already in flight keep draining on their own
    /// tasks.
    pub async fn run(mut self) -> Result<(), ProxyError> {
        if self.listener.is_none() {
            self.bind().await?;
        }

        // The listener is present on both paths above.
        let Some(listener) = self.listener.take() else {
            return Err(ProxyError::Io(std::io::ErrorKind::NotConnected.into()));
        };

        loop {
            match listener.accept().await {
                Ok((client, addr)) => {
                    debug!("accepted connection from {}", addr);

                    if let Err(e) = client.set_nodelay(true) {
                        debug!("failed to set nodelay on client: {}", e);
                    }

                    tokio::spawn(conn::handle(
                        client,
                        Arc::clone(&self.config),
                        Arc::clone(&self.stats),
                    ));
                }
                Err(e) => {
                    // Transient accept failures must not take the listener down.
                    error!("failed to accept connection: {}", e);
                }
            }
        }
    }
}

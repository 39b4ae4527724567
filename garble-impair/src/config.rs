use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("loss fraction must be within [0, 1], got {0}")]
    LossOutOfRange(f64),
    #[error("duplication fraction must be within [0, 1], got {0}")]
    DupOutOfRange(f64),
    #[error("bandwidth cap must be a positive number of bytes per second, got {0}")]
    InvalidBandwidth(f64),
    #[error("target host is empty")]
    EmptyTargetHost,
    #[error("target port must be non-zero")]
    InvalidTargetPort,
}

/// A cap on the relay throughput, modelling the serialization time of a
/// slow link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bandwidth {
    /// No throttling.
    Unlimited,
    /// Cap in bytes per second.
    BytesPerSec(f64),
}

impl Bandwidth {
    /// Creates a cap from a rate in kilobits per second. An infinite rate
    /// means no throttling.
    pub fn kbps(rate: f64) -> Self {
        if rate.is_infinite() {
            Self::Unlimited
        } else {
            // 1000 bits / 8
            Self::BytesPerSec(rate * 125.0)
        }
    }

    /// How long a chunk of `len` bytes occupies the link.
    pub fn serialization_delay(&self, len: usize) -> Duration {
        match self {
            Self::Unlimited => Duration::ZERO,
            Self::BytesPerSec(rate) => Duration::from_secs_f64(len as f64 / rate),
        }
    }
}

/// Resolved proxy parameters. Constructed once at startup, validated before
/// the proxy opens any socket, and never mutated afterwards, so it is safe
/// to share between forwarders without synchronization.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host the proxy dials for every accepted connection.
    pub target_host: String,
    /// Port on the target host.
    pub target_port: u16,
    /// Local port the proxy listens on. Port 0 binds an ephemeral port.
    pub local_port: u16,
    /// Base one-way delay added to every relayed chunk.
    pub latency: Duration,
    /// Total width of the random variation around `latency`.
    pub jitter: Duration,
    /// Probability that a chunk is dropped entirely.
    pub loss: f64,
    /// Probability that a chunk is written more than once.
    pub dup: f64,
    /// Throughput cap per direction.
    pub bandwidth: Bandwidth,
}

impl Config {
    /// Creates a configuration that relays to `target_host:target_port`
    /// with no impairments.
    pub fn new(target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
            local_port: 8080,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            loss: 0.0,
            dup: 0.0,
            bandwidth: Bandwidth::Unlimited,
        }
    }

    /// Sets the local listen port.
    pub fn with_local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    /// Sets the base one-way latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the jitter window around the base latency.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the chunk loss probability.
    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss;
        self
    }

    /// Sets the chunk duplication probability.
    pub fn with_dup(mut self, dup: f64) -> Self {
        self.dup = dup;
        self
    }

    /// Sets the throughput cap.
    pub fn with_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    /// Checks that all parameters are usable. Called before the proxy
    /// starts serving, so a malformed configuration never reaches the
    /// relay path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.loss) {
            return Err(ConfigError::LossOutOfRange(self.loss));
        }

        if !(0.0..=1.0).contains(&self.dup) {
            return Err(ConfigError::DupOutOfRange(self.dup));
        }

        if let Bandwidth::BytesPerSec(rate) = self.bandwidth {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidBandwidth(rate));
            }
        }

        if self.target_host.is_empty() {
            return Err(ConfigError::EmptyTargetHost);
        }

        if self.target_port == 0 {
            return Err(ConfigError::InvalidTargetPort);
        }

        Ok(())
    }
}

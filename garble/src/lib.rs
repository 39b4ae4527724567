//! A TCP proxy that degrades connections on purpose. Configure latency,
//! jitter, loss, duplication and a bandwidth cap, point it at an upstream,
//! and test how your software copes with a bad link.

pub use garble_impair::{impair, Bandwidth, Config, ConfigError, Decision};
pub use garble_proxy::{Direction, Proxy, ProxyError, ProxyStats};

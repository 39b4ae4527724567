use std::time::Duration;

use rand::Rng;

use crate::config::Config;

/// What should happen to a single chunk before it is relayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Discard the chunk without writing it.
    Drop,
    /// Write the chunk `copies` times, after waiting out both delays.
    Relay {
        /// Number of consecutive writes: 1 normally, 2 or 3 when duplicated.
        copies: u32,
        /// Serialization time imposed by the bandwidth cap.
        throttle: Duration,
        /// Latency plus the jitter sample, never negative.
        delay: Duration,
    },
}

/// Decides the fate of a chunk of `len` bytes.
///
/// The loss check runs first and short-circuits: a dropped chunk is never
/// duplicated and never pays a delay. All randomness comes from the caller's
/// RNG, so a forwarder owns its generator and tests can seed one.
pub fn impair<R: Rng>(len: usize, config: &Config, rng: &mut R) -> Decision {
    if rng.gen::<f64>() < config.loss {
        return Decision::Drop;
    }

    let copies = if rng.gen::<f64>() < config.dup { rng.gen_range(2..=3) } else { 1 };

    let throttle = config.bandwidth.serialization_delay(len);

    let jitter = config.jitter.as_secs_f64();
    let offset = if jitter > 0.0 { rng.gen_range(-jitter / 2.0..=jitter / 2.0) } else { 0.0 };
    let delay = Duration::from_secs_f64((config.latency.as_secs_f64() + offset).max(0.0));

    Decision::Relay { copies, throttle, delay }
}

use std::{sync::Arc, time::Duration};

use garble_proxy::{Direction, ProxyStats};
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

/// Logs a snapshot of the proxy counters once per period.
///
/// Read-only consumer: the counters are owned by the relay side and this
/// task only polls the accessors.
pub(crate) async fn run(stats: Arc<ProxyStats>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so the first report covers
    // a full period.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        info!(
            active = stats.active_connections(),
            request = %throughput(&stats, Direction::Request),
            response = %throughput(&stats, Direction::Response),
            drops = stats.total_drops(),
            loss = %format!("{:.1}%", stats.loss_ratio() * 100.0),
            uptime = %humantime::format_duration(Duration::from_secs(stats.uptime().as_secs())),
            "stats",
        );
    }
}

fn throughput(stats: &ProxyStats, direction: Direction) -> String {
    format!(
        "{} ({}/s)",
        human_bytes(stats.bytes(direction) as f64),
        human_bytes(stats.rate(direction))
    )
}

fn human_bytes(n: f64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * KIB;
    const GIB: f64 = 1024.0 * MIB;

    if n >= GIB {
        format!("{:.1} GiB", n / GIB)
    } else if n >= MIB {
        format!("{:.1} MiB", n / MIB)
    } else if n >= KIB {
        format!("{:.1} KiB", n / KIB)
    } else {
        format!("{} B", n as u64)
    }
}

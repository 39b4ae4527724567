use clap::Parser;
use garble_impair::{Bandwidth, Config};
use garble_proxy::Proxy;
use tracing_subscriber::EnvFilter;

mod report;

/// A TCP proxy that degrades connections on purpose.
#[derive(Debug, Parser)]
#[command(name = "garble", version, about)]
struct Args {
    /// Upstream to relay to, as host:port.
    #[arg(long, value_parser = parse_target)]
    target: (String, u16),

    /// Local port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Base one-way latency added to every chunk, e.g. "100ms".
    #[arg(long, default_value = "0s")]
    latency: humantime::Duration,

    /// Width of the random variation around the base latency, e.g. "20ms".
    #[arg(long, default_value = "0s")]
    jitter: humantime::Duration,

    /// Probability in [0, 1] that a chunk is dropped.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Probability in [0, 1] that a chunk is written 2-3 times.
    #[arg(long, default_value_t = 0.0)]
    dup: f64,

    /// Bandwidth cap in kbps. Omit for an unthrottled link.
    #[arg(long)]
    bandwidth: Option<f64>,

    /// Interval between stats reports.
    #[arg(long, default_value = "1s")]
    report_interval: humantime::Duration,
}

impl Args {
    fn into_config(self) -> Config {
        let (host, port) = self.target;

        let bandwidth = match self.bandwidth {
            Some(kbps) => Bandwidth::kbps(kbps),
            None => Bandwidth::Unlimited,
        };

        Config::new(host, port)
            .with_local_port(self.port)
            .with_latency(self.latency.into())
            .with_jitter(self.jitter.into())
            .with_loss(self.loss)
            .with_dup(self.dup)
            .with_bandwidth(bandwidth)
    }
}

fn parse_target(value: &str) -> Result<(String, u16), String> {
    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got {value:?}"))?;

    if host.is_empty() {
        return Err(format!("missing host in {value:?}"));
    }

    let port = port.parse::<u16>().map_err(|e| format!("invalid port {port:?}: {e}"))?;

    Ok((host.to_string(), port))
}

async fn serve(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let report_interval = args.report_interval.into();

    let mut proxy = Proxy::new(args.into_config())?;
    proxy.bind().await?;

    tokio::spawn(report::run(proxy.stats(), report_interval));

    proxy.run().await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = serve(args).await {
        eprintln!("exit with error: {err}");
        std::process::exit(1);
    }
}

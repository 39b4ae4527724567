use std::time::Duration;

use garble::{Config, Proxy};

#[tokio::main]
async fn main() {
    // Degrade connections to a local service on port 9000: 100ms one-way
    // latency with a 40ms jitter window, and 5% chunk loss.
    let config = Config::new("127.0.0.1", 9000)
        .with_local_port(4444)
        .with_latency(Duration::from_millis(100))
        .with_jitter(Duration::from_millis(40))
        .with_loss(0.05);

    let mut proxy = Proxy::new(config).unwrap();
    proxy.bind().await.unwrap();

    println!("connect through 127.0.0.1:4444 to reach 127.0.0.1:9000 over a bad link");

    proxy.run().await.unwrap();
}

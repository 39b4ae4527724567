use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use garble_impair::Config;
use garble_proxy::{Direction, Proxy, ProxyStats};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::sleep,
};

/// Helper functions.
mod helpers {
    use super::*;

    /// Binds the proxy on an ephemeral port and spawns its accept loop.
    pub async fn start_proxy(config: Config) -> (SocketAddr, Arc<ProxyStats>) {
        let mut proxy = Proxy::new(config).unwrap();
        proxy.bind().await.unwrap();
        let addr = proxy.local_addr().unwrap();
        let stats = proxy.stats();
        tokio::spawn(proxy.run());
        (addr, stats)
    }

    /// An upstream that echoes everything back verbatim.
    pub async fn spawn_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let (mut read, mut write) = sock.split();
                    let _ = tokio::io::copy(&mut read, &mut write).await;
                });
            }
        });

        addr
    }

    /// An upstream that echoes until it reads `DIE`, then drops the socket
    /// mid-stream.
    pub async fn spawn_echo_with_kill_switch() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if buf[..n].starts_with(b"DIE") {
                                    break;
                                }
                                if sock.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        addr
    }

    /// An upstream that consumes everything and counts the bytes it saw.
    pub async fn spawn_sink() -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&received);
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else { break };
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match sock.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                counter.fetch_add(n, Ordering::Relaxed);
                            }
                        }
                    }
                });
            }
        });

        (addr, received)
    }

    /// Polls `check` until it holds or a generous deadline passes.
    pub async fn eventually(check: impl Fn() -> bool, what: &str) {
        for _ in 0..100 {
            if check() {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("timed out waiting for {what}");
    }

    pub async fn connect(proxy: SocketAddr) -> TcpStream {
        TcpStream::connect(("127.0.0.1", proxy.port())).await.unwrap()
    }
}

#[tokio::test]
async fn echo_round_trip_pays_the_latency_twice() {
    let _ = tracing_subscriber::fmt::try_init();

    let upstream = helpers::spawn_echo().await;
    let config = Config::new("127.0.0.1", upstream.port())
        .with_local_port(0)
        .with_latency(Duration::from_millis(50));
    let (proxy, stats) = helpers::start_proxy(config).await;

    let mut client = helpers::connect(proxy).await;

    let started = Instant::now();
    client.write_all(b"ping").await.unwrap();

    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();

    assert_eq!(&buf, b"ping");
    assert!(
        started.elapsed() >= Duration::from_millis(100),
        "round trip took {:?}, expected at least two one-way delays",
        started.elapsed()
    );

    helpers::eventually(
        || stats.bytes(Direction::Request) == 4 && stats.bytes(Direction::Response) == 4,
        "both byte counters to reach 4",
    )
    .await;
    assert_eq!(stats.total_drops(), 0);
}

#[tokio::test]
async fn clean_passthrough_is_byte_identical() {
    let _ = tracing_subscriber::fmt::try_init();

    let upstream = helpers::spawn_echo().await;
    let config = Config::new("127.0.0.1", upstream.port()).with_local_port(0);
    let (proxy, stats) = helpers::start_proxy(config).await;

    let payload: Vec<u8> = (0..256 * 1024u32).map(|i| (i % 239) as u8).collect();

    let mut client = helpers::connect(proxy).await;
    let (mut read, mut write) = client.split();

    let sender = async {
        write.write_all(&payload).await.unwrap();
    };
    let receiver = async {
        let mut received = vec![0u8; payload.len()];
        read.read_exact(&mut received).await.unwrap();
        received
    };

    let (_, received) = tokio::join!(sender, receiver);

    assert_eq!(received, payload, "echoed bytes differ from what was sent");
    helpers::eventually(
        || stats.bytes(Direction::Response) == payload.len() as u64,
        "response bytes to match the payload",
    )
    .await;
}

#[tokio::test]
async fn full_loss_starves_the_upstream() {
    let _ = tracing_subscriber::fmt::try_init();

    let (upstream, received) = helpers::spawn_sink().await;
    let config =
        Config::new("127.0.0.1", upstream.port()).with_local_port(0).with_loss(1.0);
    let (proxy, stats) = helpers::start_proxy(config).await;

    let mut client = helpers::connect(proxy).await;

    // Spaced writes so the forwarder sees several distinct chunks.
    for _ in 0..3 {
        client.write_all(&[0x55; 512]).await.unwrap();
        sleep(Duration::from_millis(30)).await;
    }

    helpers::eventually(|| stats.drops(Direction::Request) >= 3, "three dropped chunks").await;
    assert_eq!(received.load(Ordering::Relaxed), 0, "sink received bytes despite full loss");
    assert_eq!(stats.bytes(Direction::Request), 0);
}

#[tokio::test]
async fn upstream_failure_is_isolated_to_its_connection() {
    let _ = tracing_subscriber::fmt::try_init();

    let upstream = helpers::spawn_echo_with_kill_switch().await;
    let config = Config::new("127.0.0.1", upstream.port()).with_local_port(0);
    let (proxy, _stats) = helpers::start_proxy(config).await;

    let mut healthy = helpers::connect(proxy).await;
    let mut doomed = helpers::connect(proxy).await;

    let mut buf = [0u8; 5];
    healthy.write_all(b"hello").await.unwrap();
    healthy.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // Kill the second connection's upstream mid-stream.
    doomed.write_all(b"DIE").await.unwrap();
    let n = doomed.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "doomed connection should see EOF");

    // The healthy connection keeps relaying correctly.
    healthy.write_all(b"world").await.unwrap();
    healthy.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"world");
}

#[tokio::test]
async fn dial_failure_releases_the_connection_slot() {
    let _ = tracing_subscriber::fmt::try_init();

    // Bind and immediately drop a listener so the port is closed.
    let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let config = Config::new("127.0.0.1", dead_addr.port()).with_local_port(0);
    let (proxy, stats) = helpers::start_proxy(config).await;

    let mut client = helpers::connect(proxy).await;

    // The proxy closes the client as soon as the dial fails.
    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0);

    helpers::eventually(|| stats.active_connections() == 0, "connection slot release").await;
    assert_eq!(stats.bytes(Direction::Request), 0);
}

#[tokio::test]
async fn active_connections_follow_the_lifecycle() {
    let _ = tracing_subscriber::fmt::try_init();

    let upstream = helpers::spawn_echo().await;
    let config = Config::new("127.0.0.1", upstream.port()).with_local_port(0);
    let (proxy, stats) = helpers::start_proxy(config).await;

    let first = helpers::connect(proxy).await;
    let second = helpers::connect(proxy).await;

    helpers::eventually(|| stats.active_connections() == 2, "two active connections").await;

    drop(first);
    drop(second);

    helpers::eventually(|| stats.active_connections() == 0, "all connections released").await;
}

//! End-to-end relay benchmark for Chorus.
//!
//! Every client joins one room and streams audio frames; each frame is
//! relayed to every other member. This measures delivered messages with real
//! network I/O.
//!
//! Usage: `e2e_throughput [clients] [url]`

use chorus_protocol::ClientMessage;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080/";
const ROOM: &str = "benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let url = args.get(2).cloned().unwrap_or_else(|| DEFAULT_URL.to_string());

    println!("Chorus end-to-end relay benchmark");
    println!("Make sure the server is running: cargo run --release --bin chorus");
    println!();

    run_room_benchmark(num_clients, Arc::new(url)).await;
}

async fn run_room_benchmark(num_clients: usize, url: Arc<String>) {
    println!("Room benchmark: {} clients at {}", num_clients, url);
    println!("Warmup: {}s, measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let sent = Arc::new(AtomicU64::new(0));
    let received = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client in 0..num_clients {
        let sent = Arc::clone(&sent);
        let received = Arc::clone(&received);
        let barrier = Arc::clone(&barrier);
        let url = Arc::clone(&url);

        handles.push(tokio::spawn(async move {
            if let Err(e) = run_client(client, &url, sent, received, barrier).await {
                eprintln!("Client {} error: {}", client, e);
            }
        }));
    }

    barrier.wait().await;
    println!("All {} clients joined {}", num_clients, ROOM);

    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    sent.store(0, Ordering::SeqCst);
    received.store(0, Ordering::SeqCst);
    let start = Instant::now();

    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed().as_secs_f64();
    let total_sent = sent.load(Ordering::SeqCst);
    let total_received = received.load(Ordering::SeqCst);
    let expected = total_sent * (num_clients as u64).saturating_sub(1);

    println!();
    println!("Clients:          {:>12}", num_clients);
    println!("Duration:         {:>12.2}s", elapsed);
    println!("Frames sent:      {:>12}", total_sent);
    println!("Frames received:  {:>12}", total_received);
    println!("Relay rate:       {:>12.0} msg/s", total_received as f64 / elapsed);
    if expected > 0 {
        println!(
            "Delivery ratio:   {:>12.3}",
            total_received as f64 / expected as f64
        );
    }

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client: usize,
    url: &str,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), BoxError> {
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    let join = ClientMessage::join(ROOM, format!("bench-{}", client));
    sender
        .send(Message::Text(serde_json::to_string(&join)?))
        .await?;

    // Wait for room-info before counting anything.
    while let Some(msg) = receiver.next().await {
        if let Message::Text(text) = msg? {
            if text.contains("\"room-info\"") {
                break;
            }
        }
    }

    barrier.wait().await;

    let audio = ClientMessage::audio("A".repeat(256), Some(3.into()));
    let audio_msg = Message::Text(serde_json::to_string(&audio)?);

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if text.starts_with(r#"{"type":"audio""#) {
                    received.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    });

    loop {
        if sender.send(audio_msg.clone()).await.is_err() {
            break;
        }
        sent.fetch_add(1, Ordering::Relaxed);
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

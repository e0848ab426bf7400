use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};

const RACKS_PER_ROW: i64 = 50;

struct Client {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Self {
        let socket = TcpStream::connect((host, port)).await.expect("connect failed");
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
        }
    }

    async fn call(&mut self, function: &str, params: Value) -> Value {
        let req = json!({ "function": function, "params": params });
        self.framed.send(req.to_string()).await.expect("send failed");
        let line = self
            .framed
            .next()
            .await
            .expect("server closed connection")
            .expect("read failed");
        let resp: Value = serde_json::from_str(&line).expect("bad response");
        if let Some(err) = resp.get("error") {
            panic!("{function} failed: {err}");
        }
        resp["result"].clone()
    }
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Create one row of empty, active racks.
async fn setup_row(client: &mut Client, row: i64) {
    for col in 0..RACKS_PER_ROW {
        client
            .call("createRacking", json!({ "row": row, "col": col }))
            .await;
    }
}

fn flip_row(row: i64, occupied: bool) -> Value {
    let updates: Vec<Value> = (0..RACKS_PER_ROW)
        .map(|col| json!({ "row": row, "col": col, "occupied": occupied }))
        .collect();
    json!({ "updates": updates })
}

async fn phase1_sequential(host: &str, port: u16, row: i64) {
    let mut client = Client::connect(host, port).await;
    setup_row(&mut client, row).await;

    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        let report = client
            .call("bulkUpdateRackingOccupied", flip_row(row, i % 2 == 0))
            .await;
        latencies.push(t.elapsed());
        assert_eq!(report["failedCount"], 0);
    }

    let elapsed = start.elapsed();
    let flips = n as i64 * RACKS_PER_ROW;
    println!(
        "  {n} batches ({flips} flips) in {:.2}s = {:.0} flips/sec",
        elapsed.as_secs_f64(),
        flips as f64 / elapsed.as_secs_f64()
    );
    print_latency("batch latency", &mut latencies);
}

async fn phase2_concurrent(host: &str, port: u16, base_row: i64) {
    let n_tasks = 10;
    let n_per_task = 100;

    let start = Instant::now();
    let mut handles = Vec::new();

    for i in 0..n_tasks {
        let host = host.to_string();
        let row = base_row + i;
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            setup_row(&mut client, row).await;
            for j in 0..n_per_task {
                client
                    .call("bulkUpdateRackingOccupied", flip_row(row, j % 2 == 0))
                    .await;
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} batches = {total} total in {:.2}s = {:.0} batches/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
}

async fn phase3_history_under_load(host: &str, port: u16, row: i64) {
    let mut setup_client = Client::connect(host, port).await;
    setup_row(&mut setup_client, row).await;

    let writer_host = host.to_string();
    let writer = tokio::spawn(async move {
        let mut client = Client::connect(&writer_host, port).await;
        for j in 0..200 {
            client
                .call("bulkUpdateRackingOccupied", flip_row(row, j % 2 == 0))
                .await;
        }
    });

    let mut reader = Client::connect(host, port).await;
    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        reader.call("getTodayHistory", json!({})).await;
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();

    if latencies.is_empty() {
        println!("  writer finished before any read completed");
    } else {
        print_latency("getTodayHistory latency", &mut latencies);
    }
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            for _ in 0..ops_per_conn {
                client.call("listRacking", json!({})).await;
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("RACKD_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("RACKD_PORT")
        .unwrap_or_else(|_| "5480".into())
        .parse()
        .expect("invalid RACKD_PORT");

    println!("=== rackd stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Fresh rows per run so repeated runs against one server don't collide.
    let base_row = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
        * 100;

    println!("[phase 1] sequential bulk updates");
    phase1_sequential(&host, port, base_row).await;

    println!("\n[phase 2] concurrent bulk updates");
    phase2_concurrent(&host, port, base_row + 10).await;

    println!("\n[phase 3] history reads under write load");
    phase3_history_under_load(&host, port, base_row + 50).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

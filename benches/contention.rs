use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

const HOUR: i64 = 3_600_000;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("courtbook")
        .user("courtbook")
        .password(std::env::var("COURTBOOK_PASSWORD").unwrap_or_else(|_| "courtbook".into()));

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
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
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// First bookable hour, well past the minimum lead time.
fn base_start() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock before epoch").as_millis() as i64;
    (now / HOUR + 48) * HOUR
}

async fn create_venue(client: &tokio_postgres::Client) -> Ulid {
    let venue = Ulid::new();
    client
        .simple_query(&format!("INSERT INTO venues VALUES ('{venue}', '{}', 200000)", Ulid::new()))
        .await
        .expect("create venue");
    venue
}

async fn phase1_sequential(host: &str, port: u16, venue: Ulid, base: i64) {
    let client = connect(host, port).await;
    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let started = Instant::now();

    for i in 0..n as i64 {
        let start = base + i * HOUR;
        let sql = format!(
            "INSERT INTO bookings VALUES ('{venue}', '{}', {start}, {})",
            Ulid::new(),
            start + HOUR
        );
        let t = Instant::now();
        client.simple_query(&sql).await.expect("sequential create");
        latencies.push(t.elapsed());
    }

    let elapsed = started.elapsed();
    println!("  {n} creates in {:.2}s ({:.0}/s)", elapsed.as_secs_f64(), n as f64 / elapsed.as_secs_f64());
    print_latency("create", &mut latencies);
}

/// Many clients race for the same slot; exactly one may win.
async fn phase2_same_slot(host: &str, port: u16, base: i64) {
    let setup = connect(host, port).await;
    let rounds = 50;
    let clients = 32;
    let mut violations = 0;
    let mut latencies = Vec::new();

    for round in 0..rounds {
        let venue = create_venue(&setup).await;
        let start = base + round * HOUR;
        let mut handles = Vec::with_capacity(clients);
        for _ in 0..clients {
            let host = host.to_string();
            handles.push(tokio::spawn(async move {
                let client = connect(&host, port).await;
                let sql = format!(
                    "INSERT INTO bookings VALUES ('{venue}', '{}', {start}, {})",
                    Ulid::new(),
                    start + HOUR
                );
                let t = Instant::now();
                let ok = client.simple_query(&sql).await.is_ok();
                (ok, t.elapsed())
            }));
        }

        let mut winners = 0;
        for handle in handles {
            let (ok, latency) = handle.await.expect("task panicked");
            latencies.push(latency);
            if ok {
                winners += 1;
            }
        }
        if winners != 1 {
            violations += 1;
            eprintln!("  round {round}: {winners} winners");
        }
    }

    println!("  {rounds} rounds x {clients} clients, rounds without exactly one winner: {violations}");
    print_latency("contended create", &mut latencies);
}

async fn phase3_availability(host: &str, port: u16, venue: Ulid, base: i64) {
    let client = connect(host, port).await;
    let n = 500;
    let mut latencies = Vec::with_capacity(n);
    let mut slots = 0;

    for _ in 0..n {
        let sql = format!(
            "SELECT * FROM availability WHERE venue_id = '{venue}' AND start >= {base} AND \"end\" <= {}",
            base + 7 * 24 * HOUR
        );
        let t = Instant::now();
        let msgs = client.simple_query(&sql).await.expect("availability");
        latencies.push(t.elapsed());
        slots = msgs.iter().filter(|m| matches!(m, SimpleQueryMessage::Row(_))).count();
    }

    println!("  free slots per query: {slots}");
    print_latency("availability", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("COURTBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("COURTBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid COURTBOOK_PORT");

    println!("=== courtbook contention benchmark ===");
    println!("target: {host}:{port}\n");

    let base = base_start();
    let setup = connect(&host, port).await;
    let busy_venue = create_venue(&setup).await;
    drop(setup);

    println!("[phase 1] sequential create throughput");
    phase1_sequential(&host, port, busy_venue, base).await;

    println!("\n[phase 2] same-slot contention");
    phase2_same_slot(&host, port, base).await;

    println!("\n[phase 3] availability read latency");
    phase3_availability(&host, port, busy_venue, base).await;

    println!("\n=== benchmark complete ===");
}

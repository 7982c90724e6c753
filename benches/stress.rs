use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

use reservd::auth::StaticAuthorizer;
use reservd::engine::{Engine, InMemoryStore};
use reservd::notify::NotifyHub;
use reservd::wire;

const HOUR: i64 = 3_600_000; // 1 hour in ms
const T0: i64 = 1_700_000_000_000;
const PASSWORD: &str = "reservd";

/// In-process server backed by a fresh WAL.
async fn start_server(admin: Ulid) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind failed");
    let addr = listener.local_addr().expect("no local addr");
    let dir = std::env::temp_dir().join(format!("reservd_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let store = Arc::new(InMemoryStore::open(&dir.join("reservd.wal")).expect("open WAL"));
    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(store, Arc::new(StaticAuthorizer::new([admin])), hub.clone()));

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let engine = engine.clone();
            let hub = hub.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, engine, hub, PASSWORD.to_string(), None).await;
            });
        }
    });
    addr
}

async fn connect(addr: SocketAddr, user: Ulid) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("reservd")
        .user(user.to_string())
        .password(PASSWORD);

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

fn book_sql(id: Ulid, resource: &str, start: i64, end: i64, quantity: u32) -> String {
    format!(
        r#"INSERT INTO reservations (id, purpose, resource, start, "end", quantity) VALUES ('{id}', 'bench', '{resource}', {start}, {end}, {quantity})"#
    )
}

async fn add_equipment(admin: &tokio_postgres::Client, quantity: u32) -> String {
    let id = Ulid::new();
    admin
        .batch_execute(&format!(
            "INSERT INTO equipment (id, name, quantity) VALUES ('{id}', 'bench-{id}', {quantity})"
        ))
        .await
        .expect("register equipment");
    format!("equipment:{id}")
}

async fn phase1_sequential(addr: SocketAddr, admin: &tokio_postgres::Client) -> Vec<Ulid> {
    let resource = add_equipment(admin, 10).await;
    let client = connect(addr, Ulid::new()).await;

    let n = 2000;
    let mut ids = Vec::with_capacity(n);
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let id = Ulid::new();
        let s = T0 + (i as i64) * HOUR;
        let t = Instant::now();
        client
            .batch_execute(&book_sql(id, &resource, s, s + HOUR, 1))
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
        ids.push(id);
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
    ids
}

async fn phase2_contention(addr: SocketAddr, admin: &tokio_postgres::Client) {
    let quantity = 5;
    let resource = add_equipment(admin, quantity).await;
    let n_tasks = 10;
    let slots = 100;

    let accepted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let resource = resource.clone();
        let accepted = accepted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(addr, Ulid::new()).await;
            for slot in 0..slots {
                let s = T0 + slot * HOUR;
                match client
                    .batch_execute(&book_sql(Ulid::new(), &resource, s, s + HOUR, 1))
                    .await
                {
                    Ok(()) => accepted.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = accepted.load(Ordering::Relaxed);
    let expected = quantity as usize * slots as usize;
    println!(
        "  {n_tasks} tasks x {slots} slots: {ok} accepted, {} rejected in {:.2}s",
        rejected.load(Ordering::Relaxed),
        elapsed.as_secs_f64()
    );
    if ok != expected {
        println!("  WARNING: expected exactly {expected} accepted bookings");
    }
}

async fn phase3_read_under_load(addr: SocketAddr, admin: &tokio_postgres::Client) {
    let resource = add_equipment(admin, 10).await;
    let setup_client = connect(addr, Ulid::new()).await;
    for i in 0..200 {
        let s = T0 + i * HOUR;
        setup_client
            .batch_execute(&book_sql(Ulid::new(), &resource, s, s + HOUR, (i % 3 + 1) as u32))
            .await
            .expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let stop = stop.clone();
        let wres = add_equipment(admin, 10).await;
        writer_handles.push(tokio::spawn(async move {
            let client = connect(addr, Ulid::new()).await;
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let s = T0 + (w * 10_000 + i) * HOUR;
                let _ = client.batch_execute(&book_sql(Ulid::new(), &wres, s, s + HOUR, 1)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for _ in 0..n_readers {
        let resource = resource.clone();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(addr, Ulid::new()).await;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        r#"SELECT * FROM availability WHERE resource = '{resource}' AND start >= {T0} AND "end" <= {}"#,
                        T0 + 300 * HOUR
                    ))
                    .await
                    .expect("availability query");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        if let Ok(latencies) = h.await {
            all_latencies.extend(latencies);
        }
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_review(admin: &tokio_postgres::Client, ids: &[Ulid]) {
    let mut latencies = Vec::with_capacity(ids.len());
    let start = Instant::now();
    for id in ids {
        let t = Instant::now();
        admin
            .batch_execute(&format!(
                "INSERT INTO approval_logs (reservation_id, action) VALUES ('{id}', 'approve')"
            ))
            .await
            .expect("approve");
        latencies.push(t.elapsed());
    }
    println!("  {} approvals in {:.2}s", ids.len(), start.elapsed().as_secs_f64());
    print_latency("approve latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    let admin_id = Ulid::new();
    let addr = start_server(admin_id).await;

    println!("=== reservd stress benchmark ===");
    println!("target: {addr} (in-process)\n");

    let admin = connect(addr, admin_id).await;

    println!("[phase 1] sequential create throughput");
    let ids = phase1_sequential(addr, &admin).await;

    println!("\n[phase 2] concurrent contention on one equipment item");
    phase2_contention(addr, &admin).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(addr, &admin).await;

    println!("\n[phase 4] approval throughput");
    phase4_review(&admin, &ids).await;

    println!("\n=== benchmark complete ===");
}

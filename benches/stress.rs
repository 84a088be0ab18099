use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use ulid::Ulid;

/// One JSON-lines connection bound to one location.
struct Client {
    framed: Framed<TcpStream, LinesCodec>,
    location: String,
}

impl Client {
    async fn connect(host: &str, port: u16) -> Self {
        let socket = TcpStream::connect((host, port)).await.expect("connect failed");
        Self {
            framed: Framed::new(socket, LinesCodec::new()),
            location: format!("bench_{}", Ulid::new()),
        }
    }

    async fn call(&mut self, mut request: Value) -> Value {
        request["location"] = json!(self.location);
        self.framed.send(request.to_string()).await.expect("send failed");
        let line = self
            .framed
            .next()
            .await
            .expect("connection closed")
            .expect("read failed");
        serde_json::from_str(&line).expect("bad reply")
    }

    async fn create_room(&mut self, number: usize) -> String {
        let reply = self
            .call(json!({
                "op": "create_room",
                "room": {
                    "room_number": number.to_string(),
                    "rates": {"base_price": 100, "vat_price": 118, "saturday_price": 150, "saturday_vat_price": 177},
                    "extra_guest_charge": 20
                }
            }))
            .await;
        reply["ok"]["id"].as_str().expect("room id").to_string()
    }

    async fn book(&mut self, room_id: &str, check_in: NaiveDate, nights: u64) -> Value {
        self.call(json!({
            "op": "create_booking",
            "booking": {
                "room_id": room_id,
                "guest_name": "Bench Guest",
                "check_in": check_in,
                "check_out": check_in + Days::new(nights),
                "guests": 2
            }
        }))
        .await
    }
}

fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 1).unwrap() + Days::new(offset)
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

async fn phase1_sequential(host: &str, port: u16) {
    let mut client = Client::connect(host, port).await;
    let room = client.create_room(1).await;

    // Back-to-back two-night stays, so every create passes the conflict check
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        let reply = client.book(&room, day(i as u64 * 2), 2).await;
        assert!(reply.get("ok").is_some(), "create failed: {reply}");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contended(host: &str, port: u16) {
    // All tasks share one location and fight over the same rooms and nights
    let mut setup = Client::connect(host, port).await;
    let location = setup.location.clone();
    let mut rooms = Vec::new();
    for n in 0..5 {
        rooms.push(setup.create_room(n).await);
    }
    drop(setup);

    let n_tasks = 10;
    let n_per_task = 200;
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        let location = location.clone();
        let rooms = rooms.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            client.location = location;
            let (mut won, mut conflicts) = (0usize, 0usize);
            for j in 0..n_per_task {
                let reply = client.book(&rooms[j % rooms.len()], day(j as u64), 1).await;
                if reply.get("ok").is_some() {
                    won += 1;
                } else if reply["error"]["code"] == "conflict" {
                    conflicts += 1;
                } else {
                    panic!("unexpected reply: {reply}");
                }
            }
            (won, conflicts)
        }));
    }

    let (mut won, mut conflicts) = (0, 0);
    for h in handles {
        let (w, c) = h.await.unwrap();
        won += w;
        conflicts += c;
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} attempts = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    println!("  {won} booked, {conflicts} conflicts (expected {n_per_task} booked)");
}

async fn phase3_reads_under_load(host: &str, port: u16) {
    let mut setup = Client::connect(host, port).await;
    let location = setup.location.clone();
    let mut rooms = Vec::new();
    for n in 0..20 {
        let room = setup.create_room(n).await;
        for i in 0..30 {
            setup.book(&room, day(i * 3), 2).await;
        }
        rooms.push(room);
    }
    drop(setup);

    // Writers keep moving bookings around in the background
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..4u64 {
        let host = host.to_string();
        let location = location.clone();
        let room = rooms[w as usize].clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            client.location = location;
            let id = client.book(&room, day(400 + w * 10), 2).await["ok"]["id"].clone();
            let mut i = 0u64;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let _ = client
                    .call(json!({
                        "op": "reschedule",
                        "id": id,
                        "room_id": room,
                        "check_in": day(400 + w * 10 + i % 5),
                    }))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 300;
    let mut reader_handles = Vec::new();

    for r in 0..n_readers {
        let host = host.to_string();
        let location = location.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            client.location = location;
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                let reply = client
                    .call(json!({
                        "op": "calendar",
                        "first_day": day(((r * reads_per_reader + i) % 60) as u64),
                        "days": 31,
                    }))
                    .await;
                assert!(reply.get("ok").is_some(), "calendar failed: {reply}");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("31-day calendar, 20 rooms", &mut all_latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let location = Client::connect(host, port).await.location;
    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for n in 0..n_conns {
        let host = host.to_string();
        let location = location.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let mut client = Client::connect(&host, port).await;
            client.location = location;
            let room = client.create_room(n).await;
            for i in 0..ops_per_conn {
                let reply = client.book(&room, day(i), 1).await;
                assert!(reply.get("ok").is_some(), "create failed: {reply}");
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
    let host = std::env::var("ROOMGRID_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMGRID_PORT")
        .unwrap_or_else(|_| "5480".into())
        .parse()
        .expect("invalid ROOMGRID_PORT");

    println!("=== roomgrid stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own location to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended writes");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] calendar latency under reschedule load");
    phase3_reads_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

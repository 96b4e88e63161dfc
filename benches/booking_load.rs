use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Weekday};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

/// The default working day: 10:00-17:00 with a 14:00-15:00 break.
const SLOTS: [(&str, &str); 12] = [
    ("10:00", "10:30"),
    ("10:30", "11:00"),
    ("11:00", "11:30"),
    ("11:30", "12:00"),
    ("12:00", "12:30"),
    ("12:30", "13:00"),
    ("13:00", "13:30"),
    ("13:30", "14:00"),
    ("15:00", "15:30"),
    ("15:30", "16:00"),
    ("16:00", "16:30"),
    ("16:30", "17:00"),
];

async fn connect(host: &str, port: u16, dbname: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(dbname)
        .user("slotbook")
        .password("slotbook");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

fn fresh_calendar() -> String {
    format!("bench_{}", Ulid::new())
}

/// The first `n` working days (Mon-Sat) from 2030-01-07 on.
fn working_days(n: usize) -> Vec<NaiveDate> {
    let mut day = NaiveDate::from_ymd_opt(2030, 1, 7).unwrap();
    let mut days = Vec::with_capacity(n);
    while days.len() < n {
        if day.weekday() != Weekday::Sun {
            days.push(day);
        }
        day = day.succ_opt().unwrap();
    }
    days
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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn insert_sql(id: Ulid, date: NaiveDate, start: &str, end: &str) -> String {
    format!(
        r#"INSERT INTO reservations (id, date, start, "end", name, email, phone) VALUES ('{id}', '{date}', '{start}', '{end}', 'Bench', 'bench@example.com', '')"#
    )
}

fn pay_sql(id: Ulid) -> String {
    format!("INSERT INTO reservation_events (reservation_id, event) VALUES ('{id}', 'pay_success')")
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port, &fresh_calendar()).await;

    let days = working_days(150);
    let mut book_latencies = Vec::with_capacity(days.len() * SLOTS.len());
    let mut pay_latencies = Vec::with_capacity(days.len() * SLOTS.len());
    let start = Instant::now();

    for &date in &days {
        for (s, e) in SLOTS {
            let id = Ulid::new();
            let t = Instant::now();
            client.batch_execute(&insert_sql(id, date, s, e)).await.unwrap();
            book_latencies.push(t.elapsed());

            let t = Instant::now();
            client.batch_execute(&pay_sql(id)).await.unwrap();
            pay_latencies.push(t.elapsed());
        }
    }

    let elapsed = start.elapsed();
    let n = book_latencies.len();
    let ops = (n * 2) as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} bookings confirmed in {:.2}s = {ops:.0} statements/sec",
        elapsed.as_secs_f64()
    );
    print_latency("booking latency", &mut book_latencies);
    print_latency("payment latency", &mut pay_latencies);
}

async fn phase2_contention(host: &str, port: u16) {
    let calendar = fresh_calendar();
    let n_tasks = 16;
    let days = working_days(20);

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let calendar = calendar.clone();
        let days = days.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &calendar).await;
            let mut won = 0u64;
            let mut lost = 0u64;
            let mut latencies = Vec::new();
            for &date in &days {
                for (s, e) in SLOTS {
                    let t = Instant::now();
                    match client.batch_execute(&insert_sql(Ulid::new(), date, s, e)).await {
                        Ok(()) => won += 1,
                        Err(_) => lost += 1,
                    }
                    latencies.push(t.elapsed());
                }
            }
            (won, lost, latencies)
        }));
    }

    let mut won = 0;
    let mut lost = 0;
    let mut latencies = Vec::new();
    for h in handles {
        let (w, l, lat) = h.await.unwrap();
        won += w;
        lost += l;
        latencies.extend(lat);
    }

    let elapsed = start.elapsed();
    let expected = (days.len() * SLOTS.len()) as u64;
    println!(
        "  {n_tasks} clients racing for {expected} slots: {won} booked, {lost} conflicts in {:.2}s",
        elapsed.as_secs_f64()
    );
    if won != expected {
        println!("  WARNING: expected exactly {expected} winners, got {won}");
    }
    print_latency("contended insert latency", &mut latencies);
}

async fn phase3_listing_under_load(host: &str, port: u16) {
    let calendar = fresh_calendar();
    let days = working_days(60);

    let writer_host = host.to_string();
    let writer_calendar = calendar.clone();
    let writer_days = days.clone();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port, &writer_calendar).await;
        let mut n = 0u64;
        for &date in &writer_days {
            for (s, e) in SLOTS {
                let id = Ulid::new();
                if client.batch_execute(&insert_sql(id, date, s, e)).await.is_ok()
                    && client.batch_execute(&pay_sql(id)).await.is_ok()
                {
                    n += 1;
                }
            }
        }
        n
    });

    let n_readers = 8;
    let n_queries = 300;
    let mut handles = Vec::new();
    for r in 0..n_readers {
        let host = host.to_string();
        let calendar = calendar.clone();
        let days = days.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &calendar).await;
            let mut latencies = Vec::with_capacity(n_queries);
            for i in 0..n_queries {
                let date = days[(r * 7 + i) % days.len()];
                let t = Instant::now();
                client
                    .simple_query(&format!("SELECT * FROM slots WHERE date = '{date}'"))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.unwrap());
    }
    let confirmed = writer.await.unwrap();

    println!("  writer confirmed {confirmed} bookings while readers listed slots");
    print_latency("slot listing latency", &mut latencies);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n = 200;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let t = Instant::now();
            let client = connect(&host, port, &fresh_calendar()).await;
            client
                .simple_query("SELECT * FROM slots WHERE date = '2030-01-07'")
                .await
                .unwrap();
            t.elapsed()
        }));
    }

    let mut latencies = Vec::with_capacity(n);
    for h in handles {
        latencies.push(h.await.unwrap());
    }
    let elapsed = start.elapsed();
    println!(
        "  {n} connections (new calendar each) in {:.2}s",
        elapsed.as_secs_f64()
    );
    print_latency("connect + first query", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SLOTBOOK_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SLOTBOOK_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid SLOTBOOK_PORT");

    println!("=== slotbook load benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase books into its own calendar so phases don't see each other's slots

    println!("[phase 1] sequential booking + payment");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended booking");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] slot listing under write load");
    phase3_listing_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}

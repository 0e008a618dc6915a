use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use ulid::Ulid;

use parkd::clock::Clock;
use parkd::engine::{Engine, EngineError, Settings, StartBooking};
use parkd::model::*;
use parkd::notify::NotifyHub;

/// 2026-03-10 08:00 +05:30: twelve bookable hours before the cutoff.
const EIGHT_AM: Ms = 1_773_109_800_000;

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

fn new_engine(clock: &Clock) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("parkd_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(
        dir.join("parkd.wal"),
        Settings::default(),
        clock.clone(),
        Arc::new(NotifyHub::new()),
    )
    .expect("open engine");
    Arc::new(engine)
}

fn tariff() -> Rates {
    Rates {
        booking_rate: Decimal::from(40),
        check_in_penalty_rate: Decimal::ONE,
        check_out_penalty_rate: Decimal::TWO,
    }
}

async fn spot(engine: &Engine, capacity: u32) -> Ulid {
    let id = Ulid::new();
    engine
        .create_spot(id, Ulid::new(), None, capacity, tariff())
        .await
        .expect("create spot");
    id
}

async fn user(engine: &Engine) -> Ulid {
    let id = Ulid::new();
    engine.create_wallet(id).await.expect("create wallet");
    engine
        .top_up(id, Decimal::from(1_000_000))
        .await
        .expect("top up");
    id
}

/// The `slot`th ten-minute window of the day.
fn slot_request(spot_id: Ulid, user_id: Ulid, slot: i64) -> StartBooking {
    let start = EIGHT_AM + slot * 10 * MINUTE_MS;
    StartBooking {
        spot_id,
        user_id,
        check_in: start,
        check_out: start + 10 * MINUTE_MS,
        vehicle_number: format!("BENCH{slot:04}"),
    }
}

async fn phase1_sequential() {
    let clock = Clock::manual(EIGHT_AM);
    let engine = new_engine(&clock);
    let s = spot(&engine, 100).await;
    let u = user(&engine).await;

    let n = 70;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let t = Instant::now();
        engine
            .start_booking(slot_request(s, u, i as i64))
            .await
            .expect("sequential start");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("start latency", &mut latencies);
}

async fn phase2_independent_spots() {
    let clock = Clock::manual(EIGHT_AM);
    let engine = new_engine(&clock);
    let n_tasks = 16;
    let n_per_task = 50;

    let mut handles = Vec::new();
    let start = Instant::now();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let s = spot(&engine, n_per_task as u32).await;
        let u = user(&engine).await;
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(n_per_task);
            for j in 0..n_per_task {
                let t = Instant::now();
                engine
                    .start_booking(slot_request(s, u, j as i64))
                    .await
                    .expect("independent start");
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.expect("task panicked"));
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("start latency", &mut latencies);
}

async fn phase3_hot_spot() {
    let clock = Clock::manual(EIGHT_AM);
    let engine = new_engine(&clock);
    let s = spot(&engine, 100).await;
    let n_tasks = 32;

    let mut users = Vec::with_capacity(n_tasks);
    for _ in 0..n_tasks {
        users.push(user(&engine).await);
    }

    // Every task wants the same window: one wins, the rest must conflict.
    let start = Instant::now();
    let handles: Vec<_> = users
        .into_iter()
        .map(|u| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let t = Instant::now();
                let result = engine.start_booking(slot_request(s, u, 0)).await;
                (t.elapsed(), result)
            })
        })
        .collect();

    let mut latencies = Vec::new();
    let (mut won, mut conflicted, mut timed_out) = (0, 0, 0);
    for h in handles {
        let (latency, result) = h.await.expect("task panicked");
        latencies.push(latency);
        match result {
            Ok(_) => won += 1,
            Err(EngineError::Conflict(_)) => conflicted += 1,
            Err(EngineError::LockTimeout(_)) => timed_out += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    println!(
        "  {n_tasks} racers in {:.2}s: {won} admitted, {conflicted} conflicts, {timed_out} timeouts",
        start.elapsed().as_secs_f64()
    );
    assert_eq!(won, 1, "double booking under contention");
    print_latency("contended start latency", &mut latencies);
}

async fn phase4_sweep() {
    let clock = Clock::manual(EIGHT_AM);
    let engine = new_engine(&clock);
    let n = 200;

    for _ in 0..n {
        let s = spot(&engine, 1).await;
        let u = user(&engine).await;
        let booking = engine.start_booking(slot_request(s, u, 0)).await.expect("start");
        engine
            .check_in(booking.id, &booking.id.to_string())
            .await
            .expect("check in");
    }

    clock.advance(HOUR_MS);
    let start = Instant::now();
    let report = engine.run_sweeps().await;
    let elapsed = start.elapsed();
    assert_eq!(report.completed, n);
    println!(
        "  swept {} overstays in {:.2}s = {:.0} bookings/sec",
        report.completed,
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    println!("parkd stress test");
    println!("\nphase 1: sequential starts on one spot");
    phase1_sequential().await;
    println!("\nphase 2: concurrent starts on independent spots");
    phase2_independent_spots().await;
    println!("\nphase 3: racing starts on one hot spot");
    phase3_hot_spot().await;
    println!("\nphase 4: overstay sweep");
    phase4_sweep().await;
    println!("\ndone");
}

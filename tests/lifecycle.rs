use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use ulid::Ulid;

use parkd::clock::Clock;
use parkd::engine::{ConflictKind, Engine, EngineError, ErrorKind, Settings, StartBooking};
use parkd::lock::RedisLock;
use parkd::model::*;
use parkd::notify::{LotOccupancy, NotifyHub};
use parkd::scheduler;

// ── Test infrastructure ──────────────────────────────────────

/// 2026-03-10 09:00 +05:30.
const NINE_AM: Ms = 1_773_113_400_000;

fn data_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("parkd_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start_engine(dir: &PathBuf, clock: &Clock) -> (Arc<Engine>, Arc<NotifyHub>) {
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        dir.join("parkd.wal"),
        Settings::default(),
        clock.clone(),
        notify.clone(),
    )
    .unwrap();
    (Arc::new(engine), notify)
}

fn tariff() -> Rates {
    Rates {
        booking_rate: dec!(50),
        check_in_penalty_rate: dec!(1),
        check_out_penalty_rate: dec!(2),
    }
}

async fn funded_user(engine: &Engine, amount: Decimal) -> Ulid {
    let user = Ulid::new();
    engine.create_wallet(user).await.unwrap();
    engine.top_up(user, amount).await.unwrap();
    user
}

fn window(spot_id: Ulid, user_id: Ulid, from_min: i64, to_min: i64) -> StartBooking {
    StartBooking {
        spot_id,
        user_id,
        check_in: NINE_AM + from_min * MINUTE_MS,
        check_out: NINE_AM + to_min * MINUTE_MS,
        vehicle_number: "DL3CAF0001".into(),
    }
}

/// Capacity bounds and ledger reconciliation, checked after every scenario.
async fn assert_invariants(engine: &Engine, users: &[Ulid]) {
    for spot in engine.list_spots(None).await {
        assert!(spot.available <= spot.capacity, "spot {} over capacity", spot.id);
    }
    for &user in users {
        assert!(engine.reconcile(user).await.unwrap(), "wallet {user} does not reconcile");
    }

    let mut live: Vec<Booking> = engine.bookings_by_status(BookingStatus::Pending).await;
    live.extend(engine.bookings_by_status(BookingStatus::Active).await);
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            if a.spot_id == b.spot_id {
                assert!(!a.span().overlaps(&b.span()), "{} overlaps {}", a.id, b.id);
            }
        }
    }
}

// ── Scenarios ────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_refunds_base_charge() {
    let dir = data_dir();
    let clock = Clock::manual(NINE_AM);
    let (engine, _notify) = start_engine(&dir, &clock);

    let spot = Ulid::new();
    engine
        .create_spot(spot, Ulid::new(), Some("B2-14".into()), 4, tariff())
        .await
        .unwrap();
    let user = funded_user(&engine, dec!(300)).await;

    let booking = engine.start_booking(window(spot, user, 60, 180)).await.unwrap();
    assert_eq!(engine.wallet(user).await.unwrap().balance, dec!(200));
    assert_eq!(engine.get_spot(spot).await.unwrap().available, 3);

    clock.set(NINE_AM + 60 * MINUTE_MS);
    engine.check_in(booking.id, &booking.id.to_string()).await.unwrap();
    clock.set(NINE_AM + 180 * MINUTE_MS);
    let breakup = engine.check_out(booking.id, &booking.id.to_string()).await.unwrap();

    assert_eq!(breakup.penalties(), Decimal::ZERO);
    assert_eq!(breakup.refund_amount, dec!(100));
    assert_eq!(engine.wallet(user).await.unwrap().balance, dec!(300));
    assert_eq!(engine.get_spot(spot).await.unwrap().available, 4);
    assert_invariants(&engine, &[user]).await;
}

#[tokio::test]
async fn racing_starts_on_single_unit_spot() {
    let dir = data_dir();
    let clock = Clock::manual(NINE_AM);
    let (engine, _notify) = start_engine(&dir, &clock);

    let spot = Ulid::new();
    engine.create_spot(spot, Ulid::new(), None, 1, tariff()).await.unwrap();
    let a = funded_user(&engine, dec!(500)).await;
    let b = funded_user(&engine, dec!(500)).await;

    let attempts = [(a, 60, 180), (b, 120, 240)].map(|(user, from, to)| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start_booking(window(spot, user, from, to)).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(|r| r.err()).unwrap();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(matches!(err, EngineError::Conflict(ConflictKind::Overlap(_))));
    assert_eq!(engine.get_spot(spot).await.unwrap().available, 0);
    assert_invariants(&engine, &[a, b]).await;
}

#[tokio::test]
async fn overstay_and_no_show_swept_across_restart() {
    let dir = data_dir();
    let clock = Clock::manual(NINE_AM);
    let spot = Ulid::new();
    let (stayer, ghost, stayed, missed) = {
        let (engine, _notify) = start_engine(&dir, &clock);
        engine.create_spot(spot, Ulid::new(), None, 2, tariff()).await.unwrap();
        let stayer = funded_user(&engine, dec!(500)).await;
        let ghost = funded_user(&engine, dec!(500)).await;
        let stayed = engine.start_booking(window(spot, stayer, 60, 120)).await.unwrap();
        let missed = engine.start_booking(window(spot, ghost, 120, 180)).await.unwrap();
        clock.set(NINE_AM + 60 * MINUTE_MS);
        engine.check_in(stayed.id, &stayed.id.to_string()).await.unwrap();
        (stayer, ghost, stayed.id, missed.id)
    };

    // The process restarts before the sweep runs.
    clock.set(NINE_AM + 165 * MINUTE_MS);
    let (engine, _notify) = start_engine(&dir, &clock);
    scheduler::sweep_once(&engine, u64::MAX).await;

    let overstay = engine.breakup(stayed).await.unwrap();
    assert!(overstay.auto_completed);
    assert_eq!(overstay.late_check_out_penalty, dec!(70));
    assert_eq!(overstay.refund_amount, Decimal::ZERO);
    assert_eq!(engine.wallet(stayer).await.unwrap().balance, dec!(380));

    // Never arrived for 11:00: 45 minutes late, 35 billable at 1.
    let no_show = engine.breakup(missed).await.unwrap();
    assert_eq!(no_show.status, BookingStatus::Cancelled);
    assert_eq!(no_show.late_check_in_penalty, dec!(35));
    assert_eq!(engine.wallet(ghost).await.unwrap().balance, dec!(415));

    assert_eq!(engine.get_spot(spot).await.unwrap().available, 2);

    // A second sweep finds nothing: both transitions were applied once.
    scheduler::sweep_once(&engine, u64::MAX).await;
    assert_eq!(engine.wallet(stayer).await.unwrap().balance, dec!(380));
    assert_eq!(engine.wallet(ghost).await.unwrap().balance, dec!(415));
    assert_invariants(&engine, &[stayer, ghost]).await;
}

#[tokio::test]
async fn occupancy_follows_events() {
    let dir = data_dir();
    let clock = Clock::manual(NINE_AM);
    let (engine, notify) = start_engine(&dir, &clock);
    let occupancy = Arc::new(LotOccupancy::new());
    let consumer = tokio::spawn(occupancy.clone().run(notify.subscribe_all()));

    let lot = Ulid::new();
    let spot = Ulid::new();
    engine.create_spot(spot, lot, None, 3, tariff()).await.unwrap();
    let user = funded_user(&engine, dec!(500)).await;

    let kept = engine.start_booking(window(spot, user, 60, 120)).await.unwrap();
    let dropped = engine.start_booking(window(spot, user, 120, 180)).await.unwrap();
    engine.cancel_booking(dropped.id).await.unwrap();

    let mut waited = Duration::ZERO;
    while occupancy.live_bookings(&lot) != 1 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert_eq!(occupancy.live_bookings(&lot), 1);
    assert_eq!(engine.booking(kept.id).await.unwrap().status, BookingStatus::Pending);
    consumer.abort();
}

#[tokio::test]
async fn redis_lock_backend_serialises_admission() {
    let Ok(url) = std::env::var("PARKD_TEST_REDIS_URL") else {
        eprintln!("PARKD_TEST_REDIS_URL not set, skipping");
        return;
    };
    let dir = data_dir();
    let clock = Clock::manual(NINE_AM);
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(dir.join("parkd.wal"), Settings::default(), clock, notify)
        .unwrap()
        .with_lock_backend(Arc::new(RedisLock::connect(&url).await.unwrap()));
    assert_eq!(engine.lock_backend(), "redis");
    let engine = Arc::new(engine);

    let spot = Ulid::new();
    engine.create_spot(spot, Ulid::new(), None, 5, tariff()).await.unwrap();
    let mut users = Vec::new();
    for _ in 0..5 {
        users.push(funded_user(&engine, dec!(500)).await);
    }

    let attempts: Vec<_> = users
        .iter()
        .map(|&user| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.start_booking(window(spot, user, 60, 120)).await })
        })
        .collect();
    let admitted = join_all(attempts)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(Ok(_))))
        .count();

    assert_eq!(admitted, 1);
    assert_eq!(engine.get_spot(spot).await.unwrap().available, 4);
    assert_invariants(&engine, &users).await;
}

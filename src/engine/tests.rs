use super::*;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::model::*;
use crate::store::{AppointmentFilter, AvailabilityStore, ServiceSlotQuery, StoreError, StoreResult, WalStore};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("slotbook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine(name: &str) -> Engine<WalStore> {
    Engine::new(WalStore::open(&test_wal_path(name)).unwrap())
}

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, day).unwrap()
}

fn t(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap()
}

const TODAY: u32 = 19;

fn times(choices: &[SlotChoice]) -> Vec<NaiveTime> {
    choices.iter().map(|c| c.time).collect()
}

async fn set_general_flag(engine: &Engine<WalStore>, date: NaiveDate, time: NaiveTime, available: bool) {
    let record = engine.store().find_date_record(date).await.unwrap().unwrap();
    let slot = engine
        .store()
        .list_general_slots(record.id, false)
        .await
        .unwrap()
        .into_iter()
        .find(|g| g.time == time)
        .unwrap();
    engine
        .store()
        .set_general_slot_available(slot.id, available, None)
        .await
        .unwrap();
}

async fn general_rows_at(engine: &Engine<WalStore>, date: NaiveDate, time: NaiveTime) -> usize {
    let record = engine.store().find_date_record(date).await.unwrap().unwrap();
    engine
        .store()
        .list_general_slots(record.id, false)
        .await
        .unwrap()
        .iter()
        .filter(|g| g.time == time)
        .count()
}

// ── Resolution scenarios ─────────────────────────────────

#[tokio::test]
async fn unconfigured_service_sees_open_general_times() {
    let engine = engine("scenario_general.wal");
    let svc = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();
    set_general_flag(&engine, d(20), t(10), false).await;

    let slots = engine.slots_for(svc, d(20)).await;
    assert_eq!(slots, vec![SlotChoice { time: t(9), available: true }]);
}

#[tokio::test]
async fn configured_service_hides_its_time_from_others() {
    let engine = engine("scenario_hide.wal");
    let configured = Ulid::new();
    let other = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();
    engine.add_service_slot(configured, d(20), t(9)).await.unwrap();

    assert_eq!(times(&engine.slots_for(other, d(20)).await), vec![t(10)]);
    assert_eq!(times(&engine.slots_for(configured, d(20)).await), vec![t(9)]);
    // The general row at 09:00 is gone, not just hidden.
    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 0);
}

#[tokio::test]
async fn booking_is_pending_and_removes_the_time() {
    let engine = engine("scenario_book.wal");
    let svc = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();

    let booking = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap();
    assert!(booking.warning.is_none());
    assert_eq!(booking.appointment.status, AppointmentStatus::Pending);
    assert_eq!(booking.appointment.client_name, "Ana");
    assert!(matches!(
        booking.appointment.claim,
        SlotClaim::Held(SlotRef::General { .. })
    ));

    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(10)]);
    // Every unconfigured service shares the general tier.
    assert_eq!(times(&engine.slots_for(Ulid::new(), d(20)).await), vec![t(10)]);

    let stored = engine.appointment(booking.appointment.id).await.unwrap();
    assert_eq!(stored, booking.appointment);
}

#[tokio::test]
async fn unregistered_date_resolves_to_nothing() {
    let engine = engine("unregistered_date.wal");
    assert!(engine.slots_for(Ulid::new(), d(20)).await.is_empty());
}

// ── Tiers ────────────────────────────────────────────────

#[tokio::test]
async fn configured_service_never_falls_back() {
    let engine = engine("tier_exclusive.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(21), t(9)).await.unwrap();
    engine.add_general_slot(d(21), t(10)).await.unwrap();

    assert_eq!(engine.tier(svc).await.unwrap(), Tier::ServiceSpecific);
    assert!(engine.has_configuration(svc).await);
    assert_eq!(engine.dates_for(svc, d(TODAY)).await, vec![d(20)]);
    assert!(engine.slots_for(svc, d(21)).await.is_empty());

    // Toggling every row off keeps the service configured.
    engine.toggle_service_slot(svc, d(20), t(9)).await.unwrap();
    assert!(engine.has_configuration(svc).await);
    assert!(engine.slots_for(svc, d(20)).await.is_empty());
    assert!(engine.dates_for(svc, d(TODAY)).await.is_empty());
}

#[tokio::test]
async fn tier_reverts_after_last_service_slot_removed() {
    let engine = engine("tier_revert.wal");
    let svc = Ulid::new();
    assert_eq!(engine.tier(svc).await.unwrap(), Tier::General);

    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    assert_eq!(engine.tier(svc).await.unwrap(), Tier::ServiceSpecific);

    engine
        .remove_service_slot(svc, d(20), t(9), Confirmation::Confirmed)
        .await
        .unwrap();
    assert_eq!(engine.tier(svc).await.unwrap(), Tier::General);
    assert!(!engine.has_configuration(svc).await);
    // The time is back in the general tier.
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(9)]);
}

#[tokio::test]
async fn toggle_twice_restores_flag() {
    let engine = engine("toggle_twice.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();

    assert!(!engine.toggle_service_slot(svc, d(20), t(9)).await.unwrap());
    assert!(engine.toggle_service_slot(svc, d(20), t(9)).await.unwrap());
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(9)]);
    // Never touches the general tier.
    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 0);
}

#[tokio::test]
async fn toggle_unknown_slot() {
    let engine = engine("toggle_unknown.wal");
    let err = engine.toggle_service_slot(Ulid::new(), d(20), t(9)).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownSlot { .. }));
}

#[tokio::test]
async fn switched_off_service_slot_still_hides_general_time() {
    let engine = engine("exclude_switched_off.wal");
    let configured = Ulid::new();
    let other = Ulid::new();
    engine.add_service_slot(configured, d(20), t(9)).await.unwrap();
    assert!(!engine.toggle_service_slot(configured, d(20), t(9)).await.unwrap());
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();

    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 1);
    assert_eq!(times(&engine.slots_for(other, d(20)).await), vec![t(10)]);
}

#[tokio::test]
async fn booked_service_slot_still_hides_general_time() {
    let engine = engine("exclude_booked.wal");
    let configured = Ulid::new();
    let other = Ulid::new();
    engine.add_service_slot(configured, d(20), t(9)).await.unwrap();
    engine
        .book(BookingRequest::new("Ana", configured, d(20), t(9)))
        .await
        .unwrap();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();

    assert_eq!(times(&engine.slots_for(other, d(20)).await), vec![t(10)]);
    assert!(engine.slots_for(configured, d(20)).await.is_empty());
}

// ── Date catalog & suggestion ────────────────────────────

#[tokio::test]
async fn dates_never_before_today() {
    let engine = engine("dates_today.wal");
    let general = Ulid::new();
    let configured = Ulid::new();
    for day in [17, 18, 19, 22, 20] {
        engine.add_general_slot(d(day), t(9)).await.unwrap();
        engine.add_service_slot(configured, d(day), t(11)).await.unwrap();
    }

    assert_eq!(engine.dates_for(general, d(TODAY)).await, vec![d(19), d(20), d(22)]);
    assert_eq!(engine.dates_for(configured, d(TODAY)).await, vec![d(19), d(20), d(22)]);
}

#[tokio::test]
async fn general_dates_listed_even_when_full() {
    let engine = engine("dates_full.wal");
    let svc = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    set_general_flag(&engine, d(20), t(9), false).await;

    assert_eq!(engine.dates_for(svc, d(TODAY)).await, vec![d(20)]);
    assert!(engine.slots_for(svc, d(20)).await.is_empty());
}

#[tokio::test]
async fn suggestion_picks_earliest_open_slot() {
    let engine = engine("suggest.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(18), t(8)).await.unwrap();
    engine.add_service_slot(svc, d(22), t(9)).await.unwrap();
    engine.add_service_slot(svc, d(21), t(15)).await.unwrap();
    engine.add_service_slot(svc, d(21), t(10)).await.unwrap();
    engine.toggle_service_slot(svc, d(21), t(10)).await.unwrap();

    assert_eq!(
        engine.suggest(svc, d(TODAY)).await,
        Suggestion::Earliest { date: d(21), time: t(15) }
    );
    assert_eq!(engine.suggest(Ulid::new(), d(TODAY)).await, Suggestion::NotConfigured);
}

#[tokio::test]
async fn suggestion_asks_for_a_date_when_nothing_is_open() {
    let engine = engine("suggest_none.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    engine.toggle_service_slot(svc, d(20), t(9)).await.unwrap();
    assert_eq!(engine.suggest(svc, d(TODAY)).await, Suggestion::PickADate);
}

// ── Booking ──────────────────────────────────────────────

#[tokio::test]
async fn booking_requires_every_field() {
    let engine = engine("book_validation.wal");
    let request = BookingRequest {
        date: None,
        ..BookingRequest::new("Ana", Ulid::new(), d(20), t(9))
    };
    let err = engine.book(request).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation("date")));
}

#[tokio::test]
async fn concurrent_bookings_one_winner() {
    let engine = Arc::new(engine("book_race.wal"));
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.book(BookingRequest::new(format!("client {i}"), svc, d(20), t(9)))
                .await
        }));
    }

    let mut won = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(booking) => {
                assert!(booking.warning.is_none());
                won += 1;
            }
            Err(EngineError::SlotTaken { date, time }) => {
                assert_eq!((date, time), (d(20), t(9)));
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert!(engine.slots_for(svc, d(20)).await.is_empty());
}

#[tokio::test]
async fn shared_general_slot_goes_to_one_service() {
    let engine = Arc::new(engine("book_race_general.wal"));
    engine.add_general_slot(d(20), t(9)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.book(BookingRequest::new("Ana", Ulid::new(), d(20), t(9))).await
        }));
    }

    let mut won = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            won += 1;
        }
    }
    assert_eq!(won, 1);

    // Losers were written first, then compensated.
    let losers = engine
        .store()
        .list_appointments(&AppointmentFilter::default())
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.status == AppointmentStatus::Cancelled)
        .count();
    assert_eq!(losers, 7);
}

#[tokio::test]
async fn refused_claim_cancels_the_appointment() {
    let engine = engine("book_refused.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    engine.toggle_service_slot(svc, d(20), t(9)).await.unwrap();

    let err = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SlotTaken { .. }));

    let appointments = engine.appointments_for(svc, d(20)).await.unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn stale_booking_warns_then_reconciler_repairs() {
    let engine = engine("book_stale.wal");
    let svc = Ulid::new();
    engine.add_general_slot(d(20), t(10)).await.unwrap();

    let booking = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap();
    let warning = booking.warning.unwrap();
    assert_eq!(warning.appointment_id, booking.appointment.id);
    assert_eq!((warning.date, warning.time), (d(20), t(9)));
    assert_eq!(booking.appointment.claim, SlotClaim::Stale);

    let report = engine.reconcile_stale().await.unwrap();
    assert_eq!(report, ReconcileReport { examined: 1, repaired: 0, still_stale: 1 });

    engine.add_general_slot(d(20), t(9)).await.unwrap();
    let report = engine.reconcile_stale().await.unwrap();
    assert_eq!(report, ReconcileReport { examined: 1, repaired: 1, still_stale: 0 });

    let repaired = engine.appointment(booking.appointment.id).await.unwrap();
    assert!(matches!(repaired.claim, SlotClaim::Held(SlotRef::General { .. })));
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(10)]);

    let report = engine.reconcile_stale().await.unwrap();
    assert_eq!(report.examined, 0);
}

// ── Release & cancel ─────────────────────────────────────

#[tokio::test]
async fn release_twice_restores_exactly_one_general_row() {
    let engine = engine("release_twice.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    let booking = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap();

    engine.release(booking.appointment.id).await.unwrap();
    engine.release(booking.appointment.id).await.unwrap();

    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 1);
    assert_eq!(
        engine.appointment(booking.appointment.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    // The service lost its only row, so the general tier governs it again.
    assert_eq!(engine.tier(svc).await.unwrap(), Tier::General);
    assert_eq!(times(&engine.slots_for(Ulid::new(), d(20)).await), vec![t(9)]);
}

#[tokio::test]
async fn release_of_general_claim_reopens_row() {
    let engine = engine("release_general.wal");
    let svc = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    let booking = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap();

    engine.release(booking.appointment.id).await.unwrap();
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(9)]);
    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 1);
}

#[tokio::test]
async fn release_unknown_appointment() {
    let engine = engine("release_unknown.wal");
    let id = Ulid::new();
    assert!(matches!(engine.release(id).await, Err(EngineError::NotFound(x)) if x == id));
}

#[tokio::test]
async fn cancel_keeps_the_tier() {
    let engine = engine("cancel_tier.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    let booking = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap();
    assert!(engine.slots_for(svc, d(20)).await.is_empty());

    engine.cancel(booking.appointment.id).await.unwrap();
    engine.cancel(booking.appointment.id).await.unwrap();

    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(9)]);
    assert_eq!(engine.tier(svc).await.unwrap(), Tier::ServiceSpecific);
    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 0);

    // Rebooking after a cancel is allowed.
    engine
        .book(BookingRequest::new("Bea", svc, d(20), t(9)))
        .await
        .unwrap();
}

#[tokio::test]
async fn status_transitions() {
    let engine = engine("transitions.wal");
    let svc = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();

    let a = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap()
        .appointment;
    assert_eq!(engine.confirm(a.id).await.unwrap().status, AppointmentStatus::Confirmed);
    assert!(matches!(
        engine.confirm(a.id).await,
        Err(EngineError::InvalidTransition {
            from: AppointmentStatus::Confirmed,
            to: AppointmentStatus::Confirmed
        })
    ));
    assert_eq!(engine.complete(a.id).await.unwrap().status, AppointmentStatus::Completed);
    // Completed appointments are terminal; releasing them is a no-op.
    engine.release(a.id).await.unwrap();
    assert_eq!(engine.appointment(a.id).await.unwrap().status, AppointmentStatus::Completed);

    let b = engine
        .book(BookingRequest::new("Bea", svc, d(20), t(10)))
        .await
        .unwrap()
        .appointment;
    engine.cancel(b.id).await.unwrap();
    assert!(matches!(
        engine.complete(b.id).await,
        Err(EngineError::InvalidTransition { from: AppointmentStatus::Cancelled, .. })
    ));
}

// ── Configuration ────────────────────────────────────────

#[tokio::test]
async fn duplicate_slots_rejected() {
    let engine = engine("duplicates.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    assert!(matches!(
        engine.add_service_slot(svc, d(20), t(9)).await,
        Err(EngineError::DuplicateSlot { .. })
    ));

    engine.add_general_slot(d(20), t(10)).await.unwrap();
    assert!(matches!(
        engine.add_general_slot(d(20), t(10)).await,
        Err(EngineError::DuplicateSlot { .. })
    ));
}

#[tokio::test]
async fn removal_requires_confirmation() {
    let engine = engine("remove_confirm.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();

    assert!(matches!(
        engine
            .remove_service_slot(svc, d(20), t(9), Confirmation::Unconfirmed)
            .await,
        Err(EngineError::ConfirmationRequired)
    ));
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(9)]);
}

#[tokio::test]
async fn removal_releases_the_holder() {
    let engine = engine("remove_holder.wal");
    let svc = Ulid::new();
    engine.add_service_slot(svc, d(20), t(9)).await.unwrap();
    engine.add_service_slot(svc, d(20), t(10)).await.unwrap();
    let booking = engine
        .book(BookingRequest::new("Ana", svc, d(20), t(9)))
        .await
        .unwrap();

    engine
        .remove_service_slot(svc, d(20), t(9), Confirmation::Confirmed)
        .await
        .unwrap();

    assert_eq!(
        engine.appointment(booking.appointment.id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );
    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 1);
    // Still configured through its 10:00 row, so 09:00 is not offered to it.
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(10)]);
    assert!(matches!(
        engine
            .remove_service_slot(svc, d(20), t(9), Confirmation::Confirmed)
            .await,
        Err(EngineError::UnknownSlot { .. })
    ));
}

#[tokio::test]
async fn held_general_time_survives_service_slot_cycle() {
    let engine = engine("held_general_cycle.wal");
    let walk_in = Ulid::new();
    let massage = Ulid::new();
    let other = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_general_slot(d(20), t(10)).await.unwrap();
    let first = engine
        .book(BookingRequest::new("Ana", walk_in, d(20), t(9)))
        .await
        .unwrap();

    engine.add_service_slot(massage, d(20), t(9)).await.unwrap();
    engine
        .remove_service_slot(massage, d(20), t(9), Confirmation::Confirmed)
        .await
        .unwrap();

    // One general row again, claimed by the appointment that still stands.
    assert_eq!(general_rows_at(&engine, d(20), t(9)).await, 1);
    let first = engine.appointment(first.appointment.id).await.unwrap();
    assert_eq!(first.status, AppointmentStatus::Pending);
    assert!(matches!(first.claim, SlotClaim::Held(SlotRef::General { .. })));
    assert_eq!(times(&engine.slots_for(other, d(20)).await), vec![t(10)]);
    assert!(matches!(
        engine
            .book(BookingRequest::new("Bea", other, d(20), t(9)))
            .await,
        Err(EngineError::SlotTaken { .. })
    ));

    // Cancelling reopens the row the appointment now holds.
    engine.cancel(first.id).await.unwrap();
    assert_eq!(times(&engine.slots_for(other, d(20)).await), vec![t(9), t(10)]);
}

#[tokio::test]
async fn remove_general_slot() {
    let engine = engine("remove_general.wal");
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.remove_general_slot(d(20), t(9)).await.unwrap();
    assert!(engine.slots_for(Ulid::new(), d(20)).await.is_empty());
    assert!(matches!(
        engine.remove_general_slot(d(20), t(9)).await,
        Err(EngineError::UnknownSlot { .. })
    ));
}

// ── Day locks ────────────────────────────────────────────

#[tokio::test]
async fn past_day_locks_are_pruned() {
    let engine = engine("prune_locks.wal");
    for day in [17, 18, 20] {
        engine.add_general_slot(d(day), t(9)).await.unwrap();
    }
    assert_eq!(engine.day_lock_count(), 3);

    let held = engine.lock_day(d(17)).await;
    assert_eq!(engine.prune_day_locks(d(TODAY)), 1);
    assert_eq!(engine.day_lock_count(), 2);

    drop(held);
    assert_eq!(engine.prune_day_locks(d(TODAY)), 1);
    assert_eq!(engine.day_lock_count(), 1);
    // Pruned dates lock again on demand.
    engine.add_general_slot(d(18), t(10)).await.unwrap();
    assert_eq!(engine.day_lock_count(), 2);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn replay_restores_bookings_and_claims() {
    let path = test_wal_path("engine_replay.wal");
    let svc = Ulid::new();
    let booking = {
        let engine = Engine::new(WalStore::open(&path).unwrap());
        engine.add_general_slot(d(20), t(9)).await.unwrap();
        engine.add_general_slot(d(20), t(10)).await.unwrap();
        engine
            .book(BookingRequest::new("Ana", svc, d(20), t(9)))
            .await
            .unwrap()
    };

    let engine = Engine::new(WalStore::open(&path).unwrap());
    assert_eq!(engine.appointment(booking.appointment.id).await.unwrap(), booking.appointment);
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(10)]);

    engine.release(booking.appointment.id).await.unwrap();
    assert_eq!(times(&engine.slots_for(svc, d(20)).await), vec![t(9), t(10)]);
}

// ── Storage failures ─────────────────────────────────────

/// Delegates to a `WalStore` until told to fail.
struct FlakyStore {
    inner: WalStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn new(name: &str) -> Self {
        Self {
            inner: WalStore::open(&test_wal_path(name)).unwrap(),
            failing: AtomicBool::new(false),
        }
    }

    fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Wal("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AvailabilityStore for FlakyStore {
    async fn find_date_record(&self, date: NaiveDate) -> StoreResult<Option<DateRecord>> {
        self.check()?;
        self.inner.find_date_record(date).await
    }

    async fn upsert_date_record(&self, date: NaiveDate) -> StoreResult<DateRecord> {
        self.check()?;
        self.inner.upsert_date_record(date).await
    }

    async fn list_date_records(&self) -> StoreResult<Vec<DateRecord>> {
        self.check()?;
        self.inner.list_date_records().await
    }

    async fn list_service_slots(&self, query: &ServiceSlotQuery) -> StoreResult<Vec<ServiceSlot>> {
        self.check()?;
        self.inner.list_service_slots(query).await
    }

    async fn has_service_slots(&self, service_id: ServiceId) -> StoreResult<bool> {
        self.check()?;
        self.inner.has_service_slots(service_id).await
    }

    async fn list_general_slots(&self, date_record_id: Ulid, available_only: bool) -> StoreResult<Vec<GeneralSlot>> {
        self.check()?;
        self.inner.list_general_slots(date_record_id, available_only).await
    }

    async fn insert_service_slot(
        &self,
        service_id: ServiceId,
        date_record_id: Ulid,
        time: NaiveTime,
    ) -> StoreResult<ServiceSlot> {
        self.check()?;
        self.inner.insert_service_slot(service_id, date_record_id, time).await
    }

    async fn delete_service_slot(&self, id: Ulid) -> StoreResult<()> {
        self.check()?;
        self.inner.delete_service_slot(id).await
    }

    async fn set_service_slot_available(&self, id: Ulid, available: bool, expected: Option<bool>) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_service_slot_available(id, available, expected).await
    }

    async fn insert_general_slot(&self, date_record_id: Ulid, time: NaiveTime) -> StoreResult<GeneralSlot> {
        self.check()?;
        self.inner.insert_general_slot(date_record_id, time).await
    }

    async fn delete_general_slot(&self, id: Ulid) -> StoreResult<()> {
        self.check()?;
        self.inner.delete_general_slot(id).await
    }

    async fn set_general_slot_available(&self, id: Ulid, available: bool, expected: Option<bool>) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_general_slot_available(id, available, expected).await
    }

    async fn insert_appointment(&self, new: NewAppointment) -> StoreResult<Appointment> {
        self.check()?;
        self.inner.insert_appointment(new).await
    }

    async fn get_appointment(&self, id: Ulid) -> StoreResult<Option<Appointment>> {
        self.check()?;
        self.inner.get_appointment(id).await
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        self.check()?;
        self.inner.list_appointments(filter).await
    }

    async fn set_appointment_status(&self, id: Ulid, status: AppointmentStatus) -> StoreResult<Appointment> {
        self.check()?;
        self.inner.set_appointment_status(id, status).await
    }

    async fn set_appointment_claim(&self, id: Ulid, claim: SlotClaim) -> StoreResult<Appointment> {
        self.check()?;
        self.inner.set_appointment_claim(id, claim).await
    }

    async fn claim_slot(&self, appointment_id: Ulid, slot: SlotRef) -> StoreResult<bool> {
        self.check()?;
        self.inner.claim_slot(appointment_id, slot).await
    }
}

#[tokio::test]
async fn reads_degrade_when_store_fails() {
    let engine = Engine::new(FlakyStore::new("flaky_reads.wal"));
    let configured = Ulid::new();
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.add_service_slot(configured, d(20), t(10)).await.unwrap();
    engine.store().fail();

    let unconfigured = Ulid::new();
    assert!(engine.slots_for(unconfigured, d(20)).await.is_empty());
    assert!(engine.dates_for(unconfigured, d(TODAY)).await.is_empty());
    assert!(!engine.has_configuration(unconfigured).await);
    assert_eq!(engine.suggest(unconfigured, d(TODAY)).await, Suggestion::NotConfigured);

    // Tier is cached; only the scan fails.
    assert_eq!(engine.suggest(configured, d(TODAY)).await, Suggestion::PickADate);
    assert!(engine.dates_for(configured, d(TODAY)).await.is_empty());
}

#[tokio::test]
async fn writes_fail_loudly_when_store_fails() {
    let engine = Engine::new(FlakyStore::new("flaky_writes.wal"));
    engine.add_general_slot(d(20), t(9)).await.unwrap();
    engine.store().fail();

    let err = engine
        .book(BookingRequest::new("Ana", Ulid::new(), d(20), t(9)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Storage(StoreError::Wal(_))));
    assert!(matches!(
        engine.add_general_slot(d(21), t(9)).await,
        Err(EngineError::Storage(_))
    ));
    assert!(matches!(engine.reconcile_stale().await, Err(EngineError::Storage(_))));
}

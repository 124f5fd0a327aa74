use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::wal::Wal;

use super::{AppointmentFilter, AvailabilityStore, ServiceSlotQuery, StoreError, StoreResult};

type SharedDayState = Arc<RwLock<DayState>>;

/// Key of the active-appointment uniqueness rule.
type SlotKey = (ServiceId, NaiveDate, NaiveTime);

/// Both slot tables of one date record.
#[derive(Debug, Clone)]
struct DayState {
    record: DateRecord,
    /// Sorted by time, one row per time.
    general: Vec<GeneralSlot>,
    /// Sorted by time, one row per (service, time).
    service: Vec<ServiceSlot>,
}

impl DayState {
    fn new(record: DateRecord) -> Self {
        Self {
            record,
            general: Vec::new(),
            service: Vec::new(),
        }
    }

    fn slot_count(&self) -> usize {
        self.general.len() + self.service.len()
    }

    fn general_at(&self, time: NaiveTime) -> Option<&GeneralSlot> {
        self.general.iter().find(|s| s.time == time)
    }

    fn service_at(&self, service_id: ServiceId, time: NaiveTime) -> Option<&ServiceSlot> {
        self.service
            .iter()
            .find(|s| s.service_id == service_id && s.time == time)
    }

    fn insert_general(&mut self, slot: GeneralSlot) {
        let pos = self.general.partition_point(|s| s.time <= slot.time);
        self.general.insert(pos, slot);
    }

    fn insert_service(&mut self, slot: ServiceSlot) {
        let pos = self.service.partition_point(|s| s.time <= slot.time);
        self.service.insert(pos, slot);
    }

    fn remove_general(&mut self, id: Ulid) -> Option<GeneralSlot> {
        let pos = self.general.iter().position(|s| s.id == id)?;
        Some(self.general.remove(pos))
    }

    fn remove_service(&mut self, id: Ulid) -> Option<ServiceSlot> {
        let pos = self.service.iter().position(|s| s.id == id)?;
        Some(self.service.remove(pos))
    }

    /// Current flag of a slot row, `None` if the row is gone.
    fn available(&self, slot: SlotRef) -> Option<bool> {
        match slot {
            SlotRef::Service { id, .. } => self.service.iter().find(|s| s.id == id).map(|s| s.available),
            SlotRef::General { id, .. } => self.general.iter().find(|s| s.id == id).map(|s| s.available),
        }
    }

    fn set_available(&mut self, slot: SlotRef, available: bool) {
        match slot {
            SlotRef::Service { id, .. } => {
                if let Some(s) = self.service.iter_mut().find(|s| s.id == id) {
                    s.available = available;
                }
            }
            SlotRef::General { id, .. } => {
                if let Some(s) = self.general.iter_mut().find(|s| s.id == id) {
                    s.available = available;
                }
            }
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        // A compaction queued behind the batch must see it on disk first.
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-buffered bytes never join the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory slot tables and appointments, made durable by an event log.
///
/// Lock order: `catalog_lock`, then day locks (ascending date), then
/// `appointment_lock`. Every write appends its event before applying it.
pub struct WalStore {
    wal_tx: mpsc::Sender<WalCommand>,
    dates: DashMap<NaiveDate, DateRecord>,
    days: DashMap<Ulid, SharedDayState>,
    /// Reverse lookup: slot id → date record id.
    slot_to_day: DashMap<Ulid, Ulid>,
    service_slot_counts: DashMap<ServiceId, usize>,
    appointments: DashMap<Ulid, Appointment>,
    active_index: DashMap<SlotKey, Ulid>,
    catalog_lock: Mutex<()>,
    appointment_lock: Mutex<()>,
}

impl WalStore {
    /// Replay the log at `path` and start its writer task. Needs a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            wal_tx,
            dates: DashMap::new(),
            days: DashMap::new(),
            slot_to_day: DashMap::new(),
            service_slot_counts: DashMap::new(),
            appointments: DashMap::new(),
            active_index: DashMap::new(),
            catalog_lock: Mutex::new(()),
            appointment_lock: Mutex::new(()),
        };

        // Replay into plain tables; nobody else can see them yet.
        let mut days: HashMap<Ulid, DayState> = HashMap::new();
        for event in &events {
            match event {
                Event::DateRecordCreated { id, date } => {
                    let record = DateRecord { id: *id, date: *date };
                    store.dates.insert(*date, record);
                    days.insert(*id, DayState::new(record));
                }
                other => {
                    if let Some(dr) = event_date_record(other)
                        && let Some(day) = days.get_mut(&dr)
                    {
                        store.apply_day(day, other);
                    }
                    store.apply_appointment(other);
                }
            }
        }
        for (id, day) in days {
            store.days.insert(id, Arc::new(RwLock::new(day)));
        }

        info!(
            events = events.len(),
            days = store.days.len(),
            appointments = store.appointments.len(),
            "store replayed {}",
            path.display()
        );
        Ok(store)
    }

    async fn wal_append(&self, event: &Event) -> StoreResult<()> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// WAL-append + apply for a slot-table event. Caller holds the day's write lock.
    async fn persist_day(&self, day: &mut DayState, event: &Event) -> StoreResult<()> {
        self.wal_append(event).await?;
        self.apply_day(day, event);
        Ok(())
    }

    /// WAL-append + apply for an appointment event. Caller holds `appointment_lock`.
    async fn persist_appointment(&self, event: &Event) -> StoreResult<()> {
        self.wal_append(event).await?;
        self.apply_appointment(event);
        Ok(())
    }

    fn apply_day(&self, day: &mut DayState, event: &Event) {
        match event {
            Event::GeneralSlotInserted {
                id,
                date_record_id,
                time,
                available,
            } => {
                day.insert_general(GeneralSlot {
                    id: *id,
                    date_record_id: *date_record_id,
                    date: day.record.date,
                    time: *time,
                    available: *available,
                });
                self.slot_to_day.insert(*id, *date_record_id);
            }
            Event::GeneralSlotDeleted { id, .. } => {
                day.remove_general(*id);
                self.slot_to_day.remove(id);
            }
            Event::GeneralSlotAvailabilitySet {
                id,
                date_record_id,
                available,
            } => day.set_available(
                SlotRef::General {
                    id: *id,
                    date_record_id: *date_record_id,
                },
                *available,
            ),
            Event::ServiceSlotInserted {
                id,
                service_id,
                date_record_id,
                time,
                available,
            } => {
                day.insert_service(ServiceSlot {
                    id: *id,
                    service_id: *service_id,
                    date_record_id: *date_record_id,
                    date: day.record.date,
                    time: *time,
                    available: *available,
                });
                self.slot_to_day.insert(*id, *date_record_id);
                *self.service_slot_counts.entry(*service_id).or_default() += 1;
            }
            Event::ServiceSlotDeleted { id, .. } => {
                if let Some(removed) = day.remove_service(*id)
                    && let Some(mut count) = self.service_slot_counts.get_mut(&removed.service_id)
                {
                    *count = count.saturating_sub(1);
                }
                self.slot_to_day.remove(id);
            }
            Event::ServiceSlotAvailabilitySet {
                id,
                date_record_id,
                available,
            } => day.set_available(
                SlotRef::Service {
                    id: *id,
                    date_record_id: *date_record_id,
                },
                *available,
            ),
            Event::SlotClaimed { slot, .. } => day.set_available(*slot, false),
            _ => {}
        }
    }

    fn apply_appointment(&self, event: &Event) {
        match event {
            Event::AppointmentCreated {
                id,
                client_name,
                service_id,
                date,
                time,
                status,
                claim,
            } => {
                if status.is_active() {
                    self.active_index.insert((*service_id, *date, *time), *id);
                }
                self.appointments.insert(
                    *id,
                    Appointment {
                        id: *id,
                        client_name: client_name.clone(),
                        service_id: *service_id,
                        date: *date,
                        time: *time,
                        status: *status,
                        claim: *claim,
                    },
                );
            }
            Event::AppointmentStatusSet { id, status } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    a.status = *status;
                    if !status.is_active() {
                        self.active_index
                            .remove_if(&(a.service_id, a.date, a.time), |_, holder| holder == id);
                    }
                }
            }
            Event::AppointmentClaimSet { id, claim } => {
                if let Some(mut a) = self.appointments.get_mut(id) {
                    a.claim = *claim;
                }
            }
            Event::SlotClaimed { appointment_id, slot } => {
                if let Some(mut a) = self.appointments.get_mut(appointment_id) {
                    a.claim = SlotClaim::Held(*slot);
                }
            }
            _ => {}
        }
    }

    fn day(&self, date_record_id: Ulid) -> StoreResult<SharedDayState> {
        self.days
            .get(&date_record_id)
            .map(|e| e.value().clone())
            .ok_or(StoreError::NotFound(date_record_id))
    }

    /// Lookup slot → day, acquire the day's write lock.
    async fn resolve_slot_write(&self, slot_id: Ulid) -> StoreResult<(Ulid, OwnedRwLockWriteGuard<DayState>)> {
        let date_record_id = self
            .slot_to_day
            .get(&slot_id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(slot_id))?;
        let guard = self.day(date_record_id)?.write_owned().await;
        Ok((date_record_id, guard))
    }

    /// Days with `date >= from`, ascending by date.
    fn days_from(&self, from: Option<NaiveDate>) -> Vec<SharedDayState> {
        let mut records: Vec<DateRecord> = self
            .dates
            .iter()
            .map(|e| *e.value())
            .filter(|r| from.is_none_or(|d| r.date >= d))
            .collect();
        records.sort_by_key(|r| r.date);
        records
            .iter()
            .filter_map(|r| self.days.get(&r.id).map(|e| e.value().clone()))
            .collect()
    }

    async fn set_slot_available(&self, slot: SlotRef, available: bool, expected: Option<bool>) -> StoreResult<bool> {
        let (_, mut guard) = self.resolve_slot_write(slot.id()).await?;
        let current = guard.available(slot).ok_or(StoreError::NotFound(slot.id()))?;
        if expected.is_some_and(|e| e != current) {
            return Ok(false);
        }
        let event = match slot {
            SlotRef::Service { id, date_record_id } => Event::ServiceSlotAvailabilitySet {
                id,
                date_record_id,
                available,
            },
            SlotRef::General { id, date_record_id } => Event::GeneralSlotAvailabilitySet {
                id,
                date_record_id,
                available,
            },
        };
        self.persist_day(&mut guard, &event).await?;
        Ok(true)
    }

    async fn update_appointment(&self, id: Ulid, event: Event) -> StoreResult<Appointment> {
        let _guard = self.appointment_lock.lock().await;
        if !self.appointments.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_appointment(&event).await?;
        self.appointments
            .get(&id)
            .map(|a| a.clone())
            .ok_or(StoreError::NotFound(id))
    }

    /// Rewrite the log with only the events that recreate the current tables.
    pub async fn compact(&self) -> StoreResult<()> {
        let _catalog = self.catalog_lock.lock().await;
        let mut records: Vec<DateRecord> = self.dates.iter().map(|e| *e.value()).collect();
        records.sort_by_key(|r| r.date);

        let mut guards = Vec::with_capacity(records.len());
        for record in &records {
            guards.push(self.day(record.id)?.read_owned().await);
        }
        let _appointments = self.appointment_lock.lock().await;

        let mut events = Vec::new();
        for day in &guards {
            events.push(Event::DateRecordCreated {
                id: day.record.id,
                date: day.record.date,
            });
            for s in &day.general {
                events.push(Event::GeneralSlotInserted {
                    id: s.id,
                    date_record_id: s.date_record_id,
                    time: s.time,
                    available: s.available,
                });
            }
            for s in &day.service {
                events.push(Event::ServiceSlotInserted {
                    id: s.id,
                    service_id: s.service_id,
                    date_record_id: s.date_record_id,
                    time: s.time,
                    available: s.available,
                });
            }
        }
        let mut appointments: Vec<Appointment> = self.appointments.iter().map(|e| e.value().clone()).collect();
        appointments.sort_by_key(|a| a.id);
        events.extend(appointments.into_iter().map(|a| Event::AppointmentCreated {
            id: a.id,
            client_name: a.client_name,
            service_id: a.service_id,
            date: a.date,
            time: a.time,
            status: a.status,
            claim: a.claim,
        }));

        debug!(events = events.len(), "compacting WAL");
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// The date record a slot-table event belongs to.
fn event_date_record(event: &Event) -> Option<Ulid> {
    match event {
        Event::GeneralSlotInserted { date_record_id, .. }
        | Event::GeneralSlotDeleted { date_record_id, .. }
        | Event::GeneralSlotAvailabilitySet { date_record_id, .. }
        | Event::ServiceSlotInserted { date_record_id, .. }
        | Event::ServiceSlotDeleted { date_record_id, .. }
        | Event::ServiceSlotAvailabilitySet { date_record_id, .. } => Some(*date_record_id),
        Event::SlotClaimed { slot, .. } => Some(slot.date_record_id()),
        Event::DateRecordCreated { .. }
        | Event::AppointmentCreated { .. }
        | Event::AppointmentStatusSet { .. }
        | Event::AppointmentClaimSet { .. } => None,
    }
}

#[async_trait]
impl AvailabilityStore for WalStore {
    async fn find_date_record(&self, date: NaiveDate) -> StoreResult<Option<DateRecord>> {
        Ok(self.dates.get(&date).map(|e| *e.value()))
    }

    async fn upsert_date_record(&self, date: NaiveDate) -> StoreResult<DateRecord> {
        if let Some(record) = self.dates.get(&date).map(|e| *e.value()) {
            return Ok(record);
        }
        let _guard = self.catalog_lock.lock().await;
        if let Some(record) = self.dates.get(&date).map(|e| *e.value()) {
            return Ok(record);
        }
        if self.dates.len() >= MAX_DATE_RECORDS {
            return Err(StoreError::LimitExceeded("too many date records"));
        }

        let record = DateRecord { id: Ulid::new(), date };
        self.wal_append(&Event::DateRecordCreated { id: record.id, date }).await?;
        self.days.insert(record.id, Arc::new(RwLock::new(DayState::new(record))));
        self.dates.insert(date, record);
        Ok(record)
    }

    async fn list_date_records(&self) -> StoreResult<Vec<DateRecord>> {
        let mut records: Vec<DateRecord> = self.dates.iter().map(|e| *e.value()).collect();
        records.sort_by_key(|r| r.date);
        Ok(records)
    }

    async fn list_service_slots(&self, query: &ServiceSlotQuery) -> StoreResult<Vec<ServiceSlot>> {
        let days = match query.date_record_id {
            Some(id) => match self.days.get(&id) {
                Some(day) => vec![day.value().clone()],
                None => return Ok(Vec::new()),
            },
            None => self.days_from(query.from_date),
        };

        let mut rows = Vec::new();
        for day in days {
            let guard = day.read().await;
            for slot in guard.service.iter().filter(|s| query.matches(s)) {
                if query.limit.is_some_and(|n| rows.len() >= n) {
                    return Ok(rows);
                }
                rows.push(slot.clone());
            }
        }
        Ok(rows)
    }

    async fn has_service_slots(&self, service_id: ServiceId) -> StoreResult<bool> {
        Ok(self
            .service_slot_counts
            .get(&service_id)
            .is_some_and(|count| *count > 0))
    }

    async fn list_general_slots(&self, date_record_id: Ulid, available_only: bool) -> StoreResult<Vec<GeneralSlot>> {
        let Some(day) = self.days.get(&date_record_id).map(|e| e.value().clone()) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard
            .general
            .iter()
            .filter(|s| !available_only || s.available)
            .cloned()
            .collect())
    }

    async fn insert_service_slot(
        &self,
        service_id: ServiceId,
        date_record_id: Ulid,
        time: NaiveTime,
    ) -> StoreResult<ServiceSlot> {
        let mut guard = self.day(date_record_id)?.write_owned().await;
        if guard.service_at(service_id, time).is_some() {
            return Err(StoreError::Conflict("service slot already exists"));
        }
        if guard.slot_count() >= MAX_SLOTS_PER_DAY {
            return Err(StoreError::LimitExceeded("too many slots on day"));
        }

        let slot = ServiceSlot {
            id: Ulid::new(),
            service_id,
            date_record_id,
            date: guard.record.date,
            time,
            available: true,
        };
        let event = Event::ServiceSlotInserted {
            id: slot.id,
            service_id,
            date_record_id,
            time,
            available: true,
        };
        self.persist_day(&mut guard, &event).await?;
        Ok(slot)
    }

    async fn delete_service_slot(&self, id: Ulid) -> StoreResult<()> {
        let (date_record_id, mut guard) = self.resolve_slot_write(id).await?;
        if !guard.service.iter().any(|s| s.id == id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_day(&mut guard, &Event::ServiceSlotDeleted { id, date_record_id })
            .await
    }

    async fn set_service_slot_available(&self, id: Ulid, available: bool, expected: Option<bool>) -> StoreResult<bool> {
        let date_record_id = self
            .slot_to_day
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        self.set_slot_available(SlotRef::Service { id, date_record_id }, available, expected)
            .await
    }

    async fn insert_general_slot(&self, date_record_id: Ulid, time: NaiveTime) -> StoreResult<GeneralSlot> {
        let mut guard = self.day(date_record_id)?.write_owned().await;
        if guard.general_at(time).is_some() {
            return Err(StoreError::Conflict("general slot already exists"));
        }
        if guard.slot_count() >= MAX_SLOTS_PER_DAY {
            return Err(StoreError::LimitExceeded("too many slots on day"));
        }

        let slot = GeneralSlot {
            id: Ulid::new(),
            date_record_id,
            date: guard.record.date,
            time,
            available: true,
        };
        let event = Event::GeneralSlotInserted {
            id: slot.id,
            date_record_id,
            time,
            available: true,
        };
        self.persist_day(&mut guard, &event).await?;
        Ok(slot)
    }

    async fn delete_general_slot(&self, id: Ulid) -> StoreResult<()> {
        let (date_record_id, mut guard) = self.resolve_slot_write(id).await?;
        if !guard.general.iter().any(|s| s.id == id) {
            return Err(StoreError::NotFound(id));
        }
        self.persist_day(&mut guard, &Event::GeneralSlotDeleted { id, date_record_id })
            .await
    }

    async fn set_general_slot_available(&self, id: Ulid, available: bool, expected: Option<bool>) -> StoreResult<bool> {
        let date_record_id = self
            .slot_to_day
            .get(&id)
            .map(|e| *e.value())
            .ok_or(StoreError::NotFound(id))?;
        self.set_slot_available(SlotRef::General { id, date_record_id }, available, expected)
            .await
    }

    async fn insert_appointment(&self, new: NewAppointment) -> StoreResult<Appointment> {
        let _guard = self.appointment_lock.lock().await;
        if self.appointments.len() >= MAX_APPOINTMENTS {
            return Err(StoreError::LimitExceeded("too many appointments"));
        }
        if self.active_index.contains_key(&(new.service_id, new.date, new.time)) {
            return Err(StoreError::Conflict("slot already has an active appointment"));
        }

        let appointment = Appointment {
            id: Ulid::new(),
            client_name: new.client_name,
            service_id: new.service_id,
            date: new.date,
            time: new.time,
            status: AppointmentStatus::Pending,
            claim: SlotClaim::Pending,
        };
        let event = Event::AppointmentCreated {
            id: appointment.id,
            client_name: appointment.client_name.clone(),
            service_id: appointment.service_id,
            date: appointment.date,
            time: appointment.time,
            status: appointment.status,
            claim: appointment.claim,
        };
        self.persist_appointment(&event).await?;
        Ok(appointment)
    }

    async fn get_appointment(&self, id: Ulid) -> StoreResult<Option<Appointment>> {
        Ok(self.appointments.get(&id).map(|a| a.clone()))
    }

    async fn list_appointments(&self, filter: &AppointmentFilter) -> StoreResult<Vec<Appointment>> {
        let mut found: Vec<Appointment> = self
            .appointments
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        found.sort_by(|a, b| (a.date, a.time, a.id).cmp(&(b.date, b.time, b.id)));
        if let Some(n) = filter.limit {
            found.truncate(n);
        }
        Ok(found)
    }

    async fn set_appointment_status(&self, id: Ulid, status: AppointmentStatus) -> StoreResult<Appointment> {
        self.update_appointment(id, Event::AppointmentStatusSet { id, status })
            .await
    }

    async fn set_appointment_claim(&self, id: Ulid, claim: SlotClaim) -> StoreResult<Appointment> {
        self.update_appointment(id, Event::AppointmentClaimSet { id, claim })
            .await
    }

    async fn claim_slot(&self, appointment_id: Ulid, slot: SlotRef) -> StoreResult<bool> {
        let mut day = self.day(slot.date_record_id())?.write_owned().await;
        let _guard = self.appointment_lock.lock().await;
        if !self.appointments.contains_key(&appointment_id) {
            return Err(StoreError::NotFound(appointment_id));
        }
        match day.available(slot) {
            None => return Err(StoreError::NotFound(slot.id())),
            Some(false) => return Ok(false),
            Some(true) => {}
        }

        let event = Event::SlotClaimed { appointment_id, slot };
        self.wal_append(&event).await?;
        self.apply_day(&mut day, &event);
        self.apply_appointment(&event);
        Ok(true)
    }
}

//! In-memory collaborators for exercising the engine without Postgres,
//! Redis or FCM.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc, Weekday};
use tokio::sync::Mutex;
use wakeup_common::{AppError, AppResult};
use wakeup_db::entities::alarm_occurrence::DeactivateType;
use wakeup_db::entities::{alarm, alarm_occurrence, alarm_off_log, member};

use crate::services::clock::Clock;
use crate::services::device_token::DeviceTokenStore;
use crate::services::occurrence_store::OccurrenceStore;
use crate::services::push_gateway::{BatchResponse, MulticastMessage, PushGateway, SendResponse};

/// Clock pinned to a settable instant.
#[derive(Debug)]
pub struct FixedClock {
    micros: AtomicI64,
}

impl FixedClock {
    #[must_use]
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            micros: AtomicI64::new(now.and_utc().timestamp_micros()),
        }
    }

    #[must_use]
    pub fn at(date: NaiveDate, hour: u32, minute: u32) -> Self {
        Self::new(date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)))
    }

    pub fn set(&self, now: NaiveDateTime) {
        self.micros
            .store(now.and_utc().timestamp_micros(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst))
            .map(|dt| dt.naive_utc())
            .unwrap_or_default()
    }
}

/// Build an alarm owned by `member_id` ringing at `hour:minute`.
#[must_use]
pub fn test_alarm(id: &str, member_id: &str, repeat_days: &str, hour: u32, minute: u32) -> alarm::Model {
    alarm::Model {
        id: id.to_string(),
        member_id: member_id.to_string(),
        purpose: "출근".to_string(),
        time: NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN),
        repeat_days: repeat_days.to_string(),
        sound_type: "DEFAULT".to_string(),
        latitude: 37.5665,
        longitude: 126.978,
        address: "서울특별시 중구 세종대로 110".to_string(),
        created_at: Utc::now().into(),
    }
}

#[must_use]
pub fn test_member(id: &str) -> member::Model {
    member::Model {
        id: id.to_string(),
        nickname: format!("member-{id}"),
        created_at: Utc::now().into(),
    }
}

#[derive(Default)]
struct StoreState {
    members: HashMap<String, member::Model>,
    alarms: Vec<alarm::Model>,
    occurrences: Vec<alarm_occurrence::Model>,
    off_logs: Vec<alarm_off_log::Model>,
    /// Remaining forced insert failures per alarm id.
    failing_inserts: HashMap<String, u32>,
    /// Row that appears right after the next occurrence lookup misses.
    racing_insert: Option<alarm_occurrence::Model>,
    fail_turn_off: bool,
    /// Marker a concurrent request applies just before the next OFF write.
    concurrent_deactivation: Option<DeactivateType>,
    next_id: u64,
}

/// [`OccurrenceStore`] kept in memory, with hooks for injecting failures.
#[derive(Default)]
pub struct InMemoryOccurrenceStore {
    state: Mutex<StoreState>,
}

impl InMemoryOccurrenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_member(&self, member: member::Model) {
        self.state.lock().await.members.insert(member.id.clone(), member);
    }

    pub async fn add_alarm(&self, alarm: alarm::Model) {
        self.state.lock().await.alarms.push(alarm);
    }

    pub async fn add_occurrence(&self, occurrence: alarm_occurrence::Model) {
        self.state.lock().await.occurrences.push(occurrence);
    }

    pub async fn add_off_log(&self, alarm_id: &str, member_id: &str, at: NaiveDateTime) {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("log-{}", state.next_id);
        state.off_logs.push(alarm_off_log::Model {
            id,
            alarm_id: alarm_id.to_string(),
            member_id: member_id.to_string(),
            created_at: at,
        });
    }

    /// Make the next `times` inserts for `alarm_id` fail with a database error.
    pub async fn fail_inserts(&self, alarm_id: &str, times: u32) {
        self.state
            .lock()
            .await
            .failing_inserts
            .insert(alarm_id.to_string(), times);
    }

    /// Make every OFF transition fail with a database error.
    pub async fn fail_turn_off(&self) {
        self.state.lock().await.fail_turn_off = true;
    }

    /// Let a concurrent request deactivate the target with `marker` after
    /// the caller has read it but before its OFF write runs.
    pub async fn deactivate_before_next_turn_off(&self, marker: DeactivateType) {
        self.state.lock().await.concurrent_deactivation = Some(marker);
    }

    /// Insert `occurrence` as if by a concurrent writer, right after the
    /// next lookup for its (alarm, date) comes back empty.
    pub async fn race_insert_on_next_lookup(&self, occurrence: alarm_occurrence::Model) {
        self.state.lock().await.racing_insert = Some(occurrence);
    }

    pub async fn occurrences(&self) -> Vec<alarm_occurrence::Model> {
        self.state.lock().await.occurrences.clone()
    }

    pub async fn off_logs(&self) -> Vec<alarm_off_log::Model> {
        self.state.lock().await.off_logs.clone()
    }
}

#[async_trait]
impl OccurrenceStore for InMemoryOccurrenceStore {
    async fn find_member(&self, member_id: &str) -> AppResult<Option<member::Model>> {
        Ok(self.state.lock().await.members.get(member_id).cloned())
    }

    async fn find_alarm(&self, alarm_id: &str) -> AppResult<Option<alarm::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .alarms
            .iter()
            .find(|a| a.id == alarm_id)
            .cloned())
    }

    async fn find_alarms_by_ids(&self, alarm_ids: &[String]) -> AppResult<Vec<alarm::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .alarms
            .iter()
            .filter(|a| alarm_ids.contains(&a.id))
            .cloned()
            .collect())
    }

    async fn find_alarms_by_weekday(&self, day: Weekday) -> AppResult<Vec<alarm::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .alarms
            .iter()
            .filter(|a| a.repeat_weekdays().contains(&day))
            .cloned()
            .collect())
    }

    async fn find_alarm_ids_with_occurrence(&self, date: NaiveDate) -> AppResult<HashSet<String>> {
        Ok(self
            .state
            .lock()
            .await
            .occurrences
            .iter()
            .filter(|o| o.date == date)
            .map(|o| o.alarm_id.clone())
            .collect())
    }

    async fn find_occurrence(
        &self,
        alarm_id: &str,
        date: NaiveDate,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        let mut state = self.state.lock().await;
        let found = state
            .occurrences
            .iter()
            .find(|o| o.alarm_id == alarm_id && o.date == date)
            .cloned();

        if found.is_none() {
            let racing = state
                .racing_insert
                .take_if(|o| o.alarm_id == alarm_id && o.date == date);
            if let Some(racing) = racing {
                state.occurrences.push(racing);
            }
        }
        Ok(found)
    }

    async fn insert_occurrence_if_absent(
        &self,
        occurrence: alarm_occurrence::Model,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        let mut state = self.state.lock().await;

        if let Some(remaining) = state.failing_inserts.get_mut(&occurrence.alarm_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::Database(format!(
                    "insert failed for alarm {}",
                    occurrence.alarm_id
                )));
            }
        }

        let exists = state
            .occurrences
            .iter()
            .any(|o| o.alarm_id == occurrence.alarm_id && o.date == occurrence.date);
        if exists {
            return Ok(None);
        }

        state.occurrences.push(occurrence.clone());
        Ok(Some(occurrence))
    }

    async fn find_latest_deactivated(
        &self,
        alarm_id: &str,
    ) -> AppResult<Option<alarm_occurrence::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .occurrences
            .iter()
            .filter(|o| o.alarm_id == alarm_id && o.deactivate_type != DeactivateType::None)
            .max_by_key(|o| (o.date, o.time))
            .cloned())
    }

    async fn find_ring_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .occurrences
            .iter()
            .filter(|o| {
                o.date == date
                    && o.time >= from
                    && o.time <= to
                    && o.deactivate_type == DeactivateType::None
                    && !o.is_ringing
            })
            .cloned()
            .collect())
    }

    async fn mark_ringing(&self, occurrence_id: &str) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state
            .occurrences
            .iter_mut()
            .find(|o| o.id == occurrence_id && !o.is_ringing)
        {
            Some(o) => {
                o.is_ringing = true;
                o.ring_count += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_pre_alert_candidates(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
    ) -> AppResult<Vec<alarm_occurrence::Model>> {
        Ok(self
            .state
            .lock()
            .await
            .occurrences
            .iter()
            .filter(|o| {
                o.date == date
                    && o.time >= from
                    && o.time < to
                    && o.deactivate_type == DeactivateType::None
                    && o.pre_alert_sent_at.is_none()
            })
            .cloned()
            .collect())
    }

    async fn mark_pre_alert_sent(&self, occurrence_ids: &[String], at: NaiveDateTime) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for o in state
            .occurrences
            .iter_mut()
            .filter(|o| occurrence_ids.contains(&o.id))
        {
            o.pre_alert_sent_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn count_off_logs(
        &self,
        alarm_id: &str,
        member_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> AppResult<u64> {
        Ok(self
            .state
            .lock()
            .await
            .off_logs
            .iter()
            .filter(|l| {
                l.alarm_id == alarm_id
                    && l.member_id == member_id
                    && l.created_at >= from
                    && l.created_at < to
            })
            .count() as u64)
    }

    async fn turn_off(
        &self,
        target: alarm_occurrence::Model,
        member_id: &str,
        at: NaiveDateTime,
    ) -> AppResult<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.fail_turn_off {
            return Err(AppError::Database("turn off failed".to_string()));
        }

        let index = match state
            .occurrences
            .iter()
            .position(|o| o.alarm_id == target.alarm_id && o.date == target.date)
        {
            Some(index) => index,
            None => {
                state.occurrences.push(target.clone());
                state.occurrences.len() - 1
            }
        };
        let occurrence = &mut state.occurrences[index];

        if let Some(marker) = state.concurrent_deactivation.take() {
            occurrence.deactivate_type = marker;
            occurrence.deactivated_at = Some(at);
        }
        if occurrence.deactivate_type != DeactivateType::None {
            return Ok(false);
        }
        occurrence.deactivate_type = DeactivateType::Off;
        occurrence.deactivated_at = Some(at);

        state.next_id += 1;
        state.off_logs.push(alarm_off_log::Model {
            id: format!("log-{}", state.next_id),
            alarm_id: target.alarm_id,
            member_id: member_id.to_string(),
            created_at: at,
        });
        Ok(true)
    }
}

/// Device token store kept in memory.
#[derive(Default)]
pub struct InMemoryDeviceTokenStore {
    tokens: Mutex<HashMap<String, HashSet<String>>>,
    failing_members: Mutex<HashSet<String>>,
}

impl InMemoryDeviceTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, member_id: &str, address: &str) {
        self.tokens
            .lock()
            .await
            .entry(member_id.to_string())
            .or_default()
            .insert(address.to_string());
    }

    /// Make lookups for `member_id` fail.
    pub async fn fail_lookups_for(&self, member_id: &str) {
        self.failing_members.lock().await.insert(member_id.to_string());
    }

    pub async fn addresses_of(&self, member_id: &str) -> HashSet<String> {
        self.tokens
            .lock()
            .await
            .get(member_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceTokenStore for InMemoryDeviceTokenStore {
    async fn device_addresses(&self, member_id: &str) -> AppResult<HashSet<String>> {
        if self.failing_members.lock().await.contains(member_id) {
            return Err(AppError::Redis(format!("lookup failed for {member_id}")));
        }
        Ok(self.addresses_of(member_id).await)
    }

    async fn remove_address(&self, member_id: &str, address: &str) -> AppResult<()> {
        if let Some(set) = self.tokens.lock().await.get_mut(member_id) {
            set.remove(address);
        }
        Ok(())
    }
}

/// Push gateway that records every batch and answers from a script.
#[derive(Default)]
pub struct RecordingPushGateway {
    sent: Mutex<Vec<MulticastMessage>>,
    /// Failure code per token.
    token_failures: Mutex<HashMap<String, String>>,
    /// Zero-based batch indexes that fail as a whole.
    failing_batches: Mutex<HashSet<usize>>,
}

impl RecordingPushGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn fail_token(&self, token: &str, code: &str) {
        self.token_failures
            .lock()
            .await
            .insert(token.to_string(), code.to_string());
    }

    pub async fn fail_batch(&self, index: usize) {
        self.failing_batches.lock().await.insert(index);
    }

    pub async fn sent(&self) -> Vec<MulticastMessage> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PushGateway for RecordingPushGateway {
    async fn send_multicast(&self, message: &MulticastMessage) -> AppResult<BatchResponse> {
        let index = {
            let mut sent = self.sent.lock().await;
            sent.push(message.clone());
            sent.len() - 1
        };

        if self.failing_batches.lock().await.contains(&index) {
            return Err(AppError::Push(format!("batch {index} unavailable")));
        }

        let failures = self.token_failures.lock().await;
        let responses = message
            .tokens
            .iter()
            .map(|token| match failures.get(token) {
                Some(code) => SendResponse::failed(token, code, "scripted failure"),
                None => SendResponse::delivered(token, format!("projects/test/messages/{token}")),
            })
            .collect();

        Ok(BatchResponse { responses })
    }
}

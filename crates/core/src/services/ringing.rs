//! Periodic ringing check and pre-alert sweep.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use tracing::{debug, info, warn};
use wakeup_common::config::SchedulerSettings;
use wakeup_common::{AppResult, IdGenerator};
use wakeup_db::entities::alarm_occurrence;

use super::clock::Clock;
use super::device_token::DeviceTokenStore;
use super::notification_dispatcher::{
    DispatchReport, NotificationDispatcher, PreAlertTarget, RingingTarget,
};
use super::occurrence_store::{OccurrenceStore, new_occurrence};

/// Time windows used by the periodic jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingingWindows {
    /// How late an occurrence may still start ringing.
    pub grace: TimeDelta,
    /// How far ahead of the alarm the pre-alert goes out.
    pub pre_alert_lead: TimeDelta,
    /// Width of one pre-alert sweep; matches the sweep interval.
    pub pre_alert_window: TimeDelta,
}

impl From<&SchedulerSettings> for RingingWindows {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            grace: TimeDelta::seconds(settings.ringing_grace_secs as i64),
            pre_alert_lead: TimeDelta::minutes(settings.pre_alert_lead_minutes),
            pre_alert_window: TimeDelta::seconds(settings.pre_alert_interval_secs as i64),
        }
    }
}

#[derive(Clone)]
pub struct RingingService {
    store: Arc<dyn OccurrenceStore>,
    tokens: Arc<dyn DeviceTokenStore>,
    dispatcher: NotificationDispatcher,
    clock: Arc<dyn Clock>,
    windows: RingingWindows,
    id_gen: IdGenerator,
}

impl RingingService {
    #[must_use]
    pub fn new(
        store: Arc<dyn OccurrenceStore>,
        tokens: Arc<dyn DeviceTokenStore>,
        dispatcher: NotificationDispatcher,
        clock: Arc<dyn Clock>,
        windows: RingingWindows,
    ) -> Self {
        Self {
            store,
            tokens,
            dispatcher,
            clock,
            windows,
            id_gen: IdGenerator::new(),
        }
    }

    /// Start ringing every active occurrence whose time has come.
    ///
    /// Returns how many occurrences started ringing in this tick.
    pub async fn check_ringing(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let today = now.date();
        let from = (now - self.windows.grace).max(today.and_time(NaiveTime::MIN));

        let candidates = self
            .store
            .find_ring_candidates(today, from.time(), now.time())
            .await?;

        let mut rung = Vec::with_capacity(candidates.len());
        for occurrence in candidates {
            if self.store.mark_ringing(&occurrence.id).await? {
                rung.push(occurrence);
            }
        }
        if rung.is_empty() {
            return Ok(0);
        }

        let owners = self.owners_of(&rung).await?;
        let targets: Vec<RingingTarget> = rung
            .iter()
            .filter_map(|o| {
                owners.get(&o.alarm_id).map(|(member_id, _)| RingingTarget {
                    recipient_id: member_id.clone(),
                    alarm_id: o.alarm_id.clone(),
                })
            })
            .collect();

        let report = self.dispatcher.dispatch_ringing_alerts(&targets).await;
        self.purge_invalid(&report).await;

        info!(
            count = rung.len(),
            purged = report.invalid_addresses.len(),
            "Occurrences started ringing"
        );
        Ok(rung.len() as u64)
    }

    /// Send the ahead-of-time push for occurrences entering the lead window.
    ///
    /// Occurrences on a later date than today are not materialized yet, so
    /// the sweep creates the ones falling in its window before querying.
    /// Returns how many occurrences were marked as pre-alerted.
    pub async fn send_pre_alerts(&self) -> AppResult<u64> {
        let now = self.clock.now();
        let start = now + self.windows.pre_alert_lead;
        let end = start + self.windows.pre_alert_window;

        let mut candidates = Vec::new();
        for (date, from, to) in split_by_day(start, end) {
            if date > now.date() {
                self.create_upcoming(date, from, to, now).await?;
            }
            candidates.extend(self.store.find_pre_alert_candidates(date, from, to).await?);
        }
        if candidates.is_empty() {
            return Ok(0);
        }

        let owners = self.owners_of(&candidates).await?;
        let targets: Vec<PreAlertTarget> = candidates
            .iter()
            .filter_map(|o| {
                owners
                    .get(&o.alarm_id)
                    .map(|(member_id, address)| PreAlertTarget {
                        recipient_id: member_id.clone(),
                        occurrence_id: o.id.clone(),
                        address_text: address.clone(),
                    })
            })
            .collect();

        let report = self.dispatcher.dispatch_pre_alerts(&targets).await;

        let delivered: Vec<String> = report.success_occurrence_ids.iter().cloned().collect();
        let marked = self.store.mark_pre_alert_sent(&delivered, now).await?;
        self.purge_invalid(&report).await;

        info!(
            candidates = candidates.len(),
            marked,
            purged = report.invalid_addresses.len(),
            "Pre-alert sweep finished"
        );
        Ok(marked)
    }

    /// Create the occurrences of alarms repeating on `date` and timed in
    /// `[from, to)` that do not exist yet. A failing alarm is logged and
    /// skipped.
    async fn create_upcoming(
        &self,
        date: NaiveDate,
        from: NaiveTime,
        to: NaiveTime,
        now: NaiveDateTime,
    ) -> AppResult<()> {
        let alarms = self.store.find_alarms_by_weekday(date.weekday()).await?;
        for alarm in alarms.iter().filter(|a| a.time >= from && a.time < to) {
            let occurrence = new_occurrence(self.id_gen.generate(), alarm, date, now);
            match self.store.insert_occurrence_if_absent(occurrence).await {
                Ok(Some(_)) => debug!(alarm_id = %alarm.id, %date, "Created upcoming occurrence"),
                Ok(None) => {}
                Err(e) => warn!(alarm_id = %alarm.id, %date, error = %e, "Failed to create upcoming occurrence"),
            }
        }
        Ok(())
    }

    /// Drop every address the gateway reported as permanently dead.
    async fn purge_invalid(&self, report: &DispatchReport) {
        for invalid in &report.invalid_addresses {
            if let Err(e) = self
                .tokens
                .remove_address(&invalid.recipient_id, &invalid.address)
                .await
            {
                warn!(recipient_id = %invalid.recipient_id, error = %e, "Failed to purge invalid push address");
            }
        }
    }

    /// `(member_id, address)` of each alarm referenced by `occurrences`.
    async fn owners_of(
        &self,
        occurrences: &[alarm_occurrence::Model],
    ) -> AppResult<HashMap<String, (String, String)>> {
        let mut alarm_ids: Vec<String> = occurrences.iter().map(|o| o.alarm_id.clone()).collect();
        alarm_ids.sort();
        alarm_ids.dedup();

        let alarms = self.store.find_alarms_by_ids(&alarm_ids).await?;
        if alarms.len() < alarm_ids.len() {
            debug!(
                requested = alarm_ids.len(),
                found = alarms.len(),
                "Some alarms vanished before notification"
            );
        }

        Ok(alarms
            .into_iter()
            .map(|a| (a.id, (a.member_id, a.address)))
            .collect())
    }
}

/// Split `[start, end)` into per-date time ranges.
///
/// A range reaching past midnight ends at the last representable instant of
/// its first day.
fn split_by_day(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(NaiveDate, NaiveTime, NaiveTime)> {
    if end <= start {
        return Vec::new();
    }
    if start.date() == end.date() {
        return vec![(start.date(), start.time(), end.time())];
    }

    let end_of_day = NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999).unwrap_or(NaiveTime::MIN);
    let mut ranges = vec![(start.date(), start.time(), end_of_day)];
    if end.time() > NaiveTime::MIN {
        ranges.push((end.date(), NaiveTime::MIN, end.time()));
    }
    ranges
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::services::materializer::OccurrenceMaterializer;
    use crate::test_utils::{
        FixedClock, InMemoryDeviceTokenStore, InMemoryOccurrenceStore, RecordingPushGateway,
        test_alarm,
    };
    use wakeup_common::config::PushConfig;
    use wakeup_db::entities::alarm_occurrence::DeactivateType;

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryOccurrenceStore>,
        tokens: Arc<InMemoryDeviceTokenStore>,
        gateway: Arc<RecordingPushGateway>,
        service: RingingService,
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    async fn fixture(now: NaiveDateTime) -> Fixture {
        let store = Arc::new(InMemoryOccurrenceStore::new());
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        let clock = Arc::new(FixedClock::new(now));
        let dispatcher = NotificationDispatcher::new(
            tokens.clone(),
            gateway.clone(),
            &PushConfig {
                project_id: "wakeup-test".to_string(),
                access_token: "token".to_string(),
                access_token_file: None,
                endpoint: "http://localhost".to_string(),
                android_ttl_secs: 300,
                apns_expiration_secs: 300,
                timeout_secs: 5,
            },
        );
        let service = RingingService::new(
            store.clone(),
            tokens.clone(),
            dispatcher,
            clock.clone(),
            RingingWindows::from(&SchedulerSettings::default()),
        );
        Fixture {
            clock,
            store,
            tokens,
            gateway,
            service,
        }
    }

    async fn seed(fx: &Fixture, alarm_id: &str, member_id: &str, date: NaiveDate, hour: u32, minute: u32) -> String {
        let alarm = test_alarm(alarm_id, member_id, "MON,TUE,WED,THU,FRI,SAT,SUN", hour, minute);
        let occurrence = new_occurrence(format!("o-{alarm_id}-{date}"), &alarm, date, date.and_hms_opt(0, 0, 0).unwrap());
        let id = occurrence.id.clone();
        fx.store.add_alarm(alarm).await;
        fx.store.add_occurrence(occurrence).await;
        id
    }

    #[tokio::test]
    async fn test_check_ringing_marks_and_notifies_once() {
        let fx = fixture(day(5).and_hms_opt(7, 2, 0).unwrap()).await;
        fx.tokens.add("m1", "phone").await;
        seed(&fx, "due", "m1", day(5), 7, 0).await;
        seed(&fx, "later", "m1", day(5), 9, 0).await;
        seed(&fx, "stale", "m1", day(5), 6, 0).await;

        assert_eq!(fx.service.check_ringing().await.unwrap(), 1);
        assert_eq!(fx.service.check_ringing().await.unwrap(), 0);

        let occurrences = fx.store.occurrences().await;
        let due = occurrences.iter().find(|o| o.alarm_id == "due").unwrap();
        assert!(due.is_ringing);
        assert_eq!(due.ring_count, 1);
        assert!(occurrences.iter().filter(|o| o.alarm_id != "due").all(|o| !o.is_ringing));

        let sent = fx.gateway.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data["alarmId"], "due");
    }

    #[tokio::test]
    async fn test_check_ringing_skips_deactivated() {
        let fx = fixture(day(5).and_hms_opt(7, 0, 30).unwrap()).await;
        let alarm = test_alarm("a1", "m1", "WED", 7, 0);
        let mut o = new_occurrence("o1".into(), &alarm, day(5), day(5).and_hms_opt(0, 0, 0).unwrap());
        o.deactivate_type = DeactivateType::Off;
        fx.store.add_alarm(alarm).await;
        fx.store.add_occurrence(o).await;

        assert_eq!(fx.service.check_ringing().await.unwrap(), 0);
        assert!(fx.gateway.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_grace_window_does_not_reach_yesterday() {
        let fx = fixture(day(5).and_hms_opt(0, 1, 0).unwrap()).await;
        seed(&fx, "yesterday", "m1", day(4), 23, 59).await;

        assert_eq!(fx.service.check_ringing().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pre_alert_sweep_marks_delivered_and_purges_invalid() {
        let fx = fixture(day(5).and_hms_opt(6, 0, 0).unwrap()).await;
        fx.tokens.add("m1", "good").await;
        fx.tokens.add("m2", "dead").await;
        fx.gateway.fail_token("dead", "UNREGISTERED").await;
        let delivered = seed(&fx, "a1", "m1", day(5), 7, 0).await;
        let undelivered = seed(&fx, "a2", "m2", day(5), 7, 0).await;
        seed(&fx, "a3", "m1", day(5), 7, 1).await;

        assert_eq!(fx.service.send_pre_alerts().await.unwrap(), 1);

        let occurrences = fx.store.occurrences().await;
        let sent_at = |id: &str| {
            occurrences
                .iter()
                .find(|o| o.id == id)
                .and_then(|o| o.pre_alert_sent_at)
        };
        assert!(sent_at(&delivered).is_some());
        assert!(sent_at(&undelivered).is_none());
        assert!(fx.tokens.addresses_of("m2").await.is_empty());
        assert_eq!(fx.tokens.addresses_of("m1").await.len(), 1);

        // Already pre-alerted occurrences are not picked up again.
        assert_eq!(fx.service.send_pre_alerts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pre_alert_window_crosses_midnight() {
        let fx = fixture(day(4).and_hms_opt(23, 0, 30).unwrap()).await;
        fx.tokens.add("m1", "phone").await;
        seed(&fx, "late", "m1", day(4), 23, 59).await;
        // Tomorrow's row does not exist yet; the sweep has to create it.
        fx.store.add_alarm(test_alarm("midnight", "m1", "MON,TUE,WED,THU,FRI,SAT,SUN", 0, 0)).await;

        // Window is [00:00:30, 00:01:30) on the 5th.
        assert_eq!(fx.service.send_pre_alerts().await.unwrap(), 0);
        assert_eq!(fx.store.occurrences().await.len(), 1);

        // Window is [23:59:30 on the 4th, 00:00:30 on the 5th).
        fx.clock.set(day(4).and_hms_opt(22, 59, 30).unwrap());
        assert_eq!(fx.service.send_pre_alerts().await.unwrap(), 1);
        let marked: Vec<_> = fx
            .store
            .occurrences()
            .await
            .into_iter()
            .filter(|o| o.pre_alert_sent_at.is_some())
            .map(|o| (o.alarm_id, o.date))
            .collect();
        assert_eq!(marked, vec![("midnight".to_string(), day(5))]);
    }

    #[tokio::test]
    async fn test_early_alarm_pre_alerted_once_across_materialization() {
        let fx = fixture(day(4).and_hms_opt(0, 0, 0).unwrap()).await;
        fx.tokens.add("m1", "phone").await;
        fx.store.add_alarm(test_alarm("early", "m1", "MON,TUE,WED,THU,FRI,SAT,SUN", 0, 30)).await;
        let materializer = OccurrenceMaterializer::new(fx.store.clone(), fx.clock.clone());
        materializer.materialize_today().await.unwrap();

        let mut now = day(4).and_hms_opt(23, 0, 0).unwrap();
        while now <= day(5).and_hms_opt(0, 45, 0).unwrap() {
            fx.clock.set(now);
            if now.time() == NaiveTime::MIN {
                materializer.materialize_today().await.unwrap();
            }
            fx.service.send_pre_alerts().await.unwrap();
            now += TimeDelta::minutes(1);
        }

        assert_eq!(fx.gateway.sent().await.len(), 1);
        let occurrences = fx.store.occurrences().await;
        assert_eq!(occurrences.len(), 2);
        let tomorrow = occurrences.iter().find(|o| o.date == day(5)).unwrap();
        assert_eq!(tomorrow.pre_alert_sent_at, Some(day(4).and_hms_opt(23, 30, 0).unwrap()));
    }

    #[tokio::test]
    async fn test_upcoming_creation_failure_skips_alarm() {
        let fx = fixture(day(4).and_hms_opt(23, 30, 0).unwrap()).await;
        fx.tokens.add("m1", "phone").await;
        fx.store.add_alarm(test_alarm("broken", "m1", "MON,TUE,WED,THU,FRI,SAT,SUN", 0, 30)).await;
        fx.store.fail_inserts("broken", 1).await;

        assert_eq!(fx.service.send_pre_alerts().await.unwrap(), 0);
        assert!(fx.store.occurrences().await.is_empty());
    }

    #[tokio::test]
    async fn test_ringing_purges_invalid_addresses() {
        let fx = fixture(day(5).and_hms_opt(7, 0, 30).unwrap()).await;
        fx.tokens.add("m1", "dead").await;
        fx.tokens.add("m1", "phone").await;
        fx.gateway.fail_token("dead", "UNREGISTERED").await;
        seed(&fx, "a1", "m1", day(5), 7, 0).await;

        assert_eq!(fx.service.check_ringing().await.unwrap(), 1);

        let remaining = fx.tokens.addresses_of("m1").await;
        assert_eq!(remaining.len(), 1);
        assert!(remaining.contains("phone"));
    }

    #[test]
    fn test_split_by_day() {
        let start = day(4).and_hms_opt(23, 59, 30).unwrap();
        let end = day(5).and_hms_opt(0, 0, 30).unwrap();
        let ranges = split_by_day(start, end);

        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, day(4));
        assert_eq!(ranges[1], (day(5), NaiveTime::MIN, NaiveTime::from_hms_opt(0, 0, 30).unwrap()));

        let same_day = split_by_day(day(5).and_hms_opt(7, 0, 0).unwrap(), day(5).and_hms_opt(7, 1, 0).unwrap());
        assert_eq!(same_day.len(), 1);

        let to_midnight = split_by_day(start, day(5).and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(to_midnight.len(), 1);
    }
}

//! Push fan-out for ringing alarms and pre-alerts.
//!
//! Recipients are expanded into one row per device address, rows sharing a
//! payload are grouped, deduplicated by address and sent in multicast
//! batches. Partial failures never escape: callers get back which
//! occurrences reached at least one device and which addresses are dead.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use wakeup_common::config::PushConfig;

use super::device_token::DeviceTokenStore;
use super::push_gateway::{
    AndroidHints, ApnsHints, MulticastMessage, PushGateway, SendOutcome, is_invalid_token_code,
};

/// Most addresses one multicast call may carry.
pub const MULTICAST_LIMIT: usize = 500;

const APNS_ALERT_PRIORITY: u8 = 10;
const DEFAULT_SOUND: &str = "default";

const RINGING_TYPE: &str = "ALARM_RINGING";
const PRE_ALERT_TYPE: &str = "PRE_ALERT";

/// An alarm that just started ringing for its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingingTarget {
    pub recipient_id: String,
    pub alarm_id: String,
}

/// An upcoming occurrence whose owner should be warned ahead of time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreAlertTarget {
    pub recipient_id: String,
    pub occurrence_id: String,
    pub address_text: String,
}

/// A device address the gateway reported as permanently undeliverable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidAddress {
    pub recipient_id: String,
    pub address: String,
}

/// Aggregated outcome of a dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Occurrences delivered to at least one device.
    pub success_occurrence_ids: HashSet<String>,
    /// Addresses to purge from the token store.
    pub invalid_addresses: HashSet<InvalidAddress>,
    /// Delivered addresses per recipient.
    pub successful_addresses: HashMap<String, Vec<String>>,
    /// Multicast calls made.
    pub batches_sent: usize,
}

/// Body text of the pre-alert shown by the client.
#[must_use]
pub fn pre_alert_body(address_text: &str) -> String {
    format!("1시간 뒤 {address_text}에서 알림이 울릴 예정이에요!")
}

/// One logical target expanded to a single device address.
#[derive(Debug, Clone)]
struct PushRow {
    recipient_id: String,
    occurrence_id: Option<String>,
    address: String,
}

/// Rows sharing one payload.
struct PushGroup {
    data: BTreeMap<String, String>,
    rows: Vec<PushRow>,
}

/// A logical target before address resolution.
struct Pending {
    recipient_id: String,
    occurrence_id: Option<String>,
    data: BTreeMap<String, String>,
}

/// Dispatcher shared by the ringing and pre-alert jobs.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tokens: Arc<dyn DeviceTokenStore>,
    gateway: Arc<dyn PushGateway>,
    android_ttl: Duration,
    apns_expiration_secs: i64,
}

impl NotificationDispatcher {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn DeviceTokenStore>,
        gateway: Arc<dyn PushGateway>,
        config: &PushConfig,
    ) -> Self {
        Self {
            tokens,
            gateway,
            android_ttl: Duration::from_secs(config.android_ttl_secs),
            apns_expiration_secs: config.apns_expiration_secs,
        }
    }

    /// Notify owners that their alarm is ringing now.
    ///
    /// Ringing pushes carry no occurrence, so the report's success set
    /// stays empty; its dead addresses still need purging.
    pub async fn dispatch_ringing_alerts(&self, targets: &[RingingTarget]) -> DispatchReport {
        let pending = targets
            .iter()
            .map(|t| Pending {
                recipient_id: t.recipient_id.clone(),
                occurrence_id: None,
                data: BTreeMap::from([
                    ("type".to_string(), RINGING_TYPE.to_string()),
                    ("alarmId".to_string(), t.alarm_id.clone()),
                ]),
            })
            .collect();

        self.dispatch(pending).await
    }

    /// Warn owners about an upcoming occurrence.
    pub async fn dispatch_pre_alerts(&self, targets: &[PreAlertTarget]) -> DispatchReport {
        let pending = targets
            .iter()
            .map(|t| Pending {
                recipient_id: t.recipient_id.clone(),
                occurrence_id: Some(t.occurrence_id.clone()),
                data: BTreeMap::from([
                    ("type".to_string(), PRE_ALERT_TYPE.to_string()),
                    ("body".to_string(), pre_alert_body(&t.address_text)),
                ]),
            })
            .collect();

        self.dispatch(pending).await
    }

    async fn dispatch(&self, pending: Vec<Pending>) -> DispatchReport {
        let mut report = DispatchReport::default();
        if pending.is_empty() {
            return report;
        }

        let addresses = self.resolve_addresses(&pending).await;
        let groups = group_rows(pending, &addresses);

        for group in groups {
            for chunk in group.rows.chunks(MULTICAST_LIMIT) {
                let message = self.build_message(&group.data, chunk);
                report.batches_sent += 1;

                let batch = match self.gateway.send_multicast(&message).await {
                    Ok(batch) => batch,
                    Err(e) => {
                        error!(error = %e, size = chunk.len(), "Push batch failed");
                        continue;
                    }
                };

                for (row, response) in chunk.iter().zip(batch.responses) {
                    match response.outcome {
                        SendOutcome::Delivered { .. } => {
                            if let Some(occurrence_id) = &row.occurrence_id {
                                report.success_occurrence_ids.insert(occurrence_id.clone());
                            }
                            report
                                .successful_addresses
                                .entry(row.recipient_id.clone())
                                .or_default()
                                .push(row.address.clone());
                        }
                        SendOutcome::Failed { code, message } if is_invalid_token_code(&code) => {
                            warn!(recipient_id = %row.recipient_id, code = %code, message = %message, "Device address is invalid");
                            report.invalid_addresses.insert(InvalidAddress {
                                recipient_id: row.recipient_id.clone(),
                                address: row.address.clone(),
                            });
                        }
                        SendOutcome::Failed { code, message } => {
                            warn!(recipient_id = %row.recipient_id, code = %code, message = %message, "Push delivery failed");
                        }
                    }
                }
            }
        }

        info!(
            batches = report.batches_sent,
            delivered = report.successful_addresses.values().map(Vec::len).sum::<usize>(),
            invalid = report.invalid_addresses.len(),
            "Push dispatch finished"
        );
        report
    }

    /// Device addresses per distinct recipient, sorted for stable batching.
    /// Lookup failures count as "no devices".
    async fn resolve_addresses(&self, pending: &[Pending]) -> HashMap<String, Vec<String>> {
        let mut resolved = HashMap::new();
        for p in pending {
            if resolved.contains_key(&p.recipient_id) {
                continue;
            }
            let mut addresses: Vec<String> = match self.tokens.device_addresses(&p.recipient_id).await {
                Ok(set) => set.into_iter().collect(),
                Err(e) => {
                    warn!(recipient_id = %p.recipient_id, error = %e, "Device address lookup failed");
                    Vec::new()
                }
            };
            addresses.sort();
            resolved.insert(p.recipient_id.clone(), addresses);
        }
        resolved
    }

    fn build_message(&self, data: &BTreeMap<String, String>, rows: &[PushRow]) -> MulticastMessage {
        MulticastMessage {
            tokens: rows.iter().map(|r| r.address.clone()).collect(),
            data: data.clone(),
            android: AndroidHints {
                high_priority: true,
                ttl: self.android_ttl,
            },
            apns: ApnsHints {
                priority: APNS_ALERT_PRIORITY,
                expiration: Utc::now().timestamp() + self.apns_expiration_secs,
                sound: DEFAULT_SOUND.to_string(),
            },
        }
    }
}

/// Expand targets into per-address rows, group them by payload in first-seen
/// order and drop repeated addresses within a group.
fn group_rows(pending: Vec<Pending>, addresses: &HashMap<String, Vec<String>>) -> Vec<PushGroup> {
    let mut groups: Vec<PushGroup> = Vec::new();
    let mut index: HashMap<BTreeMap<String, String>, usize> = HashMap::new();
    let mut seen: Vec<HashSet<String>> = Vec::new();

    for p in pending {
        let Some(device_addresses) = addresses.get(&p.recipient_id) else {
            continue;
        };
        if device_addresses.is_empty() {
            continue;
        }

        let slot = match index.get(&p.data) {
            Some(slot) => *slot,
            None => {
                index.insert(p.data.clone(), groups.len());
                groups.push(PushGroup {
                    data: p.data.clone(),
                    rows: Vec::new(),
                });
                seen.push(HashSet::new());
                groups.len() - 1
            }
        };

        for address in device_addresses {
            if seen[slot].insert(address.clone()) {
                groups[slot].rows.push(PushRow {
                    recipient_id: p.recipient_id.clone(),
                    occurrence_id: p.occurrence_id.clone(),
                    address: address.clone(),
                });
            }
        }
    }

    groups
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_utils::{InMemoryDeviceTokenStore, RecordingPushGateway};

    fn push_config() -> PushConfig {
        PushConfig {
            project_id: "wakeup-test".to_string(),
            access_token: "token".to_string(),
            access_token_file: None,
            endpoint: "http://localhost".to_string(),
            android_ttl_secs: 300,
            apns_expiration_secs: 300,
            timeout_secs: 5,
        }
    }

    fn dispatcher(
        tokens: &Arc<InMemoryDeviceTokenStore>,
        gateway: &Arc<RecordingPushGateway>,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(tokens.clone(), gateway.clone(), &push_config())
    }

    fn pre_alert(recipient: &str, occurrence: &str, address: &str) -> PreAlertTarget {
        PreAlertTarget {
            recipient_id: recipient.to_string(),
            occurrence_id: occurrence.to_string(),
            address_text: address.to_string(),
        }
    }

    #[tokio::test]
    async fn test_501_targets_make_two_batches() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        let mut targets = Vec::new();
        for i in 0..501 {
            let member = format!("m{i}");
            tokens.add(&member, &format!("token-{i}")).await;
            targets.push(pre_alert(&member, &format!("o{i}"), "강남역"));
        }

        let report = dispatcher(&tokens, &gateway).dispatch_pre_alerts(&targets).await;

        let sent = gateway.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].tokens.len(), 500);
        assert_eq!(sent[1].tokens.len(), 1);
        assert_eq!(report.batches_sent, 2);
        assert_eq!(report.success_occurrence_ids.len(), 501);
    }

    #[tokio::test]
    async fn test_groups_by_body_and_dedupes_addresses() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        tokens.add("m1", "phone").await;
        tokens.add("m1", "tablet").await;
        tokens.add("m2", "laptop").await;

        let targets = vec![
            pre_alert("m1", "o1", "강남역"),
            pre_alert("m1", "o2", "강남역"),
            pre_alert("m2", "o3", "서울역"),
        ];
        let report = dispatcher(&tokens, &gateway).dispatch_pre_alerts(&targets).await;

        let sent = gateway.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].tokens, vec!["phone".to_string(), "tablet".to_string()]);
        assert_eq!(sent[0].data["body"], pre_alert_body("강남역"));
        assert_eq!(sent[1].tokens, vec!["laptop".to_string()]);

        // o2 only mapped to addresses already claimed by o1 in the same group.
        assert!(report.success_occurrence_ids.contains("o1"));
        assert!(!report.success_occurrence_ids.contains("o2"));
        assert!(report.success_occurrence_ids.contains("o3"));
        assert_eq!(report.successful_addresses["m1"].len(), 2);
    }

    #[tokio::test]
    async fn test_payload_is_data_only_with_platform_hints() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        tokens.add("m1", "phone").await;

        dispatcher(&tokens, &gateway)
            .dispatch_pre_alerts(&[pre_alert("m1", "o1", "판교역")])
            .await;

        let message = &gateway.sent().await[0];
        assert_eq!(message.data["type"], "PRE_ALERT");
        assert_eq!(message.data["body"], "1시간 뒤 판교역에서 알림이 울릴 예정이에요!");
        assert!(message.android.high_priority);
        assert_eq!(message.android.ttl, Duration::from_secs(300));
        assert_eq!(message.apns.priority, 10);
        assert_eq!(message.apns.sound, "default");
        assert!(message.apns.expiration > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_invalid_and_failed_addresses() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        tokens.add("m1", "dead").await;
        tokens.add("m2", "busy").await;
        tokens.add("m3", "ok").await;
        gateway.fail_token("dead", "UNREGISTERED").await;
        gateway.fail_token("busy", "UNAVAILABLE").await;

        let targets = vec![
            pre_alert("m1", "o1", "역"),
            pre_alert("m2", "o2", "역"),
            pre_alert("m3", "o3", "역"),
        ];
        let report = dispatcher(&tokens, &gateway).dispatch_pre_alerts(&targets).await;

        assert_eq!(report.success_occurrence_ids, HashSet::from(["o3".to_string()]));
        assert_eq!(
            report.invalid_addresses,
            HashSet::from([InvalidAddress {
                recipient_id: "m1".to_string(),
                address: "dead".to_string(),
            }])
        );
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_dispatch() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        tokens.add("m1", "a").await;
        tokens.add("m2", "b").await;
        gateway.fail_batch(0).await;

        let targets = vec![pre_alert("m1", "o1", "첫번째"), pre_alert("m2", "o2", "두번째")];
        let report = dispatcher(&tokens, &gateway).dispatch_pre_alerts(&targets).await;

        assert_eq!(report.batches_sent, 2);
        assert_eq!(report.success_occurrence_ids, HashSet::from(["o2".to_string()]));
    }

    #[tokio::test]
    async fn test_recipients_without_devices_are_skipped() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        tokens.add("m2", "b").await;
        tokens.fail_lookups_for("m3").await;

        let targets = vec![
            pre_alert("m1", "o1", "역"),
            pre_alert("m2", "o2", "역"),
            pre_alert("m3", "o3", "역"),
        ];
        let report = dispatcher(&tokens, &gateway).dispatch_pre_alerts(&targets).await;

        assert_eq!(gateway.sent().await.len(), 1);
        assert_eq!(report.success_occurrence_ids, HashSet::from(["o2".to_string()]));
    }

    #[tokio::test]
    async fn test_ringing_alerts_group_per_alarm() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());
        tokens.add("m1", "phone").await;
        tokens.add("m2", "tablet").await;
        tokens.add("m2", "old-tablet").await;
        gateway.fail_token("old-tablet", "UNREGISTERED").await;

        let report = dispatcher(&tokens, &gateway)
            .dispatch_ringing_alerts(&[
                RingingTarget {
                    recipient_id: "m1".to_string(),
                    alarm_id: "a1".to_string(),
                },
                RingingTarget {
                    recipient_id: "m2".to_string(),
                    alarm_id: "a2".to_string(),
                },
            ])
            .await;

        let sent = gateway.sent().await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].data["type"], "ALARM_RINGING");
        assert_eq!(sent[0].data["alarmId"], "a1");
        assert_eq!(sent[1].tokens, vec!["old-tablet".to_string(), "tablet".to_string()]);

        assert!(report.success_occurrence_ids.is_empty());
        assert_eq!(report.successful_addresses["m2"], vec!["tablet".to_string()]);
        assert_eq!(
            report.invalid_addresses,
            HashSet::from([InvalidAddress {
                recipient_id: "m2".to_string(),
                address: "old-tablet".to_string(),
            }])
        );
    }

    #[tokio::test]
    async fn test_empty_targets_send_nothing() {
        let tokens = Arc::new(InMemoryDeviceTokenStore::new());
        let gateway = Arc::new(RecordingPushGateway::new());

        let report = dispatcher(&tokens, &gateway).dispatch_pre_alerts(&[]).await;

        assert_eq!(report, DispatchReport::default());
        assert!(gateway.sent().await.is_empty());
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use waypost_domain::queue::EnqueueReading;
use waypost_domain::{
    Clock, CostCounterStore, DailySpend, DomainResult, MetricMap, Policy, ReadingQueue, SendReason,
};

use crate::alerts::AlertTracker;

/// What one reporter tick decided.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub reason: Option<SendReason>,
    pub message_id: Option<String>,
    /// Sends blocked by cost caps during this tick.
    pub suppressed: u32,
}

/// The per-device send-decision state machine, re-evaluated on a fixed tick.
///
/// Trigger priority, highest first: startup snapshot, alert transition,
/// periodic critical snapshot, heartbeat, delta. Exactly one payload shape
/// per tick; enqueuing any payload resets the heartbeat silence timer.
pub struct AdaptiveReporter {
    device_id: String,
    queue: Arc<dyn ReadingQueue>,
    costs: Arc<dyn CostCounterStore>,
    clock: Arc<dyn Clock>,
    alerts: AlertTracker,
    startup_sent: bool,
    last_payload_at: Option<DateTime<Utc>>,
    last_alert_snapshot_at: Option<DateTime<Utc>>,
    /// Last value actually sent per metric; never advanced by mere sampling.
    baselines: BTreeMap<String, f64>,
    suppressed_sends: u64,
}

impl AdaptiveReporter {
    pub fn new(
        device_id: String,
        queue: Arc<dyn ReadingQueue>,
        costs: Arc<dyn CostCounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device_id,
            queue,
            costs,
            clock,
            alerts: AlertTracker::new(),
            startup_sent: false,
            last_payload_at: None,
            last_alert_snapshot_at: None,
            baselines: BTreeMap::new(),
            suppressed_sends: 0,
        }
    }

    #[instrument(skip_all, fields(device_id = %self.device_id))]
    pub fn tick(
        &mut self,
        sample: &BTreeMap<String, f64>,
        policy: &Policy,
    ) -> DomainResult<TickOutcome> {
        let now = self.clock.now();
        let today = now.date_naive();
        let obs = self.alerts.observe(sample, &policy.alert_conditions);

        let spend = self.costs.spend_for(today)?;
        let byte_capped = spend.bytes_sent >= policy.cost_caps.max_bytes_per_day;
        let snapshot_capped = spend.snapshots >= policy.cost_caps.max_snapshots_per_day;

        let delta_keys = self.changed_keys(sample, policy);
        let heartbeat_due = self
            .last_payload_at
            .map_or(true, |t| elapsed_s(t, now) >= policy.heartbeat_interval_s);

        let mut candidates = Vec::new();
        if !self.startup_sent {
            candidates.push(SendReason::Startup);
        }
        if obs.set_changed {
            candidates.push(if obs.warn_before != obs.warn_now {
                SendReason::StateChange
            } else {
                SendReason::AlertChange
            });
        }
        if obs.warn_now
            && obs.critical_active
            && self
                .last_alert_snapshot_at
                .map_or(true, |t| elapsed_s(t, now) >= policy.alert_report_interval_s)
        {
            candidates.push(SendReason::AlertInterval);
        }
        // A due heartbeat outranks deltas. Baselines only move on send, so
        // the changed keys are still pending next tick.
        if heartbeat_due {
            candidates.push(SendReason::Heartbeat);
        }
        if !delta_keys.is_empty() {
            candidates.push(SendReason::Delta);
        }

        let mut suppressed_this_tick = 0u32;
        let mut chosen = None;
        for reason in candidates {
            // Byte cap exhausted means heartbeat-only until the next UTC
            // day; the snapshot cap blocks only snapshot-shaped payloads.
            let blocked = if byte_capped {
                reason != SendReason::Heartbeat
            } else {
                reason.is_snapshot() && snapshot_capped
            };
            if blocked {
                suppressed_this_tick += 1;
                continue;
            }
            chosen = Some(reason);
            break;
        }
        self.suppressed_sends += u64::from(suppressed_this_tick);

        let Some(reason) = chosen else {
            if suppressed_this_tick > 0 {
                debug!(suppressed = suppressed_this_tick, "all triggers cost-capped");
            }
            return Ok(TickOutcome {
                suppressed: suppressed_this_tick,
                ..TickOutcome::default()
            });
        };

        let surfaced_suppressions = self.suppressed_sends;
        let metrics =
            self.build_metrics(reason, sample, &delta_keys, byte_capped, &spend)?;

        if reason.is_snapshot() {
            self.costs.add_snapshot(today)?;
        }

        let message_id = self.queue.enqueue(EnqueueReading {
            device_id: self.device_id.clone(),
            captured_at: now,
            metrics,
            reason,
        })?;

        match reason {
            SendReason::Startup => {
                self.startup_sent = true;
                self.update_baselines(sample.keys(), sample);
                self.last_alert_snapshot_at = Some(now);
            }
            SendReason::StateChange | SendReason::AlertChange | SendReason::AlertInterval => {
                self.update_baselines(sample.keys(), sample);
                self.last_alert_snapshot_at = Some(now);
            }
            SendReason::Delta => {
                self.update_baselines(delta_keys.iter(), sample);
            }
            SendReason::Heartbeat => {}
        }
        // Any payload, heartbeats included, resets the silence timer.
        self.last_payload_at = Some(now);
        if surfaced_suppressions > 0 {
            self.suppressed_sends = 0;
        }

        info!(reason = reason.as_str(), %message_id, "enqueued payload");
        Ok(TickOutcome {
            reason: Some(reason),
            message_id: Some(message_id),
            suppressed: suppressed_this_tick,
        })
    }

    /// Keys whose sampled value moved past the configured threshold since
    /// the last value actually sent for that key.
    fn changed_keys(&self, sample: &BTreeMap<String, f64>, policy: &Policy) -> Vec<String> {
        sample
            .iter()
            .filter(|(key, value)| {
                policy.delta_thresholds.get(*key).is_some_and(|threshold| {
                    self.baselines
                        .get(*key)
                        .map_or(true, |sent| (*value - sent).abs() >= *threshold)
                })
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn update_baselines<'a>(
        &mut self,
        keys: impl Iterator<Item = &'a String>,
        sample: &BTreeMap<String, f64>,
    ) {
        for key in keys {
            if let Some(value) = sample.get(key) {
                self.baselines.insert(key.clone(), *value);
            }
        }
    }

    fn build_metrics(
        &self,
        reason: SendReason,
        sample: &BTreeMap<String, f64>,
        delta_keys: &[String],
        cost_cap_active: bool,
        spend: &DailySpend,
    ) -> DomainResult<MetricMap> {
        let mut metrics = MetricMap::new();

        match reason {
            SendReason::Heartbeat => {
                // Minimal liveness payload plus queue health, which makes
                // evictions and dead letters observable in the data stream.
                let queue = self.queue.metrics()?;
                insert_num(&mut metrics, "queue_rows", queue.row_count as f64);
                insert_num(&mut metrics, "queue_dead_letters", queue.dead_letter_count as f64);
                insert_num(&mut metrics, "queue_evictions_total", queue.evictions_total as f64);
            }
            SendReason::Delta => {
                for key in delta_keys {
                    if let Some(value) = sample.get(key) {
                        insert_num(&mut metrics, key, *value);
                    }
                }
            }
            _ => {
                for (key, value) in sample {
                    insert_num(&mut metrics, key, *value);
                }
                let active = self.alerts.active_conditions();
                if !active.is_empty() {
                    metrics.insert(
                        "active_alerts".to_string(),
                        serde_json::Value::String(active.join(",")),
                    );
                }
            }
        }

        // Throttling is surfaced in the stream itself so operators can see
        // it without server-side correlation.
        if cost_cap_active || self.suppressed_sends > 0 {
            metrics.insert("cost_cap_active".to_string(), serde_json::Value::Bool(cost_cap_active));
            insert_num(&mut metrics, "bytes_sent_today", spend.bytes_sent as f64);
            insert_num(&mut metrics, "suppressed_sends", self.suppressed_sends as f64);
        }

        Ok(metrics)
    }
}

fn insert_num(metrics: &mut MetricMap, key: &str, value: f64) {
    if let Some(number) = serde_json::Number::from_f64(value) {
        metrics.insert(key.to_string(), serde_json::Value::Number(number));
    }
}

fn elapsed_s(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_seconds().max(0) as u64
}

use std::collections::BTreeMap;

use waypost_domain::AlertCondition;

/// What one observation did to the alert set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AlertObservation {
    pub warn_before: bool,
    pub warn_now: bool,
    /// True when any condition entered or recovered this observation.
    pub set_changed: bool,
    /// True when any active condition is marked critical.
    pub critical_active: bool,
}

/// Per-condition two-sided hysteresis state.
///
/// Each condition key owns its own enter/recover window; entering or exiting
/// one alert never perturbs another condition's state. A metric absent from
/// the sample leaves its conditions untouched.
#[derive(Debug, Default)]
pub struct AlertTracker {
    active: BTreeMap<String, bool>,
}

impl AlertTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_conditions(&self) -> Vec<&str> {
        self.active
            .iter()
            .filter(|(_, on)| **on)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn observe(
        &mut self,
        sample: &BTreeMap<String, f64>,
        conditions: &BTreeMap<String, AlertCondition>,
    ) -> AlertObservation {
        // Conditions dropped from policy cannot keep a device in WARN.
        self.active.retain(|name, _| conditions.contains_key(name));

        let warn_before = self.active.values().any(|on| *on);
        let mut set_changed = false;

        for (name, condition) in conditions {
            let Some(value) = sample.get(&condition.metric) else {
                continue;
            };
            let current = self.active.get(name).copied().unwrap_or(false);
            let next = if current {
                // Recover only once the metric falls to the recover side.
                *value > condition.recover_below
            } else {
                *value > condition.enter_above
            };
            if next != current {
                set_changed = true;
            }
            self.active.insert(name.clone(), next);
        }

        let warn_now = self.active.values().any(|on| *on);
        let critical_active = conditions
            .iter()
            .any(|(name, c)| c.critical && self.active.get(name).copied().unwrap_or(false));

        AlertObservation {
            warn_before,
            warn_now,
            set_changed,
            critical_active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions() -> BTreeMap<String, AlertCondition> {
        let mut map = BTreeMap::new();
        map.insert(
            "hot".to_string(),
            AlertCondition {
                metric: "temp_c".to_string(),
                enter_above: 80.0,
                recover_below: 75.0,
                critical: true,
            },
        );
        map.insert(
            "low_battery".to_string(),
            AlertCondition {
                metric: "vbat_mv".to_string(),
                enter_above: -3300.0, // negated voltage so "above" means low
                recover_below: -3500.0,
                critical: false,
            },
        );
        map
    }

    fn sample(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_enter_and_recover_with_hysteresis() {
        let mut tracker = AlertTracker::new();
        let conds = conditions();

        let obs = tracker.observe(&sample(&[("temp_c", 85.0)]), &conds);
        assert!(obs.warn_now && !obs.warn_before && obs.set_changed);
        assert!(obs.critical_active);

        // Between recover and enter thresholds: still in alert, no change.
        let obs = tracker.observe(&sample(&[("temp_c", 78.0)]), &conds);
        assert!(obs.warn_now && !obs.set_changed);

        let obs = tracker.observe(&sample(&[("temp_c", 74.0)]), &conds);
        assert!(!obs.warn_now && obs.set_changed);
    }

    #[test]
    fn test_conditions_are_independent() {
        let mut tracker = AlertTracker::new();
        let conds = conditions();

        tracker.observe(&sample(&[("temp_c", 85.0), ("vbat_mv", -3200.0)]), &conds);
        assert_eq!(tracker.active_conditions(), vec!["hot", "low_battery"]);

        // Recovering one alert must not perturb the other's window.
        let obs = tracker.observe(&sample(&[("temp_c", 74.0), ("vbat_mv", -3400.0)]), &conds);
        assert!(obs.warn_now);
        assert!(obs.set_changed);
        assert_eq!(tracker.active_conditions(), vec!["low_battery"]);
    }

    #[test]
    fn test_unsampled_metric_leaves_state_untouched() {
        let mut tracker = AlertTracker::new();
        let conds = conditions();

        tracker.observe(&sample(&[("temp_c", 85.0)]), &conds);
        let obs = tracker.observe(&sample(&[("vbat_mv", -4000.0)]), &conds);
        assert!(obs.warn_now);
        assert!(!obs.set_changed);
        assert_eq!(tracker.active_conditions(), vec!["hot"]);
    }

    #[test]
    fn test_dropped_condition_cannot_hold_warn() {
        let mut tracker = AlertTracker::new();
        tracker.observe(&sample(&[("temp_c", 85.0)]), &conditions());

        let obs = tracker.observe(&sample(&[]), &BTreeMap::new());
        assert!(!obs.warn_now);
    }
}

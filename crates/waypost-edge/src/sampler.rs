use std::collections::BTreeMap;

use waypost_domain::DomainResult;

/// Produces one numeric observation of the device's sensors.
///
/// Capture hardware is an external collaborator; the reporter only needs a
/// key/value snapshot per tick.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
pub trait MetricSampler: Send + Sync {
    fn sample(&self) -> DomainResult<BTreeMap<String, f64>>;
}

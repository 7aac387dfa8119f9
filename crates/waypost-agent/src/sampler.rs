use std::collections::BTreeMap;

use anyhow::Context;
use waypost_edge::MetricSampler;
use waypost_domain::DomainResult;

/// Samples host health from procfs: load, memory pressure, uptime.
///
/// Stands in for real sensor capture; deployments with attached hardware
/// provide their own [`MetricSampler`].
pub struct HostSampler;

impl HostSampler {
    fn load_1m() -> anyhow::Result<f64> {
        let raw = std::fs::read_to_string("/proc/loadavg").context("reading /proc/loadavg")?;
        raw.split_whitespace()
            .next()
            .context("empty /proc/loadavg")?
            .parse::<f64>()
            .context("parsing load average")
    }

    fn mem_used_pct() -> anyhow::Result<f64> {
        let raw = std::fs::read_to_string("/proc/meminfo").context("reading /proc/meminfo")?;
        let field = |name: &str| -> anyhow::Result<f64> {
            raw.lines()
                .find(|line| line.starts_with(name))
                .and_then(|line| line.split_whitespace().nth(1))
                .with_context(|| format!("missing {name} in /proc/meminfo"))?
                .parse::<f64>()
                .with_context(|| format!("parsing {name}"))
        };
        let total = field("MemTotal:")?;
        let available = field("MemAvailable:")?;
        if total <= 0.0 {
            anyhow::bail!("MemTotal is zero");
        }
        Ok(((total - available) / total) * 100.0)
    }

    fn uptime_s() -> anyhow::Result<f64> {
        let raw = std::fs::read_to_string("/proc/uptime").context("reading /proc/uptime")?;
        raw.split_whitespace()
            .next()
            .context("empty /proc/uptime")?
            .parse::<f64>()
            .context("parsing uptime")
    }
}

impl MetricSampler for HostSampler {
    fn sample(&self) -> DomainResult<BTreeMap<String, f64>> {
        let mut sample = BTreeMap::new();
        sample.insert("cpu_load_1m".to_string(), Self::load_1m()?);
        sample.insert("mem_used_pct".to_string(), Self::mem_used_pct()?);
        sample.insert("uptime_s".to_string(), Self::uptime_s()?);
        Ok(sample)
    }
}

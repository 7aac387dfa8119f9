mod config;
mod sampler;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};

use config::AgentConfig;
use sampler::HostSampler;
use telemetry::init_telemetry;
use waypost_domain::{CostCounterStore, ReadingQueue, SystemClock, TelemetryTransport};
use waypost_edge::{
    AdaptiveReporter, HttpPolicySource, HttpTransport, MetricSampler, PolicyCache, QueueFlusher,
};
use waypost_queue::SqliteQueue;
use waypost_runner::Runner;

#[tokio::main]
async fn main() {
    let config = match AgentConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.log_level) {
        eprintln!("failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    info!(device_id = %config.device_id, "starting waypost-agent");

    if let Err(e) = build_and_run(config).await {
        error!(error = %e, "agent exited with error");
        std::process::exit(1);
    }
}

async fn build_and_run(config: AgentConfig) -> anyhow::Result<()> {
    let queue = Arc::new(
        SqliteQueue::open(&config.queue_path, config.queue_max_disk_bytes)
            .context("opening reading queue")?,
    );
    let queue_handle: Arc<dyn ReadingQueue> = queue.clone();
    let costs: Arc<dyn CostCounterStore> = queue.clone();

    let request_timeout = Duration::from_secs(config.request_timeout_s);

    let transport: Arc<dyn TelemetryTransport> = Arc::new(HttpTransport::new(
        config.ingest_url.parse().context("parsing ingest url")?,
        config.device_id.clone(),
        config.device_token.clone(),
        config.transport_max_attempts,
        request_timeout,
    )?);

    let policy_source = HttpPolicySource::new(
        config.policy_url.parse().context("parsing policy url")?,
        config.device_token.clone(),
        request_timeout,
        Duration::from_secs(config.policy_refresh_s),
    )?;
    let policy_cache = Arc::new(PolicyCache::new(
        Arc::new(policy_source),
        Duration::from_secs(config.policy_refresh_s),
    ));

    let clock = Arc::new(SystemClock);
    let mut reporter = AdaptiveReporter::new(
        config.device_id.clone(),
        queue_handle.clone(),
        costs.clone(),
        clock.clone(),
    );
    let flusher = QueueFlusher::new(queue_handle, transport, costs, clock);
    let sampler = HostSampler;

    let reporter_cache = policy_cache.clone();
    let flusher_cache = policy_cache.clone();
    let flush_interval = Duration::from_secs(config.flush_interval_s);

    Runner::new()
        .with_process("reporter", move |ctx| async move {
            loop {
                let policy = reporter_cache.get();
                match sampler.sample() {
                    Ok(sample) => {
                        if let Err(err) = reporter.tick(&sample, &policy) {
                            warn!(error = %err, "reporter tick failed");
                        }
                    }
                    Err(err) => warn!(error = %err, "sampling failed"),
                }
                tokio::select! {
                    _ = ctx.cancelled() => {
                        info!("reporter stopping");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(Duration::from_secs(policy.sample_interval_s.max(1))) => {}
                }
            }
        })
        .with_process("flusher", move |ctx| async move {
            loop {
                let policy = flusher_cache.get();
                match flusher.flush_once(&policy).await {
                    // Keep draining while full batches are going through.
                    Ok(report) if report.delivered > 0 => continue,
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "flush pass failed"),
                }
                tokio::select! {
                    _ = ctx.cancelled() => {
                        info!("flusher stopping");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(flush_interval) => {}
                }
            }
        })
        .with_process("policy_refresh", move |ctx| async move {
            policy_cache.run(ctx).await
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await
}

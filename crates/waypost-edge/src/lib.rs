//! Edge-side reporting: the adaptive reporter state machine, the durable
//! flush path, the policy cache, and the HTTP transport client.

pub mod alerts;
pub mod backoff;
pub mod flusher;
pub mod policy_cache;
pub mod reporter;
pub mod sampler;
pub mod transport;

pub use alerts::{AlertObservation, AlertTracker};
pub use backoff::BackoffPolicy;
pub use flusher::{FlushReport, QueueFlusher};
pub use policy_cache::{HttpPolicySource, PolicyCache, PolicyFetch, PolicySource};
pub use reporter::{AdaptiveReporter, TickOutcome};
pub use sampler::MetricSampler;
pub use transport::HttpTransport;

pub mod clock;
pub mod contract;
pub mod error;
pub mod point;
pub mod policy;
pub mod queue;
pub mod reading;
pub mod repository;
pub mod transport;
pub mod wire;

pub use clock::{Clock, SystemClock};
pub use contract::{
    ContractValidator, DriftPolicy, MetricContract, MetricType, TypeMismatchPolicy,
    UnknownKeyPolicy, ValidationOutcome,
};
pub use error::{validate_input, DomainError, DomainResult};
pub use point::{
    DriftEvent, DriftKind, IngestSummary, IngestionBatch, ProcessingStatus, QuarantinedTelemetry,
    TelemetryPoint,
};
pub use policy::{AlertCondition, CostCaps, Policy};
pub use queue::{
    CostCounterStore, DailySpend, EnqueueReading, FailureOutcome, QueueMetrics, ReadingQueue,
};
pub use reading::{BufferedReading, MetricMap, ReadingStatus, SendReason};
pub use repository::{
    DriftRepository, IngestionLedgerRepository, InsertPointsOutcome, TelemetryPointRepository,
};
pub use transport::{IngestAck, TelemetryTransport, TransportError};

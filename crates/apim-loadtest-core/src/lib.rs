//! Core building blocks for the APIM priority load harness.

pub mod analytics;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod priority;
pub mod report;
pub mod request;
pub mod scenario;
pub mod shape;
pub mod simulator;
pub mod stage;

pub use analytics::{LogAnalyticsClient, LogStore, QueryTable, TimeSpan, WaitOutcome, WaitPolicy};
pub use config::LoadTestConfig;
pub use error::{LoadTestError, LoadTestResult};
pub use lifecycle::{LifecycleDriver, ObserverRegistry, Phase, RunContext, ScenarioHooks};
pub use metrics::{MetricRecord, MetricSink, MetricsExporter, PrometheusSink, RequestEvent, RequestObserver};
pub use priority::{Priority, UserKind};
pub use report::{QueryProcessor, ReportQuery, ReportSink};
pub use request::{RequestGenerator, RequestKind, RequestOutcome, RequestSpec};
pub use scenario::PrioritizationScenario;
pub use shape::{LoadShape, LoadTarget, ShapeTick, StagesShape};
pub use simulator::SimulatorClient;
pub use stage::{LoadPattern, Stage, StageSchedule};

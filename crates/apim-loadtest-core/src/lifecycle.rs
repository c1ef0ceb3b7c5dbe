//! Test lifecycle: init, start and stop hooks around a load run
//!
//! The driver owns the run context and enforces the phase order
//! `Idle -> Initialized -> Running -> Stopped -> Reported`. Hooks receive the
//! context read-only; timestamps are set by the driver, never by hooks.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::analytics::TimeSpan;
use crate::error::{LoadTestError, LoadTestResult};
use crate::metrics::{RequestEvent, RequestObserver};

/// Where a run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Initialized,
    Running,
    Stopped,
    Reported,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Reported => "reported",
        };
        f.write_str(name)
    }
}

/// Per-run state shared with the hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub phase: Phase,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            started_at: None,
            stopped_at: None,
        }
    }
}

impl RunContext {
    /// Window covered by the run, once it has both started and stopped.
    pub fn time_window(&self) -> Option<TimeSpan> {
        Some(TimeSpan::new(self.started_at?, self.stopped_at?))
    }
}

/// Observers notified of every completed request.
#[derive(Default, Clone)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn RequestObserver>>,
}

impl ObserverRegistry {
    pub fn add(&mut self, observer: Arc<dyn RequestObserver>) {
        self.observers.push(observer);
    }

    pub fn notify(&self, event: &RequestEvent) {
        for observer in &self.observers {
            observer.on_request(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.len())
            .finish()
    }
}

/// Scenario callbacks invoked by [`LifecycleDriver`].
#[async_trait]
pub trait ScenarioHooks: Send + Sync {
    /// Called once before any user starts; may register request observers.
    async fn on_init(&self, observers: &mut ObserverRegistry) -> LoadTestResult<()>;

    /// Called after the start time is recorded, before load is generated.
    async fn on_test_start(&self, ctx: &RunContext) -> LoadTestResult<()>;

    /// Called after the stop time is recorded, once all users are gone.
    async fn on_test_stop(&self, ctx: &RunContext) -> LoadTestResult<()>;
}

/// Drives a [`ScenarioHooks`] implementation through the run phases.
pub struct LifecycleDriver<H> {
    hooks: H,
    ctx: RunContext,
    observers: ObserverRegistry,
}

impl<H: ScenarioHooks> LifecycleDriver<H> {
    pub fn new(hooks: H) -> Self {
        Self {
            hooks,
            ctx: RunContext::default(),
            observers: ObserverRegistry::default(),
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn phase(&self) -> Phase {
        self.ctx.phase
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub async fn init(&mut self) -> LoadTestResult<()> {
        self.expect_phase(Phase::Idle, "init")?;
        self.hooks.on_init(&mut self.observers).await?;
        self.ctx.phase = Phase::Initialized;
        info!("Scenario initialized with {} request observer(s)", self.observers.len());
        Ok(())
    }

    pub async fn start(&mut self) -> LoadTestResult<()> {
        self.expect_phase(Phase::Initialized, "start")?;
        self.ctx.started_at = Some(Utc::now());
        self.hooks.on_test_start(&self.ctx).await?;
        self.ctx.phase = Phase::Running;
        info!("Test started");
        Ok(())
    }

    /// Records the stop time and runs the stop hook. The phase moves to
    /// `Stopped` before the hook runs, so a failing report leaves the run
    /// stopped rather than running.
    pub async fn stop(&mut self) -> LoadTestResult<()> {
        self.expect_phase(Phase::Running, "stop")?;
        self.ctx.stopped_at = Some(Utc::now());
        self.ctx.phase = Phase::Stopped;
        info!("Test stopped");

        self.hooks.on_test_stop(&self.ctx).await?;
        self.ctx.phase = Phase::Reported;
        Ok(())
    }

    fn expect_phase(&self, expected: Phase, action: &str) -> LoadTestResult<()> {
        if self.ctx.phase != expected {
            return Err(LoadTestError::invalid_state(format!(
                "cannot {} while {} (expected {})",
                action, self.ctx.phase, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RequestMetricObserver;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<String>>,
        fail_start: bool,
        register_observer: bool,
    }

    #[async_trait]
    impl ScenarioHooks for RecordingHooks {
        async fn on_init(&self, observers: &mut ObserverRegistry) -> LoadTestResult<()> {
            self.calls.lock().push("init".to_string());
            if self.register_observer {
                observers.add(Arc::new(RequestMetricObserver));
            }
            Ok(())
        }

        async fn on_test_start(&self, ctx: &RunContext) -> LoadTestResult<()> {
            assert!(ctx.started_at.is_some());
            self.calls.lock().push("start".to_string());
            if self.fail_start {
                return Err(LoadTestError::UnexpectedStatus {
                    service: "simulator",
                    status: 500,
                    body: String::new(),
                });
            }
            Ok(())
        }

        async fn on_test_stop(&self, ctx: &RunContext) -> LoadTestResult<()> {
            assert!(ctx.time_window().is_some());
            self.calls.lock().push("stop".to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let mut driver = LifecycleDriver::new(RecordingHooks {
            register_observer: true,
            ..Default::default()
        });

        driver.init().await.unwrap();
        assert_eq!(driver.phase(), Phase::Initialized);
        assert_eq!(driver.observers().len(), 1);

        driver.start().await.unwrap();
        assert_eq!(driver.phase(), Phase::Running);

        driver.stop().await.unwrap();
        assert_eq!(driver.phase(), Phase::Reported);

        let window = driver.context().time_window().unwrap();
        assert!(window.start <= window.end);
        assert_eq!(*driver.hooks().calls.lock(), vec!["init", "start", "stop"]);
    }

    #[tokio::test]
    async fn test_out_of_order_is_rejected() {
        let mut driver = LifecycleDriver::new(RecordingHooks::default());

        assert!(matches!(
            driver.start().await,
            Err(LoadTestError::InvalidState { .. })
        ));
        assert!(matches!(
            driver.stop().await,
            Err(LoadTestError::InvalidState { .. })
        ));

        driver.init().await.unwrap();
        assert!(matches!(
            driver.init().await,
            Err(LoadTestError::InvalidState { .. })
        ));
        assert!(driver.hooks().calls.lock().len() == 1);
    }

    #[tokio::test]
    async fn test_start_failure_keeps_phase() {
        let mut driver = LifecycleDriver::new(RecordingHooks {
            fail_start: true,
            ..Default::default()
        });

        driver.init().await.unwrap();
        assert!(driver.start().await.is_err());
        assert_eq!(driver.phase(), Phase::Initialized);
        assert!(driver.context().time_window().is_none());
    }

    #[test]
    fn test_empty_registry_notify() {
        let registry = ObserverRegistry::default();
        assert!(registry.is_empty());
        registry.notify(&RequestEvent {
            request_kind: crate::request::RequestKind::Embeddings,
            priority: crate::priority::Priority::High,
            status_code: Some(200),
            latency: std::time::Duration::from_millis(5),
            error: None,
        });
    }
}

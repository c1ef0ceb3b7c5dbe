//! Load engine: polls the shape and converges a pool of simulated users
//!
//! Each user is a spawned task looping `send -> notify -> record -> sleep`.
//! The pool only ever aborts tasks; a user holds no state worth flushing.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use apim_loadtest_core::metrics::ACTIVE_USERS;
use apim_loadtest_core::{
    LoadShape, LoadTarget, ObserverRegistry, RequestEvent, RequestGenerator, ShapeTick, UserKind,
};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::stats::StatsCollector;

/// How often progress is logged while the run is going.
const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Kinds used when a target does not restrict the mix.
const ALL_KINDS: [UserKind; 3] = [UserKind::HighPriority, UserKind::LowPriority, UserKind::Mixed];

/// One step towards a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolAction {
    Start(UserKind),
    Stop(UserKind),
}

/// Users wanted per kind, split evenly over the target's kinds in order.
/// Earlier kinds take the remainder.
pub fn desired_counts(target: &LoadTarget) -> Vec<(UserKind, usize)> {
    let mut kinds: Vec<UserKind> = Vec::new();
    for kind in target.user_kinds.as_deref().unwrap_or(&ALL_KINDS) {
        if !kinds.contains(kind) {
            kinds.push(*kind);
        }
    }
    if kinds.is_empty() {
        return Vec::new();
    }

    let users = target.users as usize;
    let base = users / kinds.len();
    let remainder = users % kinds.len();
    kinds
        .into_iter()
        .enumerate()
        .map(|(i, kind)| (kind, base + usize::from(i < remainder)))
        .collect()
}

/// Actions moving `running` towards `target`, at most `budget` of them.
///
/// Users of excluded kinds are stopped first, then surplus users, then new
/// users are started round-robin over the kinds still short.
pub fn plan(running: &BTreeMap<UserKind, usize>, target: &LoadTarget, budget: usize) -> Vec<PoolAction> {
    let desired = desired_counts(target);
    let wanted = |kind: &UserKind| desired.iter().find(|(k, _)| k == kind).map(|(_, n)| *n);
    let mut actions = Vec::new();

    for (kind, count) in running {
        if wanted(kind).is_none() {
            actions.extend(std::iter::repeat(PoolAction::Stop(*kind)).take(*count));
        }
    }

    for (kind, want) in &desired {
        let have = running.get(kind).copied().unwrap_or(0);
        if have > *want {
            actions.extend(std::iter::repeat(PoolAction::Stop(*kind)).take(have - want));
        }
    }

    let mut deficits: Vec<(UserKind, usize)> = desired
        .iter()
        .map(|(kind, want)| (*kind, want.saturating_sub(running.get(kind).copied().unwrap_or(0))))
        .collect();
    while actions.len() < budget && deficits.iter().any(|(_, n)| *n > 0) {
        for (kind, missing) in deficits.iter_mut() {
            if *missing > 0 && actions.len() < budget {
                actions.push(PoolAction::Start(*kind));
                *missing -= 1;
            }
        }
    }

    actions.truncate(budget);
    actions
}

/// Number of pool actions allowed per tick for a per-second spawn rate.
pub fn spawn_budget(spawn_rate: u32, tick: Duration) -> usize {
    ((spawn_rate as f64 * tick.as_secs_f64()).ceil() as usize).max(1)
}

/// Everything a simulated user needs.
#[derive(Clone)]
pub struct UserContext {
    pub generator: Arc<RequestGenerator>,
    pub observers: Arc<ObserverRegistry>,
    pub stats: Arc<StatsCollector>,
    pub wait_time: Duration,
}

async fn run_user(kind: UserKind, ctx: UserContext) {
    let request_kind = ctx.generator.spec().kind();
    let mut iteration: u64 = 0;

    loop {
        let priority = kind.priority_for(iteration);
        iteration += 1;

        let started = Instant::now();
        let event = match ctx.generator.send(priority).await {
            Ok(outcome) => RequestEvent {
                request_kind,
                priority,
                status_code: Some(outcome.status.as_u16()),
                latency: outcome.latency,
                error: None,
            },
            Err(e) => RequestEvent {
                request_kind,
                priority,
                status_code: None,
                latency: started.elapsed(),
                error: Some(e.to_string()),
            },
        };

        ctx.observers.notify(&event);
        ctx.stats.record(&event);
        sleep(ctx.wait_time).await;
    }
}

/// Running simulated users, grouped by kind.
pub struct UserPool {
    ctx: UserContext,
    users: BTreeMap<UserKind, Vec<JoinHandle<()>>>,
}

impl UserPool {
    pub fn new(ctx: UserContext) -> Self {
        Self {
            ctx,
            users: BTreeMap::new(),
        }
    }

    pub fn counts(&self) -> BTreeMap<UserKind, usize> {
        self.users
            .iter()
            .filter(|(_, handles)| !handles.is_empty())
            .map(|(kind, handles)| (*kind, handles.len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.users.values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> Arc<StatsCollector> {
        Arc::clone(&self.ctx.stats)
    }

    /// Applies one tick's worth of actions towards `target`.
    pub fn converge(&mut self, target: &LoadTarget, budget: usize) -> usize {
        let actions = plan(&self.counts(), target, budget);
        for action in &actions {
            match *action {
                PoolAction::Start(kind) => {
                    let handle = tokio::spawn(run_user(kind, self.ctx.clone()));
                    self.users.entry(kind).or_default().push(handle);
                }
                PoolAction::Stop(kind) => {
                    if let Some(handle) = self.users.get_mut(&kind).and_then(Vec::pop) {
                        handle.abort();
                    }
                }
            }
        }

        if !actions.is_empty() {
            debug!("Applied {} pool action(s), {} user(s) running", actions.len(), self.total());
        }
        ACTIVE_USERS.set(self.total() as i64);
        actions.len()
    }

    /// Aborts every user and waits for the tasks to finish.
    pub async fn stop_all(&mut self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut self.users).into_values().flatten().collect();
        for handle in &handles {
            handle.abort();
        }
        futures::future::join_all(handles).await;
        ACTIVE_USERS.set(0);
    }
}

/// Polls a [`LoadShape`] on a fixed cadence and drives the pool.
pub struct LoadRunner {
    shape: Box<dyn LoadShape>,
    pool: UserPool,
    tick_interval: Duration,
}

impl LoadRunner {
    pub fn new(shape: Box<dyn LoadShape>, pool: UserPool, tick_interval: Duration) -> Self {
        Self {
            shape,
            pool,
            tick_interval,
        }
    }

    pub fn stats(&self) -> Arc<StatsCollector> {
        self.pool.stats()
    }

    /// Runs until the shape completes or the process is interrupted. Returns
    /// the time spent generating load.
    pub async fn run(&mut self) -> Duration {
        info!("Load shape: {}", self.shape.description());

        let started = Instant::now();
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_report = Duration::ZERO;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut shutdown => {
                    warn!("Interrupted, stopping all users");
                    break;
                }
            }

            let elapsed = started.elapsed();
            match self.shape.tick(elapsed) {
                ShapeTick::Complete => {
                    info!("Load shape complete after {}s", elapsed.as_secs());
                    break;
                }
                ShapeTick::Target(target) => {
                    let budget = spawn_budget(target.spawn_rate, self.tick_interval);
                    self.pool.converge(&target, budget);
                }
            }

            if elapsed.saturating_sub(last_report) >= REPORT_INTERVAL {
                last_report = elapsed;
                let stats = self.pool.stats().snapshot();
                info!(
                    "[{}s] users: {}, requests: {}, failures: {}, median: {}ms",
                    elapsed.as_secs(),
                    self.pool.total(),
                    stats.total_requests,
                    stats.failed_requests,
                    stats.median_latency().as_millis()
                );
            }
        }

        self.pool.stop_all().await;
        started.elapsed()
    }
}

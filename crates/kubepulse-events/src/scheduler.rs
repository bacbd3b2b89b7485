//! Per-context refresh loops
//!
//! Every started context gets one tokio task that walks
//! `Scheduled -> Running -> Scheduled` on its interval. Stopping bumps the
//! context epoch, so a fetch that is already running completes but its result
//! is dropped instead of applied.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubepulse_types::{DEFAULT_REFRESH_INTERVAL, FailureKind};

use crate::engine::{QueryError, ResourceQueryEngine};

/// Refresh state of one context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RefreshState {
    #[default]
    Idle,
    Scheduled,
    Running,
    Paused,
}

/// Survives restarts of the same context
#[derive(Default)]
struct Slot {
    epoch: AtomicU64,
    /// Held for the whole duration of a fetch
    flight: tokio::sync::Mutex<()>,
    state: Mutex<RefreshState>,
}

impl Slot {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Ignored once `epoch` is stale
    fn set_state(&self, epoch: u64, state: RefreshState) {
        let mut current = self.state.lock();
        if self.is_current(epoch) {
            *current = state;
        }
    }

    /// Invalidate every loop and fetch started so far
    fn retire(&self) -> u64 {
        let mut current = self.state.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        *current = RefreshState::Idle;
        epoch
    }
}

#[derive(Clone, Copy, Debug)]
struct Control {
    paused: bool,
    visible: bool,
}

impl Control {
    fn active(&self) -> bool {
        !self.paused && self.visible
    }
}

struct Task {
    cancel: CancellationToken,
    control: watch::Sender<Control>,
    handle: JoinHandle<()>,
}

pub struct RefreshScheduler {
    engine: Arc<ResourceQueryEngine>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    tasks: Mutex<HashMap<String, Task>>,
}

impl RefreshScheduler {
    pub fn new(engine: Arc<ResourceQueryEngine>) -> Self {
        Self {
            engine,
            slots: Mutex::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<ResourceQueryEngine> {
        &self.engine
    }

    /// Start refreshing `context_name` every `interval`; restarts a running loop.
    /// The first fetch happens one interval from now.
    pub fn start(&self, context_name: &str, interval: Duration) {
        let interval = if interval.is_zero() {
            DEFAULT_REFRESH_INTERVAL
        } else {
            interval
        };

        let slot = self.slot(context_name);
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.remove(context_name) {
            previous.cancel.cancel();
        }

        let epoch = slot.retire();
        slot.set_state(epoch, RefreshState::Scheduled);

        let cancel = CancellationToken::new();
        let (control, receiver) = watch::channel(Control {
            paused: false,
            visible: true,
        });

        let handle = tokio::spawn(refresh_loop(
            Arc::clone(&self.engine),
            slot,
            context_name.to_string(),
            interval,
            epoch,
            receiver,
            cancel.clone(),
        ));

        info!(context = %context_name, interval_secs = interval.as_secs(), "Auto-refresh started");
        tasks.insert(
            context_name.to_string(),
            Task {
                cancel,
                control,
                handle,
            },
        );
    }

    pub fn pause(&self, context_name: &str) {
        self.update_control(context_name, |c| c.paused = true);
    }

    pub fn resume(&self, context_name: &str) {
        self.update_control(context_name, |c| c.paused = false);
    }

    /// Visibility of the view consuming this context
    pub fn set_visible(&self, context_name: &str, visible: bool) {
        self.update_control(context_name, |c| c.visible = visible);
    }

    /// Back to Idle; a fetch already running is discarded when it completes
    pub fn stop(&self, context_name: &str) {
        let task = self.tasks.lock().remove(context_name);
        if let Some(slot) = self.slots.lock().get(context_name) {
            slot.retire();
        }
        if let Some(task) = task {
            task.cancel.cancel();
            info!(context = %context_name, "Auto-refresh stopped");
        }
    }

    /// Stop the loop and drop everything the engine holds for the context
    pub fn remove_context(&self, context_name: &str) {
        self.stop(context_name);
        self.engine.forget(context_name);
    }

    pub fn state(&self, context_name: &str) -> RefreshState {
        self.slots
            .lock()
            .get(context_name)
            .map(|slot| *slot.state.lock())
            .unwrap_or_default()
    }

    /// Contexts with a running loop
    pub fn active_contexts(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove contexts as they disappear from the registry
    pub fn follow_registry(self: &Arc<Self>, mut names: watch::Receiver<Vec<String>>) -> JoinHandle<()> {
        let scheduler: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while names.changed().await.is_ok() {
                let current = names.borrow_and_update().clone();
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };

                for name in scheduler.active_contexts() {
                    if !current.contains(&name) {
                        debug!(context = %name, "Context left the registry");
                        scheduler.remove_context(&name);
                    }
                }
            }
        })
    }

    fn slot(&self, context_name: &str) -> Arc<Slot> {
        Arc::clone(
            self.slots
                .lock()
                .entry(context_name.to_string())
                .or_default(),
        )
    }

    fn update_control(&self, context_name: &str, update: impl FnOnce(&mut Control)) {
        let tasks = self.tasks.lock();
        let Some(task) = tasks.get(context_name) else {
            return;
        };

        let mut next = *task.control.borrow();
        update(&mut next);
        task.control.send_modify(|c| *c = next);

        if let Some(slot) = self.slots.lock().get(context_name) {
            let mut state = slot.state.lock();
            match (*state, next.active()) {
                (RefreshState::Scheduled, false) => *state = RefreshState::Paused,
                (RefreshState::Paused, true) => *state = RefreshState::Scheduled,
                _ => {}
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.lock().drain() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

/// Stable conditions hold the loop until the context is resumed
fn holds_refresh(kind: FailureKind) -> bool {
    matches!(kind, FailureKind::Unauthorized | FailureKind::NotFound)
}

async fn refresh_loop(
    engine: Arc<ResourceQueryEngine>,
    slot: Arc<Slot>,
    context_name: String,
    interval: Duration,
    epoch: u64,
    mut control: watch::Receiver<Control>,
    cancel: CancellationToken,
) {
    let mut deadline = Instant::now() + interval;
    let mut paused = false;
    let mut held = false;

    loop {
        let active = control.borrow_and_update().active();

        if !active || held {
            if !paused {
                paused = true;
                slot.set_state(epoch, RefreshState::Paused);
                debug!(context = %context_name, held, "Auto-refresh paused");
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = control.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if control.borrow().active() {
                        held = false;
                    }
                }
            }
            continue;
        }

        if paused {
            paused = false;
            let now = Instant::now();
            if deadline <= now {
                deadline = now + interval;
            }
        }
        slot.set_state(epoch, RefreshState::Scheduled);

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = sleep_until(deadline) => {}
        }

        let flight = slot.flight.lock().await;
        if !slot.is_current(epoch) {
            break;
        }
        slot.set_state(epoch, RefreshState::Running);

        let filter = engine.filter(&context_name);
        let outcome = engine
            .fetch_events_with(&context_name, &filter, || slot.is_current(epoch))
            .await;
        drop(flight);

        deadline = Instant::now() + interval;

        match outcome {
            Ok(snapshot) => match snapshot.error {
                Some(error) if holds_refresh(error.kind) => {
                    warn!(context = %context_name, kind = %error.kind, "Auto-refresh held until resumed");
                    held = true;
                }
                Some(error) => {
                    debug!(context = %context_name, kind = %error.kind, "Refresh failed, retrying on cadence");
                }
                None => {
                    debug!(context = %context_name, events = snapshot.records.len(), "Refreshed");
                }
            },
            Err(QueryError::Superseded { .. }) => break,
            Err(err @ QueryError::Unsupported { .. }) => {
                warn!(context = %context_name, "{}", err);
                held = true;
            }
        }
    }

    debug!(context = %context_name, epoch, "Refresh loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubepulse_k8s::RawError;
    use std::sync::atomic::Ordering;
    use tokio::time::sleep;

    use crate::testing::{FakeSource, engine_for, event_at, forbidden, registry_with};

    const INTERVAL: Duration = Duration::from_secs(30);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn scheduler_for(source: &Arc<FakeSource>) -> Arc<RefreshScheduler> {
        let registry = registry_with(vec![("prod", Arc::clone(source))]);
        Arc::new(RefreshScheduler::new(engine_for(registry)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fire_after_one_interval() {
        let source = FakeSource::operated();
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        assert_eq!(scheduler.state("prod"), RefreshState::Scheduled);

        sleep(secs(29)).await;
        assert_eq!(source.queries(), 0);

        sleep(secs(2)).await;
        assert_eq!(source.queries(), 1);
        assert_eq!(scheduler.state("prod"), RefreshState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_fire_counts_from_completion() {
        let source = FakeSource::operated();
        source.delay_events(secs(10));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);

        // Fires at 30s, completes at 40s, next fire at 70s
        sleep(secs(35)).await;
        assert_eq!(scheduler.state("prod"), RefreshState::Running);
        sleep(secs(34)).await;
        assert_eq!(source.queries(), 1);
        sleep(secs(2)).await;
        assert_eq!(source.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_is_single_flight() {
        let source = FakeSource::operated();
        source.delay_events(secs(45));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);

        // 30s..75s in flight, then 105s..150s
        sleep(secs(104)).await;
        assert_eq!(source.queries(), 1);
        sleep(secs(2)).await;
        assert_eq!(source.queries(), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_flight_and_discards_it() {
        let source = FakeSource::operated();
        source.delay_events(secs(45));
        source.push_events(Ok(vec![event_at(1)]));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(31)).await;
        assert_eq!(source.queries(), 1);

        // New loop is due at 61s but the old fetch holds the flight until 75s
        scheduler.start("prod", INTERVAL);
        sleep(secs(40)).await;
        assert_eq!(source.queries(), 1);

        sleep(secs(5)).await;
        assert_eq!(source.queries(), 2);
        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert!(scheduler.engine().events("prod").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_after_deadline_waits_full_interval() {
        let source = FakeSource::operated();
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(10)).await;
        scheduler.pause("prod");
        assert_eq!(scheduler.state("prod"), RefreshState::Paused);

        sleep(secs(90)).await;
        assert_eq!(source.queries(), 0);

        scheduler.resume("prod");
        assert_eq!(scheduler.state("prod"), RefreshState::Scheduled);
        sleep(secs(29)).await;
        assert_eq!(source.queries(), 0);
        sleep(secs(2)).await;
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_before_deadline_keeps_cadence() {
        let source = FakeSource::operated();
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(10)).await;
        scheduler.set_visible("prod", false);
        sleep(secs(10)).await;
        scheduler.set_visible("prod", true);

        sleep(secs(9)).await;
        assert_eq!(source.queries(), 0);
        sleep(secs(2)).await;
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_lets_running_fetch_apply() {
        let source = FakeSource::operated();
        source.delay_events(secs(10));
        source.push_events(Ok(vec![event_at(1)]));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(35)).await;
        scheduler.pause("prod");

        sleep(secs(6)).await;
        assert_eq!(scheduler.engine().events("prod").len(), 1);
        assert_eq!(scheduler.state("prod"), RefreshState::Paused);

        sleep(secs(200)).await;
        assert_eq!(source.queries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let source = FakeSource::operated();
        source.delay_events(secs(10));
        source.push_events(Ok(vec![event_at(1)]));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(35)).await;
        scheduler.stop("prod");
        assert_eq!(scheduler.state("prod"), RefreshState::Idle);

        sleep(secs(100)).await;
        assert_eq!(source.queries(), 1);
        assert!(scheduler.engine().events("prod").is_empty());
        assert_eq!(scheduler.state("prod"), RefreshState::Idle);
        assert!(scheduler.active_contexts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_keeps_cadence() {
        let source = FakeSource::operated();
        source.push_events(Err(RawError::Transport(
            "connection refused".to_string(),
        )));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(61)).await;
        assert_eq!(source.queries(), 2);
        assert_eq!(scheduler.state("prod"), RefreshState::Scheduled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_scheduler_ends_loops() {
        let source = FakeSource::operated();
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        drop(scheduler);

        sleep(secs(90)).await;
        assert_eq!(source.queries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_retried_next_tick() {
        let source = FakeSource::operated();
        source.fail_pings(RawError::Elapsed(secs(5)));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(31)).await;
        assert_eq!(source.pings.load(Ordering::SeqCst), 1);
        assert_eq!(source.queries(), 0);
        assert_eq!(
            scheduler.engine().last_error("prod").map(|e| e.kind),
            Some(FailureKind::Timeout)
        );
        assert_eq!(scheduler.state("prod"), RefreshState::Scheduled);

        source.recover_pings();
        sleep(secs(30)).await;
        assert_eq!(source.pings.load(Ordering::SeqCst), 2);
        assert_eq!(source.queries(), 1);
        assert!(scheduler.engine().last_error("prod").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthorized_holds_until_resumed() {
        let source = FakeSource::operated();
        source.push_events(Err(forbidden()));
        let scheduler = scheduler_for(&source);

        scheduler.start("prod", INTERVAL);
        sleep(secs(200)).await;
        assert_eq!(source.queries(), 1);
        assert_eq!(scheduler.state("prod"), RefreshState::Paused);

        scheduler.resume("prod");
        sleep(secs(31)).await;
        assert_eq!(source.queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contexts_leaving_registry_are_stopped() {
        let source = FakeSource::operated();
        let registry = registry_with(vec![
            ("prod", Arc::clone(&source)),
            ("dev", FakeSource::operated()),
        ]);
        let scheduler = Arc::new(RefreshScheduler::new(engine_for(Arc::clone(&registry))));
        let follower = scheduler.follow_registry(registry.subscribe());

        scheduler.start("prod", INTERVAL);
        scheduler.start("dev", INTERVAL);
        registry.remove("prod");

        sleep(secs(1)).await;
        assert_eq!(scheduler.active_contexts(), vec!["dev".to_string()]);
        assert_eq!(scheduler.state("prod"), RefreshState::Idle);

        sleep(secs(60)).await;
        assert_eq!(source.queries(), 0);
        follower.abort();
    }
}

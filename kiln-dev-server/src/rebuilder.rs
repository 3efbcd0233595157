//! Debounced, serialized rebuilds.
//!
//! [`Debouncer`] is the pure state machine; [`spawn`] runs it inside a single
//! task that owns the content cache and the build id. Everything else only
//! sends triggers to that task or reads the published build id.

use std::sync::Arc;
use std::time::Duration;

use kiln_core::{BuildError, BuildResult, ContentCache, Site};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Runs one complete build. Implemented by [`Site`].
pub trait Builder: Send + Sync + 'static {
    fn build(&self, cache: ContentCache) -> Result<BuildResult, BuildError>;
}

impl Builder for Site {
    fn build(&self, cache: ContentCache) -> Result<BuildResult, BuildError> {
        Site::build(self, cache)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Debounce timer armed.
    Pending,
    /// A build is in progress; `dirty` records a trigger seen meanwhile.
    Running { dirty: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Trigger,
    TimerFired,
    BuildFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Nothing,
    /// Arm the debounce timer, replacing any armed one.
    ArmTimer,
    StartBuild,
}

#[derive(Debug)]
pub struct Debouncer {
    state: State,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn handle(&mut self, input: Input) -> Action {
        let (next, action) = match (self.state, input) {
            (State::Idle | State::Pending, Input::Trigger) => (State::Pending, Action::ArmTimer),
            (State::Pending, Input::TimerFired) => {
                (State::Running { dirty: false }, Action::StartBuild)
            }
            (State::Running { .. }, Input::Trigger) => (State::Running { dirty: true }, Action::Nothing),
            (State::Running { dirty: true }, Input::BuildFinished) => {
                (State::Pending, Action::ArmTimer)
            }
            (State::Running { dirty: false }, Input::BuildFinished) => (State::Idle, Action::Nothing),
            // Stale timers and completions outside of a run.
            (state, _) => (state, Action::Nothing),
        };
        self.state = next;
        action
    }
}

/// Cheap handle for sending triggers and reading the current build id.
#[derive(Debug, Clone)]
pub struct RebuilderHandle {
    triggers: mpsc::UnboundedSender<()>,
    build_id: watch::Receiver<u64>,
}

impl RebuilderHandle {
    /// Request a rebuild. Returns `false` once the rebuilder has shut down.
    pub fn trigger(&self) -> bool {
        self.triggers.send(()).is_ok()
    }

    /// Id of the last successful build.
    pub fn build_id(&self) -> u64 {
        *self.build_id.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.build_id.clone()
    }

    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (triggers, rx) = mpsc::unbounded_channel();
        let (_, build_id) = watch::channel(0);
        (Self { triggers, build_id }, rx)
    }
}

/// Start the rebuild task. `cache` comes from the initial build, which
/// counts as build id 0.
///
/// The task ends after the last handle is dropped and any running build
/// has finished.
pub fn spawn<B: Builder>(
    builder: Arc<B>,
    cache: ContentCache,
    debounce: Duration,
) -> (RebuilderHandle, JoinHandle<()>) {
    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
    let (id_tx, id_rx) = watch::channel(0u64);
    let actor = Rebuilder {
        builder,
        cache,
        debounce,
        build_id: id_tx,
    };
    let task = tokio::spawn(actor.run(trigger_rx));
    (
        RebuilderHandle {
            triggers: trigger_tx,
            build_id: id_rx,
        },
        task,
    )
}

struct Rebuilder<B> {
    builder: Arc<B>,
    cache: ContentCache,
    debounce: Duration,
    build_id: watch::Sender<u64>,
}

/// A panicking build is reported as an error so the machine still leaves
/// `Running`.
type Outcome = anyhow::Result<BuildResult>;

impl<B: Builder> Rebuilder<B> {
    async fn run(mut self, mut triggers: mpsc::UnboundedReceiver<()>) {
        let mut machine = Debouncer::new();
        let mut deadline: Option<Instant> = None;
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Outcome>();
        let mut closed = false;

        loop {
            let action = tokio::select! {
                trigger = triggers.recv(), if !closed => match trigger {
                    Some(()) => machine.handle(Input::Trigger),
                    None => {
                        closed = true;
                        if !matches!(machine.state(), State::Running { .. }) {
                            break;
                        }
                        Action::Nothing
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    machine.handle(Input::TimerFired)
                }
                Some(outcome) = done_rx.recv() => {
                    self.finish(outcome);
                    if closed {
                        break;
                    }
                    machine.handle(Input::BuildFinished)
                }
            };

            match action {
                Action::Nothing => {}
                Action::ArmTimer => deadline = Some(Instant::now() + self.debounce),
                Action::StartBuild => self.start(done_tx.clone()),
            }
        }
        tracing::debug!("Rebuilder stopped");
    }

    fn start(&self, done: mpsc::UnboundedSender<Outcome>) {
        tracing::info!("Rebuilding");
        let builder = Arc::clone(&self.builder);
        // A failed build must leave the current cache in place.
        let cache = self.cache.clone();
        let build = tokio::task::spawn_blocking(move || builder.build(cache));
        tokio::spawn(async move {
            let outcome = match build.await {
                Ok(result) => result.map_err(anyhow::Error::from),
                Err(e) => Err(anyhow::anyhow!("build panicked: {e}")),
            };
            let _ = done.send(outcome);
        });
    }

    fn finish(&mut self, outcome: Outcome) {
        match outcome {
            Ok(result) => {
                self.build_id.send_modify(|id| *id += 1);
                let id = *self.build_id.borrow();
                for failure in &result.failures {
                    tracing::warn!(%failure, "Document failed");
                }
                tracing::info!(
                    build_id = id,
                    pages = result.pages.len(),
                    failures = result.failures.len(),
                    elapsed_ms = result.elapsed.as_millis() as u64,
                    "Rebuild complete"
                );
                self.cache = result.cache;
            }
            Err(e) => {
                tracing::error!(error = format!("{e:#}"), "Rebuild failed, keeping previous output");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn drive(machine: &mut Debouncer, inputs: &[Input]) -> Vec<Action> {
        inputs.iter().map(|&input| machine.handle(input)).collect()
    }

    #[test]
    fn test_triggers_within_window_coalesce() {
        let mut machine = Debouncer::new();
        let actions = drive(
            &mut machine,
            &[Input::Trigger, Input::Trigger, Input::TimerFired, Input::BuildFinished],
        );
        assert_eq!(
            actions,
            vec![Action::ArmTimer, Action::ArmTimer, Action::StartBuild, Action::Nothing]
        );
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn test_triggers_while_running_schedule_one_follow_up() {
        let mut machine = Debouncer::new();
        let actions = drive(
            &mut machine,
            &[
                Input::Trigger,
                Input::TimerFired,
                Input::Trigger,
                Input::Trigger,
                Input::Trigger,
                Input::BuildFinished,
                Input::TimerFired,
                Input::BuildFinished,
            ],
        );
        let builds = actions.iter().filter(|a| **a == Action::StartBuild).count();
        assert_eq!(builds, 2);
        assert_eq!(actions[5], Action::ArmTimer);
        assert_eq!(machine.state(), State::Idle);
    }

    #[test]
    fn test_stale_inputs_are_ignored() {
        let mut machine = Debouncer::new();
        assert_eq!(machine.handle(Input::TimerFired), Action::Nothing);
        assert_eq!(machine.handle(Input::BuildFinished), Action::Nothing);
        assert_eq!(machine.state(), State::Idle);
    }

    /// Counts builds; each one sleeps for `delay` and failures are scripted.
    struct FakeBuilder {
        builds: AtomicUsize,
        delay: Duration,
        fail: Mutex<Vec<bool>>,
    }

    impl FakeBuilder {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                builds: AtomicUsize::new(0),
                delay,
                fail: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    impl Builder for FakeBuilder {
        fn build(&self, _cache: ContentCache) -> Result<BuildResult, BuildError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail.lock().unwrap().pop().unwrap_or(false) {
                return Err(BuildError::Templates("boom".into()));
            }
            Ok(BuildResult::default())
        }
    }

    async fn wait_for_id(handle: &RebuilderHandle, id: u64) {
        let mut rx = handle.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|current| *current >= id))
            .await
            .expect("build id not reached in time")
            .unwrap();
    }

    #[tokio::test]
    async fn test_two_quick_changes_make_one_rebuild() {
        let builder = FakeBuilder::new(Duration::ZERO);
        let (handle, _task) = spawn(builder.clone(), ContentCache::new(), Duration::from_millis(200));

        assert_eq!(handle.build_id(), 0);
        handle.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.trigger();

        wait_for_id(&handle, 1).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(builder.count(), 1);
        assert_eq!(handle.build_id(), 1);
    }

    #[tokio::test]
    async fn test_changes_during_a_build_cause_one_follow_up() {
        let builder = FakeBuilder::new(Duration::from_millis(300));
        let (handle, _task) = spawn(builder.clone(), ContentCache::new(), Duration::from_millis(50));

        handle.trigger();
        // Let the first build start, then change things while it runs.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(builder.count(), 1);
        for _ in 0..3 {
            handle.trigger();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        wait_for_id(&handle, 2).await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(builder.count(), 2);
        assert_eq!(handle.build_id(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_keeps_build_id() {
        let builder = FakeBuilder::new(Duration::ZERO);
        // Popped from the back: first build fails, second succeeds.
        *builder.fail.lock().unwrap() = vec![false, true];
        let (handle, _task) = spawn(builder.clone(), ContentCache::new(), Duration::from_millis(20));

        handle.trigger();
        tokio::time::timeout(Duration::from_secs(5), async {
            while builder.count() < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.build_id(), 0);

        handle.trigger();
        wait_for_id(&handle, 1).await;
        assert_eq!(handle.build_id(), 1);
    }

    /// Panics on its first build, succeeds afterwards.
    struct PanicOnceBuilder {
        builds: AtomicUsize,
    }

    impl Builder for PanicOnceBuilder {
        fn build(&self, _cache: ContentCache) -> Result<BuildResult, BuildError> {
            if self.builds.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("hook exploded");
            }
            Ok(BuildResult::default())
        }
    }

    #[tokio::test]
    async fn test_panicking_build_does_not_wedge_the_rebuilder() {
        let builder = Arc::new(PanicOnceBuilder {
            builds: AtomicUsize::new(0),
        });
        let (handle, _task) = spawn(builder.clone(), ContentCache::new(), Duration::from_millis(20));

        handle.trigger();
        tokio::time::timeout(Duration::from_secs(5), async {
            while builder.builds.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.build_id(), 0);

        handle.trigger();
        wait_for_id(&handle, 1).await;
        assert_eq!(builder.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stops_when_handles_drop() {
        let builder = FakeBuilder::new(Duration::ZERO);
        let (handle, task) = spawn(builder, ContentCache::new(), Duration::from_millis(20));
        drop(handle);
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Single-task owner of the engine.
//!
//! All calls are queued on one mpsc channel and run to completion in order,
//! so two racing callers can never interleave inside an operation. After a
//! successful mutating call the state is persisted before the caller gets
//! its answer, and the emitted events are broadcast to subscribers. If the
//! persist fails the call is rolled back: the previous state is restored and
//! its events are never broadcast.

use std::sync::Arc;

use rollup_core::RollupEvent;
use thiserror::Error;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::error::RollupError;
use crate::{RollupEngine, RollupState};

const COMMAND_QUEUE_DEPTH: usize = 1024;
const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Error)]
pub enum ActorError {
    #[error(transparent)]
    Engine(#[from] RollupError),
    #[error("persist error: {0}")]
    Persist(#[source] PersistError),
    #[error("engine actor stopped")]
    Closed,
}

impl ActorError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Engine(err) => err.code(),
            Self::Persist(_) => "persist_failed",
            Self::Closed => "engine_stopped",
        }
    }
}

pub type PersistError = Box<dyn std::error::Error + Send + Sync>;

/// Durable sink for the engine state. Called synchronously from the actor.
pub trait StatePersister: Send + Sync {
    fn persist(&self, state: &RollupState) -> Result<(), PersistError>;
}

/// Keeps nothing. For tests and in-memory runs.
pub struct NoopPersister;

impl StatePersister for NoopPersister {
    fn persist(&self, _state: &RollupState) -> Result<(), PersistError> {
        Ok(())
    }
}

/// Persists without stalling other tasks on a multi-threaded runtime.
fn persist_blocking(
    persister: &dyn StatePersister,
    state: &RollupState,
) -> Result<(), PersistError> {
    let multi_thread = Handle::try_current()
        .map(|handle| matches!(handle.runtime_flavor(), RuntimeFlavor::MultiThread))
        .unwrap_or(false);
    if multi_thread {
        tokio::task::block_in_place(|| persister.persist(state))
    } else {
        persister.persist(state)
    }
}

type Job = Box<dyn FnOnce(&mut RollupEngine, &dyn StatePersister) + Send>;

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Job>,
    events: broadcast::Sender<RollupEvent>,
}

impl EngineHandle {
    /// Run a mutating call. The state is persisted before the result is returned.
    pub async fn mutate<T, F>(&self, op: &'static str, f: F) -> Result<T, ActorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut RollupEngine) -> Result<T, RollupError> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |engine, persister| {
            let snapshot = engine.state().clone();
            let result = match f(engine) {
                Ok(value) => match persist_blocking(persister, engine.state()) {
                    Ok(()) => Ok(value),
                    Err(e) => {
                        warn!(op, error = %e, "state persist failed, rolling back");
                        engine.rollback(snapshot);
                        Err(ActorError::Persist(e))
                    }
                },
                Err(err) => {
                    warn!(op, code = err.code(), error = %err, "call rejected");
                    Err(ActorError::Engine(err))
                }
            };
            let _ = reply.send(result);
        });
        self.tx.send(job).await.map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)?
    }

    /// Run a read-only call.
    pub async fn query<T, F>(&self, f: F) -> Result<T, ActorError>
    where
        T: Send + 'static,
        F: FnOnce(&RollupEngine) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Job = Box::new(move |engine, _| {
            let _ = reply.send(f(engine));
        });
        self.tx.send(job).await.map_err(|_| ActorError::Closed)?;
        rx.await.map_err(|_| ActorError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RollupEvent> {
        self.events.subscribe()
    }

    pub async fn activate_evacuation(&self, now: u64) -> Result<(), ActorError> {
        self.mutate("activate_evacuation", move |engine| {
            engine.activate_evacuation(now)
        })
        .await
    }
}

pub fn spawn(engine: RollupEngine, persister: Arc<dyn StatePersister>) -> EngineHandle {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    tokio::spawn(run_loop(engine, persister, rx, events.clone()));
    EngineHandle { tx, events }
}

async fn run_loop(
    mut engine: RollupEngine,
    persister: Arc<dyn StatePersister>,
    mut rx: mpsc::Receiver<Job>,
    events: broadcast::Sender<RollupEvent>,
) {
    info!("engine actor started");
    while let Some(job) = rx.recv().await {
        job(&mut engine, persister.as_ref());
        for event in engine.take_events() {
            debug!(event = event.name(), "broadcasting event");
            // No subscribers is fine.
            let _ = events.send(event);
        }
    }
    info!("engine actor stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use rollup_core::{Address, StaticVerifier};

    use super::*;
    use crate::{EngineConfig, TokenInfo};

    fn engine() -> RollupEngine {
        RollupEngine::new(
            EngineConfig::default(),
            [TokenInfo {
                token_id: 1,
                l1_address: Address([0xEE; 20]),
                decimals: 8,
            }],
            Arc::new(StaticVerifier::accept_all()),
            Arc::new(StaticVerifier::accept_all()),
        )
    }

    #[derive(Default)]
    struct CountingPersister {
        calls: AtomicUsize,
    }

    impl StatePersister for CountingPersister {
        fn persist(&self, _state: &RollupState) -> Result<(), PersistError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails while `failing` is set.
    #[derive(Default)]
    struct FlakyPersister {
        failing: AtomicBool,
    }

    impl StatePersister for FlakyPersister {
        fn persist(&self, _state: &RollupState) -> Result<(), PersistError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err("disk full".into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn mutations_persist_and_broadcast() {
        let persister = Arc::new(CountingPersister::default());
        let handle = spawn(engine(), Arc::clone(&persister) as Arc<dyn StatePersister>);
        let mut events = handle.subscribe();

        let account = handle
            .mutate("register", |engine| engine.register(Address([1; 20]), 1, 10, 5))
            .await
            .expect("register");
        assert_eq!(account, 1);
        assert_eq!(persister.calls.load(Ordering::SeqCst), 1);

        let first = events.recv().await.expect("event");
        assert_eq!(first.name(), "request_enqueued");
        let second = events.recv().await.expect("event");
        assert_eq!(second.name(), "request_enqueued");

        let total = handle
            .query(|engine| engine.request_counters().total)
            .await
            .expect("query");
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn rejected_calls_do_not_persist() {
        let persister = Arc::new(CountingPersister::default());
        let handle = spawn(engine(), Arc::clone(&persister) as Arc<dyn StatePersister>);

        let err = handle.activate_evacuation(0).await.unwrap_err();
        assert_eq!(err.code(), "no_pending_requests");
        assert_eq!(persister.calls.load(Ordering::SeqCst), 0);
    }

    async fn register_through(persister: Arc<FlakyPersister>) {
        let handle = spawn(engine(), Arc::clone(&persister) as Arc<dyn StatePersister>);
        let mut events = handle.subscribe();

        persister.failing.store(true, Ordering::SeqCst);
        let err = handle
            .mutate("register", |engine| engine.register(Address([1; 20]), 1, 10, 5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "persist_failed");
        assert_eq!(err.to_string(), "persist error: disk full");

        let (total, account) = handle
            .query(|engine| {
                (
                    engine.request_counters().total,
                    engine.account_of(&Address([1; 20])),
                )
            })
            .await
            .expect("query");
        assert_eq!(total, 0);
        assert_eq!(account, None);

        persister.failing.store(false, Ordering::SeqCst);
        let account = handle
            .mutate("register", |engine| engine.register(Address([1; 20]), 1, 10, 6))
            .await
            .expect("retry");
        assert_eq!(account, 1);

        // Only the retry's events reach subscribers.
        for _ in 0..2 {
            match events.recv().await.expect("event") {
                RollupEvent::RequestEnqueued { enqueued_at, .. } => assert_eq!(enqueued_at, 6),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn persist_failure_rolls_back() {
        register_through(Arc::new(FlakyPersister::default())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn persist_failure_rolls_back_on_worker_pool() {
        register_through(Arc::new(FlakyPersister::default())).await;
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() {
        let handle = spawn(engine(), Arc::new(NoopPersister));
        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .mutate("register", move |engine| {
                        engine.register(Address([i + 1; 20]), 1, 10, 5)
                    })
                    .await
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.expect("join").expect("register"));
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u32>>());
        let counters = handle.query(|engine| engine.request_counters()).await.unwrap();
        assert_eq!(counters.total, 16);
    }
}

//! Training Coordinator
//!
//! Owns the live generation and enforces the training discipline:
//!
//! - at most one training run at a time (a second request is rejected, never queued)
//! - a cooldown window after every successful run
//! - the new generation is swapped in atomically on success only
//!
//! Phase transitions happen under a single mutex so two simultaneous requests
//! cannot both observe `Idle`. Readers take the live generation through a
//! separate `RwLock` whose write side is held only for the pointer swap.

use crate::error::{RecommenderError, Result};
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Used by tests to step through cooldown windows without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    Idle,
    Training,
    /// A run completed successfully less than one cooldown window ago
    Cooldown,
}

#[derive(Debug, Default)]
struct PhaseState {
    training: bool,
    last_completed: Option<DateTime<Utc>>,
}

pub struct TrainingCoordinator<G> {
    cooldown: chrono::Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<PhaseState>,
    live: RwLock<Option<Arc<G>>>,
}

impl<G> TrainingCoordinator<G> {
    pub fn new(cooldown: std::time::Duration) -> Self {
        Self::with_clock(cooldown, Arc::new(SystemClock))
    }

    pub fn with_clock(cooldown: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        let cooldown = chrono::Duration::from_std(cooldown)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        Self {
            cooldown,
            clock,
            state: Mutex::new(PhaseState::default()),
            live: RwLock::new(None),
        }
    }

    /// Run `train` under the single-flight and cooldown policy.
    ///
    /// `train` receives the start time of the run. On success its result
    /// becomes the live generation; on failure (or panic) the previous
    /// generation stays live and the phase returns to idle.
    pub fn try_train<F>(&self, train: F) -> Result<Arc<G>>
    where
        F: FnOnce(DateTime<Utc>) -> Result<G>,
    {
        let guard = self.begin()?;
        let started_at = self.clock.now();
        tracing::info!("Training started");

        match train(started_at) {
            Ok(generation) => {
                let generation = Arc::new(generation);
                guard.complete(Arc::clone(&generation));
                tracing::info!(
                    elapsed_ms = (self.clock.now() - started_at).num_milliseconds(),
                    "Training completed, new generation is live"
                );
                Ok(generation)
            }
            Err(e) => {
                tracing::error!("Training failed, keeping previous generation: {}", e);
                Err(e)
            }
        }
    }

    fn begin(&self) -> Result<TrainingGuard<'_, G>> {
        let mut state = self.lock_state();

        if state.training {
            tracing::warn!("Rejected training request: training already in progress");
            return Err(RecommenderError::TrainingInProgress);
        }

        if let Some(remaining_seconds) = self.remaining_in(&state) {
            tracing::warn!(
                remaining_seconds,
                "Rejected training request: cooldown in effect"
            );
            return Err(RecommenderError::CooldownActive { remaining_seconds });
        }

        state.training = true;
        Ok(TrainingGuard {
            coordinator: self,
            completed: false,
        })
    }

    /// The live generation, if any run has completed
    pub fn current(&self) -> Option<Arc<G>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Make a generation live without starting a cooldown (startup restore)
    pub fn install(&self, generation: G) -> Arc<G> {
        let generation = Arc::new(generation);
        self.swap(Arc::clone(&generation));
        generation
    }

    pub fn phase(&self) -> TrainingPhase {
        let state = self.lock_state();
        if state.training {
            TrainingPhase::Training
        } else if self.remaining_in(&state).is_some() {
            TrainingPhase::Cooldown
        } else {
            TrainingPhase::Idle
        }
    }

    pub fn last_completed(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_completed
    }

    /// Whole seconds left in the cooldown window, if one is active
    pub fn remaining_cooldown(&self) -> Option<u64> {
        let state = self.lock_state();
        self.remaining_in(&state)
    }

    fn remaining_in(&self, state: &PhaseState) -> Option<u64> {
        let last = state.last_completed?;
        let elapsed = self.clock.now() - last;
        if elapsed >= self.cooldown {
            return None;
        }
        let remaining = (self.cooldown - elapsed).min(self.cooldown);
        let millis = remaining.num_milliseconds().max(0) as u64;
        Some(millis.div_ceil(1000))
    }

    fn swap(&self, generation: Arc<G>) {
        let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
        *live = Some(generation);
    }

    fn lock_state(&self) -> MutexGuard<'_, PhaseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Marks a run in flight; clears the flag on every exit path
struct TrainingGuard<'a, G> {
    coordinator: &'a TrainingCoordinator<G>,
    completed: bool,
}

impl<G> TrainingGuard<'_, G> {
    fn complete(mut self, generation: Arc<G>) {
        let mut state = self.coordinator.lock_state();
        self.coordinator.swap(generation);
        state.last_completed = Some(self.coordinator.clock.now());
        state.training = false;
        self.completed = true;
    }
}

impl<G> Drop for TrainingGuard<'_, G> {
    fn drop(&mut self) {
        if !self.completed {
            self.coordinator.lock_state().training = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn coordinator_with_clock() -> (Arc<TrainingCoordinator<u32>>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let coordinator = Arc::new(TrainingCoordinator::with_clock(
            Duration::from_secs(120),
            clock.clone(),
        ));
        (coordinator, clock)
    }

    #[test]
    fn test_successful_run_swaps_generation() {
        let (coordinator, _clock) = coordinator_with_clock();
        assert!(coordinator.current().is_none());
        assert_eq!(coordinator.phase(), TrainingPhase::Idle);

        let generation = coordinator.try_train(|_| Ok(7)).unwrap();
        assert_eq!(*generation, 7);
        assert_eq!(coordinator.current().as_deref(), Some(&7));
        assert_eq!(coordinator.phase(), TrainingPhase::Cooldown);
        assert!(coordinator.last_completed().is_some());
    }

    #[test]
    fn test_cooldown_rejects_then_expires() {
        let (coordinator, clock) = coordinator_with_clock();
        coordinator.try_train(|_| Ok(1)).unwrap();

        clock.advance(chrono::Duration::seconds(1));
        match coordinator.try_train(|_| Ok(2)) {
            Err(RecommenderError::CooldownActive { remaining_seconds }) => {
                assert_eq!(remaining_seconds, 119);
            }
            other => panic!("expected cooldown rejection, got {:?}", other.map(|g| *g)),
        }
        assert_eq!(coordinator.current().as_deref(), Some(&1));

        clock.advance(chrono::Duration::seconds(120));
        assert_eq!(*coordinator.try_train(|_| Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_concurrent_request_rejected_while_training() {
        let (coordinator, _clock) = coordinator_with_clock();
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                coordinator.try_train(move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(10)
                })
            })
        };

        started_rx.recv().unwrap();
        assert_eq!(coordinator.phase(), TrainingPhase::Training);
        assert!(matches!(
            coordinator.try_train(|_| Ok(11)),
            Err(RecommenderError::TrainingInProgress)
        ));

        release_tx.send(()).unwrap();
        let result = worker.join().unwrap();
        assert_eq!(*result.unwrap(), 10);
        assert_eq!(coordinator.current().as_deref(), Some(&10));
    }

    #[test]
    fn test_simultaneous_requests_single_flight() {
        let (coordinator, _clock) = coordinator_with_clock();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    coordinator.try_train(|_| {
                        thread::sleep(Duration::from_millis(50));
                        Ok(i)
                    })
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().filter_map(|r| r.as_ref().err()).all(|e| matches!(
            e,
            RecommenderError::TrainingInProgress | RecommenderError::CooldownActive { .. }
        )));
    }

    #[test]
    fn test_failure_keeps_previous_generation() {
        let (coordinator, clock) = coordinator_with_clock();
        coordinator.try_train(|_| Ok(1)).unwrap();
        let completed = coordinator.last_completed();
        clock.advance(chrono::Duration::seconds(121));

        let result = coordinator.try_train(|_| Err(RecommenderError::Internal("boom".into())));
        assert!(matches!(result, Err(RecommenderError::Internal(_))));
        assert_eq!(coordinator.current().as_deref(), Some(&1));
        assert_eq!(coordinator.phase(), TrainingPhase::Idle);
        assert_eq!(coordinator.last_completed(), completed);

        // not blocked by the failed attempt
        assert!(coordinator.try_train(|_| Ok(2)).is_ok());
    }

    #[test]
    fn test_panic_during_training_resets_phase() {
        let (coordinator, _clock) = coordinator_with_clock();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = coordinator.try_train(|_| -> Result<u32> { panic!("fit exploded") });
        }));
        assert!(result.is_err());
        assert_eq!(coordinator.phase(), TrainingPhase::Idle);
        assert!(coordinator.current().is_none());
        assert!(coordinator.try_train(|_| Ok(5)).is_ok());
    }

    #[test]
    fn test_install_does_not_start_cooldown() {
        let (coordinator, _clock) = coordinator_with_clock();
        coordinator.install(42);
        assert_eq!(coordinator.current().as_deref(), Some(&42));
        assert_eq!(coordinator.phase(), TrainingPhase::Idle);
        assert!(coordinator.remaining_cooldown().is_none());
    }

    #[test]
    fn test_readers_keep_their_snapshot_across_swap() {
        let (coordinator, clock) = coordinator_with_clock();
        coordinator.try_train(|_| Ok(1)).unwrap();
        let snapshot = coordinator.current().unwrap();

        clock.advance(chrono::Duration::seconds(200));
        coordinator.try_train(|_| Ok(2)).unwrap();

        assert_eq!(*snapshot, 1);
        assert_eq!(coordinator.current().as_deref(), Some(&2));
    }
}

//! Stop-the-world rendezvous for mutator threads.
//!
//! Every mutator calls [`Safepoint::arrive_and_wait`] before a cycle. The
//! call returns once as many threads have arrived as the executor reports
//! running. The last arrival resets the counter and bumps the generation,
//! so the same barrier serves every cycle.
//!
//! A mutator that never arrives blocks the others forever. Keeping the
//! executor's thread count in step with the threads that actually reach the
//! barrier is the caller's job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::GcError;
use crate::runtime::MutatorThreads;

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// Reusable barrier sized by the executor's mutator thread count.
pub struct Safepoint {
    state: Mutex<BarrierState>,
    released: Condvar,
    threads: Arc<dyn MutatorThreads>,
    hang_warning: Option<Duration>,
}

impl Safepoint {
    /// A barrier whose quorum is `threads.thread_count()`.
    #[must_use]
    pub fn new(threads: Arc<dyn MutatorThreads>) -> Self {
        Self {
            state: Mutex::new(BarrierState::default()),
            released: Condvar::new(),
            threads,
            hang_warning: None,
        }
    }

    /// Log a warning each time `interval` passes while a thread is still
    /// waiting in [`arrive_and_wait`](Self::arrive_and_wait).
    #[must_use]
    pub const fn with_hang_warning(mut self, interval: Option<Duration>) -> Self {
        self.hang_warning = interval;
        self
    }

    /// Threads waiting at the barrier right now.
    #[must_use]
    pub fn arrived(&self) -> usize {
        self.state.lock().arrived
    }

    /// How many times the barrier has released.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Threads the barrier currently waits for.
    #[must_use]
    pub fn expected(&self) -> usize {
        self.threads.thread_count()
    }

    /// Arrive and block until every mutator has arrived.
    pub fn arrive_and_wait(&self) {
        let mut state = self.state.lock();
        let generation = state.generation;
        if self.arrive(&mut state) {
            return;
        }

        while state.generation == generation {
            match self.hang_warning {
                None => self.released.wait(&mut state),
                Some(interval) => {
                    if self.released.wait_for(&mut state, interval).timed_out()
                        && state.generation == generation
                    {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(
                            arrived = state.arrived,
                            expected = self.expected(),
                            "safepoint still waiting for mutators"
                        );
                    }
                }
            }
        }
    }

    /// Arrive and block for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`GcError::SafepointTimeout`] if the quorum was not reached in
    /// time. The caller's arrival is withdrawn, so a later call counts once.
    pub fn arrive_and_wait_timeout(&self, timeout: Duration) -> Result<(), GcError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        let generation = state.generation;
        if self.arrive(&mut state) {
            return Ok(());
        }

        while state.generation == generation {
            if self.released.wait_until(&mut state, deadline).timed_out()
                && state.generation == generation
            {
                let arrived = state.arrived;
                state.arrived -= 1;
                return Err(GcError::SafepointTimeout {
                    arrived,
                    expected: self.expected(),
                });
            }
        }
        Ok(())
    }

    /// Count one arrival. Returns `true` if it completed the quorum, in which
    /// case the waiters have been released.
    fn arrive(&self, state: &mut BarrierState) -> bool {
        state.arrived += 1;
        if state.arrived < self.expected() {
            return false;
        }
        state.arrived = 0;
        state.generation = state.generation.wrapping_add(1);
        self.released.notify_all();
        true
    }
}

impl std::fmt::Debug for Safepoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Safepoint")
            .field("arrived", &state.arrived)
            .field("generation", &state.generation)
            .field("expected", &self.expected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Safepoint;
    use crate::error::GcError;
    use crate::runtime::ThreadRegistry;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_single_thread_passes_through() {
        let safepoint = Safepoint::new(Arc::new(ThreadRegistry::with_count(1)));
        safepoint.arrive_and_wait();
        safepoint.arrive_and_wait();
        assert_eq!(safepoint.generation(), 2);
        assert_eq!(safepoint.arrived(), 0);
    }

    #[test]
    fn test_timeout_withdraws_arrival() {
        let safepoint = Safepoint::new(Arc::new(ThreadRegistry::with_count(2)));

        let result = safepoint.arrive_and_wait_timeout(Duration::from_millis(10));

        assert_eq!(
            result,
            Err(GcError::SafepointTimeout {
                arrived: 1,
                expected: 2
            })
        );
        assert_eq!(safepoint.arrived(), 0);
        assert_eq!(safepoint.generation(), 0);
    }
}

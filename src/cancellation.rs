//! Liveness tokens: CancellationToken + generation guard.
//! Ensures a superseded or torn-down request cannot write its result.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

struct GenerationState {
    generation: u64,
    token: CancellationToken,
}

/// Manages request generations for one consumer. Each new request advances
/// the generation, cancels all prior requests, and issues a fresh token.
#[derive(Clone)]
pub struct TaskGeneration {
    state: Arc<Mutex<GenerationState>>,
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(GenerationState {
                generation: 0,
                token: CancellationToken::new(),
            })),
        }
    }

    /// Cancel everything in flight, advance, and return a guard for the new generation.
    pub fn cancel_and_advance(&self) -> GenerationGuard {
        let mut state = self.state.lock();
        state.token.cancel();
        state.token = CancellationToken::new();
        state.generation += 1;
        GenerationGuard {
            state: Arc::clone(&self.state),
            my_generation: state.generation,
            token: state.token.child_token(),
        }
    }

    /// Guard for the current generation without cancelling anything.
    pub fn guard(&self) -> GenerationGuard {
        let state = self.state.lock();
        GenerationGuard {
            state: Arc::clone(&self.state),
            my_generation: state.generation,
            token: state.token.child_token(),
        }
    }

    pub fn current_generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Invalidate every outstanding guard (teardown).
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.token.cancel();
        state.token = CancellationToken::new();
        state.generation += 1;
    }
}

/// Checked by a request before it writes results.
/// If the generation has moved past `my_generation`, the request is stale.
#[derive(Clone)]
pub struct GenerationGuard {
    state: Arc<Mutex<GenerationState>>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    /// Returns true if this request is still the current generation.
    #[inline]
    pub fn is_current(&self) -> bool {
        self.state.lock().generation == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    /// Run `apply` only if still current. The generation cannot advance while
    /// `apply` runs, so a result is never written after invalidation.
    pub fn commit<F: FnOnce()>(&self, apply: F) -> bool {
        let state = self.state.lock();
        if state.generation != self.my_generation || self.token.is_cancelled() {
            return false;
        }
        apply();
        drop(state);
        true
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}

//! Tracks the in-flight generation per (scope, step) so that a newer
//! request cancels the one it supersedes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use strum_macros::{AsRefStr, Display};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Step {
    Framing,
    Questions,
    Analysis,
}

type Key = (String, Step);

#[derive(Debug, Default)]
struct Inner {
    next_generation: AtomicU64,
    running: Mutex<HashMap<Key, (u64, CancellationToken)>>,
}

#[derive(Debug, Clone, Default)]
pub struct InflightRegistry {
    inner: Arc<Inner>,
}

impl InflightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new invocation, canceling any earlier one for the same key.
    pub fn begin(&self, scope: &str, step: Step) -> InflightGuard {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let key = (scope.to_string(), step);
        let previous = self
            .inner
            .running
            .lock()
            .insert(key.clone(), (generation, token.clone()));
        if let Some((_, earlier)) = previous {
            info!(%step, "superseding in-flight request");
            earlier.cancel();
        }
        InflightGuard {
            registry: self.clone(),
            key,
            generation,
            token,
        }
    }

    pub fn running(&self) -> usize {
        self.inner.running.lock().len()
    }
}

/// Holds the cancellation token of one invocation and deregisters it on drop
/// unless a newer invocation has taken its place.
#[derive(Debug)]
pub struct InflightGuard {
    registry: InflightRegistry,
    key: Key,
    generation: u64,
    token: CancellationToken,
}

impl InflightGuard {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut running = self.registry.inner.running.lock();
        if running.get(&self.key).map(|(g, _)| *g) == Some(self.generation) {
            running.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_request_cancels_older() {
        let registry = InflightRegistry::new();
        let first = registry.begin("ctx-1", Step::Questions);
        let second = registry.begin("ctx-1", Step::Questions);
        assert!(first.token().is_cancelled());
        assert!(!second.token().is_cancelled());

        drop(first);
        assert_eq!(registry.running(), 1);
        drop(second);
        assert_eq!(registry.running(), 0);
    }

    #[test]
    fn different_steps_do_not_interfere() {
        let registry = InflightRegistry::new();
        let questions = registry.begin("ctx-1", Step::Questions);
        let analysis = registry.begin("ctx-1", Step::Analysis);
        let other = registry.begin("ctx-2", Step::Questions);
        assert!(!questions.token().is_cancelled());
        assert!(!analysis.token().is_cancelled());
        assert!(!other.token().is_cancelled());
        assert_eq!(registry.running(), 3);
    }
}

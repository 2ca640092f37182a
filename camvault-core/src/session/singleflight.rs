//! Singleflight for session acquisition.
//!
//! Wraps the `async_singleflight` crate so that concurrent callers
//! needing a session for the same device share one authentication
//! attempt instead of each opening their own. Duplicate login attempts
//! are what trip device-side lockouts, so this is the central defense.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

/// Error type for singleflight operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleFlightError<E> {
    /// The leader task panicked or was cancelled
    #[error("singleflight leader dropped or panicked")]
    LeaderFailed,
    /// The underlying operation failed
    #[error("{0}")]
    Inner(E),
}

/// Deduplicates concurrent executions per key.
///
/// When multiple tasks attempt the same keyed operation simultaneously,
/// one executes and the rest wait for its result.
#[derive(Clone)]
pub struct SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    group: Arc<async_singleflight::Group<K, V, E>>,
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            group: Arc::new(async_singleflight::Group::new()),
        }
    }

    /// Execute `f` at most once per key among concurrent callers.
    ///
    /// If another call for the same key is in flight, waits for that
    /// result instead of executing again. `Err(None)` from the library
    /// means the leader was dropped; that maps to `LeaderFailed`.
    pub async fn run<Fut>(&self, key: K, f: Fut) -> Result<V, SingleFlightError<E>>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        self.group.work(&key, f).await.map_err(|opt_err| match opt_err {
            Some(inner) => SingleFlightError::Inner(inner),
            None => SingleFlightError::LeaderFailed,
        })
    }
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

//! Callback registration and delivery rounds.
//!
//! Callbacks run with the registry lock released, so a callback may add or
//! remove callbacks (itself included) while a round is in progress. The round
//! keeps a cursor into the callback list that removals adjust, and a round
//! boundary that keeps callbacks added mid-round out of that round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::changeset::Changeset;
use crate::error::NotifyError;

/// Callback invoked on the owning thread.
pub type CallbackFn = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Payload handed to callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// The collection changed (or, for a new callback, the initial state is
    /// available and the changeset is empty)
    Changed(Arc<Changeset>),
    /// Computing the changes failed. Delivered once, after which every
    /// callback is dropped
    Failed(NotifyError),
}

impl Notification {
    pub fn changes(&self) -> Option<&Changeset> {
        match self {
            Notification::Changed(changes) => Some(changes),
            Notification::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&NotifyError> {
        match self {
            Notification::Changed(_) => None,
            Notification::Failed(error) => Some(error),
        }
    }
}

/// Identifies a registered callback. Never reused within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackToken(u64);

struct Callback {
    func: CallbackFn,
    token: CallbackToken,
    initial_delivered: bool,
}

#[derive(Default)]
struct Registry {
    callbacks: Vec<Callback>,
    next_token: u64,
    /// Next index to visit in the running round
    cursor: Option<usize>,
    /// Callbacks at or past this index were added after the round started
    round_end: usize,
}

/// Thread-safe list of callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    registry: Mutex<Registry>,
    have_callbacks: AtomicBool,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `func` and returns its token.
    pub fn add(&self, func: CallbackFn) -> CallbackToken {
        let mut registry = self.registry.lock();
        let token = CallbackToken(registry.next_token);
        registry.next_token += 1;
        registry.callbacks.push(Callback {
            func,
            token,
            initial_delivered: false,
        });
        self.have_callbacks.store(true, Ordering::Relaxed);
        token
    }

    /// Unregisters the callback behind `token`. Returns `false` if it was
    /// already gone.
    pub fn remove(&self, token: CallbackToken) -> bool {
        let mut registry = self.registry.lock();
        let Some(index) = registry.callbacks.iter().position(|c| c.token == token) else {
            return false;
        };
        if let Some(cursor) = registry.cursor.as_mut() {
            if index < *cursor {
                *cursor -= 1;
            }
        }
        if index < registry.round_end {
            registry.round_end -= 1;
        }
        registry.callbacks.remove(index);
        if registry.callbacks.is_empty() {
            self.have_callbacks.store(false, Ordering::Relaxed);
        }
        true
    }

    /// Drops every callback.
    pub fn clear(&self) {
        let mut registry = self.registry.lock();
        registry.callbacks.clear();
        registry.cursor = None;
        registry.round_end = 0;
        self.have_callbacks.store(false, Ordering::Relaxed);
    }

    /// Lock-free check used on hot paths. May be momentarily stale.
    pub fn has_callbacks(&self) -> bool {
        self.have_callbacks.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if some callback has not seen its first notification.
    pub fn has_undelivered(&self) -> bool {
        self.registry
            .lock()
            .callbacks
            .iter()
            .any(|c| !c.initial_delivered)
    }

    /// Returns `true` while a delivery round is running.
    pub fn in_round(&self) -> bool {
        self.registry.lock().cursor.is_some()
    }

    /// Runs one delivery round and returns how many callbacks were invoked.
    ///
    /// With an error every callback receives it and the registry is cleared
    /// afterwards. Otherwise callbacks that have not been called yet receive
    /// an empty changeset, and the others receive `changes` unless it is
    /// empty. A call made while a round is running (from inside a callback)
    /// invokes nothing and returns 0.
    pub fn call(&self, changes: &Arc<Changeset>, error: Option<&NotifyError>) -> usize {
        if !self.begin_round() {
            return 0;
        }
        let _round = RoundGuard(self);
        let has_changes = !changes.is_empty();
        let mut initial: Option<Arc<Changeset>> = None;
        let mut invoked = 0;
        while let Some((func, first)) = self.next_callback(has_changes, error.is_some()) {
            let notification = match error {
                Some(error) => Notification::Failed(error.clone()),
                None if first => {
                    Notification::Changed(Arc::clone(initial.get_or_insert_with(Default::default)))
                }
                None => Notification::Changed(Arc::clone(changes)),
            };
            func(&notification);
            invoked += 1;
        }
        tracing::trace!(
            "Callback round invoked {} callbacks (changes: {}, failed: {})",
            invoked,
            has_changes,
            error.is_some()
        );
        if error.is_some() {
            self.clear();
        }
        invoked
    }

    fn begin_round(&self) -> bool {
        let mut registry = self.registry.lock();
        if registry.cursor.is_some() {
            return false;
        }
        registry.cursor = Some(0);
        registry.round_end = registry.callbacks.len();
        true
    }

    fn end_round(&self) {
        self.registry.lock().cursor = None;
    }

    /// Advances the round to the next callback that should run, marking it
    /// delivered. The lock is released before the callback is invoked.
    fn next_callback(&self, has_changes: bool, has_error: bool) -> Option<(CallbackFn, bool)> {
        let mut registry = self.registry.lock();
        let Registry {
            callbacks,
            cursor,
            round_end,
            ..
        } = &mut *registry;
        let index = cursor.as_mut()?;
        while *index < *round_end {
            let callback = &mut callbacks[*index];
            *index += 1;
            if has_error || has_changes || !callback.initial_delivered {
                let first = !callback.initial_delivered;
                callback.initial_delivered = true;
                return Some((Arc::clone(&callback.func), first));
            }
        }
        *cursor = None;
        None
    }
}

/// Ends the round even if a callback panics.
struct RoundGuard<'a>(&'a CallbackRegistry);

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.0.end_round();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::IndexSet;
    use ntest::timeout;
    use std::sync::OnceLock;

    fn changed() -> Arc<Changeset> {
        Arc::new(Changeset {
            insertions: IndexSet::from(0..1),
            ..Default::default()
        })
    }

    fn recorder(log: &Arc<Mutex<Vec<(&'static str, Notification)>>>, name: &'static str) -> CallbackFn {
        let log = Arc::clone(log);
        Arc::new(move |n: &Notification| log.lock().push((name, n.clone())))
    }

    fn names(log: &Arc<Mutex<Vec<(&'static str, Notification)>>>) -> Vec<&'static str> {
        log.lock().drain(..).map(|(name, _)| name).collect()
    }

    #[test]
    #[timeout(1000)]
    fn test_tokens_are_never_reused() {
        let registry = CallbackRegistry::new();
        let a = registry.add(Arc::new(|_| {}));
        assert!(registry.remove(a));
        let b = registry.add(Arc::new(|_| {}));
        assert_ne!(a, b);
        assert!(!registry.remove(a));
        assert!(registry.has_callbacks());
        assert!(registry.remove(b));
        assert!(!registry.has_callbacks());
    }

    #[test]
    #[timeout(1000)]
    fn test_first_delivery_is_empty_then_changes_only() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = CallbackRegistry::new();
        registry.add(recorder(&log, "a"));
        assert!(registry.has_undelivered());

        assert_eq!(registry.call(&changed(), None), 1);
        let first = log.lock().pop().map(|(_, n)| n);
        assert_eq!(first, Some(Notification::Changed(Arc::new(Changeset::default()))));
        assert!(!registry.has_undelivered());

        assert_eq!(registry.call(&Arc::new(Changeset::default()), None), 0);
        assert_eq!(registry.call(&changed(), None), 1);
        let second = log.lock().pop().map(|(_, n)| n);
        assert_eq!(second, Some(Notification::Changed(changed())));
    }

    #[test]
    #[timeout(1000)]
    fn test_error_is_delivered_once_and_clears() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = CallbackRegistry::new();
        registry.add(recorder(&log, "a"));
        registry.add(recorder(&log, "b"));
        let error = NotifyError::SnapshotRead("disk gone".to_string());
        assert_eq!(registry.call(&changed(), Some(&error)), 2);
        assert!(log
            .lock()
            .iter()
            .all(|(_, n)| n.error() == Some(&error)));
        assert!(registry.is_empty());
        assert!(!registry.has_callbacks());
        assert_eq!(registry.call(&changed(), None), 0);
    }

    #[test]
    #[timeout(1000)]
    fn test_callback_removing_itself_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(CallbackRegistry::new());
        registry.add(recorder(&log, "a"));
        let own_token = Arc::new(OnceLock::new());
        let token = {
            let registry_in = Arc::clone(&registry);
            let own_token = Arc::clone(&own_token);
            let log = Arc::clone(&log);
            registry.add(Arc::new(move |n: &Notification| {
                log.lock().push(("self", n.clone()));
                if let Some(token) = own_token.get() {
                    registry_in.remove(*token);
                }
            }))
        };
        own_token.set(token).ok();
        registry.add(recorder(&log, "c"));

        registry.call(&changed(), None);
        assert_eq!(names(&log), vec!["a", "self", "c"]);
        registry.call(&changed(), None);
        assert_eq!(names(&log), vec!["a", "c"]);
    }

    #[test]
    #[timeout(1000)]
    fn test_removing_earlier_and_later_callbacks_mid_round() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(CallbackRegistry::new());
        let first = registry.add(recorder(&log, "a"));
        let tokens: Arc<OnceLock<(CallbackToken, CallbackToken)>> = Arc::new(OnceLock::new());
        {
            let registry_in = Arc::clone(&registry);
            let tokens = Arc::clone(&tokens);
            let log = Arc::clone(&log);
            registry.add(Arc::new(move |n: &Notification| {
                log.lock().push(("b", n.clone()));
                if let Some((earlier, later)) = tokens.get() {
                    registry_in.remove(*earlier);
                    registry_in.remove(*later);
                }
            }));
        }
        let third = registry.add(recorder(&log, "c"));
        registry.add(recorder(&log, "d"));
        tokens.set((first, third)).ok();

        registry.call(&changed(), None);
        assert_eq!(names(&log), vec!["a", "b", "d"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    #[timeout(1000)]
    fn test_callback_added_mid_round_waits_for_next_round() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(CallbackRegistry::new());
        let added = Arc::new(AtomicBool::new(false));
        {
            let registry_in = Arc::clone(&registry);
            let log_in = Arc::clone(&log);
            let added = Arc::clone(&added);
            registry.add(Arc::new(move |n: &Notification| {
                log_in.lock().push(("adder", n.clone()));
                if !added.swap(true, Ordering::SeqCst) {
                    registry_in.add(recorder(&log_in, "late"));
                }
            }));
        }

        registry.call(&changed(), None);
        assert_eq!(names(&log), vec!["adder"]);
        registry.call(&changed(), None);
        assert_eq!(names(&log), vec!["adder", "late"]);
    }

    #[test]
    #[timeout(1000)]
    fn test_nested_round_does_not_disturb_the_running_one() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = Arc::new(CallbackRegistry::new());
        let nested = Arc::new(Mutex::new(Vec::new()));
        {
            let registry_in = Arc::clone(&registry);
            let nested = Arc::clone(&nested);
            let log = Arc::clone(&log);
            registry.add(Arc::new(move |n: &Notification| {
                log.lock().push(("a", n.clone()));
                assert!(registry_in.in_round());
                nested.lock().push(registry_in.call(&changed(), None));
            }));
        }
        registry.add(recorder(&log, "b"));
        registry.add(recorder(&log, "c"));

        assert_eq!(registry.call(&changed(), None), 3);
        assert_eq!(names(&log), vec!["a", "b", "c"]);
        assert_eq!(*nested.lock(), vec![0]);
        assert!(!registry.in_round());
        assert_eq!(registry.call(&changed(), None), 3);
    }

    #[test]
    #[timeout(1000)]
    fn test_panicking_callback_ends_the_round() {
        let registry = CallbackRegistry::new();
        registry.add(Arc::new(|_: &Notification| panic!("callback failed")));
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            registry.call(&changed(), None)
        }));
        assert!(result.is_err());
        assert!(!registry.in_round());
    }
}

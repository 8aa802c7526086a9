use fnv::FnvHashMap;
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::cache::Outcome;

/// Represents a fetch which is currently in progress.
///
/// An operation is a cheap handle which can be cloned and awaited by any number of callers. All of
/// them observe the very same outcome (the identical value or the identical error). Each operation
/// carries a unique id so that the registry can tell two operations for the same key apart.
#[derive(Clone)]
pub struct Operation {
    id: u64,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

impl Operation {
    /// Wraps the given future into a shareable operation.
    pub fn new(id: u64, future: BoxFuture<'static, Outcome>) -> Self {
        Operation {
            id,
            outcome: future.shared(),
        }
    }

    /// Returns the unique id of this operation.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Awaits the outcome of this operation.
    pub async fn wait(self) -> Outcome {
        self.outcome.await
    }

    /// Returns the outcome if the operation has already completed.
    pub fn peek(&self) -> Option<Outcome> {
        self.outcome.peek().cloned()
    }
}

/// Keeps track of all operations which are currently in flight, by their cache key.
///
/// The registry holds an entry for a key if and only if a fetch for this key is in progress. It
/// is used to collapse concurrent requests for the same key into a single fetch. Just like the
/// [EntryStore](crate::cache::EntryStore) this is a plain map without any locking.
#[derive(Default)]
pub struct InflightRegistry {
    operations: FnvHashMap<String, Operation>,
}

impl InflightRegistry {
    /// Creates a new and empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Determines if an operation for the given key is in flight.
    pub fn has(&self, key: &str) -> bool {
        self.operations.contains_key(key)
    }

    /// Returns a handle to the operation for the given key, if one is in flight.
    pub fn get(&self, key: &str) -> Option<Operation> {
        self.operations.get(key).cloned()
    }

    /// Registers the given operation.
    ///
    /// Registering an operation for a key which already has one replaces the previous
    /// registration. The replaced operation keeps running, it is simply no longer found here.
    pub fn register(&mut self, key: String, operation: Operation) {
        let id = operation.id();
        if let Some(previous) = self.operations.insert(key, operation) {
            log::debug!(
                "Operation {} replaced the still registered operation {}.",
                id,
                previous.id()
            );
        }
    }

    /// Removes the operation for the given key. Returns **true** if one was registered.
    pub fn unregister(&mut self, key: &str) -> bool {
        self.operations.remove(key).is_some()
    }

    /// Removes the operation for the given key only if it is the one with the given id.
    ///
    /// A settling operation uses this to remove itself. If it has been replaced in the meantime
    /// (or if the registry was cleared and a new operation registered) the newer one stays.
    pub fn unregister_if(&mut self, key: &str, id: u64) -> bool {
        match self.operations.get(key) {
            Some(operation) if operation.id() == id => self.unregister(key),
            _ => false,
        }
    }

    /// Removes all registrations (without affecting the operations themselves).
    pub fn clear(&mut self) {
        self.operations.clear();
    }

    /// Returns a snapshot of all keys which have an operation in flight.
    pub fn keys(&self) -> Vec<String> {
        self.operations.keys().cloned().collect()
    }

    /// Returns the number of operations in flight.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Determines if no operation at all is in flight.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::{FetchError, InflightRegistry, Operation, Value};
    use futures::FutureExt;
    use std::sync::Arc;

    fn ready(id: u64, value: i32) -> Operation {
        let value: Value = Arc::new(value);
        Operation::new(id, async move { Ok::<Value, FetchError>(value) }.boxed())
    }

    #[test]
    fn registrations_can_be_queried_and_removed() {
        let mut registry = InflightRegistry::new();
        assert_eq!(registry.has("a"), false);

        registry.register("a".to_owned(), ready(1, 1));
        assert_eq!(registry.has("a"), true);
        assert_eq!(registry.get("a").unwrap().id(), 1);
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.unregister("a"), true);
        assert_eq!(registry.unregister("a"), false);
        assert_eq!(registry.is_empty(), true);
    }

    #[test]
    fn double_registration_is_last_writer_wins() {
        let mut registry = InflightRegistry::new();
        registry.register("a".to_owned(), ready(1, 1));
        registry.register("a".to_owned(), ready(2, 2));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().id(), 2);
    }

    #[test]
    fn unregister_if_only_removes_the_matching_operation() {
        let mut registry = InflightRegistry::new();
        registry.register("a".to_owned(), ready(1, 1));
        registry.register("a".to_owned(), ready(2, 2));

        assert_eq!(registry.unregister_if("a", 1), false);
        assert_eq!(registry.has("a"), true);
        assert_eq!(registry.unregister_if("a", 2), true);
        assert_eq!(registry.has("a"), false);
    }

    #[test]
    fn all_waiters_observe_the_identical_outcome() {
        crate::testing::test_async(async {
            let operation = ready(1, 42);
            let first = operation.clone().wait().await.unwrap();
            let second = operation.clone().wait().await.unwrap();

            assert_eq!(Arc::ptr_eq(&first, &second), true);
            assert_eq!(first.downcast::<i32>().ok().map(|value| *value), Some(42));
            assert_eq!(operation.peek().is_some(), true);
        });
    }
}

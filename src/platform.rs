//! Provides a tiny DI like container which keeps the process wide services around.
//!
//! The cache is meant to exist exactly once per process. Rather than keeping it in a global
//! variable, it is created during startup (see [Builder](crate::builder::Builder) or
//! [install](crate::cache::install)) and registered here. Everything else obtains it via
//! [Platform::require](Platform::require). Tests simply create a fresh platform (or a fresh cache)
//! each and therefore never share state.
//!
//! The platform also carries the central **is_running** flag which background tasks (like the
//! config monitor) use to determine when to stop. Once [Platform::terminate](Platform::terminate)
//! has been invoked, all services are released and the flag is cleared.
//!
//! # Examples
//!
//! ```
//! # use std::sync::Arc;
//! # use callisto::platform::Platform;
//! struct Settings {
//!     answer: i32,
//! }
//!
//! let platform = Platform::new();
//! platform.register::<Settings>(Arc::new(Settings { answer: 42 }));
//!
//! assert_eq!(platform.require::<Settings>().answer, 42);
//! assert_eq!(platform.is_running(), true);
//!
//! platform.terminate();
//! assert_eq!(platform.find::<Settings>().is_none(), true);
//! assert_eq!(platform.is_running(), false);
//! ```
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Services = HashMap<TypeId, Arc<dyn Any + Send + Sync>>;

/// Keeps all central services of a process in a single place.
pub struct Platform {
    services: Mutex<Services>,
    is_running: AtomicBool,
}

impl Platform {
    /// Creates a new and empty platform which is considered running.
    pub fn new() -> Arc<Self> {
        Arc::new(Platform {
            services: Mutex::new(HashMap::new()),
            is_running: AtomicBool::new(true),
        })
    }

    fn services(&self) -> MutexGuard<'_, Services> {
        // A panic while holding this lock cannot leave the map in an inconsistent state...
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a service, replacing any previously registered service of the same type.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let _ = self.services().insert(TypeId::of::<T>(), service);
    }

    /// Tries to resolve a previously registered service.
    pub fn find<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.services()
            .get(&TypeId::of::<T>())
            .and_then(|service| service.clone().downcast::<T>().ok())
    }

    /// Resolves a service which is known to be present.
    ///
    /// # Panics
    /// Panics if the requested service was never registered or if the platform is already
    /// shutting down (in which case all services have been released). Code which might run after
    /// [terminate](Platform::terminate) should use [find](Platform::find) instead.
    ///
    /// ```should_panic
    /// # use callisto::platform::Platform;
    /// struct Unknown;
    ///
    /// let platform = Platform::new();
    /// platform.require::<Unknown>();
    /// ```
    pub fn require<T>(&self) -> Arc<T>
    where
        T: Any + Send + Sync,
    {
        if !self.is_running() {
            panic!(
                "A required component ({}) has been requested but the system is already shutting down!",
                std::any::type_name::<T>()
            );
        }

        match self.find::<T>() {
            Some(service) => service,
            None => panic!(
                "A required component ({}) was not available in the platform registry!",
                std::any::type_name::<T>()
            ),
        }
    }

    /// Determines if [terminate](Platform::terminate) has not yet been called.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    /// Releases all services and marks the platform as halted.
    ///
    /// Note that this doesn't abort fetches which are still in flight. These complete on their
    /// own and their results are simply dropped once nobody holds the cache anymore.
    pub fn terminate(&self) {
        self.services().clear();
        self.is_running.store(false, Ordering::Release);
    }
}

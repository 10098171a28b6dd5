use dbnav_core::{DataSource, DomainObject, Node, NodePath, ProgressReporter, SourceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

const POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Default)]
pub struct FakeSourceStats {
    /// Containers listed, in call order.
    pub listed: Vec<NodePath>,
    pub cancelled_calls: usize,
    pub renames: Vec<(String, String)>,
}

impl FakeSourceStats {
    pub fn calls_for(&self, path: &NodePath) -> usize {
        self.listed.iter().filter(|listed| *listed == path).count()
    }
}

#[derive(Default)]
struct FakeSourceState {
    listings: RwLock<HashMap<NodePath, Vec<DomainObject>>>,
    errors: RwLock<HashMap<NodePath, String>>,
    delay: RwLock<Duration>,
    held: Mutex<bool>,
    released: Condvar,
    rename_error: RwLock<Option<String>>,
    listed: Mutex<Vec<NodePath>>,
    renames: Mutex<Vec<(String, String)>>,
    cancelled_calls: AtomicUsize,
}

/// In-memory data source serving fixed listings per container path.
///
/// Latency, failures and a release gate can be injected to drive concurrency
/// scenarios. Clones share state, so a test can keep a handle after giving the
/// source to a model.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<FakeSourceState>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_children(self, container: impl AsRef<str>, children: Vec<DomainObject>) -> Self {
        self.set_children(container, children);
        self
    }

    /// Every listing sleeps this long, checking for cancellation meanwhile.
    pub fn with_delay(self, delay: Duration) -> Self {
        *rwlock_write(&self.state.delay) = delay;
        self
    }

    pub fn with_error(self, container: impl AsRef<str>, message: impl Into<String>) -> Self {
        self.set_error(container, message);
        self
    }

    pub fn with_rename_error(self, message: impl Into<String>) -> Self {
        *rwlock_write(&self.state.rename_error) = Some(message.into());
        self
    }

    pub fn set_children(&self, container: impl AsRef<str>, children: Vec<DomainObject>) {
        rwlock_write(&self.state.listings).insert(parse(container.as_ref()), children);
    }

    pub fn set_error(&self, container: impl AsRef<str>, message: impl Into<String>) {
        rwlock_write(&self.state.errors).insert(parse(container.as_ref()), message.into());
    }

    pub fn clear_error(&self, container: impl AsRef<str>) {
        rwlock_write(&self.state.errors).remove(&parse(container.as_ref()));
    }

    /// Blocks every listing until `release` is called.
    pub fn hold(&self) {
        *mutex_lock(&self.state.held) = true;
    }

    pub fn release(&self) {
        *mutex_lock(&self.state.held) = false;
        self.state.released.notify_all();
    }

    /// Waits until at least `count` listings have started.
    pub fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while mutex_lock(&self.state.listed).len() < count {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(POLL);
        }
        true
    }

    pub fn stats(&self) -> FakeSourceStats {
        FakeSourceStats {
            listed: mutex_lock(&self.state.listed).clone(),
            cancelled_calls: self.state.cancelled_calls.load(Ordering::Relaxed),
            renames: mutex_lock(&self.state.renames).clone(),
        }
    }

    pub fn as_source_arc(&self) -> Arc<dyn DataSource> {
        Arc::new(self.clone())
    }

    fn cancelled(&self) -> SourceError {
        self.state.cancelled_calls.fetch_add(1, Ordering::Relaxed);
        SourceError::Cancelled
    }

    fn wait_while_held(&self, progress: &dyn ProgressReporter) -> Result<(), SourceError> {
        let mut held = mutex_lock(&self.state.held);
        while *held {
            if progress.is_canceled() {
                return Err(self.cancelled());
            }
            held = match self.state.released.wait_timeout(held, POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Ok(())
    }

    fn sleep_delay(&self, progress: &dyn ProgressReporter) -> Result<(), SourceError> {
        let delay = *rwlock_read(&self.state.delay);
        let deadline = Instant::now() + delay;
        while Instant::now() < deadline {
            if progress.is_canceled() {
                return Err(self.cancelled());
            }
            std::thread::sleep(POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
        Ok(())
    }
}

impl DataSource for FakeSource {
    fn list_children(
        &self,
        container: &Node,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<DomainObject>, SourceError> {
        let path = container.path();
        mutex_lock(&self.state.listed).push(path.clone());

        self.wait_while_held(progress)?;
        self.sleep_delay(progress)?;

        if let Some(message) = rwlock_read(&self.state.errors).get(&path) {
            return Err(SourceError::ConnectionFailed(message.clone()));
        }

        let children = rwlock_read(&self.state.listings)
            .get(&path)
            .cloned()
            .unwrap_or_default();

        progress.begin_task(&format!("Listing {}", path), children.len() as u64);
        for _ in &children {
            if progress.is_canceled() {
                return Err(self.cancelled());
            }
            progress.worked(1);
        }

        Ok(children)
    }

    fn rename_object(&self, object: &DomainObject, new_name: &str) -> Result<(), SourceError> {
        if let Some(message) = rwlock_read(&self.state.rename_error).as_ref() {
            return Err(SourceError::Rejected(message.clone()));
        }
        mutex_lock(&self.state.renames).push((object.name.clone(), new_name.to_string()));
        Ok(())
    }
}

fn parse(path: &str) -> NodePath {
    path.parse().unwrap_or_else(|_| panic!("invalid fixture path {:?}", path))
}

fn rwlock_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn rwlock_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

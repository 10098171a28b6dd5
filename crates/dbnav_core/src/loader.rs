use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::events::NavigatorEventKind;
use crate::filter::ContainerFilters;
use crate::model::ModelInner;
use crate::sort::sort_nodes;
use crate::{
    CancelToken, DomainObject, FilterScope, LoadTaskId, NavError, NavigatorEvent, Node, NodePath,
    ProgressReporter, SourceError, apply_filters, sync,
};

type LoadOutcome = Result<Vec<Arc<Node>>, NavError>;

/// A load of one node's children that callers can wait on.
///
/// The caller that started the load owns `initiator`. Other callers join and
/// are counted; the load is abandoned only when the initiator cancels while no
/// joined caller is still waiting, or when the model is disposed.
pub(crate) struct InFlightLoad {
    task_id: LoadTaskId,
    generation: u64,
    initiator: CancelToken,
    joined: AtomicUsize,
    aborted: AtomicBool,
    outcome: Mutex<Option<LoadOutcome>>,
    done: Condvar,
}

impl InFlightLoad {
    fn new(task_id: LoadTaskId, generation: u64, initiator: CancelToken) -> Self {
        Self {
            task_id,
            generation,
            initiator,
            joined: AtomicUsize::new(0),
            aborted: AtomicBool::new(false),
            outcome: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Once this returns `true` it keeps returning `true`; a caller arriving
    /// later starts a new load instead of reviving this one.
    pub fn should_abort(&self) -> bool {
        if self.aborted.load(Ordering::SeqCst) {
            return true;
        }
        if self.initiator.is_cancelled() && self.joined.load(Ordering::SeqCst) == 0 {
            self.aborted.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Registers a waiting caller. Must be called with the node's load slot held.
    fn join(self: &Arc<Self>) -> JoinGuard {
        self.joined.fetch_add(1, Ordering::SeqCst);
        JoinGuard {
            flight: self.clone(),
        }
    }

    /// Waits for the outcome, giving up with `Cancelled` once `cancel` fires.
    fn wait(&self, cancel: &CancelToken, poll: Duration) -> LoadOutcome {
        let mut outcome = sync::lock(&self.outcome);
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            if cancel.is_cancelled() {
                return Err(NavError::Cancelled);
            }
            outcome = match self.done.wait_timeout(outcome, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Blocks until the load has ended, whatever its outcome.
    pub fn wait_done(&self) {
        let mut outcome = sync::lock(&self.outcome);
        while outcome.is_none() {
            outcome = match self.done.wait(outcome) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    fn finish(&self, result: LoadOutcome) {
        *sync::lock(&self.outcome) = Some(result);
        self.done.notify_all();
    }
}

struct JoinGuard {
    flight: Arc<InFlightLoad>,
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        self.flight.joined.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Takes the load slot of `node` once no load is in flight.
///
/// While the returned guard is held no load of `node` can start, so the
/// children list only changes under the caller's control.
pub(crate) fn lock_idle(node: &Node) -> MutexGuard<'_, Option<Arc<InFlightLoad>>> {
    loop {
        let slot = sync::lock(&node.load_slot);
        let Some(flight) = slot.clone() else {
            return slot;
        };
        drop(slot);
        flight.wait_done();
    }
}

/// Progress handed to data sources by load workers.
///
/// Units are recorded on the load task and forwarded to the caller's reporter;
/// cancellation follows the load, not the forwarded reporter.
struct LoadProgress<'a> {
    model: &'a ModelInner,
    flight: &'a InFlightLoad,
    forward: Option<&'a dyn ProgressReporter>,
}

impl ProgressReporter for LoadProgress<'_> {
    fn begin_task(&self, label: &str, total_units: u64) {
        sync::lock(&self.model.tasks).begin(self.flight.task_id, label, total_units);
        if let Some(forward) = self.forward {
            forward.begin_task(label, total_units);
        }
    }

    fn worked(&self, units: u64) {
        sync::lock(&self.model.tasks).worked(self.flight.task_id, units);
        if let Some(forward) = self.forward {
            forward.worked(units);
        }
    }

    fn is_canceled(&self) -> bool {
        self.flight.should_abort()
    }

    fn done(&self) {
        if let Some(forward) = self.forward {
            forward.done();
        }
    }
}

struct TokenProgress<'a>(&'a CancelToken);

impl ProgressReporter for TokenProgress<'_> {
    fn begin_task(&self, _label: &str, _total_units: u64) {}

    fn worked(&self, _units: u64) {}

    fn is_canceled(&self) -> bool {
        self.0.is_cancelled()
    }

    fn done(&self) {}
}

/// Children that survived visibility and filter checks, with their position
/// in the raw listing.
struct Screened {
    objects: Vec<(usize, DomainObject)>,
    filtered: bool,
}

/// Options of path resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    /// When an object is missing only because its parent's filter trimmed it,
    /// list the parent unfiltered and add that object.
    pub add_filtered: bool,
}

impl ModelInner {
    pub(crate) fn children_of(
        self: &Arc<Self>,
        node: &Arc<Node>,
        cancel: &CancelToken,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<Vec<Arc<Node>>, NavError> {
        self.ensure_live(node)?;

        if !node.is_container() {
            return Ok(Vec::new());
        }

        loop {
            if cancel.is_cancelled() {
                return Err(NavError::Cancelled);
            }

            let (flight, _join) = {
                let mut slot = sync::lock(&node.load_slot);

                {
                    let state = node.read();
                    if state.disposed {
                        return Err(NavError::StaleNode(state.path.clone()));
                    }
                    if state.loaded
                        && let Some(children) = &state.children
                    {
                        return Ok(children.clone());
                    }
                }

                match slot.clone() {
                    Some(flight) if flight.should_abort() => {
                        // Abandoned load still winding down; start over once it ends.
                        drop(slot);
                        flight.wait_done();
                        continue;
                    }
                    Some(flight) => {
                        let join = flight.join();
                        (flight, Some(join))
                    }
                    None => (
                        self.start_load(node, &mut slot, cancel, progress.clone())?,
                        None,
                    ),
                }
            };

            match flight.wait(cancel, self.config.wait_poll_interval) {
                // Aborted under a caller that still wants the children.
                Err(NavError::Cancelled)
                    if !cancel.is_cancelled() && !self.disposed.load(Ordering::SeqCst) =>
                {
                    continue;
                }
                outcome => return outcome,
            }
        }
    }

    fn start_load(
        self: &Arc<Self>,
        node: &Arc<Node>,
        slot: &mut MutexGuard<'_, Option<Arc<InFlightLoad>>>,
        cancel: &CancelToken,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) -> Result<Arc<InFlightLoad>, NavError> {
        let (path, generation) = {
            let mut state = node.write();
            state.locked = true;
            (state.path.clone(), state.generation)
        };

        let task_id = {
            let mut tasks = sync::lock(&self.tasks);
            tasks.cleanup_completed(self.config.task_retention);
            tasks.start(&path)
        };
        let flight = Arc::new(InFlightLoad::new(task_id, generation, cancel.clone()));

        **slot = Some(flight.clone());
        self.bus.publish_one(node, NavigatorEventKind::Locked);

        let worker = {
            let model = self.clone();
            let node = node.clone();
            let flight = flight.clone();
            move || model.run_load(node, flight, progress)
        };

        let spawned = std::thread::Builder::new()
            .name(format!("{}-{}", self.config.worker_name_prefix, path))
            .spawn(worker);

        if let Err(e) = spawned {
            **slot = None;
            node.write().locked = false;
            let message = format!("failed to start load worker: {}", e);
            log::error!("Cannot load children of '{}': {}", path, message);
            sync::lock(&self.tasks).fail(task_id, &message);
            self.bus.publish_one(node, NavigatorEventKind::Unlocked);
            return Err(NavError::load_failed(&path, message));
        }

        log::debug!("Loading children of '{}'", path);
        Ok(flight)
    }

    fn run_load(
        self: Arc<Self>,
        node: Arc<Node>,
        flight: Arc<InFlightLoad>,
        progress: Option<Arc<dyn ProgressReporter>>,
    ) {
        let fetched = panic::catch_unwind(AssertUnwindSafe(|| {
            self.fetch(&node, &flight, progress.as_deref())
        }))
        .unwrap_or_else(|_| Err(NavError::load_failed(&node.path(), "data source panicked")));

        self.finish_load(&node, &flight, fetched);
    }

    fn fetch(
        &self,
        node: &Node,
        flight: &InFlightLoad,
        forward: Option<&dyn ProgressReporter>,
    ) -> Result<Screened, NavError> {
        if flight.should_abort() {
            return Err(NavError::Cancelled);
        }

        let path = node.path();
        let object_type = node.object_type();
        let source = self.sources.source_for(&object_type).ok_or_else(|| {
            NavError::load_failed(&path, format!("no data source for '{}'", object_type))
        })?;

        let progress = LoadProgress {
            model: self,
            flight,
            forward,
        };
        let listed = source.list_children(node, &progress);
        progress.done();

        let raw = match listed {
            Ok(raw) => raw,
            Err(_) if flight.should_abort() => return Err(NavError::Cancelled),
            Err(e) => return Err(NavError::load_failed(&path, e.to_string())),
        };

        if flight.should_abort() {
            return Err(NavError::Cancelled);
        }

        Ok(self.screen(&path, raw, true))
    }

    fn screen(&self, container: &NodePath, raw: Vec<DomainObject>, use_filters: bool) -> Screened {
        let show_system = self.settings().show_system_objects;
        let total = raw.len();

        let passed = if use_filters {
            let filters = self.container_filters(container, &raw);
            apply_filters(raw, &filters)
        } else {
            raw.into_iter().enumerate().collect()
        };
        let filtered = passed.len() < total;

        let objects = passed
            .into_iter()
            .filter(|(_, object)| !object.hidden && (show_system || !object.system))
            .collect();

        Screened { objects, filtered }
    }

    fn container_filters(&self, container: &NodePath, raw: &[DomainObject]) -> ContainerFilters {
        let mut filters = ContainerFilters::new();

        let object_types: HashSet<&str> = raw.iter().map(|o| o.object_type.as_str()).collect();
        let scopes = std::iter::once(FilterScope::all(container.clone())).chain(
            object_types
                .into_iter()
                .map(|object_type| FilterScope::of_type(container.clone(), object_type)),
        );

        for scope in scopes {
            let Some(filter) = self.filter_for(&scope) else {
                continue;
            };
            match filter.compile() {
                Ok(compiled) => filters.set(scope.object_type.as_deref(), compiled),
                Err(e) => log::warn!("Ignoring filter of '{}': {}", container, e),
            }
        }

        filters
    }

    fn finish_load(&self, node: &Arc<Node>, flight: &Arc<InFlightLoad>, fetched: Result<Screened, NavError>) {
        let mut slot = sync::lock(&node.load_slot);

        let fetched = match fetched {
            Ok(_) if flight.should_abort() => Err(NavError::Cancelled),
            other => other,
        };

        let mut events = Vec::new();
        let outcome = match fetched {
            Ok(screened) => Ok(self.commit(node, flight, screened, &mut events)),
            Err(e) => {
                let path = {
                    let mut state = node.write();
                    state.locked = false;
                    state.path.clone()
                };

                let mut tasks = sync::lock(&self.tasks);
                match &e {
                    NavError::Cancelled => {
                        log::debug!("Load of '{}' cancelled", path);
                        tasks.cancel(flight.task_id);
                    }
                    other => {
                        log::warn!("{}", other);
                        tasks.fail(flight.task_id, other.to_string());
                    }
                }
                drop(tasks);

                events.push(NavigatorEvent::new(node, NavigatorEventKind::Unlocked));
                Err(e)
            }
        };

        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, flight)) {
            *slot = None;
        }
        self.bus.publish(events);
        drop(slot);

        flight.finish(outcome);
    }

    /// Installs a fetched listing as the node's children.
    ///
    /// Children already present under the same name and kind keep their node;
    /// the rest are created. Previous children missing from the listing are
    /// unregistered and disposed.
    fn commit(
        &self,
        node: &Arc<Node>,
        flight: &InFlightLoad,
        screened: Screened,
        events: &mut Vec<NavigatorEvent>,
    ) -> Vec<Arc<Node>> {
        let policy = self.settings().sort;
        let mut added = Vec::new();

        let (children, removed) = {
            let mut state = node.write();

            let mut previous: HashMap<String, Arc<Node>> = state
                .children
                .take()
                .unwrap_or_default()
                .into_iter()
                .filter_map(|child| {
                    let name = child.read().path.name()?.to_string();
                    Some((name, child))
                })
                .collect();

            let mut seen = HashSet::new();
            let mut dropped = Vec::new();
            let mut children = Vec::with_capacity(screened.objects.len());

            for (index, object) in screened.objects {
                if !seen.insert(object.name.clone()) {
                    log::warn!(
                        "Duplicate object '{}' listed under '{}', keeping the first",
                        object.name,
                        state.path
                    );
                    continue;
                }

                match previous.remove(&object.name) {
                    Some(existing) if existing.kind() == object.kind => {
                        let mut child = existing.write();
                        child.display_name = object.display_name().to_string();
                        child.persisted = object.persisted;
                        child.source_index = index;
                        child.object = Some(object);
                        if child.loaded {
                            child.loaded = false;
                            child.generation += 1;
                        }
                        drop(child);
                        children.push(existing);
                    }
                    replaced => {
                        dropped.extend(replaced);
                        let key = object.key_in(&state.path);
                        let child = Node::new_child(node, key, object, index);
                        added.push(child.clone());
                        children.push(child);
                    }
                }
            }

            sort_nodes(&mut children, policy);

            state.children = Some(children.clone());
            state.filtered = screened.filtered;
            state.loaded = state.generation == flight.generation;
            state.locked = false;

            dropped.extend(previous.into_values());
            (children, dropped)
        };

        for child in &removed {
            self.identity.unregister(child);
            child.dispose_subtree();
        }
        self.identity.register_all(&added);

        sync::lock(&self.tasks).complete(flight.task_id, children.len());
        log::debug!(
            "Loaded {} children of '{}' ({} new, {} removed)",
            children.len(),
            node.path(),
            added.len(),
            removed.len()
        );

        events.push(NavigatorEvent::new(node, NavigatorEventKind::Unlocked));
        events.extend(removed.into_iter().map(|child| {
            NavigatorEvent::new(node, NavigatorEventKind::ChildRemoved { child })
        }));
        events.push(NavigatorEvent::new(
            node,
            NavigatorEventKind::ChildrenReplaced {
                count: children.len(),
            },
        ));

        children
    }

    /// Marks the node's children stale; the next access reloads them.
    pub(crate) fn invalidate(&self, node: &Arc<Node>) {
        if !node.is_container() {
            return;
        }

        let _slot = sync::lock(&node.load_slot);
        {
            let mut state = node.write();
            if state.disposed {
                return;
            }
            state.loaded = false;
            state.generation += 1;
        }
        self.bus.publish_one(node, NavigatorEventKind::Invalidated);
    }

    pub(crate) fn refresh(
        self: &Arc<Self>,
        node: &Arc<Node>,
        cancel: &CancelToken,
    ) -> Result<Vec<Arc<Node>>, NavError> {
        self.ensure_live(node)?;

        let in_flight = sync::lock(&node.load_slot).clone();
        if let Some(flight) = in_flight {
            // Wait for the current load; its outcome is about to be replaced.
            let _join = {
                let _slot = sync::lock(&node.load_slot);
                flight.join()
            };
            match flight.wait(cancel, self.config.wait_poll_interval) {
                Err(NavError::Cancelled) if cancel.is_cancelled() => {
                    return Err(NavError::Cancelled);
                }
                _ => {}
            }
        }

        self.invalidate(node);
        self.children_of(node, cancel, None)
    }

    pub(crate) fn resolve_path(
        self: &Arc<Self>,
        key: &NodePath,
        options: ResolveOptions,
        cancel: &CancelToken,
    ) -> Result<Arc<Node>, NavError> {
        if let Some(node) = self.identity.get(key) {
            return Ok(node);
        }

        let mut current = self.root.clone();
        for depth in 1..=key.depth() {
            let prefix = key.prefix(depth);
            if let Some(node) = self.identity.get(&prefix) {
                current = node;
                continue;
            }

            let children = self.children_of(&current, cancel, None)?;
            let found = children.into_iter().find(|child| child.path() == prefix);

            current = match found {
                Some(child) => child,
                None if options.add_filtered && current.is_filtered() => {
                    self.add_filtered_child(&current, &prefix, cancel)?
                }
                None => return Err(NavError::NotFound(prefix)),
            };
        }

        Ok(current)
    }

    /// Lists `parent` without filters and adds the object keyed `key` to its
    /// children.
    fn add_filtered_child(
        &self,
        parent: &Arc<Node>,
        key: &NodePath,
        cancel: &CancelToken,
    ) -> Result<Arc<Node>, NavError> {
        let parent_path = parent.path();
        let name = key.name().unwrap_or_default();

        let source = self.sources.source_for(&parent.object_type()).ok_or_else(|| {
            NavError::load_failed(&parent_path, "no data source for forced lookup")
        })?;

        let raw = source
            .list_children(parent, &TokenProgress(cancel))
            .map_err(|e| match e {
                SourceError::Cancelled if cancel.is_cancelled() => NavError::Cancelled,
                other => NavError::load_failed(&parent_path, other.to_string()),
            })?;

        let screened = self.screen(&parent_path, raw, false);
        let (index, object) = screened
            .objects
            .into_iter()
            .find(|(_, object)| object.name == name)
            .ok_or_else(|| NavError::NotFound(key.clone()))?;

        let _slot = lock_idle(parent);
        let (child, position) = {
            let mut state = parent.write();
            if state.disposed {
                return Err(NavError::StaleNode(parent_path));
            }

            let children = state.children.get_or_insert_with(Vec::new);
            if let Some(existing) = children.iter().find(|child| &child.path() == key) {
                return Ok(existing.clone());
            }

            let child = Node::new_child(parent, key.clone(), object, index);
            children.push(child.clone());
            sort_nodes(children, self.settings().sort);
            let position = children
                .iter()
                .position(|c| Arc::ptr_eq(c, &child))
                .unwrap_or_default();
            (child, position)
        };

        self.identity.register(&child);
        log::info!("Added filtered object '{}' on request", key);
        self.bus.publish_one(
            parent,
            NavigatorEventKind::ChildAdded {
                child: child.clone(),
                index: position,
            },
        );

        Ok(child)
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use crate::events::NavigatorEventKind;
use crate::loader::lock_idle;
use crate::model::ModelInner;
use crate::sort::sort_nodes;
use crate::{
    CancelToken, DomainObject, NavError, NavigatorEvent, NavigatorModel, Node, NodeCapabilities,
    NodePath, SortPolicy,
};

/// Times a move reloads a target that was unloaded under it.
const MOVE_ATTEMPTS: usize = 3;

/// Sets each child's source index to its current position, so a later
/// re-sort in source order keeps the list as it is now.
fn renumber(children: &[Arc<Node>]) {
    for (index, child) in children.iter().enumerate() {
        child.write().source_index = index;
    }
}

fn position_of(children: &[Arc<Node>], node: &Arc<Node>) -> usize {
    children
        .iter()
        .position(|child| Arc::ptr_eq(child, node))
        .unwrap_or(children.len())
}

/// Why `candidate` can never sit under `target_path`, whatever the node kinds.
fn placement_conflict(target_path: &NodePath, candidate: &Node) -> Option<&'static str> {
    if candidate.is_root() {
        Some("the root cannot be moved")
    } else if target_path.starts_with(&candidate.path()) {
        Some("a node cannot be moved into itself or its descendants")
    } else {
        None
    }
}

/// Rewrites the paths of `node` and its loaded descendants from `from` to `to`.
fn rebase_subtree(node: &Arc<Node>, from: &NodePath, to: &NodePath) -> Vec<Arc<Node>> {
    let mut rebased = Vec::new();
    let mut to_visit = vec![node.clone()];

    while let Some(current) = to_visit.pop() {
        {
            let mut state = current.write();
            if let Some(path) = state.path.rebase(from, to) {
                state.path = path;
            }
            if let Some(children) = &state.children {
                to_visit.extend(children.iter().cloned());
            }
        }
        rebased.push(current);
    }

    rebased
}

impl ModelInner {
    fn insert_child(
        &self,
        parent: &Arc<Node>,
        object: DomainObject,
        index: Option<usize>,
    ) -> Result<Arc<Node>, NavError> {
        self.ensure_live(parent)?;
        if !parent.is_container() {
            return Err(NavError::NotContainer(parent.path()));
        }

        let _slot = lock_idle(parent);
        let (child, index) = {
            let mut state = parent.write();
            if state.disposed {
                return Err(NavError::StaleNode(state.path.clone()));
            }
            if !state.loaded {
                return Err(NavError::NotLoaded(state.path.clone()));
            }

            let key = object.key_in(&state.path);
            let children = state.children.get_or_insert_with(Vec::new);
            if children.iter().any(|child| child.path() == key) {
                return Err(NavError::AlreadyExists(key));
            }

            let index = index.map_or(children.len(), |i| i.min(children.len()));
            let child = Node::new_child(parent, key, object, index);
            children.insert(index, child.clone());
            renumber(children);
            (child, index)
        };

        self.identity.register(&child);
        log::debug!("Inserted '{}' at {}", child.path(), index);
        self.bus.publish_one(
            parent,
            NavigatorEventKind::ChildAdded {
                child: child.clone(),
                index,
            },
        );

        Ok(child)
    }

    fn remove_child(&self, parent: &Arc<Node>, child: &Arc<Node>) -> Result<(), NavError> {
        self.ensure_live(parent)?;
        let child_path = child.path();

        let _slot = lock_idle(parent);
        {
            let mut state = parent.write();
            let children = state
                .children
                .as_mut()
                .ok_or_else(|| NavError::NotFound(child_path.clone()))?;
            let position = children
                .iter()
                .position(|c| Arc::ptr_eq(c, child))
                .ok_or_else(|| NavError::NotFound(child_path.clone()))?;
            children.remove(position);
        }

        self.identity.unregister(child);
        child.dispose_subtree();
        log::debug!("Removed '{}'", child_path);
        self.bus.publish_one(
            parent,
            NavigatorEventKind::ChildRemoved {
                child: child.clone(),
            },
        );

        Ok(())
    }

    /// Rejects a candidate that can never be dropped on `target`.
    fn check_drop(&self, target: &Arc<Node>, candidate: &Arc<Node>) -> Result<(), NavError> {
        let target_path = target.path();
        let candidate_path = candidate.path();

        let reason = if let Some(reason) = placement_conflict(&target_path, candidate) {
            Some(reason)
        } else if !self.capabilities.supports_drop(target, candidate) {
            Some("target does not accept this node")
        } else {
            None
        };

        match reason {
            Some(reason) => {
                log::info!(
                    "Refused to drop '{}' on '{}': {}",
                    candidate_path,
                    target_path,
                    reason
                );
                Err(NavError::drop_rejected(&target_path, &candidate_path, reason))
            }
            None => Ok(()),
        }
    }

    fn move_nodes(
        self: &Arc<Self>,
        nodes: &[Arc<Node>],
        target: &Arc<Node>,
        cancel: &CancelToken,
    ) -> Result<(), NavError> {
        self.ensure_live(target)?;
        for node in nodes {
            self.ensure_live(node)?;
            self.check_drop(target, node)?;
        }

        for _ in 0..MOVE_ATTEMPTS {
            // Name collisions are checked against the full list of the target.
            self.children_of(target, cancel, None)?;
            if self.apply_move(nodes, target)? {
                return Ok(());
            }
            log::debug!("'{}' was unloaded before the move, reloading", target.path());
        }

        Err(NavError::NotLoaded(target.path()))
    }

    /// Moves `nodes` under `target` once no load touches any of them.
    ///
    /// Returns `false` without changing anything when the target lost its
    /// children list before the locks were taken.
    fn apply_move(&self, nodes: &[Arc<Node>], target: &Arc<Node>) -> Result<bool, NavError> {
        let _serial = crate::sync::lock(&self.move_lock);

        let mut lock_order: Vec<Arc<Node>> = vec![target.clone()];
        for node in nodes {
            lock_order.push(node.clone());
            if let Some(parent) = node.parent() {
                lock_order.push(parent);
            }
        }
        lock_order.sort_by_key(|node| node.id());
        lock_order.dedup_by_key(|node| node.id());
        let _slots: Vec<_> = lock_order.iter().map(|node| lock_idle(node)).collect();

        // Loads that ran before the locks may have dropped or replaced nodes.
        self.ensure_live(target)?;
        let target_path = target.path();
        for node in nodes {
            self.ensure_live(node)?;
            if let Some(reason) = placement_conflict(&target_path, node) {
                return Err(NavError::drop_rejected(&target_path, &node.path(), reason));
            }
        }

        let mut names: HashSet<String> = {
            let state = target.read();
            if state.disposed {
                return Err(NavError::StaleNode(target_path));
            }
            if !state.loaded {
                return Ok(false);
            }
            state
                .children
                .iter()
                .flatten()
                .filter_map(|child| child.path().name().map(str::to_string))
                .collect()
        };

        let mut planned = Vec::new();
        for node in nodes {
            let path = node.path();
            let parent = node
                .parent()
                .filter(|parent| !parent.is_disposed())
                .filter(|parent| lock_order.iter().any(|locked| Arc::ptr_eq(locked, parent)))
                .ok_or_else(|| NavError::StaleNode(path.clone()))?;

            if Arc::ptr_eq(&parent, target) {
                continue;
            }

            let name = path.name().unwrap_or_default().to_string();
            if !names.insert(name.clone()) {
                log::info!("Refused to drop '{}': name taken in '{}'", path, target_path);
                return Err(NavError::drop_rejected(
                    &target_path,
                    &path,
                    format!("'{}' already contains '{}'", target_path, name),
                ));
            }

            planned.push((node.clone(), parent, name));
        }

        let mut events = Vec::new();
        let mut moved = Vec::with_capacity(planned.len());

        for (node, parent, name) in planned {
            {
                let mut state = parent.write();
                if let Some(children) = state.children.as_mut() {
                    children.retain(|child| !Arc::ptr_eq(child, &node));
                }
            }
            events.push(NavigatorEvent::new(
                &parent,
                NavigatorEventKind::ChildRemoved {
                    child: node.clone(),
                },
            ));

            // An earlier node of the batch may have been an ancestor and
            // already carried this one along.
            let old_path = node.path();
            let new_path = target_path.child(&name);
            self.identity.unregister(&node);
            let subtree = rebase_subtree(&node, &old_path, &new_path);
            node.write().parent = Arc::downgrade(target);
            self.identity.register_all(&subtree);

            log::debug!("Moved '{}' to '{}'", old_path, new_path);
            moved.push(node);
        }

        if moved.is_empty() {
            return Ok(true);
        }

        let policy = self.settings().sort;
        let children = {
            let mut state = target.write();
            let children = state.children.get_or_insert_with(Vec::new);
            children.extend(moved.iter().cloned());
            if policy != SortPolicy::SOURCE_ORDER {
                sort_nodes(children, policy);
            }
            renumber(children);
            children.clone()
        };

        events.extend(moved.into_iter().map(|child| {
            let index = position_of(&children, &child);
            NavigatorEvent::new(target, NavigatorEventKind::ChildAdded { child, index })
        }));
        self.bus.publish(events);

        Ok(true)
    }

    fn rename(&self, node: &Arc<Node>, new_name: &str) -> Result<(), NavError> {
        self.ensure_live(node)?;
        let path = node.path();

        if !node.kind().capabilities().contains(NodeCapabilities::RENAME) {
            return Err(NavError::RenameRejected {
                path,
                message: format!("{} nodes cannot be renamed", node.kind().label()),
            });
        }
        let parent = node
            .parent()
            .ok_or_else(|| NavError::StaleNode(path.clone()))?;

        if let Some(object) = node.object()
            && let Some(source) = self.sources.source_for(&parent.object_type())
        {
            source
                .rename_object(&object, new_name)
                .map_err(|e| NavError::RenameRejected {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
        }

        let _slot = lock_idle(&parent);

        let collision = parent.cached_children().into_iter().flatten().any(|sibling| {
            !Arc::ptr_eq(&sibling, node) && sibling.name().eq_ignore_ascii_case(new_name)
        });
        if collision {
            log::warn!(
                "Renaming '{}' to '{}' duplicates a sibling name in '{}'",
                path,
                new_name,
                parent.path()
            );
        }

        let old_name = {
            let mut state = node.write();
            if let Some(object) = state.object.as_mut() {
                object.label = Some(new_name.to_string());
            }
            std::mem::replace(&mut state.display_name, new_name.to_string())
        };

        let mut events = vec![NavigatorEvent::new(
            node,
            NavigatorEventKind::Renamed {
                old_name,
                new_name: new_name.to_string(),
            },
        )];

        let policy = self.settings().sort;
        if policy.alphabetical {
            let reordered = {
                let mut state = parent.write();
                match state.children.as_mut() {
                    Some(children) => {
                        let before: Vec<_> = children.iter().map(|c| c.id()).collect();
                        sort_nodes(children, policy);
                        children.iter().map(|c| c.id()).ne(before)
                    }
                    None => false,
                }
            };
            if reordered {
                events.push(NavigatorEvent::new(&parent, NavigatorEventKind::Reordered));
            }
        }

        self.bus.publish(events);
        Ok(())
    }

    fn mark_persisted(&self, node: &Arc<Node>) -> Result<(), NavError> {
        self.ensure_live(node)?;

        {
            let mut state = node.write();
            if state.persisted {
                return Ok(());
            }
            state.persisted = true;
            if let Some(object) = state.object.as_mut() {
                object.persisted = true;
            }
        }

        self.bus.publish_one(node, NavigatorEventKind::Updated);
        Ok(())
    }
}

impl NavigatorModel {
    /// Inserts a new child at `index` (appended when `None`).
    ///
    /// The parent's children must be loaded. The child keeps the given
    /// position until the parent is reloaded or re-sorted.
    pub fn insert_child(
        &self,
        parent: &Arc<Node>,
        object: DomainObject,
        index: Option<usize>,
    ) -> Result<Arc<Node>, NavError> {
        self.inner.insert_child(parent, object, index)
    }

    /// Removes `child` and its whole subtree.
    pub fn remove_child(&self, parent: &Arc<Node>, child: &Arc<Node>) -> Result<(), NavError> {
        self.inner.remove_child(parent, child)
    }

    /// Moves `nodes` under `target` as one change.
    ///
    /// Every candidate is validated first; if any is refused the call fails with
    /// `DropRejected` and no parent changes. Listeners get all removals and
    /// additions in a single batch.
    pub fn move_nodes(
        &self,
        nodes: &[Arc<Node>],
        target: &Arc<Node>,
        cancel: &CancelToken,
    ) -> Result<(), NavError> {
        self.inner.move_nodes(nodes, target, cancel)
    }

    /// Changes the display name of `node`. The identity key stays the same.
    pub fn rename(&self, node: &Arc<Node>, new_name: &str) -> Result<(), NavError> {
        self.inner.rename(node, new_name)
    }

    pub fn mark_persisted(&self, node: &Arc<Node>) -> Result<(), NavError> {
        self.inner.mark_persisted(node)
    }
}

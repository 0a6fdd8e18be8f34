//! Block tree model: the in-memory document the editor renders.
//!
//! The tree is a [`DocumentSnapshot`] kept valid under a stream of
//! [`Action`]s: every non-root block has exactly one parent and appears
//! exactly once in that parent's child list.
//!
//! Remote batches are not trusted. An action that would break an invariant
//! (cycle, duplicate id, unknown target) is dropped and logged, never
//! returned as an error, because a single bad remote action must not take
//! down a healthy editing session. Inserts whose parent is not known yet
//! are buffered and replayed once the parent arrives; the buffer is bounded
//! in size and in age.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use folio_types::{
    Action, Block, BlockId, BlockPatch, Delta, DocumentSnapshot, InsertPayload, ListId, TextId,
};

use crate::error::TreeError;

/// Maximum expected tree depth. Traversal uses this as a circuit breaker;
/// exceeding it indicates a cycle or corruption.
pub const MAX_TREE_DEPTH: usize = 512;

/// Apply batches a buffered insert survives without its parent appearing.
pub const DEFAULT_PENDING_INSERT_TTL: u32 = 8;

/// Upper bound on buffered inserts; oldest entries are evicted first.
pub const DEFAULT_MAX_PENDING_INSERTS: usize = 256;

/// Tunables for [`BlockTree`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    pub max_depth: usize,
    pub pending_insert_ttl: u32,
    pub max_pending_inserts: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_depth: MAX_TREE_DEPTH,
            pending_insert_ttl: DEFAULT_PENDING_INSERT_TTL,
            max_pending_inserts: DEFAULT_MAX_PENDING_INSERTS,
        }
    }
}

/// Outcome of one [`BlockTree::apply`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Actions from the batch applied directly.
    pub applied: usize,
    /// Inserts parked because their parent is unknown.
    pub buffered: usize,
    /// Previously parked inserts applied during this batch.
    pub replayed: usize,
    /// Actions discarded as invalid.
    pub dropped: usize,
    /// Parked inserts evicted by age or buffer size.
    pub expired: usize,
    /// Update/Move/Delete actions that hit a parked insert and were folded
    /// into it instead of being dropped.
    pub folded: usize,
}

impl ApplyReport {
    /// Whether the batch changed the tree.
    pub fn changed(&self) -> bool {
        self.applied > 0 || self.replayed > 0
    }
}

/// An insert waiting for its parent.
#[derive(Debug)]
struct PendingInsert {
    block_id: BlockId,
    parent_id: BlockId,
    prev_id: Option<BlockId>,
    payload: InsertPayload,
    /// Apply batches seen since buffering.
    age: u32,
}

impl PendingInsert {
    fn action(&self) -> Action {
        Action::Insert {
            block_id: self.block_id.clone(),
            parent_id: self.parent_id.clone(),
            prev_id: self.prev_id.clone(),
            payload: self.payload.clone(),
        }
    }

    fn fold_patch(&mut self, patch: &BlockPatch) {
        if let Some(kind) = patch.kind {
            self.payload.kind = kind;
        }
        if let Some(data) = &patch.data {
            self.payload.data = data.clone();
        }
        if let Some(delta) = &patch.delta {
            self.payload.delta = Some(delta.clone());
        }
    }
}

/// The document tree: block store + child-list store + text store.
#[derive(Debug)]
pub struct BlockTree {
    doc: DocumentSnapshot,
    config: TreeConfig,
    pending: VecDeque<PendingInsert>,
    /// Bumped on every batch that changes the tree.
    version: u64,
}

impl BlockTree {
    /// Build a tree from a snapshot, rejecting structurally invalid input.
    pub fn from_snapshot(snapshot: DocumentSnapshot, config: TreeConfig) -> Result<Self, TreeError> {
        let mut doc = snapshot;
        // A block may legitimately have no children yet; materialize its list.
        let list_ids: Vec<ListId> = doc.blocks.values().map(|b| b.child_list_id.clone()).collect();
        for list_id in list_ids {
            doc.children_by_list.entry(list_id).or_default();
        }
        validate(&doc, config.max_depth)?;
        Ok(Self {
            doc,
            config,
            pending: VecDeque::new(),
            version: 0,
        })
    }

    /// A tree holding only a fresh page root.
    pub fn empty(config: TreeConfig) -> Self {
        Self {
            doc: DocumentSnapshot::empty(),
            config,
            pending: VecDeque::new(),
            version: 0,
        }
    }

    /// Swap in a fresh snapshot (server truth), discarding buffered inserts.
    pub fn replace(&mut self, snapshot: DocumentSnapshot) -> Result<(), TreeError> {
        let fresh = Self::from_snapshot(snapshot, self.config.clone())?;
        self.doc = fresh.doc;
        self.pending.clear();
        self.version += 1;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn root_id(&self) -> &BlockId {
        &self.doc.root_id
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Get the current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of blocks, root included.
    pub fn block_count(&self) -> usize {
        self.doc.blocks.len()
    }

    /// Number of inserts waiting for their parent.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Borrow the underlying snapshot (for the delta bridge).
    pub fn snapshot(&self) -> &DocumentSnapshot {
        &self.doc
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.doc.blocks.contains_key(id)
    }

    pub fn get_node(&self, id: &BlockId) -> Option<&Block> {
        self.doc.blocks.get(id)
    }

    /// Ordered children of a block (empty for unknown blocks).
    pub fn get_children(&self, id: &BlockId) -> &[BlockId] {
        self.doc.children_of(id)
    }

    pub fn parent_of(&self, id: &BlockId) -> Option<&BlockId> {
        self.doc.blocks.get(id).and_then(|b| b.parent_id.as_ref())
    }

    /// Position of a block within its parent's child list.
    pub fn index_in_parent(&self, id: &BlockId) -> Option<usize> {
        let parent = self.parent_of(id)?;
        self.get_children(parent).iter().position(|c| c == id)
    }

    pub fn prev_sibling(&self, id: &BlockId) -> Option<&BlockId> {
        let parent = self.parent_of(id)?;
        let idx = self.index_in_parent(id)?;
        if idx == 0 {
            None
        } else {
            self.get_children(parent).get(idx - 1)
        }
    }

    pub fn next_sibling(&self, id: &BlockId) -> Option<&BlockId> {
        let parent = self.parent_of(id)?;
        let idx = self.index_in_parent(id)?;
        self.get_children(parent).get(idx + 1)
    }

    /// Siblings after `id`, in order.
    pub fn younger_siblings(&self, id: &BlockId) -> &[BlockId] {
        match (self.parent_of(id), self.index_in_parent(id)) {
            (Some(parent), Some(idx)) => &self.get_children(parent)[idx + 1..],
            _ => &[],
        }
    }

    /// Path from the root down to `id`, both inclusive.
    pub fn get_path(&self, id: &BlockId) -> Option<Vec<BlockId>> {
        let mut path = vec![self.doc.blocks.get(id)?.id.clone()];
        let mut current = self.parent_of(id);
        while let Some(pid) = current {
            if path.len() > self.config.max_depth {
                warn!(block_id = %id, "get_path() hit max depth ({}), giving up", self.config.max_depth);
                return None;
            }
            path.push(pid.clone());
            current = self.parent_of(pid);
        }
        path.reverse();
        Some(path)
    }

    /// Depth of a block (0 for the root).
    pub fn depth(&self, id: &BlockId) -> Option<usize> {
        self.get_path(id).map(|p| p.len() - 1)
    }

    /// Whether `ancestor` lies on the parent chain of `id` (or is `id`).
    pub fn is_ancestor_or_self(&self, ancestor: &BlockId, id: &BlockId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(cid) = current {
            if cid == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.config.max_depth {
                return false;
            }
            current = self.parent_of(cid);
        }
        false
    }

    /// Text of a block, if it owns one.
    pub fn delta_of(&self, id: &BlockId) -> Option<&Delta> {
        self.doc.delta_of(id)
    }

    /// Text by text id.
    pub fn text(&self, text_id: &TextId) -> Option<&Delta> {
        self.doc.deltas_by_text_id.get(text_id)
    }

    /// The block visited just before `id` in a depth-first walk.
    ///
    /// That is the deepest last descendant of the previous sibling, or the
    /// parent when `id` is a first child.
    pub fn previous_in_order(&self, id: &BlockId) -> Option<&BlockId> {
        match self.prev_sibling(id) {
            Some(prev) => {
                let mut current = prev;
                let mut steps = 0;
                while let Some(last) = self.get_children(current).last() {
                    steps += 1;
                    if steps > self.config.max_depth {
                        break;
                    }
                    current = last;
                }
                Some(current)
            }
            None => self.parent_of(id),
        }
    }

    /// Descendants of `id` in depth-first order (excluding `id`).
    pub fn descendants(&self, id: &BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack: Vec<&BlockId> = self.get_children(id).iter().rev().collect();
        while let Some(next) = stack.pop() {
            out.push(next.clone());
            stack.extend(self.get_children(next).iter().rev());
        }
        out
    }

    /// Re-run structural validation over the whole tree.
    pub fn check_invariants(&self) -> Result<(), TreeError> {
        validate(&self.doc, self.config.max_depth)
    }

    // =========================================================================
    // Text store
    // =========================================================================

    /// Replace one text (inbound `change` channel).
    ///
    /// Texts may arrive before the block that references them, so unknown
    /// text ids are stored as-is.
    pub fn set_text(&mut self, text_id: TextId, delta: Delta) {
        trace!(text_id = %text_id, ops = delta.ops().len(), "set_text");
        self.doc.deltas_by_text_id.insert(text_id, delta);
        self.version += 1;
    }

    // =========================================================================
    // Applying actions
    // =========================================================================

    /// Apply a batch in array order.
    ///
    /// Never fails: invalid actions are dropped, parentless inserts parked.
    pub fn apply(&mut self, actions: &[Action]) -> ApplyReport {
        let mut report = ApplyReport::default();

        for action in actions {
            match self.apply_one(action) {
                Ok(()) => {
                    report.applied += 1;
                    if matches!(action, Action::Insert { .. }) && !self.pending.is_empty() {
                        report.replayed += self.replay_pending();
                    }
                }
                Err(TreeError::ParentNotFound(_)) if matches!(action, Action::Insert { .. }) => {
                    match self.buffer_insert(action) {
                        Some(evicted) => {
                            report.expired += evicted;
                            report.buffered += 1;
                        }
                        None => report.dropped += 1,
                    }
                }
                Err(TreeError::BlockNotFound(id)) if self.is_pending(&id) => {
                    report.folded += 1;
                    report.replayed += self.fold_into_pending(action);
                }
                Err(e) => {
                    warn!(
                        action = action.kind_str(),
                        block_id = %action.block_id(),
                        "Dropping action: {e}"
                    );
                    report.dropped += 1;
                }
            }
        }

        report.expired += self.age_pending();

        if report.changed() {
            self.version += 1;
        }
        debug!(?report, version = self.version, "Applied action batch");
        report
    }

    fn apply_one(&mut self, action: &Action) -> Result<(), TreeError> {
        match action {
            Action::Insert {
                block_id,
                parent_id,
                prev_id,
                payload,
            } => self.insert(block_id, parent_id, prev_id.as_ref(), payload),
            Action::Update { block_id, payload } => self.update(block_id, payload),
            Action::Delete { block_id, .. } => self.delete(block_id),
            Action::Move {
                block_id,
                parent_id,
                prev_id,
            } => self.move_block(block_id, parent_id, prev_id.as_ref()),
        }
    }

    fn insert(
        &mut self,
        id: &BlockId,
        parent_id: &BlockId,
        prev_id: Option<&BlockId>,
        payload: &InsertPayload,
    ) -> Result<(), TreeError> {
        if self.contains(id) {
            return Err(TreeError::DuplicateBlock(id.clone()));
        }
        let parent_depth = match self.depth(parent_id) {
            Some(d) => d,
            None if self.contains(parent_id) => return Err(TreeError::DepthExceeded(parent_id.clone())),
            None => return Err(TreeError::ParentNotFound(parent_id.clone())),
        };
        if parent_depth + 1 > self.config.max_depth {
            return Err(TreeError::DepthExceeded(id.clone()));
        }

        if let Some(list_id) = &payload.child_list_id {
            if self.doc.blocks.values().any(|b| &b.child_list_id == list_id) {
                return Err(TreeError::Inconsistent(format!(
                    "child list {list_id} already owned by another block"
                )));
            }
        }

        let external_text_id = match (&payload.external_text_id, &payload.delta) {
            (Some(t), _) => Some(t.clone()),
            (None, Some(_)) => Some(TextId::new()),
            (None, None) => None,
        };
        let block = Block {
            id: id.clone(),
            kind: payload.kind,
            parent_id: Some(parent_id.clone()),
            child_list_id: payload.child_list_id.clone().unwrap_or_default(),
            data: payload.data.clone(),
            external_text_id,
        };

        self.doc
            .children_by_list
            .entry(block.child_list_id.clone())
            .or_default();
        if let (Some(text_id), Some(delta)) = (&block.external_text_id, &payload.delta) {
            self.doc.deltas_by_text_id.insert(text_id.clone(), delta.clone());
        }
        self.doc.blocks.insert(id.clone(), block);
        self.link(parent_id, id, prev_id);
        trace!(block_id = %id, parent_id = %parent_id, "insert");
        Ok(())
    }

    fn update(&mut self, id: &BlockId, patch: &BlockPatch) -> Result<(), TreeError> {
        let block = self
            .doc
            .blocks
            .get_mut(id)
            .ok_or_else(|| TreeError::BlockNotFound(id.clone()))?;
        if let Some(kind) = patch.kind {
            block.kind = kind;
        }
        if let Some(data) = &patch.data {
            block.data = data.clone();
        }
        if let Some(delta) = &patch.delta {
            let text_id = block.external_text_id.get_or_insert_with(TextId::new).clone();
            self.doc.deltas_by_text_id.insert(text_id, delta.clone());
        }
        trace!(block_id = %id, "update");
        Ok(())
    }

    fn delete(&mut self, id: &BlockId) -> Result<(), TreeError> {
        if id == &self.doc.root_id {
            return Err(TreeError::RootImmutable(id.clone()));
        }
        if !self.contains(id) {
            return Err(TreeError::BlockNotFound(id.clone()));
        }

        self.unlink(id);
        let mut doomed = self.descendants(id);
        doomed.push(id.clone());
        for bid in &doomed {
            if let Some(block) = self.doc.blocks.remove(bid) {
                self.doc.children_by_list.remove(&block.child_list_id);
                if let Some(text_id) = block.external_text_id {
                    self.doc.deltas_by_text_id.remove(&text_id);
                }
            }
        }
        trace!(block_id = %id, removed = doomed.len(), "delete");
        Ok(())
    }

    fn move_block(
        &mut self,
        id: &BlockId,
        parent_id: &BlockId,
        prev_id: Option<&BlockId>,
    ) -> Result<(), TreeError> {
        if id == &self.doc.root_id {
            return Err(TreeError::RootImmutable(id.clone()));
        }
        if !self.contains(id) {
            return Err(TreeError::BlockNotFound(id.clone()));
        }
        if !self.contains(parent_id) {
            return Err(TreeError::ParentNotFound(parent_id.clone()));
        }
        if self.is_ancestor_or_self(id, parent_id) {
            return Err(TreeError::Cycle {
                block: id.clone(),
                parent: parent_id.clone(),
            });
        }
        let parent_depth = self
            .depth(parent_id)
            .ok_or_else(|| TreeError::DepthExceeded(parent_id.clone()))?;
        if parent_depth + 1 + self.subtree_height(id) > self.config.max_depth {
            return Err(TreeError::DepthExceeded(id.clone()));
        }

        self.unlink(id);
        if let Some(block) = self.doc.blocks.get_mut(id) {
            block.parent_id = Some(parent_id.clone());
        }
        self.link(parent_id, id, prev_id);
        trace!(block_id = %id, parent_id = %parent_id, "move");
        Ok(())
    }

    /// Levels below `id` (0 for a leaf).
    fn subtree_height(&self, id: &BlockId) -> usize {
        let mut height = 0;
        let mut frontier = vec![(id, 0usize)];
        while let Some((bid, level)) = frontier.pop() {
            height = height.max(level);
            if level > self.config.max_depth {
                break;
            }
            frontier.extend(self.get_children(bid).iter().map(|c| (c, level + 1)));
        }
        height
    }

    /// Insert `id` into the parent's list right after `prev_id`.
    ///
    /// `None` means first child; a `prev_id` that is not a sibling (deleted
    /// concurrently) appends at the end.
    fn link(&mut self, parent_id: &BlockId, id: &BlockId, prev_id: Option<&BlockId>) {
        let Some(list_id) = self.doc.blocks.get(parent_id).map(|b| b.child_list_id.clone()) else {
            return;
        };
        let list = self.doc.children_by_list.entry(list_id).or_default();
        let idx = match prev_id {
            None => 0,
            Some(prev) => match list.iter().position(|c| c == prev) {
                Some(i) => i + 1,
                None => {
                    debug!(block_id = %id, prev_id = %prev, "prev sibling not found, appending");
                    list.len()
                }
            },
        };
        list.insert(idx, id.clone());
    }

    /// Remove `id` from its parent's list.
    fn unlink(&mut self, id: &BlockId) {
        let list_id = self
            .parent_of(id)
            .and_then(|p| self.doc.blocks.get(p))
            .map(|p| p.child_list_id.clone());
        if let Some(list) = list_id.and_then(|l| self.doc.children_by_list.get_mut(&l)) {
            list.retain(|c| c != id);
        }
    }

    // =========================================================================
    // Pending inserts
    // =========================================================================

    fn is_pending(&self, id: &BlockId) -> bool {
        self.pending.iter().any(|p| &p.block_id == id)
    }

    /// Park an insert; returns how many older entries were evicted, or
    /// `None` if the action was not parked.
    fn buffer_insert(&mut self, action: &Action) -> Option<usize> {
        let Action::Insert {
            block_id,
            parent_id,
            prev_id,
            payload,
        } = action
        else {
            return None;
        };
        if self.is_pending(block_id) {
            warn!(block_id = %block_id, "Dropping insert: block already buffered");
            return None;
        }
        let mut evicted = 0;
        while self.pending.len() >= self.config.max_pending_inserts.max(1) {
            if let Some(old) = self.pending.pop_front() {
                warn!(
                    block_id = %old.block_id,
                    "Pending insert buffer full ({}), evicting oldest",
                    self.config.max_pending_inserts
                );
                evicted += 1;
            }
        }
        debug!(
            block_id = %block_id,
            parent_id = %parent_id,
            pending = self.pending.len() + 1,
            "Buffering insert until its parent arrives"
        );
        self.pending.push_back(PendingInsert {
            block_id: block_id.clone(),
            parent_id: parent_id.clone(),
            prev_id: prev_id.clone(),
            payload: payload.clone(),
            age: 0,
        });
        Some(evicted)
    }

    /// Apply a non-insert action to the parked insert it targets.
    ///
    /// Update patches the parked payload, Move re-anchors it (and replays
    /// it at once if the new parent exists), Delete discards it together
    /// with any parked inserts beneath it. Returns the number replayed.
    fn fold_into_pending(&mut self, action: &Action) -> usize {
        match action {
            Action::Update { block_id, payload } => {
                if let Some(entry) = self.pending.iter_mut().find(|p| &p.block_id == block_id) {
                    entry.fold_patch(payload);
                }
                trace!(block_id = %block_id, "update folded into buffered insert");
                0
            }
            Action::Move {
                block_id,
                parent_id,
                prev_id,
            } => {
                if let Some(entry) = self.pending.iter_mut().find(|p| &p.block_id == block_id) {
                    entry.parent_id = parent_id.clone();
                    entry.prev_id = prev_id.clone();
                }
                trace!(block_id = %block_id, parent_id = %parent_id, "move folded into buffered insert");
                if self.contains(parent_id) {
                    self.replay_pending()
                } else {
                    0
                }
            }
            Action::Delete { block_id, .. } => {
                let mut doomed = vec![block_id.clone()];
                while let Some(id) = doomed.pop() {
                    let before = self.pending.len();
                    self.pending.retain(|p| {
                        if p.parent_id == id {
                            doomed.push(p.block_id.clone());
                        }
                        p.block_id != id
                    });
                    if self.pending.len() < before {
                        trace!(block_id = %id, "buffered insert discarded by delete");
                    }
                }
                0
            }
            Action::Insert { .. } => 0,
        }
    }

    /// Apply every parked insert whose parent now exists, until no progress.
    fn replay_pending(&mut self) -> usize {
        let mut replayed = 0;
        loop {
            let Some(pos) = self.pending.iter().position(|p| self.contains(&p.parent_id)) else {
                break;
            };
            let Some(entry) = self.pending.remove(pos) else {
                break;
            };
            match self.apply_one(&entry.action()) {
                Ok(()) => replayed += 1,
                Err(e) => warn!(
                    block_id = %entry.block_id,
                    "Dropping buffered insert on replay: {e}"
                ),
            }
        }
        replayed
    }

    /// Age parked inserts by one batch and expire the stale ones.
    fn age_pending(&mut self) -> usize {
        let ttl = self.config.pending_insert_ttl;
        let before = self.pending.len();
        self.pending.retain_mut(|p| {
            p.age += 1;
            if p.age > ttl {
                warn!(
                    block_id = %p.block_id,
                    parent_id = %p.parent_id,
                    "Buffered insert expired without its parent"
                );
                false
            } else {
                true
            }
        });
        before - self.pending.len()
    }
}

/// Structural validation shared by snapshot loading and `check_invariants`.
fn validate(doc: &DocumentSnapshot, max_depth: usize) -> Result<(), TreeError> {
    let root = doc
        .blocks
        .get(&doc.root_id)
        .ok_or_else(|| TreeError::MissingRoot(doc.root_id.clone()))?;
    if root.parent_id.is_some() {
        return Err(TreeError::Inconsistent(format!("root {} has a parent", root.id)));
    }

    // Each list member must exist and point back at the list's owner.
    let owners: BTreeMap<&ListId, &BlockId> =
        doc.blocks.values().map(|b| (&b.child_list_id, &b.id)).collect();
    if owners.len() != doc.blocks.len() {
        return Err(TreeError::Inconsistent("child list shared by several blocks".into()));
    }

    // Walk from the root; every block must be reached exactly once.
    let mut seen: HashSet<&BlockId> = HashSet::new();
    let mut stack: Vec<(&BlockId, usize)> = vec![(&doc.root_id, 0)];
    seen.insert(&doc.root_id);
    while let Some((id, depth)) = stack.pop() {
        if depth > max_depth {
            return Err(TreeError::DepthExceeded(id.clone()));
        }
        for child in doc.children_of(id) {
            let block = doc
                .blocks
                .get(child)
                .ok_or_else(|| TreeError::BlockNotFound(child.clone()))?;
            if block.parent_id.as_ref() != Some(id) {
                return Err(TreeError::Inconsistent(format!(
                    "{} listed under {} but its parent is {:?}",
                    child, id, block.parent_id
                )));
            }
            if !seen.insert(child) {
                return Err(TreeError::Cycle {
                    block: child.clone(),
                    parent: id.clone(),
                });
            }
            stack.push((child, depth + 1));
        }
    }

    if seen.len() != doc.blocks.len() {
        let orphan = doc
            .blocks
            .keys()
            .find(|id| !seen.contains(id))
            .cloned()
            .unwrap_or_else(|| doc.root_id.clone());
        return Err(TreeError::Inconsistent(format!("block {orphan} is not reachable from the root")));
    }
    Ok(())
}

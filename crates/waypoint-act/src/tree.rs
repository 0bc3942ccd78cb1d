//! The Abstract Coverage Tree: a radix tree over significant execution-path
//! prefixes.
//!
//! Nodes are arena-owned and addressed by [`NodeId`]; `parent` links and
//! the tree-level input index hold ids, never references, so restructuring
//! invalidates nothing. Leaves keep the inputs that reached them (capped,
//! random eviction) plus the path tail beyond the significant prefix;
//! internal nodes keep children strictly sorted by the first PCID of their
//! edge. An edge prefix is either a non-empty PCID sequence or the
//! one-element epsilon sequence marking a "no token" branch.
//!
//! Structural invariants, checked after every mutation in debug builds:
//! no node has an empty prefix; no non-root internal has an epsilon
//! prefix; children are strictly sorted and unique on `prefix[0]`; every
//! internal has at least two children; the input index and the leaf input
//! sets agree exactly.

use std::collections::{BTreeMap, BTreeSet};

use rand::seq::IteratorRandom;
use rand::Rng;
use tracing::debug;

use waypoint_core::signature::CondKind;
use waypoint_core::trace::PathLimits;
use waypoint_core::{
    common_prefix_len, EnumBitVecArray, ExecPath, Input, InputSignature, Pcid, RunStatus, TracePC,
    EPSILON_PCID,
};

use crate::condition::Condition;

pub type NodeId = usize;

/// Cap on inputs stored per leaf.
pub const MAX_INPUT_PER_PATH: usize = 100;

fn epsilon() -> ExecPath {
    vec![EPSILON_PCID]
}

fn is_epsilon(prefix: &[Pcid]) -> bool {
    prefix == [EPSILON_PCID]
}

#[derive(Debug)]
enum NodeKind {
    Leaf {
        inputs: BTreeSet<Input>,
        tail: ExecPath,
    },
    Internal {
        children: Vec<NodeId>,
    },
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    prefix: ExecPath,
    enum_bvs: EnumBitVecArray,
    cond: Condition,
    depth: usize,
    exception_path: bool,
    kind: NodeKind,
}

impl Node {
    fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }

    fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Internal { children } => children,
            NodeKind::Leaf { .. } => &[],
        }
    }
}

pub struct ExecTree {
    sig: InputSignature,
    limits: PathLimits,
    budget_ns: i64,
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: Option<NodeId>,
    all_input: BTreeMap<Input, NodeId>,
    height: usize,
}

impl ExecTree {
    pub fn new(sig: InputSignature, limits: PathLimits, budget_ns: i64) -> Self {
        Self {
            sig,
            limits,
            budget_ns,
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            all_input: BTreeMap::new(),
            height: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn signature(&self) -> &InputSignature {
        &self.sig
    }

    // ------------------------------------------------------------------
    // Arena plumbing
    // ------------------------------------------------------------------

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn dealloc(&mut self, id: NodeId) {
        debug_assert!(self.nodes[id].is_some());
        self.nodes[id] = None;
        self.free.push(id);
    }

    fn alive(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(Option::is_some)
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes[id].as_ref().expect("dead node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id].as_mut().expect("dead node id")
    }

    fn default_cond(&self) -> Condition {
        Condition::new(self.sig.default_cond_kind(), self.budget_ns)
    }

    fn create_leaf(&mut self, prefix: ExecPath) -> NodeId {
        let cond = self.default_cond();
        self.alloc(Node {
            parent: None,
            prefix,
            enum_bvs: self.sig.empty_bitvecs(),
            cond,
            depth: 0,
            exception_path: false,
            kind: NodeKind::Leaf {
                inputs: BTreeSet::new(),
                tail: ExecPath::new(),
            },
        })
    }

    fn create_internal(&mut self, prefix: ExecPath) -> NodeId {
        let cond = self.default_cond();
        self.alloc(Node {
            parent: None,
            prefix,
            enum_bvs: self.sig.empty_bitvecs(),
            cond,
            depth: 0,
            exception_path: false,
            kind: NodeKind::Internal {
                children: Vec::new(),
            },
        })
    }

    // ------------------------------------------------------------------
    // Node accessors used by the engine
    // ------------------------------------------------------------------

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).is_leaf()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn prefix(&self, id: NodeId) -> &[Pcid] {
        &self.node(id).prefix
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.node(id).depth
    }

    pub fn exception_path(&self, id: NodeId) -> bool {
        self.node(id).exception_path
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    pub fn cond(&self, id: NodeId) -> &Condition {
        &self.node(id).cond
    }

    pub fn set_cond(&mut self, id: NodeId, cond: Condition) {
        self.node_mut(id).cond = cond;
    }

    pub fn cond_mut(&mut self, id: NodeId) -> &mut Condition {
        &mut self.node_mut(id).cond
    }

    pub fn leaf_inputs(&self, id: NodeId) -> &BTreeSet<Input> {
        match &self.node(id).kind {
            NodeKind::Leaf { inputs, .. } => inputs,
            NodeKind::Internal { .. } => panic!("leaf_inputs on an internal node"),
        }
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.iter_ids().filter(|&id| self.node(id).is_leaf()).collect()
    }

    pub fn internals(&self) -> Vec<NodeId> {
        self.iter_ids().filter(|&id| !self.node(id).is_leaf()).collect()
    }

    fn iter_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(|&id| self.nodes[id].is_some())
    }

    pub fn num_total_inputs(&self) -> usize {
        self.all_input.len()
    }

    /// Sum of non-epsilon edge lengths.
    pub fn total_prefix_length(&self) -> usize {
        self.iter_ids()
            .map(|id| {
                let prefix = &self.node(id).prefix;
                if is_epsilon(prefix) {
                    0
                } else {
                    prefix.len()
                }
            })
            .sum()
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Concatenated edge prefixes from the root down to `id`. With
    /// `squeeze`, epsilon markers are dropped so the result is a real
    /// execution-path prefix.
    pub fn path_log(&self, id: NodeId, squeeze: bool) -> ExecPath {
        let node = self.node(id);
        let own: ExecPath = if squeeze && is_epsilon(&node.prefix) {
            ExecPath::new()
        } else {
            node.prefix.clone()
        };
        match node.parent {
            None => own,
            Some(parent) => {
                let mut path = self.path_log(parent, squeeze);
                path.extend(own);
                path
            }
        }
    }

    // ------------------------------------------------------------------
    // Attach / detach
    // ------------------------------------------------------------------

    /// Attach a detached node. `parent == None` makes it the root (always
    /// carrying a neglect condition); otherwise `cond` (or a fresh default)
    /// becomes its branch condition and it is placed among the parent's
    /// children, sorted by `prefix[0]`.
    fn add_node(&mut self, id: NodeId, parent: Option<NodeId>, cond: Option<Condition>) {
        assert!(!self.node(id).prefix.is_empty());

        if let NodeKind::Leaf { inputs, .. } = &self.node(id).kind {
            let inputs: Vec<Input> = inputs.iter().cloned().collect();
            for input in inputs {
                self.all_input.insert(input, id);
            }
        }

        match parent {
            None => {
                assert!(self.root.is_none(), "previous root must be pulled first");
                self.node_mut(id).cond = Condition::new(CondKind::Neglect, self.budget_ns);
                self.node_mut(id).parent = None;
                self.root = Some(id);
            }
            Some(parent_id) => {
                self.node_mut(id).cond = cond.unwrap_or_else(|| self.default_cond());
                self.node_mut(id).parent = Some(parent_id);

                let first = self.node(id).prefix[0];
                let pos = match &self.node(parent_id).kind {
                    NodeKind::Internal { children } => children
                        .iter()
                        .position(|&c| self.node(c).prefix[0] > first)
                        .unwrap_or(children.len()),
                    NodeKind::Leaf { .. } => panic!("add_node under a leaf"),
                };
                match &mut self.node_mut(parent_id).kind {
                    NodeKind::Internal { children } => children.insert(pos, id),
                    NodeKind::Leaf { .. } => unreachable!(),
                }
                self.update_enum_bvs(parent_id);
                self.mark_exception(parent_id);
            }
        }
        self.update_depth(id);
    }

    /// Detach a node from the tree, leaving its subtree intact. Leaf
    /// inputs leave the input index until the node is re-attached.
    fn pull_node(&mut self, id: NodeId) -> NodeId {
        if let NodeKind::Leaf { inputs, .. } = &self.node(id).kind {
            let inputs: Vec<Input> = inputs.iter().cloned().collect();
            for input in inputs {
                self.all_input.remove(&input);
            }
        }

        match self.node(id).parent {
            None => {
                assert_eq!(self.root, Some(id));
                self.root = None;
            }
            Some(parent_id) => {
                match &mut self.node_mut(parent_id).kind {
                    NodeKind::Internal { children } => {
                        children.retain(|&c| c != id);
                    }
                    NodeKind::Leaf { .. } => unreachable!(),
                }
                self.node_mut(id).parent = None;
            }
        }
        id
    }

    fn pull_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children: Vec<NodeId> = self.node(id).children().to_vec();
        for &child in &children {
            self.pull_node(child);
        }
        children
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    pub fn insert<R: Rng + ?Sized>(
        &mut self,
        epath: &[Pcid],
        input: Input,
        status: RunStatus,
        rng: &mut R,
    ) -> NodeId {
        self.insert_set(epath, BTreeSet::from([input]), status, rng)
    }

    pub fn insert_set<R: Rng + ?Sized>(
        &mut self,
        epath: &[Pcid],
        inputs: BTreeSet<Input>,
        status: RunStatus,
        rng: &mut R,
    ) -> NodeId {
        let significant = self.limits.significant(epath);
        let tail = self.limits.tail_of(epath);

        let inserted = self.insert_significant(significant, tail, inputs, status, rng);
        debug_assert!(self.invariants_hold());
        inserted
    }

    fn insert_significant<R: Rng + ?Sized>(
        &mut self,
        significant: ExecPath,
        tail: ExecPath,
        inputs: BTreeSet<Input>,
        status: RunStatus,
        rng: &mut R,
    ) -> NodeId {
        // Case 1: first insertion; the whole path becomes the root leaf.
        let Some(root) = self.root else {
            let leaf = self.create_leaf(significant);
            self.add_node(leaf, None, None);
            self.leaf_insert_inputset(leaf, tail, inputs, status, rng);
            return leaf;
        };

        let (nearest, rem) = self.descend(root, significant.clone());

        let Some(nearest) = nearest else {
            // Case 2: the path does not go through the current root.
            if is_epsilon(&self.node(root).prefix) {
                // The root is already a virtual branch point; attach a new
                // top-level leaf.
                assert_eq!(rem, significant);
                let leaf = self.create_leaf(rem);
                self.add_node(leaf, Some(root), None);
                self.leaf_insert_inputset(leaf, tail, inputs, status, rng);
                self.initialize_children_cond(root);
                return leaf;
            }

            // Demote the old root under a fresh internal holding the
            // common prefix (epsilon when nothing is shared).
            let common_len = common_prefix_len(&self.node(root).prefix, &rem);
            let common = if common_len == 0 {
                epsilon()
            } else {
                self.node(root).prefix[..common_len].to_vec()
            };

            let new_root = self.create_internal(common);
            let old_root = self.pull_node(root);
            assert!(self.node(old_root).prefix.len() > common_len);
            self.node_mut(old_root).prefix.drain(..common_len);
            self.add_node(old_root, Some(new_root), None);
            self.add_node(new_root, None, None);

            let rem = if rem.len() == common_len {
                epsilon()
            } else {
                rem[common_len..].to_vec()
            };
            let leaf = self.create_leaf(rem);
            self.add_node(leaf, Some(new_root), None);
            self.leaf_insert_inputset(leaf, tail, inputs, status, rng);
            self.initialize_children_cond(new_root);
            return leaf;
        };

        if rem.is_empty() {
            if !self.node(nearest).is_leaf() {
                // Case 3: the path stops at an internal node; give it an
                // epsilon leaf.
                let leaf = self.create_leaf(epsilon());
                self.add_node(leaf, Some(nearest), None);
                self.leaf_insert_inputset(leaf, tail, inputs, status, rng);
                return leaf;
            }
            // Case 4: exact match with an existing leaf.
            self.leaf_insert_inputset(nearest, tail, inputs, status, rng);
            return nearest;
        }

        if !self.node(nearest).is_leaf() {
            match self.lookup_child(nearest, rem[0]) {
                None => {
                    // Case 5: a new branch off an existing internal node.
                    let leaf = self.create_leaf(rem);
                    self.add_node(leaf, Some(nearest), None);
                    self.leaf_insert_inputset(leaf, tail, inputs, status, rng);
                    leaf
                }
                Some(matched) => {
                    // Case 6: the path diverges inside a child's prefix;
                    // split the child. The split-point internal inherits
                    // the child's condition, the demoted child and the new
                    // leaf start over with defaults.
                    let pulled = self.pull_node(matched);
                    let common_len = common_prefix_len(&self.node(pulled).prefix, &rem);
                    assert!(0 < common_len && common_len < self.node(pulled).prefix.len());
                    let common = self.node(pulled).prefix[..common_len].to_vec();

                    let internal = self.create_internal(common);
                    let internal_cond = self.node(pulled).cond.clone();
                    self.node_mut(pulled).prefix.drain(..common_len);
                    self.add_node(pulled, Some(internal), None);
                    self.add_node(internal, Some(nearest), Some(internal_cond));

                    let rem = if rem.len() == common_len {
                        epsilon()
                    } else {
                        rem[common_len..].to_vec()
                    };
                    let leaf = self.create_leaf(rem);
                    self.add_node(leaf, Some(internal), None);
                    self.leaf_insert_inputset(leaf, tail, inputs, status, rng);
                    leaf
                }
            }
        } else {
            // Case 7: the path diverges past a leaf's prefix. The leaf is
            // demoted to an epsilon child of a new internal that takes over
            // its edge and condition.
            let parent = self.node(nearest).parent;
            let pulled = self.pull_node(nearest);
            let internal = self.create_internal(self.node(pulled).prefix.clone());
            let internal_cond = self.node(pulled).cond.clone();
            self.node_mut(pulled).prefix = epsilon();
            self.add_node(pulled, Some(internal), None);

            let leaf = self.create_leaf(rem);
            self.add_node(leaf, Some(internal), None);
            self.leaf_insert_inputset(leaf, tail, inputs, status, rng);

            self.add_node(internal, parent, Some(internal_cond));
            leaf
        }
    }

    fn lookup_child(&self, id: NodeId, first: Pcid) -> Option<NodeId> {
        self.node(id)
            .children()
            .iter()
            .copied()
            .find(|&c| self.node(c).prefix[0] == first)
    }

    /// Walk toward the node matching `epath`. Returns the deepest node the
    /// walk reached and the unmatched remainder relative to that node;
    /// `(None, epath)` when the path diverges from the root's own prefix.
    fn descend(&self, id: NodeId, epath: ExecPath) -> (Option<NodeId>, ExecPath) {
        assert!(!epath.is_empty());
        let node = self.node(id);
        assert!(!node.prefix.is_empty());

        if node.is_leaf() {
            if epath == node.prefix {
                return (Some(id), ExecPath::new());
            }
            let common_len = common_prefix_len(&node.prefix, &epath);
            if common_len < node.prefix.len() {
                return (node.parent, epath);
            }
            (Some(id), epath[common_len..].to_vec())
        } else {
            if node.parent.is_none() && is_epsilon(&node.prefix) {
                return match self.lookup_child(id, epath[0]) {
                    Some(child) => self.descend(child, epath),
                    None => (None, epath),
                };
            }
            if epath == node.prefix {
                return match self.lookup_child(id, EPSILON_PCID) {
                    Some(eps_child) => self.descend(eps_child, epsilon()),
                    None => (Some(id), ExecPath::new()),
                };
            }
            let common_len = common_prefix_len(&node.prefix, &epath);
            if common_len < node.prefix.len() {
                return (node.parent, epath);
            }
            let rem = epath[common_len..].to_vec();
            assert!(!rem.is_empty());
            match self.lookup_child(id, rem[0]) {
                Some(child) => self.descend(child, rem),
                None => (Some(id), rem),
            }
        }
    }

    fn leaf_insert_inputset<R: Rng + ?Sized>(
        &mut self,
        id: NodeId,
        tail: ExecPath,
        new_inputs: BTreeSet<Input>,
        status: RunStatus,
        rng: &mut R,
    ) {
        if self.leaf_is_full(id) {
            let evicted = self.evict_random(id, rng);
            self.all_input.remove(&evicted);
        }
        for input in new_inputs {
            self.all_input.insert(input.clone(), id);
            match &mut self.node_mut(id).kind {
                NodeKind::Leaf { inputs, .. } => {
                    inputs.insert(input);
                }
                NodeKind::Internal { .. } => unreachable!(),
            }
        }
        self.update_enum_bvs(id);

        match status {
            RunStatus::Ok => self.node_mut(id).exception_path = false,
            RunStatus::ExpectedException => self.node_mut(id).exception_path = true,
            _ => {}
        }
        if let Some(parent) = self.node(id).parent {
            self.mark_exception(parent);
        }
        match &mut self.node_mut(id).kind {
            NodeKind::Leaf { tail: t, .. } => *t = tail,
            NodeKind::Internal { .. } => unreachable!(),
        }
    }

    /// Merge another leaf's inputs, respecting the cap: once full, excess
    /// inputs are dropped from the index entirely.
    fn leaf_merge_inputset(&mut self, id: NodeId, other: BTreeSet<Input>) {
        let current = self.leaf_inputs(id).len();
        if current + other.len() <= MAX_INPUT_PER_PATH {
            for input in other {
                self.all_input.insert(input.clone(), id);
                match &mut self.node_mut(id).kind {
                    NodeKind::Leaf { inputs, .. } => {
                        inputs.insert(input);
                    }
                    NodeKind::Internal { .. } => unreachable!(),
                }
            }
        } else {
            let mut num_left = MAX_INPUT_PER_PATH.saturating_sub(current);
            for input in other {
                if num_left == 0 {
                    self.all_input.remove(&input);
                } else {
                    self.all_input.insert(input.clone(), id);
                    match &mut self.node_mut(id).kind {
                        NodeKind::Leaf { inputs, .. } => {
                            inputs.insert(input);
                        }
                        NodeKind::Internal { .. } => unreachable!(),
                    }
                    num_left -= 1;
                }
            }
        }
        self.update_enum_bvs(id);
    }

    fn leaf_is_full(&self, id: NodeId) -> bool {
        self.leaf_inputs(id).len() >= MAX_INPUT_PER_PATH
    }

    fn evict_random<R: Rng + ?Sized>(&mut self, id: NodeId, rng: &mut R) -> Input {
        let victim = self
            .leaf_inputs(id)
            .iter()
            .choose(rng)
            .expect("evict_random on an empty leaf")
            .clone();
        match &mut self.node_mut(id).kind {
            NodeKind::Leaf { inputs, .. } => {
                inputs.remove(&victim);
            }
            NodeKind::Internal { .. } => unreachable!(),
        }
        victim
    }

    fn initialize_children_cond(&mut self, id: NodeId) {
        let kind = self.sig.default_cond_kind();
        let children: Vec<NodeId> = self.node(id).children().to_vec();
        for child in children {
            self.node_mut(child).cond = Condition::new(kind, self.budget_ns);
        }
    }

    // ------------------------------------------------------------------
    // Upward / downward maintenance
    // ------------------------------------------------------------------

    /// Recompute the subtree's enum value sets and propagate upward while
    /// they change. Only meaningful when enum conditions are in play.
    fn update_enum_bvs(&mut self, id: NodeId) {
        if self.sig.default_cond_kind() != CondKind::Enum {
            return;
        }
        let mut fresh = self.sig.empty_bitvecs();
        match &self.node(id).kind {
            NodeKind::Leaf { inputs, .. } => {
                for input in inputs {
                    fresh.record(input.enum_args());
                }
            }
            NodeKind::Internal { children } => {
                for &child in children {
                    let child_bvs = self.node(child).enum_bvs.clone();
                    fresh.or_assign(&child_bvs);
                }
            }
        }
        if fresh != self.node(id).enum_bvs {
            self.node_mut(id).enum_bvs = fresh;
            if let Some(parent) = self.node(id).parent {
                self.update_enum_bvs(parent);
            }
        }
    }

    pub fn enum_bvs(&self, id: NodeId) -> &EnumBitVecArray {
        &self.node(id).enum_bvs
    }

    /// An internal node is an exception path iff all of its children are.
    fn mark_exception(&mut self, id: NodeId) {
        let all_children_exception = self
            .node(id)
            .children()
            .iter()
            .all(|&c| self.node(c).exception_path);
        let inconsistent = self.node(id).exception_path != all_children_exception;
        if inconsistent || self.node(id).cond.invalid() {
            self.node_mut(id).exception_path = all_children_exception;
            if let Some(parent) = self.node(id).parent {
                self.mark_exception(parent);
            }
        }
    }

    fn update_depth(&mut self, id: NodeId) {
        let depth = match self.node(id).parent {
            None => 0,
            Some(parent) => self.node(parent).depth + 1,
        };
        self.node_mut(id).depth = depth;
        if depth > self.height {
            self.height = depth;
        }
        let children: Vec<NodeId> = self.node(id).children().to_vec();
        for child in children {
            if self.node(child).depth != depth + 1 {
                self.update_depth(child);
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// The terminal node whose cumulative prefix equals the significant
    /// part of `epath`, if any.
    pub fn find(&self, epath: &[Pcid]) -> Option<NodeId> {
        let root = self.root?;
        let (nearest, rem) = self.descend(root, self.limits.significant(epath));
        if rem.is_empty() {
            nearest
        } else {
            None
        }
    }

    pub fn has_path(&self, epath: &[Pcid]) -> bool {
        self.find(epath).is_some()
    }

    pub fn has_input(&self, input: &Input) -> bool {
        self.all_input.contains_key(input)
    }

    pub fn leaf_of(&self, input: &Input) -> Option<NodeId> {
        self.all_input.get(input).copied()
    }

    /// Full recorded path for an owned input: the leaf's cumulative prefix
    /// plus its tail.
    pub fn path_of_input(&self, input: &Input) -> Option<ExecPath> {
        let leaf = self.leaf_of(input)?;
        let mut path = self.path_log(leaf, true);
        match &self.node(leaf).kind {
            NodeKind::Leaf { tail, .. } => path.extend(tail.iter().copied()),
            NodeKind::Internal { .. } => unreachable!(),
        }
        Some(path)
    }

    /// Every node along `epath`, including a terminal epsilon leaf.
    pub fn get_nodes(&self, epath: &[Pcid]) -> Vec<NodeId> {
        assert!(!epath.is_empty());
        assert!(!self.is_empty());

        let mut nodes = Vec::new();
        let mut current = self.root.unwrap();
        let mut epath = epath.to_vec();
        loop {
            nodes.push(current);
            let node = self.node(current);
            let common_len = common_prefix_len(&node.prefix, &epath);
            if common_len < node.prefix.len() {
                // Only the epsilon root's marker can mismatch.
                assert!(node.parent.is_none() && is_epsilon(&node.prefix));
            }
            epath.drain(..common_len);

            if node.is_leaf() {
                assert!(epath.is_empty());
                break;
            }
            if epath.is_empty() {
                let eps_child = self.node(current).children()[0];
                assert!(self.node(eps_child).is_leaf() && is_epsilon(&self.node(eps_child).prefix));
                nodes.push(eps_child);
                break;
            }
            current = self
                .lookup_child(current, epath[0])
                .expect("get_nodes on a path the tree does not contain");
        }
        nodes
    }

    /// Enum and numeric conditions along the path to `id`, for the input
    /// generator.
    pub fn path_conditions(&self, id: NodeId) -> (Vec<Condition>, Vec<Condition>) {
        let epath = self.path_log(id, false);
        let mut enum_conds = Vec::new();
        let mut numeric_conds = Vec::new();
        for node in self.get_nodes(&epath) {
            let cond = &self.node(node).cond;
            match cond.kind() {
                CondKind::Enum => enum_conds.push(cond.clone()),
                CondKind::Numeric => numeric_conds.push(cond.clone()),
                CondKind::Neglect => {}
            }
        }
        (enum_conds, numeric_conds)
    }

    // ------------------------------------------------------------------
    // Condition evaluation
    // ------------------------------------------------------------------

    /// Score `input` against the conditions on and beside its path.
    /// Returns the nodes whose condition disagreed with the ground truth
    /// (the input went through the node, or through a sibling).
    pub fn evaluate_conditions(&mut self, input: &Input, epath: &[Pcid]) -> Vec<NodeId> {
        let on_path = self.get_nodes(&self.limits.significant(epath));
        let mut incorrect = Vec::new();
        for &node in &on_path {
            for target in self.siblings(node, true) {
                if incorrect.contains(&target) {
                    continue;
                }
                if self.node(target).cond.invalid() {
                    incorrect.push(target);
                    continue;
                }
                let is_this = target == node;
                if !self.node_mut(target).cond.check_and_update(input, is_this) {
                    incorrect.push(target);
                }
            }
        }
        incorrect
    }

    /// Nodes whose condition has no predicate yet, one per sibling pair.
    pub fn invalid_condition_nodes(&self) -> Vec<NodeId> {
        let mut invalid = Vec::new();
        for id in self.iter_ids() {
            if let Some(sibling) = self.sibling(id) {
                if invalid.contains(&sibling) {
                    continue;
                }
            }
            if self.node(id).cond.invalid() {
                invalid.push(id);
            }
        }
        invalid
    }

    /// The other child of a two-child parent.
    pub fn sibling(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.node(id).parent?;
        let children = self.node(parent).children();
        if children.len() != 2 {
            return None;
        }
        children.iter().copied().find(|&c| c != id)
    }

    pub fn siblings(&self, id: NodeId, include_self: bool) -> Vec<NodeId> {
        match self.node(id).parent {
            None => {
                if include_self {
                    vec![id]
                } else {
                    Vec::new()
                }
            }
            Some(parent) => self
                .node(parent)
                .children()
                .iter()
                .copied()
                .filter(|&c| include_self || c != id)
                .collect(),
        }
    }

    fn subtree_inputs(&self, id: NodeId) -> BTreeSet<Input> {
        match &self.node(id).kind {
            NodeKind::Leaf { inputs, .. } => inputs.clone(),
            NodeKind::Internal { children } => {
                let mut gathered = BTreeSet::new();
                for &child in children {
                    gathered.extend(self.subtree_inputs(child));
                }
                gathered
            }
        }
    }

    /// Positive examples reach this subtree; negative examples reach a
    /// sibling's.
    pub fn examples(&self, id: NodeId) -> (BTreeSet<Input>, BTreeSet<Input>) {
        let pos = self.subtree_inputs(id);
        let mut neg = BTreeSet::new();
        for sibling in self.siblings(id, false) {
            neg.extend(self.subtree_inputs(sibling));
        }
        (pos, neg)
    }

    /// Promote the node's condition (and its pair sibling's) one step down
    /// the ladder.
    pub fn promote_cond(&mut self, id: NodeId) {
        let kind = self.node(id).cond.kind();
        let promoted = self.node(id).cond.promote();
        if let Some(sibling) = self.sibling(id) {
            assert_eq!(self.node(sibling).cond.kind(), kind);
            self.node_mut(sibling).cond = promoted.clone();
        }
        self.node_mut(id).cond = promoted;
    }

    pub fn lowest_common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let mut a = a;
        let mut b = b;
        while self.node(a).depth > self.node(b).depth {
            a = self.node(a).parent.unwrap();
        }
        while self.node(a).depth < self.node(b).depth {
            b = self.node(b).parent.unwrap();
        }
        while a != b {
            a = self.node(a).parent.unwrap();
            b = self.node(b).parent.unwrap();
        }
        a
    }

    // ------------------------------------------------------------------
    // ND pruning
    // ------------------------------------------------------------------

    /// Strip newly discovered nondeterministic PCIDs from every edge, then
    /// repair the radix structure: hoist internals whose edge vanished,
    /// re-sort and merge colliding children, and collapse single-child
    /// internals.
    pub fn prune(&mut self, tpc: &TracePC) {
        let Some(root) = self.root else { return };

        let mut filtered = Vec::new();
        self.filter_nd(root, tpc, 0, &mut filtered);
        debug!(filtered = filtered.len(), "pruned ND PCIDs from tree edges");

        let mut may_need_sort: BTreeSet<NodeId> = filtered
            .iter()
            .filter_map(|&id| self.node(id).parent)
            .collect();

        debug_assert!(self.no_empty_prefix());

        for &id in &filtered {
            if self.alive(id) && !self.node(id).is_leaf() && self.node(id).parent.is_some() {
                self.rm_internal_epsilon(id);
            }
        }

        debug_assert!(self.no_empty_prefix());
        debug_assert!(self.no_epsilon_internal());

        let mut may_have_only_child: Vec<NodeId> = Vec::new();
        while let Some(&target) = may_need_sort.iter().next() {
            may_need_sort.remove(&target);
            if !self.alive(target) || self.node(target).is_leaf() {
                continue;
            }
            let merged = self.sort_children(target);
            if !merged.is_empty() {
                may_have_only_child.push(target);
                for m in merged {
                    if self.alive(m) && !self.node(m).is_leaf() {
                        may_need_sort.insert(m);
                    }
                }
            }
        }

        debug_assert!(self.no_empty_prefix());
        debug_assert!(self.no_epsilon_internal());
        debug_assert!(self.children_sorted());

        for id in may_have_only_child {
            if self.alive(id) && !self.node(id).is_leaf() {
                self.rm_internal_with_only_child(id);
            }
        }

        debug_assert!(self.invariants_hold());
    }

    /// Rewrite one node's edge without ND PCIDs. Leaves refill their
    /// significant prefix from the tail when pruning shortened the path
    /// above them.
    fn filter_nd(
        &mut self,
        id: NodeId,
        tpc: &TracePC,
        prefix_len_so_far: usize,
        filtered: &mut Vec<NodeId>,
    ) {
        if self.node(id).is_leaf() {
            let (prefix_changed, tail_moved);
            {
                let max_significant = self.limits.max_significant();
                let node = self.node_mut(id);
                let prefix_before = node.prefix.len();
                if !is_epsilon(&node.prefix) {
                    node.prefix = tpc.prune(&node.prefix);
                }
                let prefix_after = if is_epsilon(&node.prefix) && prefix_before == 1 {
                    // An epsilon marker is not path content.
                    0
                } else {
                    node.prefix.len()
                };

                let NodeKind::Leaf { tail, .. } = &mut node.kind else {
                    unreachable!()
                };
                let tail_before = tail.len();
                *tail = tpc.prune(tail);
                let tail_after = tail.len();

                tail_moved = prefix_len_so_far + prefix_after < max_significant && tail_after > 0;
                if tail_moved {
                    let len_to_move =
                        (max_significant - (prefix_len_so_far + prefix_after)).min(tail_after);
                    let moved: ExecPath = tail.drain(..len_to_move).collect();
                    if is_epsilon(&node.prefix) && prefix_before == 1 {
                        node.prefix = moved;
                    } else {
                        node.prefix.extend(moved);
                    }
                } else if node.prefix.is_empty() {
                    node.prefix = epsilon();
                }

                prefix_changed = prefix_before != node.prefix.len() || tail_before != tail_after;
            }
            if prefix_changed || tail_moved {
                filtered.push(id);
            }
            return;
        }

        let prefix_len;
        if is_epsilon(&self.node(id).prefix) {
            assert!(self.node(id).parent.is_none());
            prefix_len = 0;
        } else {
            let before = self.node(id).prefix.len();
            let pruned = tpc.prune(&self.node(id).prefix);
            self.node_mut(id).prefix = pruned;
            if self.node(id).prefix.len() != before {
                filtered.push(id);
                if self.node(id).prefix.is_empty() {
                    self.node_mut(id).prefix = epsilon();
                    prefix_len = 0;
                } else {
                    prefix_len = self.node(id).prefix.len();
                }
            } else {
                prefix_len = before;
            }
        }

        let children: Vec<NodeId> = self.node(id).children().to_vec();
        for child in children {
            self.filter_nd(child, tpc, prefix_len_so_far + prefix_len, filtered);
        }
    }

    /// Hoist the children of a non-root internal whose edge shrank to
    /// epsilon into its parent.
    fn rm_internal_epsilon(&mut self, id: NodeId) {
        assert!(self.alive(id));
        if !is_epsilon(&self.node(id).prefix) {
            return;
        }
        let parent = self.node(id).parent.expect("epsilon internal must not be root");
        self.pull_node(id);
        let children = self.pull_children(id);
        for child in children {
            // Re-attached nodes start over with default conditions; the
            // refinement pass after pruning relearns them.
            self.add_node(child, Some(parent), None);
        }
        self.dealloc(id);
    }

    /// Re-establish child order after edges changed. Children colliding on
    /// `prefix[0]` are merged; merged subtrees are returned for further
    /// repair.
    fn sort_children(&mut self, id: NodeId) -> Vec<NodeId> {
        if self.children_sorted_at(id) {
            return Vec::new();
        }

        let mut merged_nodes = Vec::new();
        let nodes = self.pull_children(id);
        for node in nodes {
            match self.lookup_child(id, self.node(node).prefix[0]) {
                None => self.add_node(node, Some(id), None),
                Some(conflict) => {
                    self.pull_node(conflict);
                    let merged = self.merge(conflict, node);
                    merged_nodes.push(merged);
                    self.add_node(merged, Some(id), None);
                }
            }
        }
        merged_nodes
    }

    /// Combine two detached nodes that collide on `prefix[0]` into one
    /// subtree rooted at their longest common prefix. Returns the merged
    /// node, detached.
    fn merge(&mut self, left: NodeId, right: NodeId) -> NodeId {
        assert!(self.alive(left) && self.alive(right));
        let common_len = common_prefix_len(&self.node(left).prefix, &self.node(right).prefix);
        assert!(common_len > 0);
        let common = self.node(left).prefix[..common_len].to_vec();

        if self.node(left).prefix == self.node(right).prefix {
            if self.node(left).is_leaf() && self.node(right).is_leaf() {
                let new_leaf = self.create_leaf(common);
                let (left_inputs, left_tail, left_exception) = match &self.node(left).kind {
                    NodeKind::Leaf { inputs, tail } => {
                        (inputs.clone(), tail.clone(), self.node(left).exception_path)
                    }
                    NodeKind::Internal { .. } => unreachable!(),
                };
                let right_inputs = match &self.node(right).kind {
                    NodeKind::Leaf { inputs, .. } => inputs.clone(),
                    NodeKind::Internal { .. } => unreachable!(),
                };
                self.leaf_merge_inputset(new_leaf, left_inputs);
                self.leaf_merge_inputset(new_leaf, right_inputs);
                match &mut self.node_mut(new_leaf).kind {
                    NodeKind::Leaf { tail, .. } => *tail = left_tail,
                    NodeKind::Internal { .. } => unreachable!(),
                }
                self.node_mut(new_leaf).exception_path = left_exception;
                // Pulled leaves already gave their index entries back via
                // leaf_merge_inputset; drop the husks.
                self.dealloc(left);
                self.dealloc(right);
                return new_leaf;
            }

            assert!(!is_epsilon(&common));

            if self.node(left).is_leaf() {
                // leaf + internal: the leaf becomes the internal's epsilon
                // child.
                self.node_mut(left).prefix = epsilon();
                self.add_node(left, Some(right), None);
                return right;
            }
            if self.node(right).is_leaf() {
                self.node_mut(right).prefix = epsilon();
                self.add_node(right, Some(left), None);
                return left;
            }

            // internal + internal: pool the children under one node.
            let new_internal = self.create_internal(common);
            for child in self.pull_children(left) {
                self.add_node(child, Some(new_internal), None);
            }
            for child in self.pull_children(right) {
                self.add_node(child, Some(new_internal), None);
            }
            self.dealloc(left);
            self.dealloc(right);
            return new_internal;
        }

        if self.node(left).prefix.len() == common_len {
            return self.merge_prefix_into(left, right, common);
        }
        if self.node(right).prefix.len() == common_len {
            return self.merge_prefix_into(right, left, common);
        }

        // Both sides extend past the common prefix.
        let new_internal = self.create_internal(common);
        self.node_mut(left).prefix.drain(..common_len);
        self.add_node(left, Some(new_internal), None);
        self.node_mut(right).prefix.drain(..common_len);
        self.add_node(right, Some(new_internal), None);
        new_internal
    }

    /// Merge where `short`'s whole prefix is the common part and `long`
    /// extends past it.
    fn merge_prefix_into(&mut self, short: NodeId, long: NodeId, common: ExecPath) -> NodeId {
        let common_len = common.len();
        assert!(self.node(long).prefix.len() > common_len);
        let new_internal = self.create_internal(common);

        if self.node(short).is_leaf() {
            self.node_mut(short).prefix = epsilon();
            self.add_node(short, Some(new_internal), None);
        } else {
            for child in self.pull_children(short) {
                self.add_node(child, Some(new_internal), None);
            }
            self.dealloc(short);
        }

        self.node_mut(long).prefix.drain(..common_len);
        self.add_node(long, Some(new_internal), None);
        new_internal
    }

    /// Collapse an internal left with a single child into that child.
    fn rm_internal_with_only_child(&mut self, id: NodeId) {
        assert!(self.alive(id));
        if self.node(id).children().len() >= 2 {
            return;
        }
        let parent = self.node(id).parent;
        self.pull_node(id);
        let children = self.pull_children(id);
        assert_eq!(children.len(), 1);
        let only_child = children[0];

        if is_epsilon(&self.node(id).prefix) {
            assert!(parent.is_none());
            // The child keeps its own prefix.
        } else if is_epsilon(&self.node(only_child).prefix) {
            assert!(self.node(only_child).is_leaf());
            let prefix = self.node(id).prefix.clone();
            self.node_mut(only_child).prefix = prefix;
        } else {
            let mut prefix = self.node(id).prefix.clone();
            prefix.extend(self.node(only_child).prefix.iter().copied());
            self.node_mut(only_child).prefix = prefix;
        }

        self.dealloc(id);
        self.add_node(only_child, parent, None);
    }

    // ------------------------------------------------------------------
    // Purge / reinsert
    // ------------------------------------------------------------------

    /// Detach the leaf at `epath` and repair its parent. Returns the
    /// detached leaf.
    fn purge_leaf(&mut self, epath: &[Pcid]) -> NodeId {
        let leaf = self.find(epath).expect("purge_leaf on an unknown path");
        assert!(self.node(leaf).is_leaf());
        let parent = self.node(leaf).parent;
        self.pull_node(leaf);
        if let Some(parent) = parent {
            self.rm_internal_with_only_child(parent);
        }
        leaf
    }

    /// Move the leaf at `epath_old` (with its inputs and exception flag)
    /// to `epath_new`. Used when an input turned out to produce a
    /// considerably longer path than previously recorded.
    pub fn purge_and_reinsert<R: Rng + ?Sized>(
        &mut self,
        epath_old: &[Pcid],
        epath_new: &[Pcid],
        rng: &mut R,
    ) {
        let old_leaf = self.purge_leaf(epath_old);
        let (inputs, exception) = match &self.node(old_leaf).kind {
            NodeKind::Leaf { inputs, .. } => {
                (inputs.clone(), self.node(old_leaf).exception_path)
            }
            NodeKind::Internal { .. } => unreachable!(),
        };
        self.dealloc(old_leaf);
        // The migrated leaf inherits the exception flag; path migration
        // carries no fresh run result.
        let status = if exception {
            RunStatus::ExpectedException
        } else {
            RunStatus::Ok
        };
        self.insert_set(epath_new, inputs, status, rng);
    }

    // ------------------------------------------------------------------
    // Invariants and structural equality
    // ------------------------------------------------------------------

    fn no_empty_prefix(&self) -> bool {
        self.iter_ids().all(|id| !self.node(id).prefix.is_empty())
    }

    fn no_epsilon_internal(&self) -> bool {
        self.iter_ids().all(|id| {
            let node = self.node(id);
            node.is_leaf() || !is_epsilon(&node.prefix) || node.parent.is_none()
        })
    }

    fn children_sorted_at(&self, id: NodeId) -> bool {
        let children = self.node(id).children();
        children
            .windows(2)
            .all(|w| self.node(w[0]).prefix[0] < self.node(w[1]).prefix[0])
    }

    fn children_sorted(&self) -> bool {
        self.iter_ids()
            .filter(|&id| !self.node(id).is_leaf())
            .all(|id| self.children_sorted_at(id))
    }

    fn no_only_child_internal(&self) -> bool {
        self.iter_ids()
            .filter(|&id| !self.node(id).is_leaf())
            .all(|id| self.node(id).children().len() >= 2)
    }

    fn input_index_consistent(&self) -> bool {
        let mut from_leaves = 0usize;
        for id in self.iter_ids() {
            if let NodeKind::Leaf { inputs, .. } = &self.node(id).kind {
                from_leaves += inputs.len();
                if !inputs
                    .iter()
                    .all(|input| self.all_input.get(input) == Some(&id))
                {
                    return false;
                }
            }
        }
        from_leaves == self.all_input.len()
    }

    /// All structural invariants at once. Exposed so tests can assert it
    /// after arbitrary mutation sequences.
    pub fn invariants_hold(&self) -> bool {
        self.no_empty_prefix()
            && self.no_epsilon_internal()
            && self.children_sorted()
            && self.no_only_child_internal()
            && self.input_index_consistent()
    }

    /// Shape equality on prefixes, ignoring conditions and inputs. Test
    /// support.
    pub fn struct_eq(&self, other: &ExecTree) -> bool {
        match (self.root, other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => self.node_struct_eq(a, other, b),
            _ => false,
        }
    }

    fn node_struct_eq(&self, id: NodeId, other: &ExecTree, other_id: NodeId) -> bool {
        let a = self.node(id);
        let b = other.node(other_id);
        if a.prefix != b.prefix || a.is_leaf() != b.is_leaf() {
            return false;
        }
        let a_children = a.children();
        let b_children = b.children();
        a_children.len() == b_children.len()
            && a_children
                .iter()
                .zip(b_children.iter())
                .all(|(&ca, &cb)| self.node_struct_eq(ca, other, cb))
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Indented dump of the tree. Exception paths are colored yellow when
    /// `colorize` is set.
    pub fn render(&self, colorize: bool) -> String {
        match self.root {
            None => String::new(),
            Some(root) => self.render_node(root, colorize),
        }
    }

    fn render_node(&self, id: NodeId, colorize: bool) -> String {
        let node = self.node(id);
        let indent = "    ".repeat(node.depth);
        let mut line = format!(
            "{}prefix: [{}]",
            indent,
            node.prefix
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        line.push_str(&format!("  cond: {}", node.cond.render()));
        if let NodeKind::Leaf { inputs, .. } = &node.kind {
            line.push_str(&format!("  inputs: {}", inputs.len()));
        }
        if colorize && node.exception_path {
            line = format!("\u{1b}[33m{}\u{1b}[m", line);
        }
        line.push('\n');
        let mut out = line;
        for &child in node.children() {
            out.push_str(&self.render_node(child, colorize));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use waypoint_core::Args;

    const BUDGET: i64 = 4_000_000_000;

    fn empty_sig() -> InputSignature {
        let mut sig = InputSignature::new();
        sig.add_numeric("a").unwrap();
        sig
    }

    fn tree() -> ExecTree {
        ExecTree::new(empty_sig(), PathLimits::new(1000), BUDGET)
    }

    fn input(a: i64) -> Input {
        let numeric: Args = [("a".to_string(), a)].into();
        Input::new(Args::new(), numeric)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn leaf_eviction_keeps_the_cap() {
        let mut t = tree();
        let mut rng = rng();
        for i in 0..(MAX_INPUT_PER_PATH as i64 + 20) {
            t.insert(&[1], input(i), RunStatus::Ok, &mut rng);
        }
        let leaf = t.find(&[1]).unwrap();
        assert_eq!(t.leaf_inputs(leaf).len(), MAX_INPUT_PER_PATH);
        assert_eq!(t.num_total_inputs(), MAX_INPUT_PER_PATH);
        assert!(t.invariants_hold());
    }

    #[test]
    fn exception_flag_is_and_propagated() {
        let mut t = tree();
        let mut rng = rng();
        t.insert(&[1, 2], input(0), RunStatus::ExpectedException, &mut rng);
        t.insert(&[1, 3], input(1), RunStatus::Ok, &mut rng);
        let root = t.root().unwrap();
        assert!(!t.exception_path(root));

        let ok_leaf = t.find(&[1, 3]).unwrap();
        assert!(!t.exception_path(ok_leaf));
        let exc_leaf = t.find(&[1, 2]).unwrap();
        assert!(t.exception_path(exc_leaf));

        // Flip the ok leaf: now every leaf throws, so the root does too.
        t.insert(&[1, 3], input(2), RunStatus::ExpectedException, &mut rng);
        assert!(t.exception_path(root));
    }

    #[test]
    fn lca_of_siblings_is_their_parent() {
        let mut t = tree();
        let mut rng = rng();
        let a = t.insert(&[1, 2, 3], input(0), RunStatus::Ok, &mut rng);
        let b = t.insert(&[1, 2, 4], input(1), RunStatus::Ok, &mut rng);
        let c = t.insert(&[1, 9], input(2), RunStatus::Ok, &mut rng);
        let ab = t.lowest_common_ancestor(a, b);
        assert_eq!(t.prefix(ab), &[2]);
        let ac = t.lowest_common_ancestor(a, c);
        assert_eq!(ac, t.root().unwrap());
    }

    #[test]
    fn path_of_input_reconstructs_tail() {
        let mut t = ExecTree::new(empty_sig(), PathLimits::new(10), BUDGET);
        let mut rng = rng();
        let path: ExecPath = (1..=15).collect();
        t.insert(&path, input(7), RunStatus::Ok, &mut rng);
        assert_eq!(t.path_of_input(&input(7)).unwrap(), path);
    }

    #[test]
    fn promote_cond_moves_both_siblings() {
        let mut t = tree();
        let mut rng = rng();
        let a = t.insert(&[1, 2], input(0), RunStatus::Ok, &mut rng);
        let b = t.insert(&[1, 3], input(1), RunStatus::Ok, &mut rng);
        assert_eq!(t.cond(a).kind(), CondKind::Numeric);
        t.promote_cond(a);
        assert_eq!(t.cond(a).kind(), CondKind::Neglect);
        assert_eq!(t.cond(b).kind(), CondKind::Neglect);
    }
}

use std::io;
use std::iter::FusedIterator;
use std::ptr::{self, null_mut};

use smallvec::SmallVec;

use crate::atomics::*;
use crate::tree_policy::TreePolicy;

/// A node of the search tree.
///
/// Every node is its own heap allocation and is never moved or freed before
/// the whole tree is dropped, so references handed out by the tree stay
/// valid while other threads append children elsewhere.
pub struct SearchNode<D> {
    id: usize,
    parent: *const SearchNode<D>,
    children: Box<[AtomicPtr<SearchNode<D>>]>,
    reserved: AtomicUsize,
    data: D,
}

unsafe impl<D: Send> Send for SearchNode<D> {}
unsafe impl<D: Send + Sync> Sync for SearchNode<D> {}

impl<D> SearchNode<D> {
    fn new(id: usize, parent: *const SearchNode<D>, capacity: usize, data: D) -> Self {
        let children = (0..capacity)
            .map(|_| AtomicPtr::new(null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            id,
            parent,
            children,
            reserved: AtomicUsize::new(0),
            data,
        }
    }

    /// Sequence number of this node within its tree. The root is `0`.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn parent(&self) -> Option<&SearchNode<D>> {
        // parents outlive their children, both are freed with the tree
        unsafe { self.parent.as_ref() }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_null()
    }

    /// The maximum number of children this node can hold.
    pub fn capacity(&self) -> usize {
        self.children.len()
    }

    /// The child at `index`, if it has been published.
    pub fn child(&self, index: usize) -> Option<&SearchNode<D>> {
        let child = self.children.get(index)?.load(Ordering::Acquire);
        unsafe { child.as_ref() }
    }

    /// The published children, in the order they were appended.
    pub fn children(&self) -> Children<'_, D> {
        Children {
            slots: &self.children,
            next: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.children().count()
    }

    pub fn is_empty(&self) -> bool {
        self.child(0).is_none()
    }
}

fn drop_if_present<T>(ptr: &AtomicPtr<T>) {
    let ptr = ptr.load(Ordering::Acquire);
    if !ptr.is_null() {
        unsafe {
            drop(Box::from_raw(ptr));
        }
    }
}

impl<D> Drop for SearchNode<D> {
    fn drop(&mut self) {
        for slot in self.children.iter() {
            drop_if_present(slot);
        }
    }
}

/// Iterator over the published children of a node.
///
/// Stops at the first slot that has been reserved but not yet filled, so a
/// reader never sees a half-constructed child.
pub struct Children<'a, D> {
    slots: &'a [AtomicPtr<SearchNode<D>>],
    next: usize,
}

impl<'a, D> Iterator for Children<'a, D> {
    type Item = &'a SearchNode<D>;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.slots.get(self.next)?;
        let child = unsafe { slot.load(Ordering::Acquire).as_ref() };
        match child {
            Some(child) => {
                self.next += 1;
                Some(child)
            }
            None => {
                self.next = self.slots.len();
                None
            }
        }
    }
}

impl<'a, D> FusedIterator for Children<'a, D> {}

pub struct SearchTree<P: TreePolicy> {
    root_node: Box<SearchNode<P::NodeData>>,
    tree_policy: P,
    child_capacity: usize,
    next_id: AtomicUsize,
}

impl<P: TreePolicy> SearchTree<P> {
    pub(crate) fn new(tree_policy: P) -> Self {
        let child_capacity = tree_policy.children_capacity();
        let root_data = tree_policy.root_data();
        let root_node = Box::new(SearchNode::new(0, ptr::null(), child_capacity, root_data));

        Self {
            root_node,
            tree_policy,
            child_capacity,
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn root(&self) -> &SearchNode<P::NodeData> {
        &self.root_node
    }

    pub fn policy(&self) -> &P {
        &self.tree_policy
    }

    pub fn child_capacity(&self) -> usize {
        self.child_capacity
    }

    /// Number of nodes created so far, including the root.
    pub fn node_count(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Appends a child holding `data` to `parent`, or returns `None` when
    /// `parent` is already at capacity.
    ///
    /// Callers that need "check then append" to be atomic must serialize
    /// around this call themselves.
    pub fn push_child<'a>(
        &'a self,
        parent: &'a SearchNode<P::NodeData>,
        data: P::NodeData,
    ) -> Option<&'a SearchNode<P::NodeData>> {
        debug_assert!(self.owns(parent), "node {} belongs to another tree", parent.id);

        let capacity = parent.children.len();
        let slot = parent
            .reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n < capacity {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .ok()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let child = Box::into_raw(Box::new(SearchNode::new(
            id,
            parent,
            self.child_capacity,
            data,
        )));
        parent.children[slot].store(child, Ordering::Release);

        Some(unsafe { &*child })
    }

    fn owns(&self, node: &SearchNode<P::NodeData>) -> bool {
        let mut crnt = node;
        while let Some(parent) = crnt.parent() {
            crnt = parent;
        }
        ptr::eq(crnt, self.root())
    }

    pub(crate) fn bootstrap(&self, tld: &mut P::ThreadLocalData) -> Result<(), P::Error> {
        let state = self.tree_policy.root_state();
        self.tree_policy
            .default_policy(self, self.root(), state, tld)
    }

    /// One selection step, followed by a simulation if it produced a leaf.
    pub fn playout(&self, tld: &mut P::ThreadLocalData) -> Result<bool, P::Error> {
        match self.tree_policy.tree_policy(self, tld)? {
            Some((leaf, state)) => {
                self.tree_policy.default_policy(self, leaf, state, tld)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn result_index(&self) -> Option<usize> {
        self.tree_policy.final_index(self.root())
    }

    pub fn result_node(&self) -> Option<&SearchNode<P::NodeData>> {
        self.result_index().and_then(|index| self.root().child(index))
    }

    /// Follows the policy's final choice from the root, at most `max_len`
    /// moves deep.
    pub fn principal_variation(&self, max_len: usize) -> Vec<&SearchNode<P::NodeData>> {
        let mut result = Vec::new();
        let mut crnt = self.root();
        while result.len() < max_len {
            let child = match self.tree_policy.final_index(crnt) {
                Some(index) => crnt.child(index),
                None => None,
            };
            match child {
                Some(child) => {
                    result.push(child);
                    crnt = child;
                }
                None => break,
            }
        }
        result
    }

    /// Every published node, parents before children.
    pub fn nodes(&self) -> Vec<&SearchNode<P::NodeData>> {
        const LARGE_DEPTH: usize = 64;
        let mut result = Vec::new();
        let mut stack: SmallVec<[&SearchNode<P::NodeData>; LARGE_DEPTH]> = SmallVec::new();
        stack.push(self.root());
        while let Some(node) = stack.pop() {
            result.push(node);
            stack.extend(node.children());
        }
        result
    }

    /// Writes the tree in Graphviz `dot` format, one edge per parent/child
    /// pair, labelled by the policy.
    pub fn write_dot<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "digraph search_tree {{")?;
        for node in self.nodes() {
            let label = self.tree_policy.describe(node).replace('"', "\\\"");
            writeln!(out, "    n{} [label=\"{}\"];", node.id, label)?;
            if let Some(parent) = node.parent() {
                writeln!(out, "    n{} -> n{};", parent.id, node.id)?;
            }
        }
        writeln!(out, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    /// Expands the first node with room and counts visits on the way back.
    struct FillPolicy {
        capacity: usize,
    }

    #[derive(Default)]
    struct FillData {
        visits: AtomicUsize,
        simulated: AtomicBool,
    }

    impl TreePolicy for FillPolicy {
        type NodeData = FillData;
        type State = ();
        type ThreadLocalData = ();
        type Error = Infallible;

        fn children_capacity(&self) -> usize {
            self.capacity
        }

        fn root_data(&self) -> FillData {
            FillData::default()
        }

        fn root_state(&self) {}

        fn thread_local_data(&self, _seed: u64) {}

        fn tree_policy<'a>(
            &self,
            tree: &'a SearchTree<Self>,
            _tld: &mut (),
        ) -> Result<Option<(&'a SearchNode<FillData>, ())>, Infallible> {
            let mut crnt = tree.root();
            loop {
                if !crnt.data().simulated.load(Ordering::Acquire) {
                    return Ok(None);
                }
                if let Some(child) = tree.push_child(crnt, FillData::default()) {
                    return Ok(Some((child, ())));
                }
                let least = crnt
                    .children()
                    .min_by_key(|c| c.data().visits.load(Ordering::Relaxed));
                match least {
                    Some(child) => crnt = child,
                    None => return Ok(None),
                }
            }
        }

        fn default_policy(
            &self,
            _tree: &SearchTree<Self>,
            leaf: &SearchNode<FillData>,
            _state: (),
            _tld: &mut (),
        ) -> Result<(), Infallible> {
            let mut crnt = Some(leaf);
            while let Some(node) = crnt {
                node.data().visits.fetch_add(1, Ordering::Relaxed);
                crnt = node.parent();
            }
            assert!(!leaf.data().simulated.swap(true, Ordering::Release));
            Ok(())
        }

        fn final_index(&self, node: &SearchNode<FillData>) -> Option<usize> {
            if node.is_empty() {
                None
            } else {
                Some(0)
            }
        }
    }

    fn new_tree(capacity: usize) -> SearchTree<FillPolicy> {
        let tree = SearchTree::new(FillPolicy { capacity });
        tree.bootstrap(&mut ()).unwrap();
        tree
    }

    #[test]
    fn push_child_respects_capacity() {
        let tree = new_tree(3);
        let root = tree.root();
        for i in 0..3 {
            let child = tree.push_child(root, FillData::default()).unwrap();
            assert_eq!(child.id(), i + 1);
            assert!(ptr::eq(child.parent().unwrap(), root));
        }
        assert!(tree.push_child(root, FillData::default()).is_none());
        assert_eq!(root.len(), 3);
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn children_keep_their_order_and_address() {
        let tree = new_tree(4);
        let root = tree.root();
        let first = tree.push_child(root, FillData::default()).unwrap() as *const _;
        tree.push_child(root, FillData::default()).unwrap();
        tree.push_child(root, FillData::default()).unwrap();

        assert!(ptr::eq(root.child(0).unwrap(), first));
        let ids: Vec<_> = root.children().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn concurrent_playouts_count_every_walk() {
        let tree = new_tree(4);
        let completed = AtomicUsize::new(0);
        crossbeam::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|_| {
                    for _ in 0..500 {
                        if tree.playout(&mut ()).unwrap() {
                            completed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
        })
        .unwrap();

        let completed = completed.load(Ordering::Relaxed);
        assert_eq!(tree.root().data().visits.load(Ordering::Relaxed), completed + 1);
        assert_eq!(tree.node_count(), completed + 1);
        for node in tree.nodes() {
            assert!(node.len() <= 4);
            let below: usize = node
                .children()
                .map(|c| c.data().visits.load(Ordering::Relaxed))
                .sum();
            assert_eq!(node.data().visits.load(Ordering::Relaxed), below + 1);
        }
    }

    #[test]
    fn principal_variation_stops_at_a_leaf() {
        let tree = new_tree(2);
        for _ in 0..6 {
            tree.playout(&mut ()).unwrap();
        }
        let pv: Vec<_> = tree.principal_variation(10).iter().map(|n| n.id()).collect();
        assert_eq!(pv, vec![1, 3]);
        assert_eq!(tree.principal_variation(1).len(), 1);
    }

    #[test]
    fn dot_dump_lists_every_edge() {
        let tree = new_tree(2);
        for _ in 0..3 {
            tree.playout(&mut ()).unwrap();
        }
        let mut out = Vec::new();
        tree.write_dot(&mut out).unwrap();
        let dot = String::from_utf8(out).unwrap();

        assert!(dot.starts_with("digraph search_tree {"));
        assert!(dot.contains("n0 -> n1;"));
        assert!(dot.contains("n0 -> n2;"));
        assert!(dot.contains("n1 -> n3;"));
        assert_eq!(dot.matches("->").count(), 3);
    }
}

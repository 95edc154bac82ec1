//! Reply-tree forest
//!
//! Nodes live in an arena and link to each other by index as
//! parent/first-child/next-sibling. Deleted and folded messages stay in the
//! arena as node attributes so iteration stays stable.

mod builder;

pub use builder::ThreadBuilder;

use crate::iterator::IterFactory;
use crate::{CoreError, CoreResult};
use std::collections::HashMap;
use tidemail_worker::ThreadTree;

/// Index of a node in its forest
pub type NodeId = usize;

/// One message in a reply tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadNode {
    pub uid: u32,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    /// Hidden because an ancestor is folded
    pub hidden: bool,
    /// Removed from the folder
    pub deleted: bool,
}

impl ThreadNode {
    fn new(uid: u32) -> Self {
        Self {
            uid,
            parent: None,
            first_child: None,
            next_sibling: None,
            hidden: false,
            deleted: false,
        }
    }
}

/// A forest of reply trees
#[derive(Debug, Clone, Default)]
pub struct ThreadForest {
    nodes: Vec<ThreadNode>,
    roots: Vec<NodeId>,
    index: HashMap<u32, NodeId>,
}

impl ThreadForest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a forest from nested trees, keeping their order
    pub fn from_trees(trees: &[ThreadTree]) -> Self {
        let mut forest = Self::new();
        for tree in trees {
            if let Some(root) = forest.insert_tree(tree, None) {
                forest.roots.push(root);
            }
        }
        forest
    }

    fn insert_tree(&mut self, tree: &ThreadTree, parent: Option<NodeId>) -> Option<NodeId> {
        // A uid may appear once; repeats are dropped with their subtree
        if self.index.contains_key(&tree.uid) {
            return None;
        }
        let id = self.push(tree.uid);
        self.nodes[id].parent = parent;
        let mut last: Option<NodeId> = None;
        for child in &tree.children {
            if let Some(child_id) = self.insert_tree(child, Some(id)) {
                match last {
                    Some(prev) => self.nodes[prev].next_sibling = Some(child_id),
                    None => self.nodes[id].first_child = Some(child_id),
                }
                last = Some(child_id);
            }
        }
        Some(id)
    }

    pub(crate) fn push(&mut self, uid: u32) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ThreadNode::new(uid));
        self.index.insert(uid, id);
        id
    }

    /// Attach `children` under `parent` (or as roots) in the given order
    pub(crate) fn link(&mut self, parent: Option<NodeId>, children: &[NodeId]) {
        let mut last: Option<NodeId> = None;
        for &child in children {
            self.nodes[child].parent = parent;
            self.nodes[child].next_sibling = None;
            match (last, parent) {
                (Some(prev), _) => self.nodes[prev].next_sibling = Some(child),
                (None, Some(p)) => self.nodes[p].first_child = Some(child),
                (None, None) => {}
            }
            last = Some(child);
        }
        if parent.is_none() {
            self.roots = children.to_vec();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.index.contains_key(&uid)
    }

    pub fn get(&self, id: NodeId) -> Option<&ThreadNode> {
        self.nodes.get(id)
    }

    /// Node for a uid
    pub fn node(&self, uid: u32) -> Option<&ThreadNode> {
        self.index.get(&uid).map(|&id| &self.nodes[id])
    }

    pub fn id_of(&self, uid: u32) -> Option<NodeId> {
        self.index.get(&uid).copied()
    }

    /// Root uids in forest order
    pub fn roots(&self) -> Vec<u32> {
        self.roots.iter().map(|&id| self.nodes[id].uid).collect()
    }

    pub(crate) fn root_ids(&self) -> &[NodeId] {
        &self.roots
    }

    /// Uid of the root of the tree containing `uid`
    pub fn root_of(&self, uid: u32) -> CoreResult<u32> {
        let mut id = self.id_of(uid).ok_or(CoreError::ThreadNotFound(uid))?;
        while let Some(parent) = self.nodes[id].parent {
            id = parent;
        }
        Ok(self.nodes[id].uid)
    }

    /// Direct children of a node, in sibling order
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            forest: self,
            next: self.nodes.get(id).and_then(|n| n.first_child),
        }
    }

    /// Depth-first pre-order walk of the subtree at `id`, with depths
    /// relative to it
    pub fn walk(&self, id: NodeId) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        let mut stack = vec![(id, 0usize)];
        while let Some((current, depth)) = stack.pop() {
            out.push((current, depth));
            let children: Vec<NodeId> = self.children(current).collect();
            for &child in children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// Depth of a uid below its root
    pub fn depth(&self, uid: u32) -> Option<usize> {
        let mut id = self.id_of(uid)?;
        let mut depth = 0;
        while let Some(parent) = self.nodes[id].parent {
            id = parent;
            depth += 1;
        }
        Some(depth)
    }

    /// Number of messages in the tree rooted at `uid`, itself included
    pub fn thread_len(&self, uid: u32) -> usize {
        self.id_of(uid).map(|id| self.walk(id).len()).unwrap_or(0)
    }

    pub fn set_deleted(&mut self, uid: u32, deleted: bool) -> bool {
        match self.index.get(&uid) {
            Some(&id) => {
                self.nodes[id].deleted = deleted;
                true
            }
            None => false,
        }
    }

    /// Hide or show every descendant of `uid`, not the node itself
    pub fn set_descendants_hidden(&mut self, uid: u32, hidden: bool) -> CoreResult<()> {
        let id = self.id_of(uid).ok_or(CoreError::ThreadNotFound(uid))?;
        for (node, _) in self.walk(id).into_iter().skip(1) {
            self.nodes[node].hidden = hidden;
        }
        Ok(())
    }

    /// Uids of every descendant of `uid`
    pub fn descendants(&self, uid: u32) -> Vec<u32> {
        match self.id_of(uid) {
            Some(id) => self
                .walk(id)
                .into_iter()
                .skip(1)
                .map(|(node, _)| self.nodes[node].uid)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Flatten the forest into a uid list in storage order.
    ///
    /// Hidden and deleted nodes are skipped. Roots keep their order; the
    /// messages of each tree are laid out so that the display iterator shows
    /// a parent above its replies, or below them when `reverse` is set.
    pub fn flatten(&self, reverse: bool, factory: IterFactory) -> Vec<u32> {
        self.layout(reverse, factory, false)
    }

    /// Like [`ThreadForest::flatten`], keeping folded messages
    pub fn all_uids(&self, reverse: bool, factory: IterFactory) -> Vec<u32> {
        self.layout(reverse, factory, true)
    }

    fn layout(&self, reverse: bool, factory: IterFactory, with_hidden: bool) -> Vec<u32> {
        let mut uids = Vec::with_capacity(self.nodes.len());
        for &root in &self.roots {
            let mut tree: Vec<u32> = self
                .walk(root)
                .into_iter()
                .map(|(id, _)| &self.nodes[id])
                .filter(|n| !n.deleted && (with_hidden || !n.hidden))
                .map(|n| n.uid)
                .collect();
            if reverse == factory.is_reverse() {
                tree.reverse();
            }
            uids.extend(tree);
        }
        uids
    }
}

/// Iterator over the children of one node
pub struct Children<'a> {
    forest: &'a ThreadForest,
    next: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        self.next = self.forest.nodes[current].next_sibling;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ThreadForest {
        // 1 -> (2 -> 4), 3 ; 5
        ThreadForest::from_trees(&[
            ThreadTree::with_children(
                1,
                vec![
                    ThreadTree::with_children(2, vec![ThreadTree::leaf(4)]),
                    ThreadTree::leaf(3),
                ],
            ),
            ThreadTree::leaf(5),
        ])
    }

    #[test]
    fn test_from_trees_links() {
        let forest = sample();
        assert_eq!(forest.roots(), vec![1, 5]);
        assert_eq!(forest.root_of(4).unwrap(), 1);
        assert_eq!(forest.depth(4), Some(2));
        assert_eq!(forest.descendants(1), vec![2, 4, 3]);
        assert_eq!(forest.thread_len(1), 4);
        assert!(matches!(forest.root_of(9), Err(CoreError::ThreadNotFound(9))));
    }

    #[test]
    fn test_flatten_display_order() {
        let forest = sample();
        let factory = IterFactory::new(false);
        let storage = forest.flatten(false, factory);
        assert_eq!(storage, vec![3, 4, 2, 1, 5]);

        // Shown newest thread first, each parent above its replies
        let shown: Vec<u32> = factory.iter(&storage).copied().collect();
        assert_eq!(shown, vec![5, 1, 2, 4, 3]);

        let inverted = forest.flatten(true, factory);
        let shown: Vec<u32> = factory.iter(&inverted).copied().collect();
        assert_eq!(shown, vec![5, 3, 4, 2, 1]);
    }

    #[test]
    fn test_fold_hides_descendants_only() {
        let mut forest = sample();
        let factory = IterFactory::new(true);
        let before = forest.flatten(false, factory);
        assert_eq!(before, vec![1, 2, 4, 3, 5]);

        forest.set_descendants_hidden(2, true).unwrap();
        assert_eq!(forest.flatten(false, factory), vec![1, 2, 3, 5]);
        assert_eq!(forest.all_uids(false, factory), before);

        forest.set_descendants_hidden(2, false).unwrap();
        assert_eq!(forest.flatten(false, factory), before);
    }

    #[test]
    fn test_deleted_nodes_are_skipped() {
        let mut forest = sample();
        assert!(forest.set_deleted(2, true));
        assert!(!forest.set_deleted(42, true));
        // Replies to a deleted message stay visible
        assert_eq!(forest.flatten(false, IterFactory::new(true)), vec![1, 4, 3, 5]);
    }
}

//! B+ tree used by the search indexes.
//!
//! An arena-allocated B+ tree over any `K: Ord + Clone`, holding each key at
//! most once. Indexes store `(value, row key)` pairs so that duplicate column
//! values stay distinct entries and a range over the value part is a plain key
//! range. Leaves are linked for range scans.

mod error;
mod node;

pub use error::{BPlusTreeError, BPlusTreeResult};
pub use node::{BPlusNode, InternalNode, LeafNode, NodeId};

use std::ops::Bound;

/// Default B+ tree order
pub const DEFAULT_ORDER: usize = 64;

/// B+ Tree data structure
///
/// Order `m` means:
/// - Internal nodes have at most `m` children
/// - Internal nodes (except root) have at least `ceil(m/2)` children
/// - Leaf nodes have at most `m-1` entries
/// - Leaf nodes (except root) have at least `ceil((m-1)/2)` entries
#[derive(Debug, Clone)]
pub struct BPlusTree<K> {
    /// Root node ID (None if tree is empty)
    root: Option<NodeId>,

    /// Tree order (max children per internal node)
    order: usize,

    /// Node storage
    nodes: Vec<Option<BPlusNode<K>>>,

    /// Free list for recycling deleted nodes
    free_list: Vec<NodeId>,

    /// First leaf node (for full range scans)
    first_leaf: Option<NodeId>,

    /// Total number of entries in the tree
    entry_count: usize,
}

type Path = Vec<(NodeId, usize)>;

impl<K: Ord + Clone> BPlusTree<K> {
    /// Create a new empty B+ tree with the given order (must be >= 3)
    pub fn new(order: usize) -> BPlusTreeResult<Self> {
        if order < 3 {
            return Err(BPlusTreeError::InvalidOrder(order));
        }

        Ok(Self {
            root: None,
            order,
            nodes: Vec::new(),
            free_list: Vec::new(),
            first_leaf: None,
            entry_count: 0,
        })
    }

    /// Create a new B+ tree with [`DEFAULT_ORDER`]
    pub fn with_default_order() -> Self {
        Self {
            root: None,
            order: DEFAULT_ORDER,
            nodes: Vec::new(),
            free_list: Vec::new(),
            first_leaf: None,
            entry_count: 0,
        }
    }

    /// Get the tree order
    pub fn order(&self) -> usize {
        self.order
    }

    /// Check if tree is empty
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Get number of entries in the tree
    pub fn len(&self) -> usize {
        self.entry_count
    }

    /// Get tree height (1 for single leaf, 2+ for internal nodes)
    pub fn height(&self) -> usize {
        let Some(root_id) = self.root else {
            return 0;
        };
        let mut height = 1;
        let mut current = root_id;

        while let Some(BPlusNode::Internal(node)) = self.get_node(current) {
            match node.children.first() {
                Some(&child_id) => {
                    current = child_id;
                    height += 1;
                }
                None => break,
            }
        }
        height
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.root = None;
        self.nodes.clear();
        self.free_list.clear();
        self.first_leaf = None;
        self.entry_count = 0;
    }

    /// Maximum entries in a leaf node
    fn max_leaf_entries(&self) -> usize {
        self.order - 1
    }

    /// Minimum entries in a leaf node (except root)
    fn min_leaf_entries(&self) -> usize {
        (self.order - 1).div_ceil(2)
    }

    /// Maximum children in an internal node
    fn max_internal_children(&self) -> usize {
        self.order
    }

    /// Minimum children in an internal node (except root)
    fn min_internal_children(&self) -> usize {
        self.order.div_ceil(2)
    }

    // ========== Node Management ==========

    /// Allocate a new node, returning its ID
    fn allocate_node(&mut self, node: BPlusNode<K>) -> NodeId {
        if let Some(id) = self.free_list.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            let id = self.nodes.len();
            self.nodes.push(Some(node));
            id
        }
    }

    /// Get a reference to a node by ID
    pub fn get_node(&self, id: NodeId) -> Option<&BPlusNode<K>> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    fn get_node_mut(&mut self, id: NodeId) -> Option<&mut BPlusNode<K>> {
        self.nodes.get_mut(id).and_then(|n| n.as_mut())
    }

    fn leaf(&self, id: NodeId) -> BPlusTreeResult<&LeafNode<K>> {
        self.get_node(id)
            .and_then(|n| n.as_leaf())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn leaf_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut LeafNode<K>> {
        self.get_node_mut(id)
            .and_then(|n| n.as_leaf_mut())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn internal(&self, id: NodeId) -> BPlusTreeResult<&InternalNode<K>> {
        self.get_node(id)
            .and_then(|n| n.as_internal())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn internal_mut(&mut self, id: NodeId) -> BPlusTreeResult<&mut InternalNode<K>> {
        self.get_node_mut(id)
            .and_then(|n| n.as_internal_mut())
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    fn max_key_of(&self, id: NodeId) -> BPlusTreeResult<K> {
        self.get_node(id)
            .and_then(|n| n.max_key())
            .cloned()
            .ok_or(BPlusTreeError::NodeNotFound(id))
    }

    /// Reset `parent.keys[idx]` to the current maximum of that child
    fn refresh_child_key(&mut self, parent_id: NodeId, idx: usize) -> BPlusTreeResult<()> {
        let child_id = self.internal(parent_id)?.children[idx];
        let max = self.max_key_of(child_id)?;
        self.internal_mut(parent_id)?.keys[idx] = max;
        Ok(())
    }

    /// Get the total number of node slots
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Free a node, adding it to the free list
    fn free_node(&mut self, id: NodeId) {
        if id < self.nodes.len() {
            self.nodes[id] = None;
            self.free_list.push(id);
        }
    }

    // ========== Search Operations ==========

    pub fn contains(&self, key: &K) -> bool {
        self.find_leaf(key)
            .and_then(|id| self.get_node(id))
            .and_then(|n| n.as_leaf())
            .is_some_and(|leaf| leaf.contains(key))
    }

    /// Entries within the given bounds, in key order
    pub fn range(&self, lower: Bound<&K>, upper: Bound<&K>) -> BPlusTreeIter<'_, K> {
        let upper = match upper {
            Bound::Included(k) => Bound::Included(k.clone()),
            Bound::Excluded(k) => Bound::Excluded(k.clone()),
            Bound::Unbounded => Bound::Unbounded,
        };

        let (leaf, idx) = match lower {
            Bound::Unbounded => (self.first_leaf, 0),
            Bound::Included(k) | Bound::Excluded(k) => match self.find_leaf(k) {
                Some(id) => {
                    let idx = self
                        .get_node(id)
                        .and_then(|n| n.as_leaf())
                        .map(|leaf| match lower {
                            Bound::Excluded(_) => leaf.keys.partition_point(|x| x <= k),
                            _ => leaf.keys.partition_point(|x| x < k),
                        })
                        .unwrap_or(0);
                    (Some(id), idx)
                }
                None => (None, 0),
            },
        };

        BPlusTreeIter {
            tree: self,
            current_leaf: leaf,
            current_idx: idx,
            upper,
        }
    }

    /// Find the leaf node that should contain the given key
    fn find_leaf(&self, key: &K) -> Option<NodeId> {
        let mut current = self.root?;

        loop {
            match self.get_node(current)? {
                BPlusNode::Leaf(_) => return Some(current),
                BPlusNode::Internal(node) => {
                    current = node.children[node.find_child_index(key)];
                }
            }
        }
    }

    /// Find the leaf node and the path from root to it
    fn find_leaf_with_path(&self, key: &K) -> Option<(NodeId, Path)> {
        let mut current = self.root?;
        let mut path = Vec::new();

        loop {
            match self.get_node(current)? {
                BPlusNode::Leaf(_) => return Some((current, path)),
                BPlusNode::Internal(node) => {
                    let child_idx = node.find_child_index(key);
                    path.push((current, child_idx));
                    current = node.children[child_idx];
                }
            }
        }
    }

    // ========== Insert Operations ==========

    /// Insert a key. Returns false if the key was already present.
    pub fn insert(&mut self, key: K) -> BPlusTreeResult<bool> {
        if self.root.is_none() {
            // Create first leaf as root
            let leaf_id = self.allocate_node(BPlusNode::Leaf(LeafNode::with_keys(vec![key])));
            self.root = Some(leaf_id);
            self.first_leaf = Some(leaf_id);
            self.entry_count = 1;
            return Ok(true);
        }

        let (leaf_id, path) = self
            .find_leaf_with_path(&key)
            .ok_or_else(|| BPlusTreeError::InvalidState("Could not find leaf".to_string()))?;

        if !self.leaf_mut(leaf_id)?.insert(key) {
            return Ok(false);
        }
        self.entry_count += 1;

        // Check for overflow and split if needed
        if self.leaf(leaf_id)?.len() > self.max_leaf_entries() {
            self.split_leaf(leaf_id, path)?;
        } else {
            // Update keys in ancestors if max key changed
            self.update_ancestor_keys(leaf_id, &path)?;
        }

        Ok(true)
    }

    /// Split an overflowing leaf node
    fn split_leaf(&mut self, leaf_id: NodeId, path: Path) -> BPlusTreeResult<()> {
        let right = self.leaf_mut(leaf_id)?.split();
        let right_max = right
            .max_key()
            .cloned()
            .ok_or_else(|| BPlusTreeError::InvalidState("Empty split leaf".to_string()))?;
        let right_id = self.allocate_node(BPlusNode::Leaf(right));

        let leaf = self.leaf_mut(leaf_id)?;
        leaf.next = Some(right_id);
        let left_max = leaf
            .max_key()
            .cloned()
            .ok_or_else(|| BPlusTreeError::InvalidState("Empty split leaf".to_string()))?;

        self.insert_into_parent(path, leaf_id, left_max, right_id, right_max)
    }

    /// Insert a new child into the parent after a split
    fn insert_into_parent(
        &mut self,
        mut path: Path,
        left_id: NodeId,
        left_key: K,
        right_id: NodeId,
        right_key: K,
    ) -> BPlusTreeResult<()> {
        let Some((parent_id, child_idx)) = path.pop() else {
            // Split the root - create new root
            let new_root = InternalNode::new(vec![left_key, right_key], vec![left_id, right_id]);
            let new_root_id = self.allocate_node(BPlusNode::Internal(new_root));
            self.root = Some(new_root_id);
            return Ok(());
        };

        let parent = self.internal_mut(parent_id)?;
        parent.keys[child_idx] = left_key;
        parent.keys.insert(child_idx + 1, right_key);
        parent.children.insert(child_idx + 1, right_id);
        let parent_len = parent.len();

        if parent_len > self.max_internal_children() {
            self.split_internal(parent_id, path)
        } else {
            self.update_ancestor_keys(parent_id, &path)
        }
    }

    /// Split an overflowing internal node
    fn split_internal(&mut self, node_id: NodeId, path: Path) -> BPlusTreeResult<()> {
        let node = self.internal_mut(node_id)?;
        let mid = node.len() / 2;
        let right_keys = node.keys.split_off(mid);
        let right_children = node.children.split_off(mid);

        let left_max = node
            .keys
            .last()
            .cloned()
            .ok_or_else(|| BPlusTreeError::InvalidState("Empty split node".to_string()))?;
        let right_max = right_keys
            .last()
            .cloned()
            .ok_or_else(|| BPlusTreeError::InvalidState("Empty split node".to_string()))?;

        let right_id =
            self.allocate_node(BPlusNode::Internal(InternalNode::new(right_keys, right_children)));
        self.insert_into_parent(path, node_id, left_max, right_id, right_max)
    }

    /// Propagate a changed subtree maximum towards the root
    fn update_ancestor_keys(&mut self, node_id: NodeId, path: &[(NodeId, usize)]) -> BPlusTreeResult<()> {
        let mut current_node = node_id;

        for &(parent_id, child_idx) in path.iter().rev() {
            let max_key = self.max_key_of(current_node)?;
            let parent = self.internal_mut(parent_id)?;

            // Only continue while the key actually changes
            if parent.keys[child_idx] != max_key {
                parent.keys[child_idx] = max_key;
                current_node = parent_id;
            } else {
                break;
            }
        }

        Ok(())
    }

    // ========== Delete Operations ==========

    /// Remove a key. Returns true if it was present.
    pub fn delete(&mut self, key: &K) -> BPlusTreeResult<bool> {
        let Some((leaf_id, path)) = self.find_leaf_with_path(key) else {
            return Ok(false);
        };

        if !self.leaf_mut(leaf_id)?.delete(key) {
            return Ok(false);
        }
        self.entry_count -= 1;

        self.handle_leaf_underflow(leaf_id, path)?;
        Ok(true)
    }

    /// Handle underflow in a leaf node after deletion
    fn handle_leaf_underflow(&mut self, leaf_id: NodeId, mut path: Path) -> BPlusTreeResult<()> {
        let leaf_len = self.leaf(leaf_id)?.len();

        // Leaf is the root
        if path.is_empty() {
            if leaf_len == 0 {
                self.free_node(leaf_id);
                self.root = None;
                self.first_leaf = None;
            }
            return Ok(());
        }

        if leaf_len >= self.min_leaf_entries() {
            // No underflow, but update ancestor keys
            return self.update_ancestor_keys(leaf_id, &path);
        }

        let (parent_id, child_idx) = path.pop().ok_or_else(|| {
            BPlusTreeError::InvalidState("Missing parent".to_string())
        })?;
        let (sibling_id, sibling_is_left) = self.pick_sibling(parent_id, child_idx)?;
        let sibling_len = self.leaf(sibling_id)?.len();

        if sibling_len > self.min_leaf_entries() {
            self.redistribute_leaves(leaf_id, sibling_id, sibling_is_left, parent_id, child_idx)?;
            // The parent's own maximum may have changed
            self.update_ancestor_keys(parent_id, &path)
        } else {
            self.merge_leaves(leaf_id, sibling_id, sibling_is_left, parent_id, child_idx, path)
        }
    }

    fn pick_sibling(&self, parent_id: NodeId, child_idx: usize) -> BPlusTreeResult<(NodeId, bool)> {
        let parent = self.internal(parent_id)?;
        if child_idx > 0 {
            Ok((parent.children[child_idx - 1], true))
        } else if child_idx + 1 < parent.len() {
            Ok((parent.children[child_idx + 1], false))
        } else {
            Err(BPlusTreeError::InvalidState("No sibling found".to_string()))
        }
    }

    /// Move one entry from a sibling into an underflowing leaf
    fn redistribute_leaves(
        &mut self,
        leaf_id: NodeId,
        sibling_id: NodeId,
        sibling_is_left: bool,
        parent_id: NodeId,
        child_idx: usize,
    ) -> BPlusTreeResult<()> {
        if sibling_is_left {
            // Borrow the left sibling's last entry
            let key = self
                .leaf_mut(sibling_id)?
                .keys
                .pop()
                .ok_or(BPlusTreeError::NodeNotFound(sibling_id))?;
            self.leaf_mut(leaf_id)?.keys.insert(0, key);
            self.refresh_child_key(parent_id, child_idx - 1)?;
            self.refresh_child_key(parent_id, child_idx)?;
        } else {
            // Borrow the right sibling's first entry
            let sibling = self.leaf_mut(sibling_id)?;
            if sibling.keys.is_empty() {
                return Err(BPlusTreeError::NodeNotFound(sibling_id));
            }
            let key = sibling.keys.remove(0);
            self.leaf_mut(leaf_id)?.keys.push(key);
            self.refresh_child_key(parent_id, child_idx)?;
        }

        Ok(())
    }

    /// Merge a leaf with its sibling
    fn merge_leaves(
        &mut self,
        leaf_id: NodeId,
        sibling_id: NodeId,
        sibling_is_left: bool,
        parent_id: NodeId,
        child_idx: usize,
        parent_path: Path,
    ) -> BPlusTreeResult<()> {
        let (left_id, right_id, remove_idx) = if sibling_is_left {
            (sibling_id, leaf_id, child_idx)
        } else {
            (leaf_id, sibling_id, child_idx + 1)
        };

        // Merge right into left
        let right = self.leaf_mut(right_id)?;
        let right_keys = std::mem::take(&mut right.keys);
        let right_next = right.next.take();

        let left = self.leaf_mut(left_id)?;
        left.keys.extend(right_keys);
        left.next = right_next;

        if self.first_leaf == Some(right_id) {
            self.first_leaf = Some(left_id);
        }
        self.free_node(right_id);

        self.remove_from_parent(parent_id, remove_idx, parent_path)
    }

    /// Remove a child from parent after merge
    fn remove_from_parent(
        &mut self,
        parent_id: NodeId,
        remove_idx: usize,
        parent_path: Path,
    ) -> BPlusTreeResult<()> {
        let parent = self.internal_mut(parent_id)?;
        parent.keys.remove(remove_idx);
        parent.children.remove(remove_idx);

        // The child left of the removed one absorbed its entries
        let remaining_idx = remove_idx.saturating_sub(1);
        let remaining = parent.children.get(remaining_idx).copied();
        if let Some(child_id) = remaining {
            let child_max = self.max_key_of(child_id)?;
            self.internal_mut(parent_id)?.keys[remaining_idx] = child_max;
        }

        let parent_len = self.internal(parent_id)?.len();

        if parent_path.is_empty() {
            if parent_len == 1 {
                // Root with a single child - the child becomes the root
                let new_root = self.internal(parent_id)?.children[0];
                self.free_node(parent_id);
                self.root = Some(new_root);
            }
            return Ok(());
        }

        if parent_len < self.min_internal_children() {
            self.handle_internal_underflow(parent_id, parent_path)
        } else {
            self.update_ancestor_keys(parent_id, &parent_path)
        }
    }

    /// Handle underflow in an internal node
    fn handle_internal_underflow(&mut self, node_id: NodeId, mut path: Path) -> BPlusTreeResult<()> {
        let (parent_id, child_idx) = path
            .pop()
            .ok_or_else(|| BPlusTreeError::InvalidState("Missing parent".to_string()))?;
        let (sibling_id, sibling_is_left) = self.pick_sibling(parent_id, child_idx)?;
        let sibling_len = self.internal(sibling_id)?.len();

        if sibling_len > self.min_internal_children() {
            self.redistribute_internal(node_id, sibling_id, sibling_is_left, parent_id, child_idx)?;
            self.update_ancestor_keys(parent_id, &path)
        } else {
            self.merge_internal(node_id, sibling_id, sibling_is_left, parent_id, child_idx, path)
        }
    }

    /// Move one child from a sibling into an underflowing internal node
    fn redistribute_internal(
        &mut self,
        node_id: NodeId,
        sibling_id: NodeId,
        sibling_is_left: bool,
        parent_id: NodeId,
        child_idx: usize,
    ) -> BPlusTreeResult<()> {
        if sibling_is_left {
            let sibling = self.internal_mut(sibling_id)?;
            let (key, child) = match (sibling.keys.pop(), sibling.children.pop()) {
                (Some(k), Some(c)) => (k, c),
                _ => return Err(BPlusTreeError::NodeNotFound(sibling_id)),
            };
            let node = self.internal_mut(node_id)?;
            node.keys.insert(0, key);
            node.children.insert(0, child);
            self.refresh_child_key(parent_id, child_idx - 1)?;
            self.refresh_child_key(parent_id, child_idx)?;
        } else {
            let sibling = self.internal_mut(sibling_id)?;
            if sibling.children.is_empty() {
                return Err(BPlusTreeError::NodeNotFound(sibling_id));
            }
            let key = sibling.keys.remove(0);
            let child = sibling.children.remove(0);
            let node = self.internal_mut(node_id)?;
            node.keys.push(key);
            node.children.push(child);
            self.refresh_child_key(parent_id, child_idx)?;
        }

        Ok(())
    }

    /// Merge an internal node with its sibling
    fn merge_internal(
        &mut self,
        node_id: NodeId,
        sibling_id: NodeId,
        sibling_is_left: bool,
        parent_id: NodeId,
        child_idx: usize,
        parent_path: Path,
    ) -> BPlusTreeResult<()> {
        let (left_id, right_id, remove_idx) = if sibling_is_left {
            (sibling_id, node_id, child_idx)
        } else {
            (node_id, sibling_id, child_idx + 1)
        };

        let right = self.internal_mut(right_id)?;
        let right_keys = std::mem::take(&mut right.keys);
        let right_children = std::mem::take(&mut right.children);

        let left = self.internal_mut(left_id)?;
        left.keys.extend(right_keys);
        left.children.extend(right_children);

        self.free_node(right_id);
        self.remove_from_parent(parent_id, remove_idx, parent_path)
    }

    // ========== Iterator ==========

    /// Iterate over all entries in key order
    pub fn iter(&self) -> BPlusTreeIter<'_, K> {
        self.range(Bound::Unbounded, Bound::Unbounded)
    }
}

/// Iterator over B+ tree entries
pub struct BPlusTreeIter<'a, K> {
    tree: &'a BPlusTree<K>,
    current_leaf: Option<NodeId>,
    current_idx: usize,
    upper: Bound<K>,
}

impl<'a, K: Ord + Clone> Iterator for BPlusTreeIter<'a, K> {
    type Item = &'a K;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let leaf_id = self.current_leaf?;
            let leaf = self.tree.get_node(leaf_id)?.as_leaf()?;

            if let Some(key) = leaf.keys.get(self.current_idx) {
                let in_range = match &self.upper {
                    Bound::Included(u) => key <= u,
                    Bound::Excluded(u) => key < u,
                    Bound::Unbounded => true,
                };
                if !in_range {
                    self.current_leaf = None;
                    return None;
                }
                self.current_idx += 1;
                return Some(key);
            }

            // Move to next leaf
            self.current_leaf = leaf.next;
            self.current_idx = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_new_tree() {
        let tree = BPlusTree::<i64>::new(4).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.len(), 0);
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.order(), 4);
    }

    #[test]
    fn test_invalid_order() {
        assert!(BPlusTree::<i64>::new(2).is_err());
        assert!(BPlusTree::<i64>::new(0).is_err());
    }

    #[test]
    fn test_single_insert_and_search() {
        let mut tree = BPlusTree::new(4).unwrap();

        assert!(tree.insert(42).unwrap());
        assert!(!tree.insert(42).unwrap());

        assert_eq!(tree.len(), 1);
        assert_eq!(tree.height(), 1);
        assert!(tree.contains(&42));
        assert!(!tree.contains(&41));
    }

    #[test]
    fn test_many_inserts_grow_height() {
        let mut tree = BPlusTree::new(4).unwrap();
        for i in (0..200).rev() {
            tree.insert(i).unwrap();
        }
        assert_eq!(tree.len(), 200);
        assert!(tree.height() > 2);
        let all: Vec<i64> = tree.iter().copied().collect();
        assert_eq!(all, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_range_bounds() {
        let mut tree = BPlusTree::new(4).unwrap();
        for i in 0..50 {
            tree.insert(i * 2).unwrap();
        }

        let inclusive: Vec<i64> = tree
            .range(Bound::Included(&10), Bound::Included(&20))
            .copied()
            .collect();
        assert_eq!(inclusive, vec![10, 12, 14, 16, 18, 20]);

        let exclusive: Vec<i64> = tree
            .range(Bound::Excluded(&10), Bound::Excluded(&20))
            .copied()
            .collect();
        assert_eq!(exclusive, vec![12, 14, 16, 18]);

        let open_low: Vec<i64> = tree.range(Bound::Unbounded, Bound::Excluded(&5)).copied().collect();
        assert_eq!(open_low, vec![0, 2, 4]);

        assert_eq!(tree.range(Bound::Included(&1000), Bound::Unbounded).count(), 0);
    }

    #[test]
    fn test_composite_keys_for_duplicates() {
        let mut tree = BPlusTree::new(4).unwrap();
        for row in 0..30u64 {
            tree.insert((row % 3, row)).unwrap();
        }
        let ones: Vec<u64> = tree
            .range(Bound::Included(&(1, 0)), Bound::Included(&(1, u64::MAX)))
            .map(|(_, row)| *row)
            .collect();
        assert_eq!(ones.len(), 10);
        assert!(ones.iter().all(|r| r % 3 == 1));
    }

    #[test]
    fn test_delete_everything() {
        let mut tree = BPlusTree::new(4).unwrap();
        for i in 0..100 {
            tree.insert(i).unwrap();
        }
        for i in (0..100).step_by(2) {
            assert!(tree.delete(&i).unwrap());
        }
        assert!(!tree.delete(&0).unwrap());
        assert_eq!(tree.len(), 50);
        assert_eq!(tree.iter().copied().collect::<Vec<_>>(), (1..100).step_by(2).collect::<Vec<_>>());

        for i in (1..100).step_by(2) {
            assert!(tree.delete(&i).unwrap());
        }
        assert!(tree.is_empty());
        assert_eq!(tree.iter().count(), 0);
    }

    #[test]
    fn test_clone_is_independent() {
        let mut tree = BPlusTree::new(4).unwrap();
        for i in 0..20 {
            tree.insert(i).unwrap();
        }
        let snapshot = tree.clone();
        tree.delete(&5).unwrap();
        assert!(snapshot.contains(&5));
        assert!(!tree.contains(&5));
    }

    proptest! {
        #[test]
        fn prop_matches_btreeset(ops in prop::collection::vec((any::<bool>(), 0i32..200), 1..400)) {
            let mut tree = BPlusTree::new(5).unwrap();
            let mut model = BTreeSet::new();
            for (insert, key) in ops {
                if insert {
                    prop_assert_eq!(tree.insert(key).unwrap(), model.insert(key));
                } else {
                    prop_assert_eq!(tree.delete(&key).unwrap(), model.remove(&key));
                }
            }
            prop_assert_eq!(tree.len(), model.len());
            let got: Vec<i32> = tree.iter().copied().collect();
            let want: Vec<i32> = model.iter().copied().collect();
            prop_assert_eq!(got, want);

            let got: Vec<i32> = tree.range(Bound::Included(&50), Bound::Excluded(&120)).copied().collect();
            let want: Vec<i32> = model.range(50..120).copied().collect();
            prop_assert_eq!(got, want);
        }
    }
}

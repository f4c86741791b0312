/// Node identifier (index into node storage)
pub type NodeId = usize;

/// Internal node: stores keys and child pointers
///
/// In this B+ tree variant:
/// - keys[i] is the maximum key in the subtree rooted at children[i]
/// - keys.len() == children.len()
#[derive(Debug, Clone)]
pub struct InternalNode<K> {
    /// Maximum key of each child subtree
    pub keys: Vec<K>,
    /// Child node IDs
    pub children: Vec<NodeId>,
}

impl<K: Ord + Clone> InternalNode<K> {
    /// Create a new internal node with given keys and children
    pub fn new(keys: Vec<K>, children: Vec<NodeId>) -> Self {
        debug_assert_eq!(keys.len(), children.len());
        Self { keys, children }
    }

    /// Number of children
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Check if node is empty
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Index of the first child whose max key is >= `key`, or the last child
    pub fn find_child_index(&self, key: &K) -> usize {
        let idx = self.keys.partition_point(|k| k < key);
        idx.min(self.keys.len().saturating_sub(1))
    }

    /// Get the maximum key in this node
    pub fn max_key(&self) -> Option<&K> {
        self.keys.last()
    }
}

/// Leaf node: sorted keys, linked to the next leaf for range scans
#[derive(Debug, Clone)]
pub struct LeafNode<K> {
    pub keys: Vec<K>,
    pub next: Option<NodeId>,
}

impl<K: Ord + Clone> LeafNode<K> {
    /// Create a new empty leaf node
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            next: None,
        }
    }

    pub fn with_keys(keys: Vec<K>) -> Self {
        Self { keys, next: None }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if leaf is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert a key in sorted order. Returns false if it was already present.
    pub fn insert(&mut self, key: K) -> bool {
        match self.keys.binary_search(&key) {
            Ok(_) => false,
            Err(pos) => {
                self.keys.insert(pos, key);
                true
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    /// Remove a key. Returns true if it was present.
    pub fn delete(&mut self, key: &K) -> bool {
        match self.keys.binary_search(key) {
            Ok(pos) => {
                self.keys.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    /// Get the maximum key in this leaf
    pub fn max_key(&self) -> Option<&K> {
        self.keys.last()
    }

    /// Get the minimum key in this leaf
    pub fn min_key(&self) -> Option<&K> {
        self.keys.first()
    }

    /// Split this leaf node, returning the new right sibling
    /// This node keeps the first half, new node gets the second half
    pub fn split(&mut self) -> LeafNode<K> {
        let mid = self.keys.len() / 2;
        let mut right = LeafNode::with_keys(self.keys.split_off(mid));
        right.next = self.next.take();
        right
    }
}

impl<K: Ord + Clone> Default for LeafNode<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// B+ tree node (either internal or leaf)
#[derive(Debug, Clone)]
pub enum BPlusNode<K> {
    Internal(InternalNode<K>),
    Leaf(LeafNode<K>),
}

impl<K: Ord + Clone> BPlusNode<K> {
    /// Check if this is a leaf node
    pub fn is_leaf(&self) -> bool {
        matches!(self, BPlusNode::Leaf(_))
    }

    /// Get the maximum key in this node
    pub fn max_key(&self) -> Option<&K> {
        match self {
            BPlusNode::Internal(node) => node.max_key(),
            BPlusNode::Leaf(node) => node.max_key(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BPlusNode::Internal(node) => node.len(),
            BPlusNode::Leaf(node) => node.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get as internal node reference
    pub fn as_internal(&self) -> Option<&InternalNode<K>> {
        match self {
            BPlusNode::Internal(node) => Some(node),
            BPlusNode::Leaf(_) => None,
        }
    }

    /// Get as internal node mutable reference
    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode<K>> {
        match self {
            BPlusNode::Internal(node) => Some(node),
            BPlusNode::Leaf(_) => None,
        }
    }

    /// Get as leaf node reference
    pub fn as_leaf(&self) -> Option<&LeafNode<K>> {
        match self {
            BPlusNode::Internal(_) => None,
            BPlusNode::Leaf(node) => Some(node),
        }
    }

    /// Get as leaf node mutable reference
    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode<K>> {
        match self {
            BPlusNode::Internal(_) => None,
            BPlusNode::Leaf(node) => Some(node),
        }
    }
}

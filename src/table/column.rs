//! Positional column trees.
//!
//! A column is a B+-tree-like tree addressed by row position: leaves hold a
//! typed [`LeafArray`], inner nodes hold their children together with the
//! number of values below each child. Nodes are `Arc`-shared between
//! snapshots. A writer copies a node the first time it touches it and clears
//! the node's extent reference, so a commit writes exactly the changed nodes.

use std::sync::Arc;

use ahash::AHashSet;

use super::array::LeafArray;
use super::codec::{ByteReader, ByteWriter};
use crate::file::{PageRef, PageStore};
use crate::record::{DataType, RecordError, RecordResult, Value};

/// Maximum number of values in one leaf
pub const LEAF_CAPACITY: usize = 256;

/// Maximum number of children of an inner node
pub const INNER_FANOUT: usize = 64;

const LEAF_TAG: u8 = 1;
const INNER_TAG: u8 = 2;

#[derive(Debug, Clone)]
pub(crate) struct ColumnNode {
    body: NodeBody,
    /// Extent this node was written to; `None` while it has unsaved changes
    stored: Option<PageRef>,
}

#[derive(Debug, Clone)]
enum NodeBody {
    Leaf(LeafArray),
    Inner {
        children: Vec<Arc<ColumnNode>>,
        sizes: Vec<usize>,
    },
}

impl ColumnNode {
    fn leaf(array: LeafArray) -> Self {
        Self {
            body: NodeBody::Leaf(array),
            stored: None,
        }
    }

    fn inner(children: Vec<Arc<ColumnNode>>, sizes: Vec<usize>) -> Self {
        Self {
            body: NodeBody::Inner { children, sizes },
            stored: None,
        }
    }

    fn len(&self) -> usize {
        match &self.body {
            NodeBody::Leaf(arr) => arr.len(),
            NodeBody::Inner { sizes, .. } => sizes.iter().sum(),
        }
    }
}

/// Copy-on-write access that marks the node dirty
fn node_mut(node: &mut Arc<ColumnNode>) -> &mut ColumnNode {
    let node = Arc::make_mut(node);
    node.stored = None;
    node
}

/// Child holding `pos` and the offset inside it
fn locate(sizes: &[usize], mut pos: usize) -> Option<(usize, usize)> {
    for (idx, size) in sizes.iter().enumerate() {
        if pos < *size {
            return Some((idx, pos));
        }
        pos -= size;
    }
    None
}

/// Like [`locate`], but a position just past the end maps into the last child
fn locate_for_insert(sizes: &[usize], pos: usize) -> (usize, usize) {
    match locate(sizes, pos) {
        Some(found) => found,
        None => {
            let last = sizes.len().saturating_sub(1);
            let before: usize = sizes[..last].iter().sum();
            (last, pos - before)
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ColumnTree {
    root: Arc<ColumnNode>,
    /// `None` for the row-key column
    data_type: Option<DataType>,
    len: usize,
}

impl ColumnTree {
    pub fn new(data_type: DataType) -> Self {
        Self::empty(Some(data_type))
    }

    pub fn new_keys() -> Self {
        Self::empty(None)
    }

    fn empty(data_type: Option<DataType>) -> Self {
        let array = match data_type {
            Some(dt) => LeafArray::new(dt),
            None => LeafArray::new_keys(),
        };
        Self {
            root: Arc::new(ColumnNode::leaf(array)),
            data_type,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// Whether the tree has changes that are not written yet
    pub fn is_dirty(&self) -> bool {
        self.root.stored.is_none()
    }

    /// Leaf holding `pos` and the offset inside that leaf
    fn leaf_at(&self, pos: usize) -> Option<(&LeafArray, usize)> {
        let mut node = self.root.as_ref();
        let mut pos = pos;
        loop {
            match &node.body {
                NodeBody::Leaf(arr) => return (pos < arr.len()).then_some((arr, pos)),
                NodeBody::Inner { children, sizes } => {
                    let (idx, offset) = locate(sizes, pos)?;
                    node = children[idx].as_ref();
                    pos = offset;
                }
            }
        }
    }

    pub fn get(&self, pos: usize) -> Option<Value> {
        self.leaf_at(pos).map(|(arr, idx)| arr.get(idx))
    }

    pub fn key_at(&self, pos: usize) -> Option<u64> {
        self.leaf_at(pos).and_then(|(arr, idx)| arr.key_at(idx))
    }

    /// String or binary bytes at `pos`, borrowed from the leaf
    pub fn payload_at(&self, pos: usize) -> Option<&[u8]> {
        self.leaf_at(pos).and_then(|(arr, idx)| arr.payload_at(idx))
    }

    /// Position of `key` in a key column. Keys are stored in ascending order.
    pub fn find_key(&self, key: u64) -> Option<usize> {
        let (mut lo, mut hi) = (0, self.len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let at = self.key_at(mid)?;
            match at.cmp(&key) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    pub fn set(&mut self, pos: usize, value: Value) -> RecordResult<()> {
        if pos >= self.len {
            return Err(out_of_bounds(pos, self.len));
        }
        set_in(&mut self.root, pos, value)
    }

    pub fn insert(&mut self, pos: usize, value: Value) -> RecordResult<()> {
        if pos > self.len {
            return Err(out_of_bounds(pos, self.len));
        }
        if let Some(right) = insert_into(&mut self.root, pos, value)? {
            let left = Arc::clone(&self.root);
            let sizes = vec![left.len(), right.len()];
            self.root = Arc::new(ColumnNode::inner(vec![left, right], sizes));
        }
        self.len += 1;
        Ok(())
    }

    pub fn push(&mut self, value: Value) -> RecordResult<()> {
        self.insert(self.len, value)
    }

    pub fn remove(&mut self, pos: usize) -> RecordResult<()> {
        if pos >= self.len {
            return Err(out_of_bounds(pos, self.len));
        }
        remove_from(&mut self.root, pos);
        self.len -= 1;

        // Collapse single-child roots
        loop {
            let replacement = match &self.root.body {
                NodeBody::Inner { children, .. } if children.len() == 1 => Arc::clone(&children[0]),
                NodeBody::Inner { children, .. } if children.is_empty() => {
                    Self::empty(self.data_type).root
                }
                _ => break,
            };
            self.root = replacement;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::empty(self.data_type);
    }

    /// Visit every leaf in position order
    pub fn for_each_leaf<'a>(&'a self, f: &mut impl FnMut(&'a LeafArray)) {
        fn walk<'a>(node: &'a ColumnNode, f: &mut impl FnMut(&'a LeafArray)) {
            match &node.body {
                NodeBody::Leaf(arr) => f(arr),
                NodeBody::Inner { children, .. } => children.iter().for_each(|c| walk(c, f)),
            }
        }
        walk(&self.root, f);
    }

    /// All values in position order
    pub fn values(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.len);
        self.for_each_leaf(&mut |arr| out.extend((0..arr.len()).map(|i| arr.get(i))));
        out
    }

    /// Write every dirty node and return the root extent
    pub fn persist(&mut self, store: &PageStore) -> RecordResult<PageRef> {
        persist_node(&mut self.root, store)
    }

    pub fn load(store: &PageStore, root: PageRef, data_type: Option<DataType>) -> RecordResult<Self> {
        let root = load_node(store, root)?;
        let len = root.len();
        Ok(Self {
            root,
            data_type,
            len,
        })
    }

    /// Every extent reachable from this tree: nodes and long payloads
    pub fn collect_extents(&self, out: &mut AHashSet<PageRef>) {
        fn walk(node: &ColumnNode, out: &mut AHashSet<PageRef>) {
            out.extend(node.stored);
            match &node.body {
                NodeBody::Leaf(arr) => arr.collect_blobs(out),
                NodeBody::Inner { children, .. } => children.iter().for_each(|c| walk(c, out)),
            }
        }
        walk(&self.root, out);
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        let mut node = self.root.as_ref();
        let mut depth = 1;
        while let NodeBody::Inner { children, .. } = &node.body {
            node = children[0].as_ref();
            depth += 1;
        }
        depth
    }
}

fn out_of_bounds(pos: usize, len: usize) -> RecordError {
    RecordError::InvalidSchema(format!("position {} out of bounds for column of {} rows", pos, len))
}

fn set_in(node: &mut Arc<ColumnNode>, pos: usize, value: Value) -> RecordResult<()> {
    let node = node_mut(node);
    match &mut node.body {
        NodeBody::Leaf(arr) => arr.set(pos, value),
        NodeBody::Inner { children, sizes } => {
            let (idx, offset) = locate(sizes, pos).ok_or_else(|| out_of_bounds(pos, sizes.iter().sum()))?;
            set_in(&mut children[idx], offset, value)
        }
    }
}

/// Insert below `node`; returns the new right sibling when `node` split
fn insert_into(
    node: &mut Arc<ColumnNode>,
    pos: usize,
    value: Value,
) -> RecordResult<Option<Arc<ColumnNode>>> {
    let node = node_mut(node);
    match &mut node.body {
        NodeBody::Leaf(arr) => {
            arr.insert(pos, value)?;
            if arr.len() > LEAF_CAPACITY {
                let right = arr.split_off(arr.len() / 2);
                return Ok(Some(Arc::new(ColumnNode::leaf(right))));
            }
            Ok(None)
        }
        NodeBody::Inner { children, sizes } => {
            let (idx, offset) = locate_for_insert(sizes, pos);
            let split = insert_into(&mut children[idx], offset, value)?;
            sizes[idx] += 1;
            if let Some(right) = split {
                let right_len = right.len();
                sizes[idx] -= right_len;
                children.insert(idx + 1, right);
                sizes.insert(idx + 1, right_len);

                if children.len() > INNER_FANOUT {
                    let mid = children.len() / 2;
                    let right_children = children.split_off(mid);
                    let right_sizes = sizes.split_off(mid);
                    return Ok(Some(Arc::new(ColumnNode::inner(right_children, right_sizes))));
                }
            }
            Ok(None)
        }
    }
}

fn remove_from(node: &mut Arc<ColumnNode>, pos: usize) {
    let node = node_mut(node);
    match &mut node.body {
        NodeBody::Leaf(arr) => arr.remove(pos),
        NodeBody::Inner { children, sizes } => {
            if let Some((idx, offset)) = locate(sizes, pos) {
                remove_from(&mut children[idx], offset);
                sizes[idx] -= 1;
                if sizes[idx] == 0 {
                    children.remove(idx);
                    sizes.remove(idx);
                }
            }
        }
    }
}

fn persist_node(node: &mut Arc<ColumnNode>, store: &PageStore) -> RecordResult<PageRef> {
    if let Some(extent) = node.stored {
        return Ok(extent);
    }
    let node = Arc::make_mut(node);
    let mut w = ByteWriter::new();
    match &mut node.body {
        NodeBody::Leaf(arr) => {
            arr.persist_blobs(store)?;
            w.u8(LEAF_TAG);
            arr.encode(&mut w)?;
        }
        NodeBody::Inner { children, sizes } => {
            let mut refs = Vec::with_capacity(children.len());
            for child in children.iter_mut() {
                refs.push(persist_node(child, store)?);
            }
            w.u8(INNER_TAG);
            w.u32(refs.len() as u32);
            for (size, extent) in sizes.iter().zip(refs) {
                w.u64(*size as u64);
                w.page_ref(extent);
            }
        }
    }
    let extent = store.write_new(&w.finish())?;
    node.stored = Some(extent);
    Ok(extent)
}

fn load_node(store: &PageStore, extent: PageRef) -> RecordResult<Arc<ColumnNode>> {
    let bytes = store.read_extent(extent)?;
    let mut r = ByteReader::new(&bytes);
    let body = match r.u8()? {
        LEAF_TAG => NodeBody::Leaf(LeafArray::decode(&mut r, store)?),
        INNER_TAG => {
            let count = r.u32()? as usize;
            let mut children = Vec::with_capacity(count);
            let mut sizes = Vec::with_capacity(count);
            for _ in 0..count {
                sizes.push(r.u64()? as usize);
                children.push(load_node(store, r.page_ref()?)?);
            }
            NodeBody::Inner { children, sizes }
        }
        tag => {
            return Err(RecordError::Deserialization(format!(
                "unknown column node tag {} at page {}",
                tag, extent.page
            )));
        }
    };
    Ok(Arc::new(ColumnNode {
        body,
        stored: Some(extent),
    }))
}

//! Columnar table engine.
//!
//! Each table is a set of positional column trees ([`column`]) whose leaves
//! are typed arrays ([`array`]). Trees are shared copy-on-write between
//! snapshots and written to the page store node by node.

mod array;
mod codec;
mod column;
#[allow(clippy::module_inception)]
mod table;

pub use array::INLINE_PAYLOAD_LIMIT;
pub use column::{INNER_FANOUT, LEAF_CAPACITY};
pub use table::Table;

pub(crate) use codec::{ByteReader, ByteWriter};

pub mod btree;
pub mod database;
pub mod file;
pub mod index;
pub mod notify;
pub mod query;
pub mod record;
pub mod sync;
pub mod table;

pub use database::{
    Backlink, CompactPredicate, Config, Database, DatabaseError, DatabaseResult, MigrationFn,
    ReadTransaction, Snapshot, TransactionState, WriteTransaction,
};
pub use file::{DEFAULT_PAGE_SIZE, FileError, StoreStats};
pub use notify::{ChangeSet, Subscription};
pub use query::{
    Case, CompareOp, CompiledQuery, Predicate, Query, QueryError, QueryResult, Results, SortOrder,
    StringOp,
};
pub use record::{
    ColumnDef, ColumnHandle, ColumnValue, DataType, LinkPolicy, Record, RecordError, RecordResult,
    RowKey, Schema, TableSchema, Timestamp, Value,
};
pub use sync::{Changeset, Instruction, LogicalClock, SyncSession, SyncValue};

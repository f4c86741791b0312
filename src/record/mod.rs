mod accessor;
mod error;
mod record;
mod schema;
mod value;

pub use accessor::{ColumnHandle, ColumnValue};
pub use error::{RecordError, RecordResult};
pub use record::{Record, RowKey};
pub use schema::{ColumnDef, LinkPolicy, SYSTEM_TABLE_PREFIX, Schema, TableSchema};
pub use value::{DataType, Timestamp, Value};

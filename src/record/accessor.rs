//! Typed column access.
//!
//! A [`ColumnHandle`] is resolved once against a schema and then reads or
//! writes values as a concrete Rust type, so type errors surface when the
//! handle is created instead of on every access.

use std::marker::PhantomData;

use super::error::{RecordError, RecordResult};
use super::record::RowKey;
use super::schema::Schema;
use super::value::{DataType, Timestamp, Value};

/// A Rust type that maps onto one column data type
pub trait ColumnValue: Sized {
    const DATA_TYPE: DataType;
    /// Whether this type can represent NULL
    const NULLABLE: bool = false;

    /// Convert a stored value; `None` when the value does not fit this type
    fn from_value(value: Value) -> Option<Self>;

    fn into_value(self) -> Value;
}

macro_rules! scalar_column_value {
    ($ty:ty, $dt:ident, $variant:ident) => {
        impl ColumnValue for $ty {
            const DATA_TYPE: DataType = DataType::$dt;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

scalar_column_value!(i64, Int, Int);
scalar_column_value!(bool, Bool, Bool);
scalar_column_value!(f32, Float, Float);
scalar_column_value!(f64, Double, Double);
scalar_column_value!(String, String, String);
scalar_column_value!(Vec<u8>, Binary, Binary);
scalar_column_value!(Timestamp, Timestamp, Timestamp);
scalar_column_value!(RowKey, Link, Link);
scalar_column_value!(Vec<RowKey>, LinkList, LinkList);

impl<T: ColumnValue> ColumnValue for Option<T> {
    const DATA_TYPE: DataType = T::DATA_TYPE;
    const NULLABLE: bool = true;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

/// Resolved, typed reference to one column of one table
#[derive(Debug)]
pub struct ColumnHandle<T> {
    table: usize,
    column: usize,
    table_name: String,
    column_name: String,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ColumnHandle<T> {
    fn clone(&self) -> Self {
        Self {
            table: self.table,
            column: self.column,
            table_name: self.table_name.clone(),
            column_name: self.column_name.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: ColumnValue> ColumnHandle<T> {
    /// Resolve `table.column` in `schema` for type `T`.
    ///
    /// Fails with `TypeMismatch` when `T` is not the column's type, or when the
    /// column can hold NULL (links always can) and `T` cannot represent it.
    pub fn resolve(schema: &Schema, table: &str, column: &str) -> RecordResult<Self> {
        let table_idx = schema.table_index(table)?;
        let table_schema = &schema.tables()[table_idx];
        let column_idx = table_schema.column_index(column)?;
        let handle = Self {
            table: table_idx,
            column: column_idx,
            table_name: table.to_string(),
            column_name: column.to_string(),
            name: format!("{}.{}", table, column),
            _marker: PhantomData,
        };
        handle.check(schema)?;
        Ok(handle)
    }

    /// Re-check the handle against a (possibly migrated) schema.
    ///
    /// The cached positions must still name the same table and column;
    /// a handle whose column moved or vanished fails with `ColumnNotFound`
    /// and has to be resolved again.
    pub fn check(&self, schema: &Schema) -> RecordResult<()> {
        let def = schema
            .table_at(self.table)
            .filter(|t| t.name() == self.table_name)
            .and_then(|t| t.column(self.column))
            .filter(|def| def.name == self.column_name)
            .ok_or_else(|| RecordError::ColumnNotFound {
                table: self.table_name.clone(),
                column: self.column_name.clone(),
            })?;
        let can_be_null = def.nullable || def.data_type == DataType::Link;
        if def.data_type != T::DATA_TYPE || (can_be_null && !T::NULLABLE) {
            return Err(RecordError::TypeMismatch {
                column: self.name.clone(),
                expected: def.data_type.to_string(),
                actual: type_label::<T>(),
            });
        }
        Ok(())
    }
}

impl<T> ColumnHandle<T> {
    pub fn table(&self) -> usize {
        self.table
    }

    pub fn column(&self) -> usize {
        self.column
    }

    /// `table.column`
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn type_label<T: ColumnValue>() -> String {
    if T::NULLABLE {
        format!("nullable {}", T::DATA_TYPE)
    } else {
        T::DATA_TYPE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ColumnDef, TableSchema};

    fn schema() -> Schema {
        Schema::new(1).with_table(TableSchema::new(
            "Person",
            vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::new("age", DataType::Int).nullable(),
                ColumnDef::link("friend", "Person"),
            ],
        ))
    }

    #[test]
    fn test_resolve_matching_types() {
        let schema = schema();
        let name = ColumnHandle::<String>::resolve(&schema, "Person", "name").unwrap();
        assert_eq!((name.table(), name.column()), (0, 0));
        ColumnHandle::<Option<String>>::resolve(&schema, "Person", "name").unwrap();
        ColumnHandle::<Option<i64>>::resolve(&schema, "Person", "age").unwrap();
        ColumnHandle::<Option<RowKey>>::resolve(&schema, "Person", "friend").unwrap();
    }

    #[test]
    fn test_resolve_rejects_wrong_type() {
        let schema = schema();
        assert!(matches!(
            ColumnHandle::<i64>::resolve(&schema, "Person", "name"),
            Err(RecordError::TypeMismatch { .. })
        ));
        // Nullable column needs an Option
        assert!(matches!(
            ColumnHandle::<i64>::resolve(&schema, "Person", "age"),
            Err(RecordError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ColumnHandle::<RowKey>::resolve(&schema, "Person", "friend"),
            Err(RecordError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_check_rejects_moved_column() {
        let schema = schema();
        let age = ColumnHandle::<Option<i64>>::resolve(&schema, "Person", "age").unwrap();
        age.check(&schema).unwrap();

        let shifted = Schema::new(2).with_table(TableSchema::new(
            "Person",
            vec![
                ColumnDef::new("age", DataType::Int).nullable(),
                ColumnDef::new("nick", DataType::Int).nullable(),
            ],
        ));
        assert!(matches!(
            age.check(&shifted),
            Err(RecordError::ColumnNotFound { ref column, .. }) if column == "age"
        ));

        let renamed = Schema::new(2).with_table(TableSchema::new(
            "People",
            vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::new("age", DataType::Int).nullable(),
            ],
        ));
        assert!(matches!(
            age.check(&renamed),
            Err(RecordError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(Option::<i64>::from_value(Value::Null), Some(None));
        assert_eq!(Option::<i64>::from_value(Value::Int(4)), Some(Some(4)));
        assert_eq!(Option::<i64>::from_value(Value::Bool(true)), None);
        assert_eq!(Some(2.5f64).into_value(), Value::Double(2.5));
    }
}

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use super::error::{RecordError, RecordResult};
use super::value::{DataType, Timestamp, Value};

/// Prefix of tables the engine manages itself
pub const SYSTEM_TABLE_PREFIX: &str = "__";

/// What happens to links pointing at a row when that row is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkPolicy {
    /// Links become null; link-list entries are removed
    #[default]
    Nullify,
    /// Rows holding the link are deleted too
    Cascade,
    /// The delete fails while any link remains
    Forbid,
}

/// Column definition with metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub indexed: bool,
    /// Integer column merged by adding deltas during sync
    #[serde(default)]
    pub counter: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    #[serde(default)]
    pub on_delete: LinkPolicy,
}

impl ColumnDef {
    /// Create a non-nullable, unindexed column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            indexed: false,
            counter: false,
            link_target: None,
            on_delete: LinkPolicy::default(),
        }
    }

    /// Nullable link to one row of `target`
    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            nullable: true,
            link_target: Some(target.into()),
            ..Self::new(name, DataType::Link)
        }
    }

    /// Ordered links to rows of `target`
    pub fn link_list(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            link_target: Some(target.into()),
            ..Self::new(name, DataType::LinkList)
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Make a link column required: commits fail while it is null
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.indexed = true;
        self
    }

    pub fn counter(mut self) -> Self {
        self.counter = true;
        self
    }

    pub fn on_delete(mut self, policy: LinkPolicy) -> Self {
        self.on_delete = policy;
        self
    }

    /// Value a fresh row gets in this column
    pub fn default_value(&self) -> Value {
        if self.nullable {
            return Value::Null;
        }
        match self.data_type {
            DataType::Int => Value::Int(0),
            DataType::Bool => Value::Bool(false),
            DataType::Float => Value::Float(0.0),
            DataType::Double => Value::Double(0.0),
            DataType::String => Value::String(String::new()),
            DataType::Binary => Value::Binary(Vec::new()),
            DataType::Timestamp => Value::Timestamp(Timestamp::default()),
            // A required link starts out unset and must be filled before commit
            DataType::Link => Value::Null,
            DataType::LinkList => Value::LinkList(Vec::new()),
        }
    }

    /// Check that `value` may be stored in this column. Never coerces.
    pub fn check_value(&self, value: &Value) -> RecordResult<()> {
        match value.data_type() {
            None => {
                if self.nullable || self.data_type == DataType::Link {
                    Ok(())
                } else {
                    Err(RecordError::NullConstraintViolation(self.name.clone()))
                }
            }
            Some(dt) if dt == self.data_type => Ok(()),
            Some(_) => Err(RecordError::TypeMismatch {
                column: self.name.clone(),
                expected: self.data_type.to_string(),
                actual: value.type_name(),
            }),
        }
    }

    fn validate(&self, table: &str) -> RecordResult<()> {
        let invalid = |msg: String| -> RecordResult<()> {
            Err(RecordError::InvalidSchema(format!(
                "{}.{}: {}",
                table, self.name, msg
            )))
        };

        if self.name.is_empty() || self.name.contains('.') {
            return invalid("column names must be non-empty and contain no '.'".to_string());
        }
        if self.data_type.is_link() != self.link_target.is_some() {
            return invalid("link target must be set exactly for link columns".to_string());
        }
        if self.data_type == DataType::LinkList && self.nullable {
            return invalid("link lists cannot be nullable".to_string());
        }
        if self.indexed && !self.data_type.is_indexable() {
            return Err(RecordError::NotIndexable {
                column: format!("{}.{}", table, self.name),
                data_type: self.data_type.to_string(),
            });
        }
        if self.counter && self.data_type != DataType::Int {
            return invalid("counter columns must be int".to_string());
        }
        Ok(())
    }
}

/// Table schema with all column definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    primary_key: Option<String>,
}

impl TableSchema {
    /// Create a new table schema
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key: None,
        }
    }

    /// Declare `column` as the primary key. The column is indexed.
    pub fn with_primary_key(mut self, column: &str) -> Self {
        if let Some(col) = self.columns.iter_mut().find(|c| c.name == column) {
            col.indexed = true;
        }
        self.primary_key = Some(column.to_string());
        self
    }

    /// Get table name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_system(&self) -> bool {
        self.name.starts_with(SYSTEM_TABLE_PREFIX)
    }

    /// Get all columns
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// Get column count
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get a specific column
    pub fn column(&self, idx: usize) -> Option<&ColumnDef> {
        self.columns.get(idx)
    }

    /// Find column index by name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Resolve a column by name or fail with `ColumnNotFound`
    pub fn column_index(&self, name: &str) -> RecordResult<usize> {
        self.find_column(name)
            .ok_or_else(|| RecordError::ColumnNotFound {
                table: self.name.clone(),
                column: name.to_string(),
            })
    }

    pub fn primary_key(&self) -> Option<&str> {
        self.primary_key.as_deref()
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.primary_key.as_deref().and_then(|pk| self.find_column(pk))
    }

    pub(crate) fn columns_mut(&mut self) -> &mut Vec<ColumnDef> {
        &mut self.columns
    }

    pub(crate) fn set_primary_key(&mut self, column: Option<String>) {
        self.primary_key = column;
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Check internal consistency of this table
    pub fn validate(&self) -> RecordResult<()> {
        if self.name.is_empty() {
            return Err(RecordError::InvalidSchema("empty table name".to_string()));
        }
        let mut seen = AHashSet::new();
        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(RecordError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }
            col.validate(&self.name)?;
        }

        if let Some(pk) = &self.primary_key {
            let idx = self.column_index(pk)?;
            let col = &self.columns[idx];
            if !matches!(col.data_type, DataType::Int | DataType::String) || !col.indexed {
                return Err(RecordError::InvalidSchema(format!(
                    "{}.{}: primary keys must be indexed int or string columns",
                    self.name, pk
                )));
            }
        }
        Ok(())
    }
}

/// The full set of tables plus the schema version stored with the file
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    version: u64,
    tables: Vec<TableSchema>,
}

impl Schema {
    pub fn new(version: u64) -> Self {
        Self {
            version,
            tables: Vec::new(),
        }
    }

    /// Builder-style table registration
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn find_table(&self, name: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.name == name)
    }

    /// Resolve a table by name or fail with `TableNotFound`
    pub fn table_index(&self, name: &str) -> RecordResult<usize> {
        self.find_table(name)
            .ok_or_else(|| RecordError::TableNotFound(name.to_string()))
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_at(&self, idx: usize) -> Option<&TableSchema> {
        self.tables.get(idx)
    }

    pub(crate) fn tables_mut(&mut self) -> &mut Vec<TableSchema> {
        &mut self.tables
    }

    /// Check every table and every link target
    pub fn validate(&self) -> RecordResult<()> {
        let mut seen = AHashSet::new();
        for table in &self.tables {
            if !seen.insert(table.name.as_str()) {
                return Err(RecordError::DuplicateTable(table.name.clone()));
            }
            table.validate()?;
        }
        for table in &self.tables {
            for col in &table.columns {
                if let Some(target) = &col.link_target
                    && self.find_table(target).is_none()
                {
                    return Err(RecordError::InvalidSchema(format!(
                        "{}.{} links to unknown table {}",
                        table.name, col.name, target
                    )));
                }
            }
        }
        Ok(())
    }

    /// Structural equality over user tables, ignoring table order and the
    /// version number. Column order matters.
    pub fn matches(&self, other: &Schema) -> bool {
        let user = |s: &Schema| s.tables.iter().filter(|t| !t.is_system()).count();
        user(self) == user(other)
            && self
                .tables
                .iter()
                .filter(|t| !t.is_system())
                .all(|t| other.table(&t.name) == Some(t))
    }

    /// Human readable list of differences from `other`, for error messages
    pub fn describe_differences(&self, other: &Schema) -> String {
        let mut diffs = Vec::new();
        for table in self.tables.iter().filter(|t| !t.is_system()) {
            match other.table(&table.name) {
                None => diffs.push(format!("table {} is missing", table.name)),
                Some(t) if t != table => diffs.push(format!("table {} differs", table.name)),
                Some(_) => {}
            }
        }
        for table in other.tables.iter().filter(|t| !t.is_system()) {
            if self.table(&table.name).is_none() {
                diffs.push(format!("table {} is unexpected", table.name));
            }
        }
        diffs.join(", ")
    }

    pub fn to_json(&self) -> RecordResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> RecordResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

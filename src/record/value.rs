use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use super::record::RowKey;

/// Represents a column data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int,
    Bool,
    Float,
    Double,
    String,
    Binary,
    Timestamp,
    /// Zero or one row of the column's link target
    Link,
    /// Ordered list of rows of the column's link target
    LinkList,
}

impl DataType {
    /// Stable one-byte code used in the on-disk node format
    pub fn code(&self) -> u8 {
        match self {
            DataType::Int => 1,
            DataType::Bool => 2,
            DataType::Float => 3,
            DataType::Double => 4,
            DataType::String => 5,
            DataType::Binary => 6,
            DataType::Timestamp => 7,
            DataType::Link => 8,
            DataType::LinkList => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => DataType::Int,
            2 => DataType::Bool,
            3 => DataType::Float,
            4 => DataType::Double,
            5 => DataType::String,
            6 => DataType::Binary,
            7 => DataType::Timestamp,
            8 => DataType::Link,
            9 => DataType::LinkList,
            _ => return None,
        })
    }

    pub fn is_link(&self) -> bool {
        matches!(self, DataType::Link | DataType::LinkList)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, DataType::Int | DataType::Float | DataType::Double)
    }

    /// Types that can carry a search index
    pub fn is_indexable(&self) -> bool {
        matches!(
            self,
            DataType::Int | DataType::Bool | DataType::String | DataType::Timestamp
        )
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "int",
            DataType::Bool => "bool",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
            DataType::Binary => "binary",
            DataType::Timestamp => "timestamp",
            DataType::Link => "link",
            DataType::LinkList => "linklist",
        };
        f.write_str(name)
    }
}

/// Point in time with nanosecond precision, relative to the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp {
    seconds: i64,
    nanos: u32,
}

impl Timestamp {
    /// Build a timestamp; excess nanoseconds carry into seconds
    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self {
            seconds: seconds + (nanos / 1_000_000_000) as i64,
            nanos: nanos % 1_000_000_000,
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            seconds: millis.div_euclid(1000),
            nanos: (millis.rem_euclid(1000) * 1_000_000) as u32,
        }
    }

    pub fn now() -> Self {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                Self::from_millis(-(d.as_millis() as i64))
            }
        }
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn as_millis(&self) -> i64 {
        self.seconds * 1000 + (self.nanos / 1_000_000) as i64
    }
}

/// Represents a single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Bool(bool),
    Float(f32),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Timestamp(Timestamp),
    Link(RowKey),
    LinkList(Vec<RowKey>),
}

impl Value {
    /// Check if this value is NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The data type this value belongs to; `None` for NULL
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            Value::Null => return None,
            Value::Int(_) => DataType::Int,
            Value::Bool(_) => DataType::Bool,
            Value::Float(_) => DataType::Float,
            Value::Double(_) => DataType::Double,
            Value::String(_) => DataType::String,
            Value::Binary(_) => DataType::Binary,
            Value::Timestamp(_) => DataType::Timestamp,
            Value::Link(_) => DataType::Link,
            Value::LinkList(_) => DataType::LinkList,
        })
    }

    pub fn type_name(&self) -> String {
        match self.data_type() {
            Some(dt) => dt.to_string(),
            None => "null".to_string(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view used by comparisons and aggregates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<RowKey> {
        match self {
            Value::Link(k) => Some(*k),
            _ => None,
        }
    }

    /// Compare two values of compatible types.
    ///
    /// Numbers compare across Int/Float/Double. NULL sorts before everything.
    /// Returns `None` for incompatible types (and for NaN).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Link(a), Value::Link(b)) => Some(a.cmp(b)),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Total order used for sorting: like [`Value::compare`], with
    /// incomparable pairs ordered by type so sorting never fails.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        if let Some(ord) = self.compare(other) {
            return ord;
        }
        match (self.as_f64(), other.as_f64()) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        self.data_type().map(|dt| dt.code()).unwrap_or(0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Binary(b) => write!(f, "<{} bytes>", b.len()),
            Value::Timestamp(t) => write!(f, "{}.{:09}", t.seconds(), t.nanos()),
            Value::Link(k) => write!(f, "{}", k),
            Value::LinkList(keys) => write!(f, "[{} links]", keys.len()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Binary(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<RowKey> for Value {
    fn from(v: RowKey) -> Self {
        Value::Link(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(42).is_null());
        assert!(!Value::Double(3.14).is_null());
        assert!(!Value::String("hello".to_string()).is_null());
    }

    #[test]
    fn test_data_type_codes() {
        for dt in [
            DataType::Int,
            DataType::Bool,
            DataType::Float,
            DataType::Double,
            DataType::String,
            DataType::Binary,
            DataType::Timestamp,
            DataType::Link,
            DataType::LinkList,
        ] {
            assert_eq!(DataType::from_code(dt.code()), Some(dt));
        }
        assert_eq!(DataType::from_code(0), None);
    }

    #[test]
    fn test_numeric_compare_across_types() {
        assert_eq!(Value::Int(3).compare(&Value::Double(3.0)), Some(Ordering::Equal));
        assert_eq!(Value::Float(2.5).compare(&Value::Int(3)), Some(Ordering::Less));
        assert_eq!(Value::Int(1).compare(&Value::String("1".into())), None);
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(Value::Null.compare(&Value::Int(i64::MIN)), Some(Ordering::Less));
        assert_eq!(Value::Null.sort_cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn test_sort_cmp_handles_nan() {
        let nan = Value::Double(f64::NAN);
        assert_eq!(nan.compare(&Value::Double(1.0)), None);
        assert_eq!(nan.sort_cmp(&Value::Double(1.0)), Ordering::Greater);
    }

    #[test]
    fn test_timestamp_normalization() {
        let t = Timestamp::new(1, 1_500_000_000);
        assert_eq!(t.seconds(), 2);
        assert_eq!(t.nanos(), 500_000_000);

        let before_epoch = Timestamp::from_millis(-1);
        assert_eq!(before_epoch.seconds(), -1);
        assert_eq!(before_epoch.nanos(), 999_000_000);
        assert_eq!(before_epoch.as_millis(), -1);
        assert!(before_epoch < Timestamp::default());
    }

    #[test]
    fn test_from_conversions() {
        assert_eq!(Value::from(5i32), Value::Int(5));
        assert_eq!(Value::from("a"), Value::String("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some(RowKey(4))), Value::Link(RowKey(4)));
    }
}

//! Typed leaf arrays: the values of one column leaf, stored unboxed per type.

use std::sync::Arc;

use ahash::AHashSet;

use super::codec::{ByteReader, ByteWriter};
use crate::file::{PageRef, PageStore};
use crate::record::{DataType, RecordError, RecordResult, RowKey, Timestamp, Value};

/// Strings and binaries up to this many bytes live inside the leaf
pub const INLINE_PAYLOAD_LIMIT: usize = 64;

/// Leaf tag for the hidden row-key column
const KEY_TAG: u8 = 0;

/// Bytes of a string or binary value. Long payloads remember the extent they
/// were written to so an unchanged value is never written twice.
#[derive(Debug, Clone)]
pub(crate) struct Payload {
    data: Arc<[u8]>,
    blob: Option<PageRef>,
}

impl Payload {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::from(data),
            blob: None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn is_inline(&self) -> bool {
        self.data.len() <= INLINE_PAYLOAD_LIMIT
    }
}

#[derive(Debug, Clone)]
pub(crate) enum LeafArray {
    Key(Vec<u64>),
    Int(Vec<Option<i64>>),
    Bool(Vec<Option<bool>>),
    Float(Vec<Option<f32>>),
    Double(Vec<Option<f64>>),
    String(Vec<Option<Payload>>),
    Binary(Vec<Option<Payload>>),
    Timestamp(Vec<Option<Timestamp>>),
    Link(Vec<Option<RowKey>>),
    LinkList(Vec<Vec<RowKey>>),
}

/// Apply the same expression to the vector inside any variant
macro_rules! each_vec {
    ($arr:expr, $v:ident => $body:expr) => {
        match $arr {
            LeafArray::Key($v) => $body,
            LeafArray::Int($v) => $body,
            LeafArray::Bool($v) => $body,
            LeafArray::Float($v) => $body,
            LeafArray::Double($v) => $body,
            LeafArray::String($v) => $body,
            LeafArray::Binary($v) => $body,
            LeafArray::Timestamp($v) => $body,
            LeafArray::Link($v) => $body,
            LeafArray::LinkList($v) => $body,
        }
    };
}

/// Same as `each_vec!` for two arrays that must share a variant
macro_rules! zip_vec {
    ($a:expr, $b:expr, $x:ident, $y:ident => $body:expr, $mismatch:expr) => {
        match ($a, $b) {
            (LeafArray::Key($x), LeafArray::Key(mut $y)) => $body,
            (LeafArray::Int($x), LeafArray::Int(mut $y)) => $body,
            (LeafArray::Bool($x), LeafArray::Bool(mut $y)) => $body,
            (LeafArray::Float($x), LeafArray::Float(mut $y)) => $body,
            (LeafArray::Double($x), LeafArray::Double(mut $y)) => $body,
            (LeafArray::String($x), LeafArray::String(mut $y)) => $body,
            (LeafArray::Binary($x), LeafArray::Binary(mut $y)) => $body,
            (LeafArray::Timestamp($x), LeafArray::Timestamp(mut $y)) => $body,
            (LeafArray::Link($x), LeafArray::Link(mut $y)) => $body,
            (LeafArray::LinkList($x), LeafArray::LinkList(mut $y)) => $body,
            _ => $mismatch,
        }
    };
}

impl LeafArray {
    /// Empty array for a user column
    pub fn new(data_type: DataType) -> Self {
        match data_type {
            DataType::Int => LeafArray::Int(Vec::new()),
            DataType::Bool => LeafArray::Bool(Vec::new()),
            DataType::Float => LeafArray::Float(Vec::new()),
            DataType::Double => LeafArray::Double(Vec::new()),
            DataType::String => LeafArray::String(Vec::new()),
            DataType::Binary => LeafArray::Binary(Vec::new()),
            DataType::Timestamp => LeafArray::Timestamp(Vec::new()),
            DataType::Link => LeafArray::Link(Vec::new()),
            DataType::LinkList => LeafArray::LinkList(Vec::new()),
        }
    }

    pub fn new_keys() -> Self {
        LeafArray::Key(Vec::new())
    }

    /// Type of the column this array belongs to; `None` for the key column
    pub fn data_type(&self) -> Option<DataType> {
        Some(match self {
            LeafArray::Key(_) => return None,
            LeafArray::Int(_) => DataType::Int,
            LeafArray::Bool(_) => DataType::Bool,
            LeafArray::Float(_) => DataType::Float,
            LeafArray::Double(_) => DataType::Double,
            LeafArray::String(_) => DataType::String,
            LeafArray::Binary(_) => DataType::Binary,
            LeafArray::Timestamp(_) => DataType::Timestamp,
            LeafArray::Link(_) => DataType::Link,
            LeafArray::LinkList(_) => DataType::LinkList,
        })
    }

    /// Empty array of the same variant
    pub fn empty_like(&self) -> Self {
        match self.data_type() {
            Some(dt) => LeafArray::new(dt),
            None => LeafArray::new_keys(),
        }
    }

    pub fn len(&self) -> usize {
        each_vec!(self, v => v.len())
    }

    pub fn get(&self, idx: usize) -> Value {
        match self {
            LeafArray::Key(v) => v.get(idx).map_or(Value::Null, |k| Value::Int(*k as i64)),
            LeafArray::Int(v) => opt_value(v.get(idx), |x| Value::Int(*x)),
            LeafArray::Bool(v) => opt_value(v.get(idx), |x| Value::Bool(*x)),
            LeafArray::Float(v) => opt_value(v.get(idx), |x| Value::Float(*x)),
            LeafArray::Double(v) => opt_value(v.get(idx), |x| Value::Double(*x)),
            LeafArray::String(v) => opt_value(v.get(idx), |p| {
                Value::String(String::from_utf8_lossy(p.bytes()).into_owned())
            }),
            LeafArray::Binary(v) => opt_value(v.get(idx), |p| Value::Binary(p.bytes().to_vec())),
            LeafArray::Timestamp(v) => opt_value(v.get(idx), |x| Value::Timestamp(*x)),
            LeafArray::Link(v) => opt_value(v.get(idx), |x| Value::Link(*x)),
            LeafArray::LinkList(v) => v
                .get(idx)
                .map_or(Value::Null, |list| Value::LinkList(list.clone())),
        }
    }

    /// Row key stored at `idx` of a key array
    pub fn key_at(&self, idx: usize) -> Option<u64> {
        match self {
            LeafArray::Key(v) => v.get(idx).copied(),
            _ => None,
        }
    }

    /// Bytes of a string or binary value without copying
    pub fn payload_at(&self, idx: usize) -> Option<&[u8]> {
        match self {
            LeafArray::String(v) | LeafArray::Binary(v) => {
                v.get(idx).and_then(|p| p.as_ref()).map(Payload::bytes)
            }
            _ => None,
        }
    }

    pub fn set(&mut self, idx: usize, value: Value) -> RecordResult<()> {
        let slot = self.convert(value)?;
        zip_vec!(self, slot, v, s => {
            if let (Some(dst), Some(src)) = (v.get_mut(idx), s.pop()) {
                *dst = src;
            }
            Ok(())
        }, Err(variant_changed()))
    }

    pub fn insert(&mut self, idx: usize, value: Value) -> RecordResult<()> {
        let slot = self.convert(value)?;
        zip_vec!(self, slot, v, s => {
            if let Some(src) = s.pop() {
                v.insert(idx.min(v.len()), src);
            }
            Ok(())
        }, Err(variant_changed()))
    }

    pub fn remove(&mut self, idx: usize) {
        each_vec!(self, v => {
            if idx < v.len() {
                v.remove(idx);
            }
        })
    }

    /// Move the values from `at` onwards into a new array
    pub fn split_off(&mut self, at: usize) -> LeafArray {
        match self {
            LeafArray::Key(v) => LeafArray::Key(v.split_off(at)),
            LeafArray::Int(v) => LeafArray::Int(v.split_off(at)),
            LeafArray::Bool(v) => LeafArray::Bool(v.split_off(at)),
            LeafArray::Float(v) => LeafArray::Float(v.split_off(at)),
            LeafArray::Double(v) => LeafArray::Double(v.split_off(at)),
            LeafArray::String(v) => LeafArray::String(v.split_off(at)),
            LeafArray::Binary(v) => LeafArray::Binary(v.split_off(at)),
            LeafArray::Timestamp(v) => LeafArray::Timestamp(v.split_off(at)),
            LeafArray::Link(v) => LeafArray::Link(v.split_off(at)),
            LeafArray::LinkList(v) => LeafArray::LinkList(v.split_off(at)),
        }
    }

    /// Append every value of `other`, which must be the same variant
    pub fn append(&mut self, other: LeafArray) -> RecordResult<()> {
        zip_vec!(self, other, v, o => {
            v.append(&mut o);
            Ok(())
        }, Err(variant_changed()))
    }

    fn mismatch(&self) -> RecordError {
        RecordError::TypeMismatch {
            column: String::new(),
            expected: self
                .data_type()
                .map_or_else(|| "key".to_string(), |dt| dt.to_string()),
            actual: "value".to_string(),
        }
    }

    /// Wrap one value into a single-element array of this variant
    fn convert(&self, value: Value) -> RecordResult<LeafArray> {
        let out = match (self, value) {
            (LeafArray::Key(_), Value::Int(k)) => LeafArray::Key(vec![k as u64]),
            (LeafArray::LinkList(_), Value::LinkList(list)) => LeafArray::LinkList(vec![list]),
            (LeafArray::LinkList(_), Value::Null) => LeafArray::LinkList(vec![Vec::new()]),
            (LeafArray::Key(_), _) | (LeafArray::LinkList(_), _) => return Err(self.mismatch()),
            (arr, Value::Null) => {
                let mut empty = arr.empty_like();
                each_vec!(&mut empty, v => v.push(Default::default()));
                empty
            }
            (LeafArray::Int(_), Value::Int(x)) => LeafArray::Int(vec![Some(x)]),
            (LeafArray::Bool(_), Value::Bool(x)) => LeafArray::Bool(vec![Some(x)]),
            (LeafArray::Float(_), Value::Float(x)) => LeafArray::Float(vec![Some(x)]),
            (LeafArray::Double(_), Value::Double(x)) => LeafArray::Double(vec![Some(x)]),
            (LeafArray::String(_), Value::String(s)) => {
                LeafArray::String(vec![Some(Payload::new(s.into_bytes()))])
            }
            (LeafArray::Binary(_), Value::Binary(b)) => {
                LeafArray::Binary(vec![Some(Payload::new(b))])
            }
            (LeafArray::Timestamp(_), Value::Timestamp(t)) => LeafArray::Timestamp(vec![Some(t)]),
            (LeafArray::Link(_), Value::Link(k)) => LeafArray::Link(vec![Some(k)]),
            _ => return Err(self.mismatch()),
        };
        Ok(out)
    }

    /// Write long payloads that have no extent yet
    pub fn persist_blobs(&mut self, store: &PageStore) -> RecordResult<()> {
        if let LeafArray::String(v) | LeafArray::Binary(v) = self {
            for payload in v.iter_mut().flatten() {
                if !payload.is_inline() && payload.blob.is_none() {
                    payload.blob = Some(store.write_new(&payload.data)?);
                }
            }
        }
        Ok(())
    }

    /// Extents of long payloads referenced by this leaf
    pub fn collect_blobs(&self, out: &mut AHashSet<PageRef>) {
        if let LeafArray::String(v) | LeafArray::Binary(v) = self {
            out.extend(v.iter().flatten().filter_map(|p| p.blob));
        }
    }

    /// Encode the leaf. Long payloads must already have been persisted.
    pub fn encode(&self, w: &mut ByteWriter) -> RecordResult<()> {
        w.u8(self.data_type().map_or(KEY_TAG, |dt| dt.code()));
        w.u32(self.len() as u32);
        match self {
            LeafArray::Key(v) => v.iter().for_each(|k| w.u64(*k)),
            LeafArray::Int(v) => encode_opts(w, v, |w, x| w.i64(*x)),
            LeafArray::Bool(v) => encode_opts(w, v, |w, x| w.u8(*x as u8)),
            LeafArray::Float(v) => encode_opts(w, v, |w, x| w.f32(*x)),
            LeafArray::Double(v) => encode_opts(w, v, |w, x| w.f64(*x)),
            LeafArray::Timestamp(v) => encode_opts(w, v, |w, t| {
                w.i64(t.seconds());
                w.u32(t.nanos());
            }),
            LeafArray::Link(v) => encode_opts(w, v, |w, k| w.u64(k.0)),
            LeafArray::LinkList(v) => {
                for list in v {
                    w.u32(list.len() as u32);
                    list.iter().for_each(|k| w.u64(k.0));
                }
            }
            LeafArray::String(v) | LeafArray::Binary(v) => {
                for slot in v {
                    match slot {
                        None => w.u8(0),
                        Some(p) if p.is_inline() => {
                            w.u8(1);
                            w.bytes(&p.data);
                        }
                        Some(p) => {
                            let blob = p.blob.ok_or_else(|| {
                                RecordError::Serialization("long payload was not persisted".to_string())
                            })?;
                            w.u8(2);
                            w.page_ref(blob);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Decode a leaf, reading long payloads through `store`
    pub fn decode(r: &mut ByteReader<'_>, store: &PageStore) -> RecordResult<Self> {
        let tag = r.u8()?;
        let len = r.u32()? as usize;
        if tag == KEY_TAG {
            let keys = (0..len).map(|_| r.u64()).collect::<RecordResult<_>>()?;
            return Ok(LeafArray::Key(keys));
        }
        let data_type = DataType::from_code(tag)
            .ok_or_else(|| RecordError::Deserialization(format!("unknown leaf tag {}", tag)))?;

        Ok(match data_type {
            DataType::Int => LeafArray::Int(decode_opts(r, len, |r| r.i64())?),
            DataType::Bool => LeafArray::Bool(decode_opts(r, len, |r| Ok(r.u8()? != 0))?),
            DataType::Float => LeafArray::Float(decode_opts(r, len, |r| r.f32())?),
            DataType::Double => LeafArray::Double(decode_opts(r, len, |r| r.f64())?),
            DataType::Timestamp => LeafArray::Timestamp(decode_opts(r, len, |r| {
                let seconds = r.i64()?;
                Ok(Timestamp::new(seconds, r.u32()?))
            })?),
            DataType::Link => LeafArray::Link(decode_opts(r, len, |r| Ok(RowKey(r.u64()?)))?),
            DataType::LinkList => {
                let mut lists = Vec::with_capacity(len);
                for _ in 0..len {
                    let n = r.u32()? as usize;
                    let list = (0..n)
                        .map(|_| r.u64().map(RowKey))
                        .collect::<RecordResult<_>>()?;
                    lists.push(list);
                }
                LeafArray::LinkList(lists)
            }
            DataType::String | DataType::Binary => {
                let mut payloads = Vec::with_capacity(len);
                for _ in 0..len {
                    let payload = match r.u8()? {
                        0 => None,
                        1 => Some(Payload::new(r.bytes()?.to_vec())),
                        2 => {
                            let blob = r.page_ref()?;
                            let data = store.read_extent(blob)?;
                            Some(Payload {
                                data: Arc::from(data.as_slice()),
                                blob: Some(blob),
                            })
                        }
                        other => {
                            return Err(RecordError::Deserialization(format!(
                                "unknown payload marker {}",
                                other
                            )));
                        }
                    };
                    payloads.push(payload);
                }
                if data_type == DataType::String {
                    LeafArray::String(payloads)
                } else {
                    LeafArray::Binary(payloads)
                }
            }
        })
    }
}

fn variant_changed() -> RecordError {
    RecordError::InvalidSchema("leaf arrays of different column types".to_string())
}

fn opt_value<T>(slot: Option<&Option<T>>, f: impl FnOnce(&T) -> Value) -> Value {
    match slot {
        Some(Some(x)) => f(x),
        _ => Value::Null,
    }
}

fn encode_opts<T>(w: &mut ByteWriter, values: &[Option<T>], f: impl Fn(&mut ByteWriter, &T)) {
    for slot in values {
        match slot {
            Some(x) => {
                w.u8(1);
                f(w, x);
            }
            None => w.u8(0),
        }
    }
}

fn decode_opts<T>(
    r: &mut ByteReader<'_>,
    len: usize,
    f: impl Fn(&mut ByteReader<'_>) -> RecordResult<T>,
) -> RecordResult<Vec<Option<T>>> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(match r.u8()? {
            0 => None,
            _ => Some(f(r)?),
        });
    }
    Ok(out)
}

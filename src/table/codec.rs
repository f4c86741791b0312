//! Little-endian encoding helpers for column nodes and table headers

use crate::file::PageRef;
use crate::record::{RecordError, RecordResult};

/// Sentinel page id for "no extent"
const NO_PAGE: u64 = u64::MAX;

#[derive(Debug, Default)]
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Length-prefixed byte string
    pub fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn page_ref(&mut self, r: PageRef) {
        self.u64(r.page);
        self.u32(r.count);
    }

    pub fn opt_page_ref(&mut self, r: Option<PageRef>) {
        match r {
            Some(r) => self.page_ref(r),
            None => {
                self.u64(NO_PAGE);
                self.u32(0);
            }
        }
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, n: usize) -> RecordResult<&'a [u8]> {
        let end = self.offset.checked_add(n).filter(|end| *end <= self.buf.len());
        let Some(end) = end else {
            return Err(RecordError::Deserialization(format!(
                "need {} bytes at offset {}, have {}",
                n,
                self.offset,
                self.buf.len()
            )));
        };
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> RecordResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> RecordResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> RecordResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> RecordResult<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn i64(&mut self) -> RecordResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> RecordResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }

    pub fn f64(&mut self) -> RecordResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    pub fn bytes(&mut self) -> RecordResult<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn page_ref(&mut self) -> RecordResult<PageRef> {
        let page = self.u64()?;
        let count = self.u32()?;
        Ok(PageRef::new(page, count))
    }

    pub fn opt_page_ref(&mut self) -> RecordResult<Option<PageRef>> {
        let r = self.page_ref()?;
        Ok((r.page != NO_PAGE).then_some(r))
    }

    pub fn is_exhausted(&self) -> bool {
        self.offset == self.buf.len()
    }
}

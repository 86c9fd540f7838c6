use std::ops::Range;

use crate::error::{Error, Result};

/// One decoded row: an ordered sequence of nullable byte slices
///
/// All field bytes live in one buffer. A NULL field is distinct from an empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    buf: Vec<u8>,
    fields: Vec<Option<Range<usize>>>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Raw bytes of column `idx`; `None` if the value is NULL or `idx` is out of range
    pub fn get(&self, idx: usize) -> Option<&[u8]> {
        let range = self.fields.get(idx)?.as_ref()?;
        Some(&self.buf[range.clone()])
    }

    pub fn is_null(&self, idx: usize) -> bool {
        matches!(self.fields.get(idx), Some(None))
    }

    /// Column `idx` as UTF-8 text
    pub fn get_str(&self, idx: usize) -> Result<Option<&str>> {
        match self.get(idx) {
            Some(bytes) => simdutf8::basic::from_utf8(bytes)
                .map(Some)
                .map_err(|_| Error::BadUsageError(format!("column {idx} is not valid UTF-8"))),
            None => Ok(None),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&[u8]>> + '_ {
        self.fields
            .iter()
            .map(|field| field.as_ref().map(|range| &self.buf[range.clone()]))
    }

    pub(crate) fn clear(&mut self) {
        self.buf.clear();
        self.fields.clear();
    }

    pub(crate) fn push_null(&mut self) {
        self.fields.push(None);
    }

    /// Buffer that the next field's bytes are appended to
    pub(crate) fn field_buffer(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }

    /// Close the field whose bytes were appended since `start`
    pub(crate) fn finish_field(&mut self, start: usize) {
        self.fields.push(Some(start..self.buf.len()));
    }
}

impl FromIterator<Option<Vec<u8>>> for Row {
    fn from_iter<I: IntoIterator<Item = Option<Vec<u8>>>>(iter: I) -> Self {
        let mut row = Row::new();
        for field in iter {
            match field {
                Some(bytes) => {
                    let start = row.buf.len();
                    row.buf.extend_from_slice(&bytes);
                    row.finish_field(start);
                }
                None => row.push_null(),
            }
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_distinct_from_empty() {
        let row: Row = [Some(b"1".to_vec()), None, Some(Vec::new())]
            .into_iter()
            .collect();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0), Some(&b"1"[..]));
        assert!(row.is_null(1));
        assert_eq!(row.get(1), None);
        assert!(!row.is_null(2));
        assert_eq!(row.get(2), Some(&b""[..]));
        assert!(!row.is_null(3));
        assert_eq!(row.get(3), None);
    }

    #[test]
    fn utf8_access() {
        let row: Row = [Some("héllo".as_bytes().to_vec()), Some(vec![0xFF])]
            .into_iter()
            .collect();
        assert_eq!(row.get_str(0).unwrap(), Some("héllo"));
        assert!(row.get_str(1).is_err());
        assert_eq!(row.iter().count(), 2);
    }
}

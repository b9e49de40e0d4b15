//! # Object Construction
//!
//! Turns caller data into engine records. Inserted data is always copied
//! into an owned [`Record`]; query data is only borrowed for the duration of
//! one call through a [`QueryRecord`].

use simbridge_core::error::{Error, Result};
use simbridge_core::{DataEncoding, SparseElement};
use simbridge_engine::{Element, QueryRecord, Record};

/// Caller data for one record or query, tagged by encoding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataInput<'a> {
    Dense(&'a [f32]),
    Sparse(&'a [SparseElement]),
    Bytes(&'a [u8]),
    /// Raw character data; need not be NUL-terminated or valid UTF-8
    Text(&'a [u8]),
}

impl<'a> DataInput<'a> {
    pub fn text(s: &'a str) -> Self {
        DataInput::Text(s.as_bytes())
    }

    pub fn encoding(&self) -> DataEncoding {
        match self {
            DataInput::Dense(_) => DataEncoding::DenseFloatVector,
            DataInput::Sparse(_) => DataEncoding::SparseFloatVector,
            DataInput::Bytes(_) => DataEncoding::DenseByteVector,
            DataInput::Text(_) => DataEncoding::LengthPrefixedString,
        }
    }

    /// Element count (values, pairs, bytes or characters)
    pub fn len(&self) -> usize {
        match self {
            DataInput::Dense(v) => v.len(),
            DataInput::Sparse(v) => v.len(),
            DataInput::Bytes(v) | DataInput::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Caller buffer receiving a stored record
#[derive(Debug)]
pub enum DataOutput<'a> {
    Dense(&'a mut [f32]),
    Sparse(&'a mut [SparseElement]),
    Bytes(&'a mut [u8]),
    Text(&'a mut [u8]),
}

impl DataOutput<'_> {
    pub fn encoding(&self) -> DataEncoding {
        match self {
            DataOutput::Dense(_) => DataEncoding::DenseFloatVector,
            DataOutput::Sparse(_) => DataEncoding::SparseFloatVector,
            DataOutput::Bytes(_) => DataEncoding::DenseByteVector,
            DataOutput::Text(_) => DataEncoding::LengthPrefixedString,
        }
    }
}

/// Reject empty input and ids that are not strictly increasing.
///
/// Runs before construction: sparse distances merge-join on sorted ids and
/// silently go wrong on unsorted input.
pub fn validate_sparse(elements: &[SparseElement]) -> Result<()> {
    if elements.is_empty() {
        return Err(Error::invalid_sparse_element("sparse vector is empty"));
    }
    for (i, pair) in elements.windows(2).enumerate() {
        if pair[1].id <= pair[0].id {
            return Err(Error::invalid_sparse_element(format!(
                "sparse ids must be strictly increasing: id {} at {} follows id {}",
                pair[1].id,
                i + 1,
                pair[0].id
            )));
        }
    }
    Ok(())
}

fn check_shape<E: Element>(data: &[E], width: Option<usize>) -> Result<()> {
    if data.is_empty() {
        return Err(Error::invalid_argument("record has no elements"));
    }
    match width {
        Some(width) if width != data.len() => Err(Error::invalid_argument(format!(
            "record has {} elements, index holds {}",
            data.len(),
            width
        ))),
        _ => Ok(()),
    }
}

/// Copy `data` into an owned record; `width` is the fixed element count, if any
pub(crate) fn owned_record<E: Element>(id: i32, data: &[E], width: Option<usize>) -> Result<Record<E>> {
    check_shape(data, width)?;
    Ok(Record::new(id, data))
}

/// Wrap `data` as a query without copying
pub(crate) fn borrowed_query<E: Element>(data: &[E], width: Option<usize>) -> Result<QueryRecord<'_, E>> {
    check_shape(data, width)?;
    Ok(QueryRecord::new(data))
}

pub(crate) fn encoding_mismatch(index: DataEncoding, input: DataEncoding) -> Error {
    Error::space_incompatible(format!("{} index cannot accept {} data", index, input))
}

/// Split a flat row-major buffer into `dim`-wide rows
pub(crate) fn rows<T>(flat: &[T], dim: usize) -> Result<std::slice::ChunksExact<'_, T>> {
    if dim == 0 {
        return Err(Error::invalid_argument("row dimension must be positive"));
    }
    if flat.len() % dim != 0 {
        return Err(Error::invalid_argument(format!(
            "buffer of {} elements is not a multiple of dimension {}",
            flat.len(),
            dim
        )));
    }
    Ok(flat.chunks_exact(dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_core::ErrorCode;

    fn pairs(ids: &[u32]) -> Vec<SparseElement> {
        ids.iter().map(|&id| SparseElement::new(id, 1.0)).collect()
    }

    #[test]
    fn test_sparse_order() {
        assert!(validate_sparse(&pairs(&[1, 2])).is_ok());
        assert!(validate_sparse(&pairs(&[0, 7, 9000])).is_ok());

        let err = validate_sparse(&pairs(&[2, 1])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSparseElement);
        let err = validate_sparse(&pairs(&[3, 3])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSparseElement);
        let err = validate_sparse(&[]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSparseElement);
    }

    #[test]
    fn test_owned_copies_and_borrowed_does_not() {
        let data = vec![1.0f32, 2.0, 3.0];
        let record = owned_record(7, &data, None).unwrap();
        assert_eq!(record.id(), 7);
        assert_ne!(record.data().as_ptr(), data.as_ptr());

        let query = borrowed_query(&data, Some(3)).unwrap();
        assert_eq!(query.data().as_ptr(), data.as_ptr());
    }

    #[test]
    fn test_width_and_empty_checks() {
        let err = owned_record::<f32>(0, &[], None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        let err = borrowed_query(&[1u8, 2], Some(3)).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_rows() {
        let flat = [0u8, 1, 2, 3, 4, 5];
        assert_eq!(rows(&flat, 3).unwrap().count(), 2);
        assert!(rows(&flat, 4).is_err());
        assert!(rows(&flat, 0).is_err());
    }
}

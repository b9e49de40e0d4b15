//! Records stored in an index and borrowed query records.
//!
//! Stored records own a copy of their elements. Query records borrow the
//! caller's buffer for the duration of one call, so the borrow checker rules
//! out keeping them past it.

use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use simbridge_core::SparseElement;

/// Id carried by query records, which are never stored
pub const QUERY_ID: i32 = -1;

/// Element type of a record, with its little-endian wire form
pub trait Element: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()>;

    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self>;
}

impl Element for f32 {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_f32::<LittleEndian>(*self)
    }

    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        r.read_f32::<LittleEndian>()
    }
}

impl Element for u8 {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_u8(*self)
    }

    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        r.read_u8()
    }
}

impl Element for SparseElement {
    fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.id)?;
        w.write_f32::<LittleEndian>(self.value)
    }

    fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let id = r.read_u32::<LittleEndian>()?;
        let value = r.read_f32::<LittleEndian>()?;
        Ok(SparseElement { id, value })
    }
}

/// A record owned by an index
#[derive(Debug, Clone, PartialEq)]
pub struct Record<E> {
    id: i32,
    data: Box<[E]>,
}

impl<E: Element> Record<E> {
    /// Copy `data` into a new record
    pub fn new(id: i32, data: &[E]) -> Self {
        Self { id, data: data.into() }
    }

    pub fn from_vec(id: i32, data: Vec<E>) -> Self {
        Self { id, data: data.into_boxed_slice() }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn data(&self) -> &[E] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate heap + inline footprint in bytes
    pub fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>() + std::mem::size_of_val(&*self.data)
    }
}

/// A query record borrowing the caller's buffer
#[derive(Debug, Clone, Copy)]
pub struct QueryRecord<'a, E> {
    data: &'a [E],
}

impl<'a, E: Element> QueryRecord<'a, E> {
    pub fn new(data: &'a [E]) -> Self {
        Self { data }
    }

    pub fn id(&self) -> i32 {
        QUERY_ID
    }

    pub fn data(&self) -> &'a [E] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

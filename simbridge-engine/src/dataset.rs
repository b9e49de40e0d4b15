//! # Record Vector Files
//!
//! Binary layout written next to a saved index when its data is included:
//!
//! ```text
//! magic "SBRECVEC" | version u32 | encoding u8 | count u64
//! count × ( id i32 | len u32 | len × element )
//! crc32 u32   (of everything between the magic and the checksum)
//! ```
//!
//! All integers are little-endian.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;

use simbridge_core::error::{Error, Result};
use simbridge_core::DataEncoding;

use crate::object::{Element, Record};

const RECORDS_MAGIC: &[u8; 8] = b"SBRECVEC";
const RECORDS_VERSION: u32 = 1;

/// Upper bound on a single record's element count, to reject corrupt lengths
/// before allocating
const MAX_RECORD_LEN: usize = 1 << 28;

/// `len` as a u32 length prefix, or DataIoFailed when it does not fit
pub fn length_prefix(len: usize, what: impl std::fmt::Display) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| Error::data_io(format!("{} has {} entries, more than a u32 length holds", what, len)))
}

struct ChecksumWriter<'a, W: ?Sized> {
    inner: &'a mut W,
    hasher: Hasher,
}

impl<W: Write + ?Sized> Write for ChecksumWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct ChecksumReader<'a, R: ?Sized> {
    inner: &'a mut R,
    hasher: Hasher,
}

impl<R: Read + ?Sized> Read for ChecksumReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Serialize `records` of the given encoding
pub fn write_records<E, W>(w: &mut W, encoding: DataEncoding, records: &[Record<E>]) -> Result<()>
where
    E: Element,
    W: Write + ?Sized,
{
    w.write_all(RECORDS_MAGIC)?;

    let mut body = ChecksumWriter { inner: &mut *w, hasher: Hasher::new() };
    body.write_u32::<LittleEndian>(RECORDS_VERSION)?;
    body.write_u8(encoding.as_u8())?;
    body.write_u64::<LittleEndian>(records.len() as u64)?;

    for record in records {
        body.write_i32::<LittleEndian>(record.id())?;
        let len = length_prefix(record.len(), format_args!("record {}", record.id()))?;
        body.write_u32::<LittleEndian>(len)?;
        for element in record.data() {
            element.write_to(&mut body)?;
        }
    }

    let checksum = body.hasher.finalize();
    w.write_u32::<LittleEndian>(checksum)?;
    w.flush()?;
    Ok(())
}

/// Deserialize records previously written for `encoding`
pub fn read_records<E, R>(r: &mut R, encoding: DataEncoding) -> Result<Vec<Record<E>>>
where
    E: Element,
    R: Read + ?Sized,
{
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic)
        .map_err(|e| Error::io("reading record vector header", e))?;
    if &magic != RECORDS_MAGIC {
        return Err(Error::data_io("not a record vector file (bad magic)"));
    }

    let mut body = ChecksumReader { inner: &mut *r, hasher: Hasher::new() };
    let version = body.read_u32::<LittleEndian>()?;
    if version != RECORDS_VERSION {
        return Err(Error::data_io(format!("unsupported record vector version {}", version)));
    }

    let stored = DataEncoding::from_u32(body.read_u8()? as u32)
        .map_err(|_| Error::data_io("record vector has an unknown encoding tag"))?;
    if stored != encoding {
        return Err(Error::space_incompatible(format!(
            "record vector holds {} records, index expects {}",
            stored, encoding
        )));
    }

    let count = body.read_u64::<LittleEndian>()? as usize;
    let mut records = Vec::with_capacity(count.min(1 << 20));
    for _ in 0..count {
        let id = body.read_i32::<LittleEndian>()?;
        let len = body.read_u32::<LittleEndian>()? as usize;
        if len > MAX_RECORD_LEN {
            return Err(Error::data_io(format!("corrupt record length {}", len)));
        }
        let mut data = Vec::with_capacity(len);
        for _ in 0..len {
            data.push(E::read_from(&mut body)?);
        }
        records.push(Record::from_vec(id, data));
    }

    let computed = body.hasher.finalize();
    let expected = r.read_u32::<LittleEndian>()?;
    if computed != expected {
        return Err(Error::data_io(format!(
            "record vector checksum mismatch: stored {:08x}, computed {:08x}",
            expected, computed
        )));
    }

    Ok(records)
}

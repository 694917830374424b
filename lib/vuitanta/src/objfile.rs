//! Binary format for object code images.
//!
//! All numbers are little-endian:
//!
//! ```text
//! "OBJ" version:u8
//! segments:u16
//! module_len:u16 module:[u8; module_len]
//! segments times:
//!   id:u8 name_len:u16 name:[u8; name_len] offset:u16 size:u16 bytes:[u8; size]
//! ```

use crate::errors::ObjectFileError;
use crate::object::{CodeSegment, ObjectCode, SegmentId};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Identifies object files.
pub const MAGIC: &[u8; 3] = b"OBJ";

/// Version of the format being written.
pub const VERSION: u8 = 1;

type Result<T> = std::result::Result<T, ObjectFileError>;

fn write_u16(writer: &mut impl Write, value: u16) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

fn write_len(writer: &mut impl Write, len: usize, what: &str) -> Result<()> {
    match u16::try_from(len) {
        Ok(len) => write_u16(writer, len),
        Err(_) => Err(ObjectFileError::TooLarge(what.to_string())),
    }
}

fn write_str(writer: &mut impl Write, value: &str, what: &str) -> Result<()> {
    write_len(writer, value.len(), what)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut buf = [0; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16(reader: &mut impl Read) -> Result<u16> {
    let mut buf = [0; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_bytes(reader: &mut impl Read, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![];
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(ObjectFileError::Truncated);
    }
    Ok(buf)
}

fn read_str(reader: &mut impl Read) -> Result<String> {
    let len = read_u16(reader)? as usize;
    String::from_utf8(read_bytes(reader, len)?).map_err(|_| ObjectFileError::InvalidName)
}

/// Writes the given object code into `writer`.
pub fn write_object_code(writer: &mut impl Write, object: &ObjectCode) -> Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_all(&[VERSION])?;
    write_len(writer, object.num_segments(), "segment count")?;
    write_str(writer, object.module_name(), "module name")?;

    for segment in object.segments() {
        writer.write_all(&[segment.id() as u8])?;
        write_str(writer, segment.name(), "segment name")?;
        write_u16(writer, segment.offset())?;
        write_len(writer, segment.size(), &format!("segment {}", segment.name()))?;
        writer.write_all(segment.bytes())?;
    }

    Ok(())
}

/// Reads an object code image from `reader`. Truncated or malformed input is
/// rejected as a whole.
pub fn read_object_code(reader: &mut impl Read) -> Result<ObjectCode> {
    let mut magic = [0; 3];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(ObjectFileError::BadMagic);
    }
    let version = read_u8(reader)?;
    if version != VERSION {
        return Err(ObjectFileError::UnsupportedVersion(version));
    }

    let count = read_u16(reader)?;
    let mut object = ObjectCode::empty(&read_str(reader)?);

    for _ in 0..count {
        let raw = read_u8(reader)?;
        let id = SegmentId::try_from(raw).map_err(ObjectFileError::InvalidSegment)?;
        if object.have_segment(id) {
            return Err(ObjectFileError::DuplicateSegment(raw));
        }

        let mut segment = CodeSegment::new(id, &read_str(reader)?);
        segment.set_offset(read_u16(reader)?);
        let size = read_u16(reader)? as usize;
        segment.set_data(read_bytes(reader, size)?);

        object.add_code_segment(segment);
    }

    log::debug!(
        "read module {} with {} segments",
        object.module_name(),
        object.num_segments()
    );
    Ok(object)
}

/// Returns the object code serialized into a buffer.
pub fn to_bytes(object: &ObjectCode) -> Result<Vec<u8>> {
    let mut buf = vec![];
    write_object_code(&mut buf, object)?;
    Ok(buf)
}

/// Reads an object code image from the given buffer.
pub fn from_bytes(mut bytes: &[u8]) -> Result<ObjectCode> {
    read_object_code(&mut bytes)
}

// Temporary sibling file for the given path.
fn temporary_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

/// Writes the object code into the file at `path`. The contents are written
/// into a temporary file first which then replaces `path`, so a previous file
/// is never left half-written.
pub fn write_object_file(path: &Path, object: &ObjectCode) -> Result<()> {
    let tmp = temporary_path(path);

    let res = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        write_object_code(&mut writer, object)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();

    if res.is_err() {
        let _ = fs::remove_file(&tmp);
    } else {
        log::debug!("object file written to {}", path.display());
    }
    res
}

/// Reads the object code from the file at `path`.
pub fn read_object_file(path: &Path) -> Result<ObjectCode> {
    let bytes = fs::read(path).map_err(ObjectFileError::Io)?;
    from_bytes(&bytes)
}

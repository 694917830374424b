use crate::errors::AssemblerException;
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a segment inside of an object code image. The numeric value is
/// the one written into object files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SegmentId {
    Absolute = 0,
    Code = 1,
    Data = 2,
}

impl SegmentId {
    /// Returns the name given to segments of this kind when none is provided.
    pub fn default_name(&self) -> &'static str {
        match self {
            SegmentId::Absolute => "ABSOLUTE",
            SegmentId::Code => "CODE",
            SegmentId::Data => "DATA",
        }
    }
}

impl TryFrom<u8> for SegmentId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SegmentId::Absolute),
            1 => Ok(SegmentId::Code),
            2 => Ok(SegmentId::Data),
            _ => Err(value),
        }
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.default_name())
    }
}

/// A named region of contiguous bytes which starts at `offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSegment {
    id: SegmentId,
    name: String,
    offset: u16,
    bytes: Vec<u8>,
}

impl CodeSegment {
    pub fn new(id: SegmentId, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            offset: 0,
            bytes: vec![],
        }
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base address of the segment.
    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: u16) {
        self.offset = offset;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Replaces the contents of the segment.
    pub fn set_data(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
    }

    /// Appends the given bytes at the end of the segment.
    pub fn append(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Overwrites the bytes starting at `index` with the given ones. Returns
    /// false if that would go past the end of the segment, in which case
    /// nothing is changed.
    pub fn patch(&mut self, index: usize, bytes: &[u8]) -> bool {
        match self.bytes.get_mut(index..index + bytes.len()) {
            Some(dst) => {
                dst.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Returns the address right after the last byte of the segment. That is,
    /// the value of the location counter when emitting into it.
    pub fn end_address(&self) -> usize {
        self.offset as usize + self.bytes.len()
    }
}

/// The image of an assembled module: a set of segments indexed by their
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCode {
    module_name: String,
    segments: BTreeMap<SegmentId, CodeSegment>,
}

impl ObjectCode {
    /// Identifier of the segment that is always available.
    pub const DEFAULT_SEGMENT: SegmentId = SegmentId::Code;

    /// Returns a new object code image with only the default segment on it.
    pub fn new(module_name: &str) -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(
            Self::DEFAULT_SEGMENT,
            CodeSegment::new(Self::DEFAULT_SEGMENT, Self::DEFAULT_SEGMENT.default_name()),
        );

        Self {
            module_name: module_name.to_string(),
            segments,
        }
    }

    /// Returns an image without any segment at all. Only meant for readers
    /// that are about to fill it from some other source.
    pub(crate) fn empty(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            segments: BTreeMap::new(),
        }
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn set_module_name(&mut self, name: &str) {
        self.module_name = name.to_string();
    }

    /// Adds a new empty segment, replacing any previous one with the same
    /// identifier.
    pub fn add_segment(&mut self, id: SegmentId, name: &str) -> &mut CodeSegment {
        log::debug!("adding segment {} ({})", name, id);

        let segment = self.segments.entry(id).or_insert_with(|| CodeSegment::new(id, name));
        *segment = CodeSegment::new(id, name);
        segment
    }

    /// Adds the given segment, replacing any previous one with the same
    /// identifier.
    pub fn add_code_segment(&mut self, segment: CodeSegment) {
        log::debug!("adding segment {} ({})", segment.name(), segment.id());

        self.segments.insert(segment.id(), segment);
    }

    pub fn have_segment(&self, id: SegmentId) -> bool {
        self.segments.contains_key(&id)
    }

    pub fn get_segment(&self, id: SegmentId) -> Result<&CodeSegment, AssemblerException> {
        self.segments
            .get(&id)
            .ok_or_else(|| AssemblerException::new(format!("unknown segment '{}'", id)))
    }

    pub fn get_segment_mut(&mut self, id: SegmentId) -> Result<&mut CodeSegment, AssemblerException> {
        self.segments
            .get_mut(&id)
            .ok_or_else(|| AssemblerException::new(format!("unknown segment '{}'", id)))
    }

    /// Returns the segment with the given name. Names are compared ignoring
    /// case.
    pub fn get_segment_by_name(&self, name: &str) -> Result<&CodeSegment, AssemblerException> {
        self.segments
            .values()
            .find(|s| s.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| AssemblerException::new(format!("unknown segment '{}'", name)))
    }

    /// Iterates over the segments sorted by their identifier.
    pub fn segments(&self) -> impl Iterator<Item = &CodeSegment> {
        self.segments.values()
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }
}

use std::collections::BTreeMap;

use thiserror::Error;

const FORMAT_MAGIC: [u8; 4] = *b"IOSN";
const FORMAT_VERSION: SnapshotVersion = SnapshotVersion::new(1, 0);
const HEADER_LEN: usize = 16;
const FIELD_HEADER_LEN: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotVersion {
    pub major: u16,
    pub minor: u16,
}

impl SnapshotVersion {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub format_version: SnapshotVersion,
    pub device_id: [u8; 4],
    pub device_version: SnapshotVersion,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,

    #[error("invalid snapshot magic")]
    InvalidMagic,

    #[error("unsupported snapshot format version {major}.{minor}")]
    UnsupportedFormatVersion { major: u16, minor: u16 },

    #[error("snapshot device id mismatch (expected {expected:?}, found {found:?})")]
    DeviceIdMismatch { expected: [u8; 4], found: [u8; 4] },

    #[error("unsupported device snapshot major version {found} (expected {expected})")]
    UnsupportedDeviceMajorVersion { found: u16, expected: u16 },

    #[error("duplicate snapshot field tag {0}")]
    DuplicateFieldTag(u16),

    #[error("invalid field encoding: {0}")]
    InvalidFieldEncoding(&'static str),

    #[error("corrupt snapshot: {0}")]
    Corrupt(&'static str),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Builds a device snapshot. Fields are emitted in ascending tag order regardless of the order
/// they were written in, so identical state always produces identical bytes.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    header: SnapshotHeader,
    fields: BTreeMap<u16, Vec<u8>>,
}

impl SnapshotWriter {
    pub fn new(device_id: [u8; 4], device_version: SnapshotVersion) -> Self {
        Self {
            header: SnapshotHeader {
                format_version: FORMAT_VERSION,
                device_id,
                device_version,
            },
            fields: BTreeMap::new(),
        }
    }

    pub fn field_bytes(&mut self, tag: u16, bytes: Vec<u8>) {
        self.fields.insert(tag, bytes);
    }

    pub fn field_u8(&mut self, tag: u16, value: u8) {
        self.field_bytes(tag, vec![value]);
    }

    pub fn field_bool(&mut self, tag: u16, value: bool) {
        self.field_u8(tag, u8::from(value));
    }

    pub fn field_u16(&mut self, tag: u16, value: u16) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_u32(&mut self, tag: u16, value: u32) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_u64(&mut self, tag: u16, value: u64) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn field_i64(&mut self, tag: u16, value: i64) {
        self.field_bytes(tag, value.to_le_bytes().to_vec());
    }

    pub fn finish(self) -> Vec<u8> {
        let payload_len: usize = self
            .fields
            .values()
            .map(|data| FIELD_HEADER_LEN + data.len())
            .sum();
        let mut out = Vec::with_capacity(HEADER_LEN + payload_len);
        out.extend_from_slice(&FORMAT_MAGIC);
        out.extend_from_slice(&self.header.format_version.major.to_le_bytes());
        out.extend_from_slice(&self.header.format_version.minor.to_le_bytes());
        out.extend_from_slice(&self.header.device_id);
        out.extend_from_slice(&self.header.device_version.major.to_le_bytes());
        out.extend_from_slice(&self.header.device_version.minor.to_le_bytes());
        for (tag, data) in self.fields {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&data);
        }
        out
    }
}

/// Parsed view over a device snapshot produced by [`SnapshotWriter`].
#[derive(Debug, Clone)]
pub struct SnapshotReader<'a> {
    header: SnapshotHeader,
    fields: BTreeMap<u16, &'a [u8]>,
}

impl<'a> SnapshotReader<'a> {
    pub fn parse(bytes: &'a [u8], expected_device_id: [u8; 4]) -> SnapshotResult<Self> {
        let mut d = codec::Decoder::new(bytes);
        if d.bytes(4)? != FORMAT_MAGIC {
            return Err(SnapshotError::InvalidMagic);
        }
        let format_version = SnapshotVersion::new(d.u16()?, d.u16()?);
        if format_version.major != FORMAT_VERSION.major {
            return Err(SnapshotError::UnsupportedFormatVersion {
                major: format_version.major,
                minor: format_version.minor,
            });
        }
        let mut device_id = [0u8; 4];
        device_id.copy_from_slice(d.bytes(4)?);
        if device_id != expected_device_id {
            return Err(SnapshotError::DeviceIdMismatch {
                expected: expected_device_id,
                found: device_id,
            });
        }
        let device_version = SnapshotVersion::new(d.u16()?, d.u16()?);

        let mut fields = BTreeMap::new();
        while !d.is_empty() {
            let tag = d.u16()?;
            let len = d.u32()? as usize;
            let data = d.bytes(len)?;
            if fields.insert(tag, data).is_some() {
                return Err(SnapshotError::DuplicateFieldTag(tag));
            }
        }

        Ok(Self {
            header: SnapshotHeader {
                format_version,
                device_id,
                device_version,
            },
            fields,
        })
    }

    pub fn header(&self) -> &SnapshotHeader {
        &self.header
    }

    pub fn ensure_device_major(&self, major: u16) -> SnapshotResult<()> {
        if self.header.device_version.major != major {
            return Err(SnapshotError::UnsupportedDeviceMajorVersion {
                found: self.header.device_version.major,
                expected: major,
            });
        }
        Ok(())
    }

    pub fn bytes(&self, tag: u16) -> Option<&'a [u8]> {
        self.fields.get(&tag).copied()
    }

    fn fixed<const N: usize>(
        &self,
        tag: u16,
        what: &'static str,
    ) -> SnapshotResult<Option<[u8; N]>> {
        match self.bytes(tag) {
            None => Ok(None),
            Some(data) => data
                .try_into()
                .map(Some)
                .map_err(|_| SnapshotError::InvalidFieldEncoding(what)),
        }
    }

    pub fn u8(&self, tag: u16) -> SnapshotResult<Option<u8>> {
        Ok(self.fixed::<1>(tag, "u8")?.map(|b| b[0]))
    }

    pub fn bool(&self, tag: u16) -> SnapshotResult<Option<bool>> {
        match self.u8(tag)? {
            None => Ok(None),
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            Some(_) => Err(SnapshotError::InvalidFieldEncoding("bool")),
        }
    }

    pub fn u16(&self, tag: u16) -> SnapshotResult<Option<u16>> {
        Ok(self.fixed(tag, "u16")?.map(u16::from_le_bytes))
    }

    pub fn u32(&self, tag: u16) -> SnapshotResult<Option<u32>> {
        Ok(self.fixed(tag, "u32")?.map(u32::from_le_bytes))
    }

    pub fn u64(&self, tag: u16) -> SnapshotResult<Option<u64>> {
        Ok(self.fixed(tag, "u64")?.map(u64::from_le_bytes))
    }

    pub fn i64(&self, tag: u16) -> SnapshotResult<Option<i64>> {
        Ok(self.fixed(tag, "i64")?.map(i64::from_le_bytes))
    }
}

pub mod codec {
    //! Little-endian packing helpers for structured field payloads.

    use super::{SnapshotError, SnapshotResult};

    #[derive(Debug, Default, Clone)]
    pub struct Encoder {
        buf: Vec<u8>,
    }

    impl Encoder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn u8(mut self, v: u8) -> Self {
            self.buf.push(v);
            self
        }

        pub fn bool(self, v: bool) -> Self {
            self.u8(u8::from(v))
        }

        pub fn u16(mut self, v: u16) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u32(mut self, v: u32) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn u64(mut self, v: u64) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        pub fn i64(mut self, v: i64) -> Self {
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }

        /// Appends raw bytes without a length prefix.
        pub fn bytes(mut self, v: &[u8]) -> Self {
            self.buf.extend_from_slice(v);
            self
        }

        pub fn finish(self) -> Vec<u8> {
            self.buf
        }
    }

    #[derive(Debug, Clone)]
    pub struct Decoder<'a> {
        buf: &'a [u8],
        pos: usize,
    }

    impl<'a> Decoder<'a> {
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, pos: 0 }
        }

        pub fn is_empty(&self) -> bool {
            self.pos >= self.buf.len()
        }

        pub fn bytes(&mut self, len: usize) -> SnapshotResult<&'a [u8]> {
            let end = self
                .pos
                .checked_add(len)
                .ok_or(SnapshotError::UnexpectedEof)?;
            let out = self
                .buf
                .get(self.pos..end)
                .ok_or(SnapshotError::UnexpectedEof)?;
            self.pos = end;
            Ok(out)
        }

        fn array<const N: usize>(&mut self) -> SnapshotResult<[u8; N]> {
            let mut out = [0u8; N];
            out.copy_from_slice(self.bytes(N)?);
            Ok(out)
        }

        pub fn u8(&mut self) -> SnapshotResult<u8> {
            Ok(self.array::<1>()?[0])
        }

        pub fn bool(&mut self) -> SnapshotResult<bool> {
            match self.u8()? {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(SnapshotError::InvalidFieldEncoding("bool")),
            }
        }

        pub fn u16(&mut self) -> SnapshotResult<u16> {
            Ok(u16::from_le_bytes(self.array()?))
        }

        pub fn u32(&mut self) -> SnapshotResult<u32> {
            Ok(u32::from_le_bytes(self.array()?))
        }

        pub fn u64(&mut self) -> SnapshotResult<u64> {
            Ok(u64::from_le_bytes(self.array()?))
        }

        pub fn i64(&mut self) -> SnapshotResult<i64> {
            Ok(i64::from_le_bytes(self.array()?))
        }

        /// Fails if any bytes were left unconsumed.
        pub fn finish(self) -> SnapshotResult<()> {
            if self.is_empty() {
                Ok(())
            } else {
                Err(SnapshotError::Corrupt("trailing bytes in field"))
            }
        }
    }
}

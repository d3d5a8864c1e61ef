//! Datapool identifiers and metadata.

use std::fmt;

use crate::error::DiagError;

/// Addresses one server-side datapool value as a (datapool, list,
/// element) triple, packed into 24 bits on the wire:
/// 5-bit datapool | 7-bit list | 12-bit element.
///
/// The element field is documented to 2047 even though 12 bits would
/// hold more; both pack and unpack enforce the documented range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataPoolId {
    pool: u8,
    list: u8,
    element: u16,
}

/// Upper bound of the element index.
pub const MAX_ELEMENT: u16 = 2047;

impl DataPoolId {
    /// Validate and build an identifier.
    pub fn new(pool: u8, list: u8, element: u16) -> Result<Self, DiagError> {
        if pool > 31 {
            return Err(DiagError::OutOfRange(format!("datapool index {pool} exceeds 31")));
        }
        if list > 127 {
            return Err(DiagError::OutOfRange(format!("list index {list} exceeds 127")));
        }
        if element > MAX_ELEMENT {
            return Err(DiagError::OutOfRange(format!(
                "element index {element} exceeds {MAX_ELEMENT}"
            )));
        }
        Ok(Self { pool, list, element })
    }

    pub fn pool(&self) -> u8 {
        self.pool
    }

    pub fn list(&self) -> u8 {
        self.list
    }

    pub fn element(&self) -> u16 {
        self.element
    }

    /// Pack into the 3-byte big-endian wire form.
    pub fn pack(&self) -> [u8; 3] {
        let v = u32::from(self.pool) << 19 | u32::from(self.list) << 12 | u32::from(self.element);
        [(v >> 16) as u8, (v >> 8) as u8, v as u8]
    }

    /// Unpack from the 3-byte wire form, re-validating the element range.
    pub fn unpack(bytes: [u8; 3]) -> Result<Self, DiagError> {
        let v = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
        Self::new((v >> 19) as u8, (v >> 12 & 0x7F) as u8, (v & 0x0FFF) as u16)
    }
}

impl fmt::Display for DataPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.pool, self.list, self.element)
    }
}

/// Metadata describing one datapool, assembled from the tag-length-value
/// payload of the read-datapool-metadata routine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPoolMetaData {
    pub name: String,
    /// major.minor.release
    pub version: [u8; 3],
    pub crc: u32,
}

mod tag {
    pub const VERSION: u8 = 0x01;
    pub const CRC: u8 = 0x02;
    pub const NAME: u8 = 0x03;
}

impl DataPoolMetaData {
    /// Parse `[tag, len, value...]*`; all three tags are required.
    pub fn from_tlv(data: &[u8]) -> Result<Self, DiagError> {
        let mut name = None;
        let mut version = None;
        let mut crc = None;

        let mut rest = data;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(DiagError::MalformedResponse(
                    "truncated datapool metadata tag".into(),
                ));
            }
            let (t, len) = (rest[0], usize::from(rest[1]));
            if rest.len() < 2 + len {
                return Err(DiagError::MalformedResponse(
                    "datapool metadata value shorter than declared".into(),
                ));
            }
            let value = &rest[2..2 + len];
            match t {
                tag::VERSION if len == 3 => version = Some([value[0], value[1], value[2]]),
                tag::CRC if len == 4 => {
                    crc = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
                }
                tag::NAME => {
                    let s = String::from_utf8(value.to_vec()).map_err(|_| {
                        DiagError::MalformedResponse("datapool name is not valid UTF-8".into())
                    })?;
                    name = Some(s);
                }
                _ => {
                    return Err(DiagError::MalformedResponse(format!(
                        "unexpected datapool metadata tag 0x{t:02X} (len {len})"
                    )))
                }
            }
            rest = &rest[2 + len..];
        }

        match (name, version, crc) {
            (Some(name), Some(version), Some(crc)) => Ok(Self { name, version, crc }),
            _ => Err(DiagError::MalformedResponse(
                "incomplete datapool metadata".into(),
            )),
        }
    }
}

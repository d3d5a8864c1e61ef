//! Fixed-shape records assembled from response payloads.

use std::fmt;

use crate::error::DiagError;

/// Maximum character count of an extended serial number.
pub const MAX_EXTENDED_SERIAL_LEN: usize = 29;

/// A node serial number: either the standard 6-byte BCD form or the
/// extended free-form variant of 1..=29 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SerialNumber {
    Standard([u8; 6]),
    Extended(String),
}

impl SerialNumber {
    pub fn standard(bytes: [u8; 6]) -> Self {
        Self::Standard(bytes)
    }

    pub fn extended(text: impl Into<String>) -> Result<Self, DiagError> {
        let text = text.into();
        if text.is_empty() || text.len() > MAX_EXTENDED_SERIAL_LEN {
            return Err(DiagError::OutOfRange(format!(
                "extended serial number length {} outside 1..={MAX_EXTENDED_SERIAL_LEN}",
                text.len()
            )));
        }
        Ok(Self::Extended(text))
    }
}

impl fmt::Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // BCD digit pairs, dotted: 05.12.34.56.78.90
            Self::Standard(b) => write!(
                f,
                "{:02X}.{:02X}.{:02X}.{:02X}.{:02X}.{:02X}",
                b[0], b[1], b[2], b[3], b[4], b[5]
            ),
            Self::Extended(s) => f.write_str(s),
        }
    }
}

/// Feature bits advertised by a node (wire form: 4 bytes big-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureList(u32);

impl FeatureList {
    const FLASH: u32 = 1 << 0;
    const EXTENDED_SERIAL: u32 = 1 << 1;
    const TUNNELING: u32 = 1 << 2;
    const FILE_TRANSFER: u32 = 1 << 3;

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub fn raw(&self) -> u32 {
        self.0
    }

    pub fn supports_flash(&self) -> bool {
        self.0 & Self::FLASH != 0
    }

    pub fn supports_extended_serial(&self) -> bool {
        self.0 & Self::EXTENDED_SERIAL != 0
    }

    pub fn supports_tunneling(&self) -> bool {
        self.0 & Self::TUNNELING != 0
    }

    pub fn supports_file_transfer(&self) -> bool {
        self.0 & Self::FILE_TRANSFER != 0
    }
}

/// Programming fingerprint: who flashed the node, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Years since 2000.
    pub year: u8,
    pub month: u8,
    pub day: u8,
    /// Tester identification, at most 13 bytes on the wire.
    pub tester_id: String,
}

/// Wire limit of the tester id field.
pub const MAX_TESTER_ID_LEN: usize = 13;

impl Fingerprint {
    pub fn to_bytes(&self) -> Result<Vec<u8>, DiagError> {
        if self.tester_id.len() > MAX_TESTER_ID_LEN {
            return Err(DiagError::OutOfRange(format!(
                "tester id length {} exceeds {MAX_TESTER_ID_LEN}",
                self.tester_id.len()
            )));
        }
        let mut out = vec![self.year, self.month, self.day, self.tester_id.len() as u8];
        out.extend_from_slice(self.tester_id.as_bytes());
        Ok(out)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, DiagError> {
        if data.len() < 4 {
            return Err(DiagError::MalformedResponse("fingerprint too short".into()));
        }
        let id_len = usize::from(data[3]);
        if id_len > MAX_TESTER_ID_LEN || data.len() < 4 + id_len {
            return Err(DiagError::MalformedResponse(
                "fingerprint tester id length inconsistent".into(),
            ));
        }
        let tester_id = String::from_utf8(data[4..4 + id_len].to_vec())
            .map_err(|_| DiagError::MalformedResponse("tester id is not valid UTF-8".into()))?;
        Ok(Self {
            year: data[0],
            month: data[1],
            day: data[2],
            tester_id,
        })
    }
}

/// Description of one flashable block, assembled from the
/// tag-length-value result of the flash-block-info routine.
///
/// The record is only constructed once all required tags (address,
/// size, signature state) have been seen; a partial TLV stream is a
/// malformed response, not a default-filled record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashBlockInfo {
    pub block_address: u32,
    pub block_size: u32,
    pub signature_valid: bool,
    pub application_name: Option<String>,
    pub application_version: Option<String>,
    pub build_date: Option<String>,
}

mod tag {
    pub const ADDRESS: u8 = 0x01;
    pub const SIZE: u8 = 0x02;
    pub const SIGNATURE: u8 = 0x03;
    pub const APP_NAME: u8 = 0x04;
    pub const APP_VERSION: u8 = 0x05;
    pub const BUILD_DATE: u8 = 0x06;
}

impl FlashBlockInfo {
    /// Parse `[tag, len, value...]*`.
    pub fn from_tlv(data: &[u8]) -> Result<Self, DiagError> {
        let mut address = None;
        let mut size = None;
        let mut signature = None;
        let mut app_name = None;
        let mut app_version = None;
        let mut build_date = None;

        let mut rest = data;
        while !rest.is_empty() {
            if rest.len() < 2 {
                return Err(DiagError::MalformedResponse(
                    "truncated flash block tag".into(),
                ));
            }
            let (t, len) = (rest[0], usize::from(rest[1]));
            if rest.len() < 2 + len {
                return Err(DiagError::MalformedResponse(
                    "flash block value shorter than declared".into(),
                ));
            }
            let value = &rest[2..2 + len];
            match t {
                tag::ADDRESS if len == 4 => {
                    address = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
                }
                tag::SIZE if len == 4 => {
                    size = Some(u32::from_be_bytes([value[0], value[1], value[2], value[3]]))
                }
                tag::SIGNATURE if len == 1 => signature = Some(value[0] != 0),
                tag::APP_NAME => app_name = Some(lossy_text(value)),
                tag::APP_VERSION => app_version = Some(lossy_text(value)),
                tag::BUILD_DATE => build_date = Some(lossy_text(value)),
                _ => {
                    return Err(DiagError::MalformedResponse(format!(
                        "unexpected flash block tag 0x{t:02X} (len {len})"
                    )))
                }
            }
            rest = &rest[2 + len..];
        }

        match (address, size, signature) {
            (Some(block_address), Some(block_size), Some(signature_valid)) => Ok(Self {
                block_address,
                block_size,
                signature_valid,
                application_name: app_name,
                application_version: app_version,
                build_date,
            }),
            _ => Err(DiagError::MalformedResponse(
                "incomplete flash block info".into(),
            )),
        }
    }
}

fn lossy_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_serial_formats_as_bcd_pairs() {
        let sn = SerialNumber::standard([0x05, 0x12, 0x34, 0x56, 0x78, 0x90]);
        assert_eq!(sn.to_string(), "05.12.34.56.78.90");
    }

    #[test]
    fn extended_serial_length_is_bounded() {
        assert!(SerialNumber::extended("SN-2024-0001").is_ok());
        assert!(matches!(
            SerialNumber::extended(""),
            Err(DiagError::OutOfRange(_))
        ));
        assert!(matches!(
            SerialNumber::extended("X".repeat(30)),
            Err(DiagError::OutOfRange(_))
        ));
    }

    #[test]
    fn feature_bits_decode() {
        let f = FeatureList::from_bytes([0, 0, 0, 0b0101]);
        assert!(f.supports_flash());
        assert!(!f.supports_extended_serial());
        assert!(f.supports_tunneling());
        assert!(!f.supports_file_transfer());
    }

    #[test]
    fn fingerprint_round_trips() {
        let fp = Fingerprint {
            year: 26,
            month: 8,
            day: 30,
            tester_id: "bench-7".into(),
        };
        let bytes = fp.to_bytes().unwrap();
        assert_eq!(Fingerprint::from_bytes(&bytes).unwrap(), fp);
    }

    #[test]
    fn flash_block_info_requires_address_size_signature() {
        let tlv = [
            0x01, 0x04, 0x00, 0x08, 0x00, 0x00, // address
            0x02, 0x04, 0x00, 0x02, 0x00, 0x00, // size
            0x03, 0x01, 0x01, // signature valid
            0x04, 0x03, b'a', b'p', b'p', // name
        ];
        let info = FlashBlockInfo::from_tlv(&tlv).unwrap();
        assert_eq!(info.block_address, 0x0008_0000);
        assert_eq!(info.block_size, 0x0002_0000);
        assert!(info.signature_valid);
        assert_eq!(info.application_name.as_deref(), Some("app"));
        assert_eq!(info.build_date, None);

        // missing the signature tag
        assert!(matches!(
            FlashBlockInfo::from_tlv(&tlv[..12]),
            Err(DiagError::MalformedResponse(_))
        ));
    }
}

//! PCI frame codec.
//!
//! Encodes service payloads into CAN frames and classifies received
//! frames by the high nibble of byte 0 (the protocol control
//! information):
//!
//! | nibble | frame                                    |
//! |--------|------------------------------------------|
//! | 0x0    | Single Frame (low nibble = length 1..=7) |
//! | 0x0    | OMF First Frame (byte 0 == 0x00, DLC 8)  |
//! | 0x1    | First Frame (12-bit length)              |
//! | 0x2    | Consecutive Frame (low nibble = SN)      |
//! | 0x3    | Flow Control                             |
//! | 0xC    | OMF Consecutive Frame                    |
//!
//! The degenerate empty Single Frame (`[0x00]`, DLC 1) is told apart
//! from an OMF First Frame (byte 0 `0x00`, DLC 8) by the DLC.

use thiserror::Error;

use crate::frame::CanFrame;

/// Largest payload a flow-controlled multi-frame transfer can carry.
pub const MAX_ISO_PAYLOAD: usize = 4095;
/// Largest payload the unacknowledged (OMF) transfer can carry.
pub const MAX_OMF_PAYLOAD: usize = 255;
/// Largest payload fitting a single frame.
pub const MAX_SINGLE_PAYLOAD: usize = 7;
/// Payload bytes carried by a first frame (ISO and OMF alike).
pub const FIRST_FRAME_PAYLOAD: usize = 6;
/// Payload bytes carried by one consecutive frame.
pub const CONSECUTIVE_PAYLOAD: usize = 7;

const PCI_SINGLE: u8 = 0x00;
const PCI_FIRST: u8 = 0x10;
const PCI_CONSECUTIVE: u8 = 0x20;
const PCI_FLOW_CONTROL: u8 = 0x30;
const PCI_OMF_CONSECUTIVE: u8 = 0xC0;

/// One classified protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pdu {
    Single {
        payload: Vec<u8>,
    },
    First {
        total_len: u16,
        payload: [u8; FIRST_FRAME_PAYLOAD],
    },
    Consecutive {
        sn: u8,
        payload: Vec<u8>,
    },
    FlowControl {
        flow_status: u8,
        block_size: u8,
        st_min: u8,
    },
    OmfFirst {
        total_len: u8,
        payload: [u8; FIRST_FRAME_PAYLOAD],
    },
    OmfConsecutive {
        sn: u8,
        payload: Vec<u8>,
    },
}

/// Frame classification failures. Offending frames are dropped by the
/// transport with a warning.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PciError {
    #[error("declared length does not fit DLC {dlc}")]
    BadDlc { dlc: u8 },
    #[error("implausible declared transfer length {len}")]
    BadLength { len: u16 },
    #[error("unknown PCI type 0x{0:02X}")]
    UnknownType(u8),
}

/// Encode a payload of at most 7 bytes as a Single Frame.
pub fn encode_single(id: u32, payload: &[u8]) -> CanFrame {
    debug_assert!(payload.len() <= MAX_SINGLE_PAYLOAD);
    let mut data = vec![PCI_SINGLE | payload.len() as u8];
    data.extend_from_slice(payload);
    CanFrame::extended(id, &data)
}

/// Encode the First Frame of a flow-controlled transfer; `head` carries
/// the first 6 payload bytes.
pub fn encode_first(id: u32, total_len: u16, head: &[u8]) -> CanFrame {
    debug_assert!(head.len() == FIRST_FRAME_PAYLOAD);
    debug_assert!((8..=MAX_ISO_PAYLOAD as u16).contains(&total_len));
    let mut data = vec![PCI_FIRST | (total_len >> 8) as u8, (total_len & 0xFF) as u8];
    data.extend_from_slice(head);
    CanFrame::extended(id, &data)
}

/// Encode one Consecutive Frame carrying up to 7 payload bytes.
pub fn encode_consecutive(id: u32, sn: u8, chunk: &[u8]) -> CanFrame {
    debug_assert!(chunk.len() <= CONSECUTIVE_PAYLOAD && !chunk.is_empty());
    let mut data = vec![PCI_CONSECUTIVE | (sn & 0x0F)];
    data.extend_from_slice(chunk);
    CanFrame::extended(id, &data)
}

/// Encode the only Flow Control this stack emits: ContinueToSend with
/// block size 0 and no separation time.
pub fn encode_flow_control(id: u32) -> CanFrame {
    CanFrame::extended(id, &[PCI_FLOW_CONTROL, 0x00, 0x00])
}

/// Encode the First Frame of an unacknowledged (OMF) transfer.
pub fn encode_omf_first(id: u32, total_len: u8, head: &[u8]) -> CanFrame {
    debug_assert!(head.len() == FIRST_FRAME_PAYLOAD);
    debug_assert!(total_len >= 8);
    let mut data = vec![0x00, total_len];
    data.extend_from_slice(head);
    CanFrame::extended(id, &data)
}

/// Encode one OMF Consecutive Frame.
pub fn encode_omf_consecutive(id: u32, sn: u8, chunk: &[u8]) -> CanFrame {
    debug_assert!(chunk.len() <= CONSECUTIVE_PAYLOAD && !chunk.is_empty());
    let mut data = vec![PCI_OMF_CONSECUTIVE | (sn & 0x0F)];
    data.extend_from_slice(chunk);
    CanFrame::extended(id, &data)
}

/// Classify a received frame.
pub fn decode(frame: &CanFrame) -> Result<Pdu, PciError> {
    let bytes = frame.payload();
    let Some(&pci) = bytes.first() else {
        return Err(PciError::BadDlc { dlc: frame.dlc });
    };

    match pci >> 4 {
        0x0 => {
            let len = usize::from(pci & 0x0F);
            if len == 0 {
                if bytes.len() == 1 {
                    return Ok(Pdu::Single {
                        payload: Vec::new(),
                    });
                }
                // byte 0 == 0x00 with more data: OMF first frame
                if bytes.len() < 2 + FIRST_FRAME_PAYLOAD {
                    return Err(PciError::BadDlc { dlc: frame.dlc });
                }
                let total_len = bytes[1];
                if usize::from(total_len) < 8 {
                    return Err(PciError::BadLength {
                        len: u16::from(total_len),
                    });
                }
                let mut payload = [0u8; FIRST_FRAME_PAYLOAD];
                payload.copy_from_slice(&bytes[2..2 + FIRST_FRAME_PAYLOAD]);
                return Ok(Pdu::OmfFirst { total_len, payload });
            }
            if bytes.len() < 1 + len {
                return Err(PciError::BadDlc { dlc: frame.dlc });
            }
            Ok(Pdu::Single {
                payload: bytes[1..1 + len].to_vec(),
            })
        }
        0x1 => {
            if bytes.len() < 2 + FIRST_FRAME_PAYLOAD {
                return Err(PciError::BadDlc { dlc: frame.dlc });
            }
            let total_len = u16::from(pci & 0x0F) << 8 | u16::from(bytes[1]);
            if total_len < 8 {
                return Err(PciError::BadLength { len: total_len });
            }
            let mut payload = [0u8; FIRST_FRAME_PAYLOAD];
            payload.copy_from_slice(&bytes[2..2 + FIRST_FRAME_PAYLOAD]);
            Ok(Pdu::First { total_len, payload })
        }
        0x2 => {
            if bytes.len() < 2 {
                return Err(PciError::BadDlc { dlc: frame.dlc });
            }
            Ok(Pdu::Consecutive {
                sn: pci & 0x0F,
                payload: bytes[1..].to_vec(),
            })
        }
        0x3 => {
            if bytes.len() < 3 {
                return Err(PciError::BadDlc { dlc: frame.dlc });
            }
            Ok(Pdu::FlowControl {
                flow_status: pci & 0x0F,
                block_size: bytes[1],
                st_min: bytes[2],
            })
        }
        0xC => {
            if bytes.len() < 2 {
                return Err(PciError::BadDlc { dlc: frame.dlc });
            }
            Ok(Pdu::OmfConsecutive {
                sn: pci & 0x0F,
                payload: bytes[1..].to_vec(),
            })
        }
        _ => Err(PciError::UnknownType(pci)),
    }
}

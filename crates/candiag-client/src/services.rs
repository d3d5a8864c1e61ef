//! Service, data and routine identifier catalogue.

/// Request service ids. Positive responses carry the id with
/// [`RESPONSE_FLAG`] set; negative responses use [`NEGATIVE_RESPONSE`].
pub mod service_id {
    pub const SESSION_CONTROL: u8 = 0x10;
    pub const ECU_RESET: u8 = 0x11;
    pub const READ_DATA_BY_ID: u8 = 0x22;
    pub const READ_MEMORY_BY_ADDRESS: u8 = 0x23;
    pub const SECURITY_ACCESS: u8 = 0x27;
    pub const DATA_POOL_READ: u8 = 0x30;
    pub const ROUTINE_CONTROL: u8 = 0x31;
    pub const DATA_POOL_WRITE: u8 = 0x32;
    pub const DATA_POOL_EVENT: u8 = 0x33;
    pub const REQUEST_DOWNLOAD: u8 = 0x34;
    pub const CAN_TUNNEL: u8 = 0x35;
    pub const TRANSFER_DATA: u8 = 0x36;
    pub const REQUEST_TRANSFER_EXIT: u8 = 0x37;
    pub const REQUEST_FILE_TRANSFER: u8 = 0x38;
    pub const WRITE_MEMORY_BY_ADDRESS: u8 = 0x3D;
    pub const TESTER_PRESENT: u8 = 0x3E;
    pub const WRITE_DATA_BY_ID: u8 = 0x2E;

    /// Set on the first byte of every positive response.
    pub const RESPONSE_FLAG: u8 = 0x80;
    /// First byte of a negative response: `[0xFF, request_sid, nrc, echo...]`.
    pub const NEGATIVE_RESPONSE: u8 = 0xFF;
}

/// Bus-wide broadcast services (single-frame only; responses come back
/// point-to-point from each answering node).
pub mod broadcast_id {
    pub const READ_SERIAL_NUMBER: u8 = 0x41;
    pub const SET_NODE_ID_BY_SERIAL_NUMBER: u8 = 0x42;
    pub const REQUEST_PROGRAMMING: u8 = 0x43;
    pub const ECU_RESET: u8 = 0x44;
    pub const ENTER_DEFAULT_SESSION: u8 = 0x45;
    pub const ENTER_PREPROGRAMMING_SESSION: u8 = 0x46;
    pub const READ_SERIAL_NUMBER_EXTENDED: u8 = 0x47;
}

/// Data identifiers for the read/write-by-identifier family
/// (big-endian u16 on the wire).
pub mod data_id {
    pub const SERIAL_NUMBER: u16 = 0xF18C;
    pub const HARDWARE_NUMBER: u16 = 0xF191;
    pub const HARDWARE_VERSION: u16 = 0xF193;
    pub const DEVICE_NAME: u16 = 0xF197;

    // Vendor range
    pub const APPLICATION_NAME: u16 = 0xA800;
    pub const APPLICATION_VERSION: u16 = 0xA801;
    pub const BOOT_SOFTWARE_VERSION: u16 = 0xA802;
    pub const PROTOCOL_VERSION: u16 = 0xA803;
    pub const FLASHLOADER_VERSION: u16 = 0xA804;
    pub const FEATURE_LIST: u16 = 0xA805;
    pub const FLASH_COUNT: u16 = 0xA806;
    pub const FINGERPRINT: u16 = 0xA807;
}

/// Routine identifiers for the routine-control family.
pub mod routine_id {
    pub const REQUEST_PROGRAMMING: u16 = 0x0201;
    pub const FLASH_BLOCK_INFO: u16 = 0x0202;
    pub const TUNNEL_SETUP: u16 = 0x0203;
    pub const SET_BITRATE: u16 = 0x0204;
    pub const SET_IP_CONFIG: u16 = 0x0205;
    pub const CONFIGURE_CHANNEL: u16 = 0x0206;
    pub const LEGACY_ROUTING: u16 = 0x0207;
    pub const READ_DATAPOOL_METADATA: u16 = 0x0208;
}

/// Routine-control sub-functions.
pub mod routine_sub {
    pub const START: u8 = 0x01;
}

/// Diagnostic session ids.
pub mod session_id {
    pub const DEFAULT: u8 = 0x01;
    pub const PROGRAMMING: u8 = 0x02;
    pub const EXTENDED: u8 = 0x03;
    pub const PREPROGRAMMING: u8 = 0x60;
}

/// Datapool event-rail configuration sub-functions (service 0x33).
pub mod event_sub {
    pub const CYCLIC: u8 = 0x01;
    pub const CHANGE_DRIVEN: u8 = 0x02;
    pub const STOP_ALL: u8 = 0x03;
}

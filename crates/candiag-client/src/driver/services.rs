//! Typed service wrappers over the driver's transact primitive.
//!
//! Every wrapper follows the same pattern: build the request with
//! [`ServiceBuilder`], transact with that service's expected response
//! shape, validate echoed sub-fields, extract the payload.

use candiag_tp::{CanFrame, NodeId};

use crate::builder::{min_width, ServiceBuilder};
use crate::datapool::{DataPoolId, DataPoolMetaData};
use crate::error::DiagError;
use crate::records::{FeatureList, Fingerprint, FlashBlockInfo, SerialNumber};
use crate::services::{data_id, event_sub, routine_id, routine_sub, service_id};

use super::{Expected, SessionDriver};

/// Highest datapool event rail index.
pub const MAX_RAIL: u8 = 2;

/// Payload cap of the unacknowledged multi-frame transfer.
const OMF_LIMIT: usize = 255;

impl SessionDriver {
    /// Diagnostic session control (0x10).
    pub fn session_control(&self, session: u8) -> Result<(), DiagError> {
        let req = ServiceBuilder::new(service_id::SESSION_CONTROL).u8(session).build();
        let resp = self.transact(req, Expected::exact(service_id::SESSION_CONTROL, 2))?;
        if resp[1] != session {
            return Err(DiagError::MalformedResponse(format!(
                "session echo 0x{:02X} does not match requested 0x{session:02X}",
                resp[1]
            )));
        }
        Ok(())
    }

    /// ECU reset (0x11). Fire-and-forget: the node reboots and cannot
    /// answer, so no response is awaited.
    pub fn ecu_reset(&self, reset_type: u8) -> Result<(), DiagError> {
        let req = ServiceBuilder::new(service_id::ECU_RESET).u8(reset_type).build();
        self.send_only(req)
    }

    /// Tester present (0x3E), keeping a non-default session alive.
    pub fn tester_present(&self) -> Result<(), DiagError> {
        let req = ServiceBuilder::new(service_id::TESTER_PRESENT).u8(0x00).build();
        self.transact(
            req,
            Expected::exact(service_id::TESTER_PRESENT, 2).with_positive_echo(1, vec![0x00]),
        )?;
        Ok(())
    }

    /// Security access seed request (0x27, odd level). Returns the
    /// 4-byte seed.
    pub fn security_access_request_seed(&self, level: u8) -> Result<u32, DiagError> {
        if level % 2 == 0 {
            return Err(DiagError::OutOfRange(format!(
                "seed request level 0x{level:02X} must be odd"
            )));
        }
        let req = ServiceBuilder::new(service_id::SECURITY_ACCESS).u8(level).build();
        let resp = self.transact(
            req,
            Expected::exact(service_id::SECURITY_ACCESS, 6).with_positive_echo(1, vec![level]),
        )?;
        Ok(u32::from_be_bytes([resp[2], resp[3], resp[4], resp[5]]))
    }

    /// Security access key (0x27, even level).
    pub fn security_access_send_key(&self, level: u8, key: u32) -> Result<(), DiagError> {
        if level % 2 != 0 {
            return Err(DiagError::OutOfRange(format!(
                "key level 0x{level:02X} must be even"
            )));
        }
        let req = ServiceBuilder::new(service_id::SECURITY_ACCESS)
            .u8(level)
            .u32_be(key)
            .build();
        self.transact(
            req,
            Expected::exact(service_id::SECURITY_ACCESS, 2).with_positive_echo(1, vec![level]),
        )?;
        Ok(())
    }

    /// Read data by identifier (0x22). Returns the value bytes.
    pub fn read_data_by_id(&self, did: u16) -> Result<Vec<u8>, DiagError> {
        let req = ServiceBuilder::new(service_id::READ_DATA_BY_ID).u16_be(did).build();
        let resp = self.transact(
            req,
            Expected::at_least(service_id::READ_DATA_BY_ID, 3)
                .with_positive_echo(1, did.to_be_bytes().to_vec()),
        )?;
        Ok(resp[3..].to_vec())
    }

    /// Write data by identifier (0x2E).
    pub fn write_data_by_id(&self, did: u16, data: &[u8]) -> Result<(), DiagError> {
        let req = ServiceBuilder::new(service_id::WRITE_DATA_BY_ID)
            .u16_be(did)
            .bytes(data)
            .build();
        self.transact(
            req,
            Expected::exact(service_id::WRITE_DATA_BY_ID, 3)
                .with_positive_echo(1, did.to_be_bytes().to_vec()),
        )?;
        Ok(())
    }

    pub fn read_serial_number(&self) -> Result<SerialNumber, DiagError> {
        let value = self.read_data_by_id(data_id::SERIAL_NUMBER)?;
        let bytes: [u8; 6] = value.as_slice().try_into().map_err(|_| {
            DiagError::MalformedResponse(format!("serial number of {} bytes, expected 6", value.len()))
        })?;
        Ok(SerialNumber::standard(bytes))
    }

    pub fn read_device_name(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::DEVICE_NAME)
    }

    pub fn read_hardware_number(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::HARDWARE_NUMBER)
    }

    pub fn read_hardware_version(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::HARDWARE_VERSION)
    }

    pub fn read_application_name(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::APPLICATION_NAME)
    }

    pub fn read_application_version(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::APPLICATION_VERSION)
    }

    pub fn read_boot_software_version(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::BOOT_SOFTWARE_VERSION)
    }

    pub fn read_protocol_version(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::PROTOCOL_VERSION)
    }

    pub fn read_flashloader_version(&self) -> Result<String, DiagError> {
        self.read_string_did(data_id::FLASHLOADER_VERSION)
    }

    pub fn read_feature_list(&self) -> Result<FeatureList, DiagError> {
        let value = self.read_data_by_id(data_id::FEATURE_LIST)?;
        let bytes: [u8; 4] = value.as_slice().try_into().map_err(|_| {
            DiagError::MalformedResponse(format!("feature list of {} bytes, expected 4", value.len()))
        })?;
        Ok(FeatureList::from_bytes(bytes))
    }

    pub fn read_flash_count(&self) -> Result<u32, DiagError> {
        let value = self.read_data_by_id(data_id::FLASH_COUNT)?;
        let bytes: [u8; 4] = value.as_slice().try_into().map_err(|_| {
            DiagError::MalformedResponse(format!("flash count of {} bytes, expected 4", value.len()))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn read_fingerprint(&self) -> Result<Fingerprint, DiagError> {
        let value = self.read_data_by_id(data_id::FINGERPRINT)?;
        Fingerprint::from_bytes(&value)
    }

    pub fn write_fingerprint(&self, fingerprint: &Fingerprint) -> Result<(), DiagError> {
        self.write_data_by_id(data_id::FINGERPRINT, &fingerprint.to_bytes()?)
    }

    fn read_string_did(&self, did: u16) -> Result<String, DiagError> {
        let mut value = self.read_data_by_id(did)?;
        while value.last() == Some(&0) {
            value.pop();
        }
        String::from_utf8(value).map_err(|_| {
            DiagError::MalformedResponse(format!("value of identifier 0x{did:04X} is not valid UTF-8"))
        })
    }

    /// Read one datapool element (0x30). The packed identifier is used
    /// as the response discriminator so concurrent event-driven reads
    /// of other elements cannot be mistaken for this one.
    pub fn read_datapool(&self, id: DataPoolId) -> Result<Vec<u8>, DiagError> {
        let packed = id.pack();
        let req = ServiceBuilder::new(service_id::DATA_POOL_READ).bytes(&packed).build();
        let resp = self.transact(
            req,
            Expected::at_least(service_id::DATA_POOL_READ, 4)
                .with_positive_echo(1, packed.to_vec())
                .with_negative_echo(3, packed.to_vec()),
        )?;
        Ok(resp[4..].to_vec())
    }

    /// Write one datapool element (0x32).
    pub fn write_datapool(&self, id: DataPoolId, value: &[u8]) -> Result<(), DiagError> {
        let packed = id.pack();
        let req = ServiceBuilder::new(service_id::DATA_POOL_WRITE)
            .bytes(&packed)
            .bytes(value)
            .build();
        self.transact(
            req,
            Expected::exact(service_id::DATA_POOL_WRITE, 4)
                .with_positive_echo(1, packed.to_vec())
                .with_negative_echo(3, packed.to_vec()),
        )?;
        Ok(())
    }

    /// Register an element on a cyclic transmission rail (0x33/0x01).
    /// Values then arrive through the event sink.
    pub fn read_datapool_cyclic(
        &self,
        id: DataPoolId,
        rail: u8,
        interval_ms: u16,
    ) -> Result<(), DiagError> {
        check_rail(rail)?;
        let req = ServiceBuilder::new(service_id::DATA_POOL_EVENT)
            .u8(event_sub::CYCLIC)
            .u8(rail)
            .bytes(&id.pack())
            .u16_be(interval_ms)
            .build();
        self.transact(
            req,
            Expected::exact(service_id::DATA_POOL_EVENT, 3)
                .with_positive_echo(1, vec![event_sub::CYCLIC, rail]),
        )?;
        Ok(())
    }

    /// Register an element for change-driven transmission (0x33/0x02).
    pub fn read_datapool_change_driven(
        &self,
        id: DataPoolId,
        rail: u8,
        hysteresis: u32,
    ) -> Result<(), DiagError> {
        check_rail(rail)?;
        let req = ServiceBuilder::new(service_id::DATA_POOL_EVENT)
            .u8(event_sub::CHANGE_DRIVEN)
            .u8(rail)
            .bytes(&id.pack())
            .u32_be(hysteresis)
            .build();
        self.transact(
            req,
            Expected::exact(service_id::DATA_POOL_EVENT, 3)
                .with_positive_echo(1, vec![event_sub::CHANGE_DRIVEN, rail]),
        )?;
        Ok(())
    }

    /// Stop all event rails (0x33/0x03).
    pub fn stop_all_datapool_events(&self) -> Result<(), DiagError> {
        let req = ServiceBuilder::new(service_id::DATA_POOL_EVENT)
            .u8(event_sub::STOP_ALL)
            .build();
        self.transact(
            req,
            Expected::exact(service_id::DATA_POOL_EVENT, 2)
                .with_positive_echo(1, vec![event_sub::STOP_ALL]),
        )?;
        Ok(())
    }

    pub fn read_datapool_metadata(&self, pool: u8) -> Result<DataPoolMetaData, DiagError> {
        let result =
            self.routine(routine_sub::START, routine_id::READ_DATAPOOL_METADATA, &[pool])?;
        DataPoolMetaData::from_tlv(&result)
    }

    /// Read `size` bytes starting at `address` (0x23), split into as
    /// many request/response cycles as the configured maximum service
    /// size requires. Address and size fields use their minimal widths.
    pub fn read_memory_by_address(&self, address: u32, size: u32) -> Result<Vec<u8>, DiagError> {
        check_memory_range(address, u64::from(size))?;
        let mut out = Vec::with_capacity(size as usize);
        let mut cursor = address;
        let mut remaining = size;
        while remaining > 0 {
            let chunk = self.memory_chunk(cursor, remaining)?;
            let aw = min_width(cursor);
            let sw = min_width(chunk);
            let req = ServiceBuilder::new(service_id::READ_MEMORY_BY_ADDRESS)
                .u8(alfid(aw, sw))
                .min_width_be(cursor)
                .min_width_be(chunk)
                .build();
            let resp = self.transact(
                req,
                Expected::exact(service_id::READ_MEMORY_BY_ADDRESS, 1 + chunk as usize),
            )?;
            out.extend_from_slice(&resp[1..]);
            cursor = cursor.wrapping_add(chunk);
            remaining -= chunk;
        }
        Ok(out)
    }

    /// Write `data` starting at `address` (0x3D), chunked like
    /// [`read_memory_by_address`]. A failed chunk aborts the operation;
    /// chunks already written are not rolled back.
    pub fn write_memory_by_address(&self, address: u32, data: &[u8]) -> Result<(), DiagError> {
        check_memory_range(address, data.len() as u64)?;
        let mut cursor = address;
        let mut rest = data;
        while !rest.is_empty() {
            let chunk = self.memory_chunk(cursor, rest.len() as u32)? as usize;
            let aw = min_width(cursor);
            let sw = min_width(chunk as u32);
            let mut echo = vec![alfid(aw, sw)];
            echo.extend_from_slice(&cursor.to_be_bytes()[4 - aw..]);
            echo.extend_from_slice(&(chunk as u32).to_be_bytes()[4 - sw..]);
            let req = ServiceBuilder::new(service_id::WRITE_MEMORY_BY_ADDRESS)
                .bytes(&echo)
                .bytes(&rest[..chunk])
                .build();
            self.transact(
                req,
                Expected::exact(service_id::WRITE_MEMORY_BY_ADDRESS, 1 + echo.len())
                    .with_positive_echo(1, echo),
            )?;
            cursor = cursor.wrapping_add(chunk as u32);
            rest = &rest[chunk..];
        }
        Ok(())
    }

    /// Largest chunk transferable in one memory request at `cursor`.
    fn memory_chunk(&self, cursor: u32, remaining: u32) -> Result<u32, DiagError> {
        let overhead = 2 + min_width(cursor) + min_width(remaining);
        let budget = self.max_service_size().saturating_sub(overhead);
        if budget == 0 {
            return Err(DiagError::OutOfRange(
                "configured maximum service size leaves no room for data".into(),
            ));
        }
        Ok(remaining.min(budget as u32))
    }

    /// Routine control (0x31): start/stop/request-results one routine,
    /// returning the bytes after the echoed routine header.
    fn routine(&self, sub: u8, routine: u16, payload: &[u8]) -> Result<Vec<u8>, DiagError> {
        let req = ServiceBuilder::new(service_id::ROUTINE_CONTROL)
            .u8(sub)
            .u16_be(routine)
            .bytes(payload)
            .build();
        let mut echo = vec![sub];
        echo.extend_from_slice(&routine.to_be_bytes());
        let resp = self.transact(
            req,
            Expected::at_least(service_id::ROUTINE_CONTROL, 4).with_positive_echo(1, echo),
        )?;
        Ok(resp[4..].to_vec())
    }

    /// Ask the node to enter its flashloader on the next reset.
    pub fn routine_request_programming(&self) -> Result<(), DiagError> {
        self.routine(routine_sub::START, routine_id::REQUEST_PROGRAMMING, &[])?;
        Ok(())
    }

    /// Flash block description of one block index.
    pub fn read_flash_block_info(&self, block: u8) -> Result<FlashBlockInfo, DiagError> {
        let result = self.routine(routine_sub::START, routine_id::FLASH_BLOCK_INFO, &[block])?;
        FlashBlockInfo::from_tlv(&result)
    }

    /// Route tunnelled frames towards `target`; they arrive through the
    /// event sink afterwards.
    pub fn tunnel_setup(&self, target: NodeId) -> Result<(), DiagError> {
        self.routine(
            routine_sub::START,
            routine_id::TUNNEL_SETUP,
            &[target.bus(), target.node()],
        )?;
        Ok(())
    }

    /// Send one frame into the tunnel (0x35). No response; answers come
    /// back asynchronously.
    pub fn tunnel_send(&self, frame: &CanFrame) -> Result<(), DiagError> {
        let req = ServiceBuilder::new(service_id::CAN_TUNNEL)
            .u32_be(frame.id)
            .u8(frame.dlc)
            .bytes(frame.payload())
            .build();
        self.send_only(req)
    }

    pub fn set_bitrate(&self, channel: u8, bitrate: u32) -> Result<(), DiagError> {
        let mut payload = vec![channel];
        payload.extend_from_slice(&bitrate.to_be_bytes());
        self.routine(routine_sub::START, routine_id::SET_BITRATE, &payload)?;
        Ok(())
    }

    pub fn set_ip_config(
        &self,
        address: [u8; 4],
        netmask: [u8; 4],
        gateway: [u8; 4],
    ) -> Result<(), DiagError> {
        let mut payload = Vec::with_capacity(12);
        payload.extend_from_slice(&address);
        payload.extend_from_slice(&netmask);
        payload.extend_from_slice(&gateway);
        self.routine(routine_sub::START, routine_id::SET_IP_CONFIG, &payload)?;
        Ok(())
    }

    pub fn configure_channel(&self, channel: u8, active: bool) -> Result<(), DiagError> {
        self.routine(
            routine_sub::START,
            routine_id::CONFIGURE_CHANNEL,
            &[channel, u8::from(active)],
        )?;
        Ok(())
    }

    pub fn legacy_routing(&self, target_bus: u8, enable: bool) -> Result<(), DiagError> {
        self.routine(
            routine_sub::START,
            routine_id::LEGACY_ROUTING,
            &[target_bus, u8::from(enable)],
        )?;
        Ok(())
    }

    /// Request download (0x34). Returns the server's maximum block
    /// length for the following transfer-data requests.
    pub fn request_download(&self, address: u32, size: u32) -> Result<usize, DiagError> {
        let req = ServiceBuilder::new(service_id::REQUEST_DOWNLOAD)
            .u8(0x00) // no compression or encryption
            .u8(0x44)
            .u32_be(address)
            .u32_be(size)
            .build();
        let resp =
            self.transact(req, Expected::at_least(service_id::REQUEST_DOWNLOAD, 3))?;
        parse_max_block_length(&resp)
    }

    /// Request file transfer (0x38) into the server's file system.
    pub fn request_file_transfer(&self, path: &str, size: u32) -> Result<usize, DiagError> {
        if path.is_empty() || path.len() > usize::from(u16::MAX) {
            return Err(DiagError::OutOfRange(format!(
                "file path length {} outside 1..={}",
                path.len(),
                u16::MAX
            )));
        }
        let req = ServiceBuilder::new(service_id::REQUEST_FILE_TRANSFER)
            .u16_be(path.len() as u16)
            .bytes(path.as_bytes())
            .u32_be(size)
            .build();
        let resp =
            self.transact(req, Expected::at_least(service_id::REQUEST_FILE_TRANSFER, 3))?;
        parse_max_block_length(&resp)
    }

    /// Transfer one data block (0x36). Blocks that fit use the
    /// unacknowledged multi-frame transfer to avoid the flow-control
    /// round trip per block.
    pub fn transfer_data(&self, block_counter: u8, data: &[u8]) -> Result<(), DiagError> {
        let mut builder = ServiceBuilder::new(service_id::TRANSFER_DATA)
            .u8(block_counter)
            .bytes(data);
        if builder.len() <= OMF_LIMIT {
            builder = builder.without_flow_control();
        }
        self.transact(
            builder.build(),
            Expected::exact(service_id::TRANSFER_DATA, 2)
                .with_positive_echo(1, vec![block_counter]),
        )?;
        Ok(())
    }

    /// Finish the transfer (0x37). Returns the server's verification
    /// bytes (e.g. a checksum), if any.
    pub fn transfer_exit(&self) -> Result<Vec<u8>, DiagError> {
        let req = ServiceBuilder::new(service_id::REQUEST_TRANSFER_EXIT).build();
        let resp =
            self.transact(req, Expected::at_least(service_id::REQUEST_TRANSFER_EXIT, 1))?;
        Ok(resp[1..].to_vec())
    }
}

fn check_rail(rail: u8) -> Result<(), DiagError> {
    if rail > MAX_RAIL {
        return Err(DiagError::OutOfRange(format!(
            "event rail {rail} exceeds {MAX_RAIL}"
        )));
    }
    Ok(())
}

fn check_memory_range(address: u32, len: u64) -> Result<(), DiagError> {
    if u64::from(address) + len > u64::from(u32::MAX) + 1 {
        return Err(DiagError::OutOfRange(format!(
            "memory range 0x{address:08X}+{len} exceeds the 32-bit address space"
        )));
    }
    Ok(())
}

fn alfid(address_width: usize, size_width: usize) -> u8 {
    ((size_width as u8) << 4) | address_width as u8
}

/// Parse `[sid, lengthFormat, maxBlockLength...]` shared by 0x34/0x38.
fn parse_max_block_length(resp: &[u8]) -> Result<usize, DiagError> {
    let width = usize::from(resp[1] >> 4);
    if width == 0 || width > 4 || resp.len() != 2 + width {
        return Err(DiagError::MalformedResponse(format!(
            "block length field of {width} bytes in a {} byte response",
            resp.len()
        )));
    }
    let mut value = 0usize;
    for b in &resp[2..2 + width] {
        value = value << 8 | usize::from(*b);
    }
    Ok(value)
}

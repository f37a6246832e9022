//! Read Device Identification (FC 0x2B / MEI 0x0E)
//!
//! Objects 0x00-0x06 come from the server configuration, everything above is
//! asked from the register bank. A response carries as many objects as fit;
//! when one is withheld the response says so with `more_follows = 0xFF` and
//! the id to continue from.

use tracing::debug;

use crate::config::DeviceIdentification;
use crate::constants::{
    MODBUS_MAX_PDU_LENGTH, MODBUS_MEI_READ_DEVICE_IDENTIFICATION,
    MODBUS_STANDARD_IDENTIFICATION_COUNT,
};
use crate::exception::{self, ExceptionCode};

/// Bytes in front of the object list: MEI, code, conformity, more, next, count
const OBJECT_LIST_OFFSET: usize = 6;

/// Room for objects once the function code and the list header are written
pub const IDENTIFICATION_CAPACITY: usize = MODBUS_MAX_PDU_LENGTH - 1 - OBJECT_LIST_OFFSET;

/// Read Device ID code: basic stream
pub const READ_BASIC: u8 = 0x01;
/// Read Device ID code: regular stream
pub const READ_REGULAR: u8 = 0x02;
/// Read Device ID code: extended stream
pub const READ_EXTENDED: u8 = 0x03;
/// Read Device ID code: one specific object
pub const READ_INDIVIDUAL: u8 = 0x04;

/// Conformity level implied by an object id
pub fn conformity_level(object_id: u8) -> u8 {
    if object_id >= 0x80 {
        0x03
    } else if object_id >= 0x03 {
        0x02
    } else {
        0x01
    }
}

/// Outcome of trying to append one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// No such object
    Absent,
    /// Exists but must wait for the next request
    Deferred,
    /// Written, using this many bytes
    Placed(usize),
}

/// Standard identification objects of a server
#[derive(Debug, Clone, Default)]
pub struct IdentificationCatalog {
    standard: [Option<String>; MODBUS_STANDARD_IDENTIFICATION_COUNT as usize],
}

impl From<&DeviceIdentification> for IdentificationCatalog {
    fn from(identification: &DeviceIdentification) -> Self {
        Self {
            standard: [
                Some(identification.vendor_name.clone()),
                Some(identification.product_code.clone()),
                Some(identification.revision.clone()),
                identification.vendor_url.clone(),
                identification.product_name.clone(),
                identification.model_name.clone(),
                identification.user_application_name.clone(),
            ],
        }
    }
}

impl IdentificationCatalog {
    pub fn standard(&self, object_id: u8) -> Option<&str> {
        self.standard
            .get(object_id as usize)
            .and_then(|value| value.as_deref())
    }

    /// Build the response data (after the function code) into `response`
    ///
    /// `private` resolves objects 0x07 and above. Returns the number of bytes
    /// written.
    pub fn respond<F>(
        &self,
        read_code: u8,
        object_id: u8,
        private: F,
        response: &mut [u8],
        debug: bool,
    ) -> Result<usize, ExceptionCode>
    where
        F: Fn(u8) -> Option<String>,
    {
        if !(READ_BASIC..=READ_INDIVIDUAL).contains(&read_code) {
            return Err(exception::illegal_data_range(
                u16::from(read_code),
                u16::from(READ_BASIC),
                u16::from(READ_INDIVIDUAL),
                debug,
            ));
        }
        if response.len() < OBJECT_LIST_OFFSET + IDENTIFICATION_CAPACITY {
            return Err(ExceptionCode::DeviceFailure);
        }

        let lookup = |id: u8| -> Option<String> {
            if id < MODBUS_STANDARD_IDENTIFICATION_COUNT {
                self.standard(id).map(str::to_owned)
            } else {
                private(id)
            }
        };

        let stream_access = read_code != READ_INDIVIDUAL;
        let mut first_id = object_id;
        let mut capacity = IDENTIFICATION_CAPACITY;
        let mut offset = OBJECT_LIST_OFFSET;

        let mut placement = place_object(
            &mut response[offset..],
            first_id,
            lookup(first_id).as_deref(),
            capacity,
            true,
            debug,
        );
        if placement == Placement::Absent && stream_access {
            first_id = 0x00;
            placement = place_object(
                &mut response[offset..],
                first_id,
                lookup(first_id).as_deref(),
                capacity,
                true,
                debug,
            );
        }

        let level = conformity_level(first_id);
        let last_id: u16 = match level {
            0x01 => 0x02,
            0x02 => u16::from(MODBUS_STANDARD_IDENTIFICATION_COUNT) - 1,
            _ => 0xFF,
        };

        let mut count: u16 = 0;
        while let Placement::Placed(used) = placement {
            offset += used;
            capacity -= used;
            count += 1;

            let next_id = u16::from(first_id) + count;
            placement = if stream_access && next_id <= last_id {
                let id = next_id as u8;
                place_object(
                    &mut response[offset..],
                    id,
                    lookup(id).as_deref(),
                    capacity,
                    false,
                    debug,
                )
            } else {
                Placement::Absent
            };
        }

        if count == 0 {
            return Err(exception::identification_not_found(first_id, debug));
        }

        let more_follows = placement == Placement::Deferred;
        response[0] = MODBUS_MEI_READ_DEVICE_IDENTIFICATION;
        response[1] = read_code;
        response[2] = level;
        response[3] = if more_follows { 0xFF } else { 0x00 };
        response[4] = if more_follows {
            (u16::from(first_id) + count) as u8
        } else {
            0x00
        };
        response[5] = count as u8;

        Ok(offset)
    }
}

/// Append `{id, length, bytes}` for one object
///
/// Only the first object of a response may be cut to the remaining capacity.
fn place_object(
    list: &mut [u8],
    object_id: u8,
    value: Option<&str>,
    capacity: usize,
    cut: bool,
    debug: bool,
) -> Placement {
    let Some(value) = value else {
        return Placement::Absent;
    };

    let mut size = value.len().min(u8::MAX as usize);
    let mut used = size + 2;
    if used > capacity {
        if cut && capacity > 2 {
            size = capacity - 2;
            used = capacity;
        } else {
            if debug {
                debug!(
                    "Device identification object 0x{:02X} deferred to the next transaction",
                    object_id
                );
            }
            return Placement::Deferred;
        }
    }

    list[0] = object_id;
    list[1] = size as u8;
    list[2..used].copy_from_slice(&value.as_bytes()[..size]);

    if debug {
        debug!(
            "Device identification object 0x{:02X} ready ({}:{} bytes)",
            object_id, size, capacity
        );
    }
    Placement::Placed(used)
}

//! Modbus exception code taxonomy
//!
//! Exception codes are what the server puts on the wire when a request is
//! understood but cannot be served. The helpers below build the code and,
//! when debugging is enabled, leave a trace explaining the rejection.

use std::fmt;
use tracing::debug;

/// Standard Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    DeviceFailure = 0x04,
    Acknowledge = 0x05,
    DeviceBusy = 0x06,
    NegativeAcknowledge = 0x07,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailed = 0x0B,
}

impl ExceptionCode {
    /// Wire value
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Get exception description
    pub fn description(self) -> &'static str {
        describe(self.code())
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.description(), self.code())
    }
}

/// Describe any exception byte, including non-standard ones
pub fn describe(exception_code: u8) -> &'static str {
    match exception_code {
        0x01 => "Illegal Function",
        0x02 => "Illegal Data Address",
        0x03 => "Illegal Data Value",
        0x04 => "Server Device Failure",
        0x05 => "Acknowledge",
        0x06 => "Server Device Busy",
        0x07 => "Negative Acknowledge",
        0x08 => "Memory Parity Error",
        0x0A => "Gateway Path Unavailable",
        0x0B => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}

pub fn illegal_function(function_code: u8, debug: bool) -> ExceptionCode {
    if debug {
        debug!("Unknown function code 0x{:02X}", function_code);
    }

    ExceptionCode::IllegalFunction
}

pub fn illegal_address(address: u16, start: u16, amount: u16, debug: bool) -> ExceptionCode {
    if debug {
        debug!(
            "Illegal data address 0x{:04X}, out of range [0x{:04X}, 0x{:04X})",
            address,
            start,
            u32::from(start) + u32::from(amount)
        );
    }

    ExceptionCode::IllegalDataAddress
}

/// Address/count pair that overruns a block of `amount` items starting at `start`
pub fn illegal_address_range(
    address: u16,
    count: u16,
    start: u16,
    amount: u16,
    debug: bool,
) -> ExceptionCode {
    if debug {
        let end = u32::from(start) + u32::from(amount);
        if address < start || u32::from(address) > end {
            return illegal_address(address, start, amount, true);
        }
        debug!(
            "Too many data requested ({} > {})",
            u32::from(address - start) + u32::from(count),
            amount
        );
    }

    ExceptionCode::IllegalDataAddress
}

pub fn illegal_data_value(value: u16, expected: u16, debug: bool) -> ExceptionCode {
    if debug {
        debug!(
            "Illegal data value, expected 0x{:04X}, given 0x{:04X}",
            expected, value
        );
    }

    ExceptionCode::IllegalDataValue
}

/// Value outside the inclusive range `[min, max]`
pub fn illegal_data_range(value: u16, min: u16, max: u16, debug: bool) -> ExceptionCode {
    if debug {
        debug!(
            "Illegal data value 0x{:04X}, out of range [0x{:04X}, 0x{:04X}]",
            value, min, max
        );
    }

    ExceptionCode::IllegalDataValue
}

/// Value that must be one of a closed set of enumerators
pub fn illegal_enum_value(value: u16, accepted: &[u16], debug: bool) -> ExceptionCode {
    if debug {
        debug!(
            "Illegal data value 0x{:04X}, out of range {:04X?}",
            value, accepted
        );
    }

    ExceptionCode::IllegalDataValue
}

pub fn identification_not_found(object_id: u8, debug: bool) -> ExceptionCode {
    if debug {
        debug!("Device identification object 0x{:02X} not found", object_id);
    }

    ExceptionCode::IllegalDataAddress
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_wire_values() {
        assert_eq!(ExceptionCode::IllegalFunction.code(), 0x01);
        assert_eq!(ExceptionCode::IllegalDataAddress.code(), 0x02);
        assert_eq!(ExceptionCode::IllegalDataValue.code(), 0x03);
        assert_eq!(ExceptionCode::DeviceFailure.code(), 0x04);
        assert_eq!(ExceptionCode::DeviceBusy.code(), 0x06);
        assert_eq!(ExceptionCode::NegativeAcknowledge.code(), 0x07);
    }

    #[test]
    fn test_descriptions() {
        assert_eq!(describe(0x02), "Illegal Data Address");
        assert_eq!(describe(0x42), "Unknown Exception");
        assert_eq!(
            ExceptionCode::NegativeAcknowledge.to_string(),
            "Negative Acknowledge (0x07)"
        );
    }

    #[test]
    fn test_helpers_return_expected_codes() {
        assert_eq!(illegal_function(0x64, true), ExceptionCode::IllegalFunction);
        assert_eq!(
            illegal_address_range(10, 5, 0, 12, true),
            ExceptionCode::IllegalDataAddress
        );
        assert_eq!(
            illegal_data_range(126, 1, 125, false),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            illegal_enum_value(0x1234, &[0xFF00, 0x0000], true),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            identification_not_found(0x42, false),
            ExceptionCode::IllegalDataAddress
        );
    }
}

//! Modbus/TCP protocol constants
//!
//! Limits follow the Modbus application protocol: every PDU (function code
//! plus data) must fit in 253 bytes, which bounds the per-request quantities.

// ============================================================================
// Frame Size Constants
// ============================================================================

/// MBAP header length as read from the wire
/// Format: Transaction ID(2) + Protocol ID(2) + Length(2) + Unit ID(1) = 7 bytes
pub const MODBUS_MBAP_LENGTH: usize = 7;

/// Maximum PDU (function code + data) size
/// RS485 ADU (256 bytes) - Slave Address (1 byte) - CRC (2 bytes) = 253 bytes
pub const MODBUS_MAX_PDU_LENGTH: usize = 253;

/// Maximum MBAP length field value (Unit ID + PDU)
pub const MODBUS_MAX_MBAP_LENGTH_FIELD: usize = 1 + MODBUS_MAX_PDU_LENGTH;

/// Smallest meaningful length field: unit id + function code
pub const MODBUS_MIN_MBAP_LENGTH_FIELD: usize = 2;

/// Largest TCP ADU: 7 bytes MBAP + 253 bytes PDU
pub const MODBUS_TCP_MAX_ADU_LENGTH: usize = MODBUS_MBAP_LENGTH + MODBUS_MAX_PDU_LENGTH;

/// Protocol identifier carried by every Modbus/TCP frame
pub const MODBUS_PROTOCOL: u16 = 0x0000;

/// Unit identifier used when the TCP peer is addressed directly
pub const MODBUS_TCP_SLAVE: u8 = 0xFF;

/// Default Modbus/TCP port
pub const MODBUS_TCP_DEFAULT_PORT: u16 = 502;

// ============================================================================
// Quantity Limits
// ============================================================================

/// FC01/FC02: 1 + 1 + ceil(N / 8) <= 253, rounded down to 2000 by the standard
pub const MODBUS_MAX_READ_BITS: u16 = 0x07D0;

/// FC15: 1 + 2 + 2 + 1 + ceil(N / 8) <= 253, 1968 per the standard
pub const MODBUS_MAX_WRITE_BITS: u16 = 0x07B0;

/// FC03/FC04: 1 + 1 + 2N <= 253
pub const MODBUS_MAX_READ_REGISTERS: u16 = 125;

/// FC16: 1 + 2 + 2 + 1 + 2N <= 253
pub const MODBUS_MAX_WRITE_REGISTERS: u16 = 123;

/// FC23 read part
pub const MODBUS_MAX_WR_READ_REGISTERS: u16 = 125;

/// FC23 write part: 1 + 2 + 2 + 2 + 2 + 1 + 2N <= 253
pub const MODBUS_MAX_WR_WRITE_REGISTERS: u16 = 121;

/// FC24: a FIFO queue holds at most 31 registers
pub const MODBUS_MAX_FIFO_COUNT: usize = 31;

/// MEI type carried by Read Device Identification requests
pub const MODBUS_MEI_READ_DEVICE_IDENTIFICATION: u8 = 0x0E;

/// MEI type for CANopen general references
pub const MODBUS_MEI_CANOPEN_REFERENCE: u8 = 0x0D;

/// Number of standard device identification objects (0x00-0x06)
pub const MODBUS_STANDARD_IDENTIFICATION_COUNT: u8 = 7;

/// Byte count needed to carry `quantity` packed bits
pub const fn coil_byte_count(quantity: u16) -> usize {
    (quantity as usize).div_ceil(8)
}

/// Byte count needed to carry `quantity` registers
pub const fn register_byte_count(quantity: u16) -> usize {
    quantity as usize * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size_constants() {
        assert_eq!(MODBUS_MBAP_LENGTH, 7);
        assert_eq!(MODBUS_MAX_PDU_LENGTH, 253);
        assert_eq!(MODBUS_MAX_MBAP_LENGTH_FIELD, 254);
        assert_eq!(MODBUS_TCP_MAX_ADU_LENGTH, 260);
    }

    #[test]
    fn test_quantity_limits_fit_pdu() {
        assert!(2 + coil_byte_count(MODBUS_MAX_READ_BITS) <= MODBUS_MAX_PDU_LENGTH);
        assert!(6 + coil_byte_count(MODBUS_MAX_WRITE_BITS) <= MODBUS_MAX_PDU_LENGTH);
        assert!(2 + register_byte_count(MODBUS_MAX_READ_REGISTERS) <= MODBUS_MAX_PDU_LENGTH);
        assert!(6 + register_byte_count(MODBUS_MAX_WRITE_REGISTERS) <= MODBUS_MAX_PDU_LENGTH);
        assert!(10 + register_byte_count(MODBUS_MAX_WR_WRITE_REGISTERS) <= MODBUS_MAX_PDU_LENGTH);
    }

    #[test]
    fn test_byte_counts() {
        assert_eq!(coil_byte_count(1), 1);
        assert_eq!(coil_byte_count(8), 1);
        assert_eq!(coil_byte_count(9), 2);
        assert_eq!(register_byte_count(3), 6);
    }
}

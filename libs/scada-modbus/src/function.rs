//! Modbus function codes as a closed enum
//!
//! Both engines dispatch on this enum so every standard code has an explicit
//! branch; anything else travels as `Other` and is left to private handlers.

use std::fmt;

/// Modbus function code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    ReadExceptionStatus,
    Diagnostic,
    GetComEventCounter,
    GetComEventLog,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    ReportSlaveId,
    ReadFileRecord,
    WriteFileRecord,
    MaskWriteRegister,
    WriteAndReadRegisters,
    ReadFifoQueue,
    EncapsulatedInterface,
    /// User-defined or reserved code
    Other(u8),
}

impl FunctionCode {
    /// Wire value
    pub fn code(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::ReadExceptionStatus => 0x07,
            Self::Diagnostic => 0x08,
            Self::GetComEventCounter => 0x0B,
            Self::GetComEventLog => 0x0C,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::ReportSlaveId => 0x11,
            Self::ReadFileRecord => 0x14,
            Self::WriteFileRecord => 0x15,
            Self::MaskWriteRegister => 0x16,
            Self::WriteAndReadRegisters => 0x17,
            Self::ReadFifoQueue => 0x18,
            Self::EncapsulatedInterface => 0x2B,
            Self::Other(code) => code,
        }
    }

    /// Functions that only make sense on a serial line
    pub fn is_serial_line_only(self) -> bool {
        matches!(
            self,
            Self::ReadExceptionStatus
                | Self::Diagnostic
                | Self::GetComEventCounter
                | Self::GetComEventLog
                | Self::ReportSlaveId
        )
    }
}

impl From<u8> for FunctionCode {
    fn from(code: u8) -> Self {
        match code {
            0x01 => Self::ReadCoils,
            0x02 => Self::ReadDiscreteInputs,
            0x03 => Self::ReadHoldingRegisters,
            0x04 => Self::ReadInputRegisters,
            0x05 => Self::WriteSingleCoil,
            0x06 => Self::WriteSingleRegister,
            0x07 => Self::ReadExceptionStatus,
            0x08 => Self::Diagnostic,
            0x0B => Self::GetComEventCounter,
            0x0C => Self::GetComEventLog,
            0x0F => Self::WriteMultipleCoils,
            0x10 => Self::WriteMultipleRegisters,
            0x11 => Self::ReportSlaveId,
            0x14 => Self::ReadFileRecord,
            0x15 => Self::WriteFileRecord,
            0x16 => Self::MaskWriteRegister,
            0x17 => Self::WriteAndReadRegisters,
            0x18 => Self::ReadFifoQueue,
            0x2B => Self::EncapsulatedInterface,
            other => Self::Other(other),
        }
    }
}

impl From<FunctionCode> for u8 {
    fn from(function: FunctionCode) -> Self {
        function.code()
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping_is_bijective() {
        for code in 0u8..0x80 {
            assert_eq!(FunctionCode::from(code).code(), code);
        }
    }

    #[test]
    fn test_standard_codes() {
        assert_eq!(FunctionCode::from(0x03), FunctionCode::ReadHoldingRegisters);
        assert_eq!(FunctionCode::from(0x17), FunctionCode::WriteAndReadRegisters);
        assert_eq!(FunctionCode::from(0x41), FunctionCode::Other(0x41));
        assert_eq!(u8::from(FunctionCode::MaskWriteRegister), 0x16);
    }

    #[test]
    fn test_serial_line_only() {
        assert!(FunctionCode::Diagnostic.is_serial_line_only());
        assert!(FunctionCode::ReportSlaveId.is_serial_line_only());
        assert!(!FunctionCode::ReadCoils.is_serial_line_only());
        assert!(!FunctionCode::Other(0x41).is_serial_line_only());
    }

    #[test]
    fn test_display() {
        assert_eq!(FunctionCode::WriteMultipleCoils.to_string(), "0x0F");
    }
}

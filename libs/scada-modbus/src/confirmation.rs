//! Client-side confirmation callbacks
//!
//! The client decodes every positive or exception confirmation and hands the
//! result to the `ModbusConfirmation` attached to the originating request.
//! All methods default to no-ops so an application only overrides what it
//! polls for. Callbacks run on the client's receive task with no engine lock
//! held; they may issue new requests.

/// Receiver of decoded confirmations
pub trait ModbusConfirmation: Send + Sync {
    /// Packed coil states, LSB of the first byte is the first coil
    fn on_coils(&self, _transaction_id: u16, _address: u16, _quantity: u16, _status: &[u8]) {}

    fn on_discrete_inputs(
        &self,
        _transaction_id: u16,
        _address: u16,
        _quantity: u16,
        _status: &[u8],
    ) {
    }

    /// Also used for the read part of write/read multiple registers
    fn on_holding_registers(&self, _transaction_id: u16, _address: u16, _registers: &[u16]) {}

    fn on_input_registers(&self, _transaction_id: u16, _address: u16, _registers: &[u16]) {}

    /// Echo of a write: `value` is the written value for single writes and
    /// the quantity for multiple writes
    fn on_echo_response(&self, _transaction_id: u16, _function_code: u8, _address: u16, _value: u16) {}

    fn on_mask_write_response(&self, _transaction_id: u16, _address: u16, _and_mask: u16, _or_mask: u16) {
    }

    /// FIFO queue contents
    fn on_queue_registers(&self, _transaction_id: u16, _address: u16, _registers: &[u16]) {}

    /// Raw data of a confirmation the client has no decoder for
    fn on_private_response(&self, _transaction_id: u16, _function_code: u8, _data: &[u8]) {}

    /// Exception response; `address` is the first word of the request
    fn on_exception(&self, _transaction_id: u16, _function_code: u8, _address: u16, _exception_code: u8) {}

    /// Request dropped without a confirmation because the connection was lost
    fn on_abandoned(&self, _transaction_id: u16, _function_code: u8) {}
}

/// Confirmation sink that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopConfirmation;

impl ModbusConfirmation for NoopConfirmation {}

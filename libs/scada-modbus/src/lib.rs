//! SCADA Modbus/TCP engine
//!
//! Client and server roles for exchanging coil and register data with PLCs
//! over Modbus/TCP.
//!
//! # Architecture
//!
//! - [`codec`] frames ADUs (MBAP header + PDU) on any async byte stream
//! - [`client::ModbusClient`] correlates confirmations to requests by
//!   transaction id, queues requests while offline and reconnects on faults
//! - [`server::ModbusServer`] dispatches the function-code space onto a
//!   [`server::RegisterAccess`] implementation such as [`memory::MemoryRegisters`]
//!
//! Ambient pieces ([`config`], [`logging`]) are shared by the `plcsim` tool.

pub mod client;
pub mod codec;
pub mod config;
pub mod confirmation;
pub mod constants;
pub mod error;
pub mod exception;
pub mod function;
pub mod hex;
pub mod identification;
pub mod logging;
pub mod memory;
pub mod pool;
pub mod server;
pub mod transaction;

pub use client::ModbusClient;
pub use config::{ClientConfig, DeviceIdentification, RetryPolicy, ServerConfig};
pub use confirmation::{ModbusConfirmation, NoopConfirmation};
pub use error::{FrameError, ModbusError, Result};
pub use exception::ExceptionCode;
pub use function::FunctionCode;
pub use memory::MemoryRegisters;
pub use server::{AccessResult, ModbusServer, RegisterAccess};
pub use transaction::{SequenceGenerator, TransactionIdGenerator};

//! Shared helpers for the integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use scada_modbus::codec::{encode_adu, read_header, read_pdu, MbapHeader};
use scada_modbus::constants::MODBUS_MAX_PDU_LENGTH;
use scada_modbus::ModbusConfirmation;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

/// Every callback a confirmation can receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Coils {
        transaction_id: u16,
        address: u16,
        quantity: u16,
        status: Vec<u8>,
    },
    DiscreteInputs {
        transaction_id: u16,
        address: u16,
        quantity: u16,
        status: Vec<u8>,
    },
    HoldingRegisters {
        transaction_id: u16,
        address: u16,
        registers: Vec<u16>,
    },
    InputRegisters {
        transaction_id: u16,
        address: u16,
        registers: Vec<u16>,
    },
    Echo {
        transaction_id: u16,
        function_code: u8,
        address: u16,
        value: u16,
    },
    MaskWrite {
        transaction_id: u16,
        address: u16,
        and_mask: u16,
        or_mask: u16,
    },
    Queue {
        transaction_id: u16,
        address: u16,
        registers: Vec<u16>,
    },
    Private {
        transaction_id: u16,
        function_code: u8,
        data: Vec<u8>,
    },
    Exception {
        transaction_id: u16,
        function_code: u8,
        address: u16,
        exception_code: u8,
    },
    Abandoned {
        transaction_id: u16,
        function_code: u8,
    },
}

/// Confirmation that forwards every callback into a channel
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }

    fn record(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl ModbusConfirmation for Recorder {
    fn on_coils(&self, transaction_id: u16, address: u16, quantity: u16, status: &[u8]) {
        self.record(Event::Coils {
            transaction_id,
            address,
            quantity,
            status: status.to_vec(),
        });
    }

    fn on_discrete_inputs(&self, transaction_id: u16, address: u16, quantity: u16, status: &[u8]) {
        self.record(Event::DiscreteInputs {
            transaction_id,
            address,
            quantity,
            status: status.to_vec(),
        });
    }

    fn on_holding_registers(&self, transaction_id: u16, address: u16, registers: &[u16]) {
        self.record(Event::HoldingRegisters {
            transaction_id,
            address,
            registers: registers.to_vec(),
        });
    }

    fn on_input_registers(&self, transaction_id: u16, address: u16, registers: &[u16]) {
        self.record(Event::InputRegisters {
            transaction_id,
            address,
            registers: registers.to_vec(),
        });
    }

    fn on_echo_response(&self, transaction_id: u16, function_code: u8, address: u16, value: u16) {
        self.record(Event::Echo {
            transaction_id,
            function_code,
            address,
            value,
        });
    }

    fn on_mask_write_response(&self, transaction_id: u16, address: u16, and_mask: u16, or_mask: u16) {
        self.record(Event::MaskWrite {
            transaction_id,
            address,
            and_mask,
            or_mask,
        });
    }

    fn on_queue_registers(&self, transaction_id: u16, address: u16, registers: &[u16]) {
        self.record(Event::Queue {
            transaction_id,
            address,
            registers: registers.to_vec(),
        });
    }

    fn on_private_response(&self, transaction_id: u16, function_code: u8, data: &[u8]) {
        self.record(Event::Private {
            transaction_id,
            function_code,
            data: data.to_vec(),
        });
    }

    fn on_exception(&self, transaction_id: u16, function_code: u8, address: u16, exception_code: u8) {
        self.record(Event::Exception {
            transaction_id,
            function_code,
            address,
            exception_code,
        });
    }

    fn on_abandoned(&self, transaction_id: u16, function_code: u8) {
        self.record(Event::Abandoned {
            transaction_id,
            function_code,
        });
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a confirmation")
        .expect("recorder channel closed")
}

/// Read one ADU, returning the header and the PDU (function code first)
pub async fn read_adu(stream: &mut TcpStream) -> (MbapHeader, Vec<u8>) {
    let mut pdu = [0u8; MODBUS_MAX_PDU_LENGTH];
    let header = tokio::time::timeout(WAIT, read_header(stream))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    let size = read_pdu(stream, &header, &mut pdu).await.unwrap();
    (header, pdu[..size].to_vec())
}

/// Write one ADU with arbitrary header fields
pub async fn write_adu(
    stream: &mut TcpStream,
    transaction_id: u16,
    protocol_id: u16,
    unit_id: u8,
    function_code: u8,
    data: &[u8],
) {
    let mut frame = BytesMut::new();
    encode_adu(&mut frame, transaction_id, protocol_id, unit_id, function_code, data);
    stream.write_all(&frame).await.unwrap();
}

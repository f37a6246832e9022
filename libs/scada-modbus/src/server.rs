//! Modbus/TCP server engine
//!
//! The server owns the wire: it accepts peers, frames requests, validates
//! quantities and byte counts, and encodes replies. Register storage lives
//! behind [`RegisterAccess`], so a PLC image, a simulator or a test double can
//! be plugged in without touching the protocol code.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{encode_adu, encode_exception_adu, read_header, read_pdu, PduReader};
use crate::config::ServerConfig;
use crate::constants::{
    coil_byte_count, register_byte_count, MODBUS_MAX_FIFO_COUNT, MODBUS_MAX_PDU_LENGTH,
    MODBUS_MAX_READ_BITS, MODBUS_MAX_READ_REGISTERS, MODBUS_MAX_WRITE_BITS,
    MODBUS_MAX_WRITE_REGISTERS, MODBUS_MAX_WR_READ_REGISTERS, MODBUS_MAX_WR_WRITE_REGISTERS,
    MODBUS_MEI_CANOPEN_REFERENCE, MODBUS_MEI_READ_DEVICE_IDENTIFICATION, MODBUS_PROTOCOL,
    MODBUS_TCP_MAX_ADU_LENGTH,
};
use crate::error::{FrameError, ModbusError, Result};
use crate::exception::{self, ExceptionCode};
use crate::function::FunctionCode;
use crate::hex;
use crate::identification::IdentificationCatalog;

/// Outcome of a storage operation, an exception code on rejection
pub type AccessResult<T = ()> = std::result::Result<T, ExceptionCode>;

/// Storage behind a Modbus server
///
/// Addresses are raw protocol addresses. Implementations reject addresses
/// they do not hold with [`ExceptionCode::IllegalDataAddress`]; quantities
/// and byte counts have already been validated by the server.
pub trait RegisterAccess: Send + Sync {
    /// Fill `status` (already zeroed, `ceil(quantity / 8)` bytes) with packed coils
    fn read_coils(&self, address: u16, quantity: u16, status: &mut [u8]) -> AccessResult;

    fn read_discrete_inputs(&self, address: u16, quantity: u16, status: &mut [u8]) -> AccessResult;

    fn read_holding_registers(&self, address: u16, registers: &mut [u16]) -> AccessResult;

    fn read_input_registers(&self, address: u16, registers: &mut [u16]) -> AccessResult;

    fn write_coil(&self, address: u16, value: bool) -> AccessResult;

    fn write_register(&self, address: u16, value: u16) -> AccessResult;

    fn write_coils(&self, address: u16, quantity: u16, status: &[u8]) -> AccessResult;

    fn write_registers(&self, address: u16, registers: &[u16]) -> AccessResult;

    /// `register = (register & and_mask) | (or_mask & !and_mask)`
    fn mask_write_register(&self, address: u16, and_mask: u16, or_mask: u16) -> AccessResult;

    /// The write is performed before the read
    fn write_read_registers(
        &self,
        write_address: u16,
        written: &[u16],
        read_address: u16,
        read: &mut [u16],
    ) -> AccessResult;

    /// Append the FIFO queue at `address` to `queue`
    fn read_fifo_queue(&self, address: u16, queue: &mut Vec<u16>) -> AccessResult;

    /// Serve a function code the server has no handler for
    ///
    /// Returns the number of bytes written to `response`.
    fn do_private_function(
        &self,
        _function_code: u8,
        _request: &[u8],
        _response: &mut [u8],
    ) -> AccessResult<usize> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Device identification objects 0x07 and above
    fn access_private_device_identification(&self, _object_id: u8) -> Option<String> {
        None
    }
}

/// State shared by the accept loop and every connection task
struct ServerShared {
    access: Arc<dyn RegisterAccess>,
    catalog: IdentificationCatalog,
    unit_id: u8,
    debug: AtomicBool,
    connections: Mutex<HashMap<u64, SocketAddr>>,
    next_connection: AtomicU64,
}

/// Modbus/TCP server
pub struct ModbusServer {
    config: ServerConfig,
    shared: Arc<ServerShared>,
    cancel: CancellationToken,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ModbusServer {
    pub fn new(config: ServerConfig, access: Arc<dyn RegisterAccess>) -> Self {
        let shared = ServerShared {
            access,
            catalog: IdentificationCatalog::from(&config.identification),
            unit_id: config.unit_id,
            debug: AtomicBool::new(config.debug),
            connections: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
        };

        Self {
            config,
            shared: Arc::new(shared),
            cancel: CancellationToken::new(),
            accept_task: Mutex::new(None),
        }
    }

    /// Bind and start accepting peers, returning the bound address
    pub async fn listen(&self) -> Result<SocketAddr> {
        if self.accept_task.lock().is_some() {
            return Err(ModbusError::connection("server is already listening"));
        }

        let address = self.config.address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ModbusError::connection(format!("Failed to bind to {}: {}", address, e)))?;
        let local = listener.local_addr()?;
        info!("Modbus server listening on {}", local);

        let shared = Arc::clone(&self.shared);
        let token = self.cancel.clone();
        let handle = tokio::spawn(accept_loop(listener, shared, token));

        let mut slot = self.accept_task.lock();
        if slot.is_some() {
            handle.abort();
            return Err(ModbusError::connection("server is already listening"));
        }
        *slot = Some(handle);

        Ok(local)
    }

    /// Stop accepting and close every connection
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!("Modbus server shutting down");
        }
        self.cancel.cancel();
    }

    pub fn enable_debug(&self, on_or_off: bool) {
        self.shared.debug.store(on_or_off, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.shared.debug.load(Ordering::Relaxed)
    }

    /// Peers currently being served
    pub fn connection_count(&self) -> usize {
        self.shared.connections.lock().len()
    }

    pub fn peers(&self) -> Vec<SocketAddr> {
        self.shared.connections.lock().values().copied().collect()
    }

    /// Dispatch one request body
    ///
    /// `request` starts after the function code. On success the response data
    /// (after the function code) is in `response` and its length is returned.
    pub fn process(
        &self,
        function_code: u8,
        request: &mut PduReader<'_>,
        response: &mut [u8],
    ) -> AccessResult<usize> {
        self.shared.process(function_code, request, response)
    }
}

impl Drop for ModbusServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<ServerShared>, token: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let id = shared.next_connection.fetch_add(1, Ordering::Relaxed);
                shared.connections.lock().insert(id, peer);
                info!("Modbus client connected from {}", peer);

                let shared = Arc::clone(&shared);
                let child = token.child_token();
                tokio::spawn(async move {
                    serve_connection(&shared, stream, peer, child).await;
                    shared.connections.lock().remove(&id);
                });
            },
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            },
        }
    }

    debug!("Modbus accept loop stopped");
}

/// Receive, dispatch and reply until the peer leaves or a frame is unusable
async fn serve_connection(
    shared: &ServerShared,
    stream: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
) {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let mut pdu = [0u8; MODBUS_MAX_PDU_LENGTH];
    let mut response = [0u8; MODBUS_MAX_PDU_LENGTH - 1];
    let mut frame = BytesMut::with_capacity(MODBUS_TCP_MAX_ADU_LENGTH);

    loop {
        let header = tokio::select! {
            _ = token.cancelled() => {
                debug!("Cancel dealing with requests from {}", peer);
                break;
            },
            header = read_header(&mut reader) => header,
        };

        let header = match header {
            Ok(header) => header,
            Err(FrameError::Disconnected) => {
                info!("{} has disconnected", peer);
                break;
            },
            Err(e) => {
                warn!("Invalid frame from {}: {}", peer, e);
                break;
            },
        };

        let size = match read_pdu(&mut reader, &header, &mut pdu).await {
            Ok(size) => size,
            Err(e) => {
                warn!("Invalid frame from {}: {}", peer, e);
                break;
            },
        };

        let debug = shared.debug.load(Ordering::Relaxed);
        let function_code = pdu[0];
        if debug {
            debug!(
                "Received ADU indication({}, {}, {}, {}) for function 0x{:02X} from {}",
                header.transaction_id,
                header.protocol_id,
                header.length,
                header.unit_id,
                function_code,
                peer
            );
        }

        let mut request = PduReader::new(&pdu[1..size]);
        let result = if header.protocol_id == MODBUS_PROTOCOL && header.unit_id == shared.unit_id {
            shared.process(function_code, &mut request, &mut response)
        } else {
            if debug {
                debug!(
                    "Rejecting request for protocol {} unit 0x{:02X}",
                    header.protocol_id, header.unit_id
                );
            }
            Err(ExceptionCode::NegativeAcknowledge)
        };

        frame.clear();
        match result {
            Ok(length) => encode_adu(
                &mut frame,
                header.transaction_id,
                header.protocol_id,
                header.unit_id,
                function_code,
                &response[..length],
            ),
            Err(exception) => {
                if debug {
                    debug!("Function 0x{:02X} answered with {}", function_code, exception);
                }
                encode_exception_adu(
                    &mut frame,
                    header.transaction_id,
                    header.protocol_id,
                    header.unit_id,
                    function_code,
                    exception,
                );
            },
        }

        let dirty = request.discard_remaining();
        if dirty > 0 && debug {
            debug!("{} byte(s) from {} have been discarded", dirty, peer);
        }

        if let Err(e) = writer.write_all(&frame).await {
            warn!("Failed to reply to {}: {}", peer, e);
            break;
        }
        if debug {
            debug!("Sent {} bytes to {}: {}", frame.len(), peer, hex::format_adu(&frame));
        }
    }
}

/// Body shorter than the function requires
fn truncated(function_code: u8, debug: bool) -> ExceptionCode {
    if debug {
        debug!("Request body for function 0x{:02X} is too short", function_code);
    }
    ExceptionCode::IllegalDataValue
}

fn check_quantity(quantity: u16, max: u16, debug: bool) -> AccessResult {
    if quantity < 1 || quantity > max {
        return Err(exception::illegal_data_range(quantity, 1, max, debug));
    }
    Ok(())
}

fn check_count(count: u8, expected: usize, debug: bool) -> AccessResult {
    if count as usize != expected {
        return Err(exception::illegal_data_value(u16::from(count), expected as u16, debug));
    }
    Ok(())
}

fn echo(response: &mut [u8], words: &[u16]) -> usize {
    for (i, word) in words.iter().enumerate() {
        response[i * 2..i * 2 + 2].copy_from_slice(&word.to_be_bytes());
    }
    words.len() * 2
}

fn put_registers(response: &mut [u8], registers: &[u16]) -> usize {
    response[0] = register_byte_count(registers.len() as u16) as u8;
    1 + echo(&mut response[1..], registers)
}

fn words(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

impl ServerShared {
    fn process(
        &self,
        function_code: u8,
        request: &mut PduReader<'_>,
        response: &mut [u8],
    ) -> AccessResult<usize> {
        let debug = self.debug.load(Ordering::Relaxed);
        let short = |_: FrameError| truncated(function_code, debug);
        let access = self.access.as_ref();

        match FunctionCode::from(function_code) {
            function @ (FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs) => {
                let address = request.read_u16().map_err(short)?;
                let quantity = request.read_u16().map_err(short)?;
                check_quantity(quantity, MODBUS_MAX_READ_BITS, debug)?;

                let count = coil_byte_count(quantity);
                let status = &mut response[1..1 + count];
                status.fill(0);
                if function == FunctionCode::ReadCoils {
                    access.read_coils(address, quantity, status)?;
                } else {
                    access.read_discrete_inputs(address, quantity, status)?;
                }
                response[0] = count as u8;
                Ok(1 + count)
            },
            function @ (FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters) => {
                let address = request.read_u16().map_err(short)?;
                let quantity = request.read_u16().map_err(short)?;
                check_quantity(quantity, MODBUS_MAX_READ_REGISTERS, debug)?;

                let mut registers = [0u16; MODBUS_MAX_READ_REGISTERS as usize];
                let registers = &mut registers[..quantity as usize];
                if function == FunctionCode::ReadHoldingRegisters {
                    access.read_holding_registers(address, registers)?;
                } else {
                    access.read_input_registers(address, registers)?;
                }
                Ok(put_registers(response, registers))
            },
            FunctionCode::WriteSingleCoil => {
                let address = request.read_u16().map_err(short)?;
                let value = request.read_u16().map_err(short)?;
                match value {
                    0xFF00 => access.write_coil(address, true)?,
                    0x0000 => access.write_coil(address, false)?,
                    _ => return Err(exception::illegal_enum_value(value, &[0xFF00, 0x0000], debug)),
                }
                Ok(echo(response, &[address, value]))
            },
            FunctionCode::WriteSingleRegister => {
                let address = request.read_u16().map_err(short)?;
                let value = request.read_u16().map_err(short)?;
                access.write_register(address, value)?;
                Ok(echo(response, &[address, value]))
            },
            FunctionCode::WriteMultipleCoils => {
                let address = request.read_u16().map_err(short)?;
                let quantity = request.read_u16().map_err(short)?;
                let count = request.read_u8().map_err(short)?;
                let status = request.read_bytes(count as usize).map_err(short)?;

                check_quantity(quantity, MODBUS_MAX_WRITE_BITS, debug)?;
                check_count(count, coil_byte_count(quantity), debug)?;
                access.write_coils(address, quantity, status)?;
                Ok(echo(response, &[address, quantity]))
            },
            FunctionCode::WriteMultipleRegisters => {
                let address = request.read_u16().map_err(short)?;
                let quantity = request.read_u16().map_err(short)?;
                let count = request.read_u8().map_err(short)?;
                let data = request.read_bytes(count as usize).map_err(short)?;

                check_quantity(quantity, MODBUS_MAX_WRITE_REGISTERS, debug)?;
                check_count(count, register_byte_count(quantity), debug)?;
                access.write_registers(address, &words(data))?;
                Ok(echo(response, &[address, quantity]))
            },
            FunctionCode::MaskWriteRegister => {
                let address = request.read_u16().map_err(short)?;
                let and_mask = request.read_u16().map_err(short)?;
                let or_mask = request.read_u16().map_err(short)?;
                access.mask_write_register(address, and_mask, or_mask)?;
                Ok(echo(response, &[address, and_mask, or_mask]))
            },
            FunctionCode::WriteAndReadRegisters => {
                let read_address = request.read_u16().map_err(short)?;
                let read_quantity = request.read_u16().map_err(short)?;
                let write_address = request.read_u16().map_err(short)?;
                let write_quantity = request.read_u16().map_err(short)?;
                let count = request.read_u8().map_err(short)?;
                let data = request.read_bytes(count as usize).map_err(short)?;

                check_quantity(read_quantity, MODBUS_MAX_WR_READ_REGISTERS, debug)?;
                check_quantity(write_quantity, MODBUS_MAX_WR_WRITE_REGISTERS, debug)?;
                check_count(count, register_byte_count(write_quantity), debug)?;

                let mut registers = [0u16; MODBUS_MAX_WR_READ_REGISTERS as usize];
                let registers = &mut registers[..read_quantity as usize];
                access.write_read_registers(write_address, &words(data), read_address, registers)?;
                Ok(put_registers(response, registers))
            },
            FunctionCode::ReadFifoQueue => {
                let address = request.read_u16().map_err(short)?;
                let mut queue = Vec::with_capacity(MODBUS_MAX_FIFO_COUNT);
                access.read_fifo_queue(address, &mut queue)?;

                if queue.len() > MODBUS_MAX_FIFO_COUNT {
                    return Err(exception::illegal_data_range(
                        queue.len() as u16,
                        0,
                        MODBUS_MAX_FIFO_COUNT as u16,
                        debug,
                    ));
                }

                let count = queue.len() as u16;
                let byte_count = register_byte_count(count) as u16 + 2;
                let header = echo(response, &[byte_count, count]);
                Ok(header + echo(&mut response[header..], &queue))
            },
            FunctionCode::ReadFileRecord | FunctionCode::WriteFileRecord => {
                Err(ExceptionCode::DeviceFailure)
            },
            function if function.is_serial_line_only() => {
                if debug {
                    debug!("Function {} is serial line only", function);
                }
                Err(ExceptionCode::NegativeAcknowledge)
            },
            FunctionCode::EncapsulatedInterface => {
                let mei_type = request.read_u8().map_err(short)?;
                match mei_type {
                    MODBUS_MEI_READ_DEVICE_IDENTIFICATION => {
                        let read_code = request.read_u8().map_err(short)?;
                        let object_id = request.read_u8().map_err(short)?;
                        self.catalog.respond(
                            read_code,
                            object_id,
                            |id| access.access_private_device_identification(id),
                            response,
                            debug,
                        )
                    },
                    MODBUS_MEI_CANOPEN_REFERENCE => Err(ExceptionCode::DeviceBusy),
                    other => Err(exception::illegal_enum_value(
                        u16::from(other),
                        &[
                            u16::from(MODBUS_MEI_CANOPEN_REFERENCE),
                            u16::from(MODBUS_MEI_READ_DEVICE_IDENTIFICATION),
                        ],
                        debug,
                    )),
                }
            },
            _ => {
                let data = request.read_remaining();
                let used = access
                    .do_private_function(function_code, data, response)
                    .map_err(|e| match e {
                        ExceptionCode::IllegalFunction => {
                            exception::illegal_function(function_code, debug)
                        },
                        other => other,
                    })?;
                if used > response.len() {
                    error!(
                        "Private function 0x{:02X} reported {} bytes for a {} byte response",
                        function_code,
                        used,
                        response.len()
                    );
                    return Err(ExceptionCode::DeviceFailure);
                }
                Ok(used)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::memory::MemoryRegisters;
    use tracing_test::traced_test;

    fn server() -> ModbusServer {
        let bank = MemoryRegisters::new(0, 64, 0, 64);
        ModbusServer::new(ServerConfig::default(), Arc::new(bank))
    }

    fn call(server: &ModbusServer, function_code: u8, body: &[u8]) -> AccessResult<Vec<u8>> {
        let mut response = [0u8; MODBUS_MAX_PDU_LENGTH - 1];
        let mut reader = PduReader::new(body);
        let size = server.process(function_code, &mut reader, &mut response)?;
        Ok(response[..size].to_vec())
    }

    #[test]
    fn test_write_then_read_registers() {
        let server = server();
        let echo = call(&server, 0x10, &[0x00, 0x10, 0x00, 0x03, 0x06, 0, 1, 0, 2, 0, 3]).unwrap();
        assert_eq!(echo, vec![0x00, 0x10, 0x00, 0x03]);

        let read = call(&server, 0x03, &[0x00, 0x10, 0x00, 0x03]).unwrap();
        assert_eq!(read, vec![6, 0, 1, 0, 2, 0, 3]);
    }

    #[test]
    fn test_read_quantity_limits() {
        let server = ModbusServer::new(
            ServerConfig::default(),
            Arc::new(MemoryRegisters::new(0, 256, 0, 256)),
        );
        assert_eq!(
            call(&server, 0x03, &[0x00, 0x00, 0x00, 126]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            call(&server, 0x03, &[0x00, 0x00, 0x00, 0x00]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        let read = call(&server, 0x03, &[0x00, 0x00, 0x00, 125]).unwrap();
        assert_eq!(read.len(), 251);
        assert_eq!(read[0], 250);
    }

    #[test]
    fn test_write_single_coil_values() {
        let server = server();
        assert_eq!(
            call(&server, 0x05, &[0x00, 0x03, 0xFF, 0x00]).unwrap(),
            vec![0x00, 0x03, 0xFF, 0x00]
        );
        assert_eq!(
            call(&server, 0x05, &[0x00, 0x03, 0x12, 0x34]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(call(&server, 0x01, &[0x00, 0x00, 0x00, 0x08]).unwrap(), vec![1, 0x08]);
    }

    #[test]
    fn test_write_multiple_coils_byte_count() {
        let server = server();
        assert_eq!(
            call(&server, 0x0F, &[0x00, 0x00, 0x00, 0x0A, 0x01, 0xFF]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
        assert_eq!(
            call(&server, 0x0F, &[0x00, 0x00, 0x00, 0x0A, 0x02, 0xCD, 0x01]).unwrap(),
            vec![0x00, 0x00, 0x00, 0x0A]
        );
        assert_eq!(call(&server, 0x01, &[0x00, 0x00, 0x00, 0x0A]).unwrap(), vec![2, 0xCD, 0x01]);
    }

    #[test]
    fn test_mask_write_and_write_read() {
        let server = server();
        call(&server, 0x06, &[0x00, 0x04, 0x00, 0x12]).unwrap();
        assert_eq!(
            call(&server, 0x16, &[0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]).unwrap(),
            vec![0x00, 0x04, 0x00, 0xF2, 0x00, 0x25]
        );
        assert_eq!(call(&server, 0x03, &[0x00, 0x04, 0x00, 0x01]).unwrap(), vec![2, 0x00, 0x17]);

        let read = call(
            &server,
            0x17,
            &[0x00, 0x04, 0x00, 0x02, 0x00, 0x05, 0x00, 0x01, 0x02, 0xAB, 0xCD],
        )
        .unwrap();
        assert_eq!(read, vec![4, 0x00, 0x17, 0xAB, 0xCD]);
    }

    #[test]
    fn test_fifo_queue() {
        let bank = Arc::new(MemoryRegisters::new(0, 8, 0, 8));
        bank.set_fifo_queue(0x04DE, vec![0x01B8, 0x1284]);
        let server = ModbusServer::new(ServerConfig::default(), bank.clone());

        assert_eq!(
            call(&server, 0x18, &[0x04, 0xDE]).unwrap(),
            vec![0x00, 0x06, 0x00, 0x02, 0x01, 0xB8, 0x12, 0x84]
        );

        bank.set_fifo_queue(0x04DE, vec![0; 32]);
        assert_eq!(
            call(&server, 0x18, &[0x04, 0xDE]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn test_unsupported_functions() {
        let server = server();
        assert_eq!(call(&server, 0x14, &[]).unwrap_err(), ExceptionCode::DeviceFailure);
        assert_eq!(call(&server, 0x08, &[0, 0]).unwrap_err(), ExceptionCode::NegativeAcknowledge);
        assert_eq!(call(&server, 0x11, &[]).unwrap_err(), ExceptionCode::NegativeAcknowledge);
        assert_eq!(call(&server, 0x2B, &[0x0D]).unwrap_err(), ExceptionCode::DeviceBusy);
        assert_eq!(call(&server, 0x2B, &[0x0C]).unwrap_err(), ExceptionCode::IllegalDataValue);
        assert_eq!(call(&server, 0x41, &[1, 2, 3]).unwrap_err(), ExceptionCode::IllegalFunction);
    }

    #[test]
    fn test_short_body_is_illegal_value() {
        let server = server();
        assert_eq!(call(&server, 0x03, &[0x00]).unwrap_err(), ExceptionCode::IllegalDataValue);
        assert_eq!(
            call(&server, 0x10, &[0x00, 0x00, 0x00, 0x02, 0x04, 0x00]).unwrap_err(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn test_address_out_of_range() {
        let server = server();
        assert_eq!(
            call(&server, 0x03, &[0x00, 0x3F, 0x00, 0x02]).unwrap_err(),
            ExceptionCode::IllegalDataAddress
        );
    }

    #[test]
    fn test_device_identification_dispatch() {
        let server = server();
        let response = call(&server, 0x2B, &[0x0E, 0x01, 0x00]).unwrap();
        assert_eq!(&response[..6], &[0x0E, 0x01, 0x01, 0x00, 0x00, 3]);
        assert_eq!(response[6], 0x00);
        assert_eq!(&response[8..8 + response[7] as usize], b"SCADA");
    }

    #[test]
    #[traced_test]
    fn test_unhandled_private_function_is_traced() {
        let server = server();
        server.enable_debug(true);
        assert_eq!(call(&server, 0x41, &[1]).unwrap_err(), ExceptionCode::IllegalFunction);
        assert!(logs_contain("Unknown function code 0x41"));
    }
}

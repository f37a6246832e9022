//! Modbus/TCP client engine
//!
//! Requests are fire-and-forget: every operation returns the transaction id
//! immediately and the decoded confirmation arrives later through the
//! request's [`ModbusConfirmation`]. Requests issued while the link is down
//! are queued and replayed in order once a connection is established.
//!
//! One supervisor task per client owns the socket. Each session splits the
//! stream; the writer drains an unbounded channel (so wire order is
//! submission order) while the reader matches confirmations against the
//! pending set. Any transport fault tears the session down and the supervisor
//! reconnects according to the configured [`RetryPolicy`](crate::config::RetryPolicy).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::{encode_adu, read_header, read_pdu, MbapHeader, PduReader};
use crate::config::ClientConfig;
use crate::confirmation::ModbusConfirmation;
use crate::constants::{
    coil_byte_count, MODBUS_MAX_PDU_LENGTH, MODBUS_MAX_READ_BITS, MODBUS_MAX_READ_REGISTERS,
    MODBUS_MAX_WRITE_BITS, MODBUS_MAX_WRITE_REGISTERS, MODBUS_MAX_WR_READ_REGISTERS,
    MODBUS_MAX_WR_WRITE_REGISTERS, MODBUS_PROTOCOL, MODBUS_TCP_MAX_ADU_LENGTH,
};
use crate::error::{FrameError, ModbusError, Result};
use crate::function::FunctionCode;
use crate::hex;
use crate::pool::{BufferPool, PduBuffer};
use crate::transaction::{SequenceGenerator, TransactionIdGenerator};

/// Ids drawn per request before giving up on finding one not in flight
const MAX_ID_DRAWS: usize = 16;

/// A session lasting this long counts as healthy even without confirmations
const STABLE_SESSION: Duration = Duration::from_secs(5);

/// One request waiting for its confirmation
struct Transaction {
    transaction_id: u16,
    function_code: u8,
    pdu: PduBuffer,
    confirmation: Arc<dyn ModbusConfirmation>,
}

/// Encoded frame handed to the writer
struct Outbound {
    transaction_id: u16,
    frame: Bytes,
}

struct ClientState {
    generator: Box<dyn TransactionIdGenerator>,
    pool: BufferPool,
    /// Handed to the writer, waiting for a confirmation
    pending: HashMap<u16, Transaction>,
    /// Waiting for a connection, in submission order
    blocking: VecDeque<Transaction>,
    /// Present while a session is up
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl ClientState {
    fn encode(&self, transaction: &Transaction, unit_id: u8) -> Bytes {
        let mut frame = BytesMut::with_capacity(MODBUS_TCP_MAX_ADU_LENGTH);
        encode_adu(
            &mut frame,
            transaction.transaction_id,
            MODBUS_PROTOCOL,
            unit_id,
            transaction.function_code,
            transaction.pdu.as_slice(),
        );
        frame.freeze()
    }

    /// Hand a transaction to the writer, or park it until the next session
    fn dispatch(&mut self, transaction: Transaction, unit_id: u8) {
        let Some(outbound) = self.outbound.clone() else {
            self.blocking.push_back(transaction);
            return;
        };

        let transaction_id = transaction.transaction_id;
        let frame = self.encode(&transaction, unit_id);
        self.pending.insert(transaction_id, transaction);

        if outbound
            .send(Outbound {
                transaction_id,
                frame,
            })
            .is_err()
        {
            self.requeue(transaction_id);
        }
    }

    fn in_flight(&self, transaction_id: u16) -> bool {
        self.pending.contains_key(&transaction_id)
            || self
                .blocking
                .iter()
                .any(|transaction| transaction.transaction_id == transaction_id)
    }

    /// Next generator id that no pending or queued transaction holds
    fn next_free_id(&mut self) -> Result<u16> {
        let mut last = 0;
        for _ in 0..MAX_ID_DRAWS {
            let transaction_id = self.generator.next_id();
            if !self.in_flight(transaction_id) {
                return Ok(transaction_id);
            }
            last = transaction_id;
        }
        Err(ModbusError::TransactionIdInUse(last))
    }

    /// Move a pending transaction back to the blocking queue
    fn requeue(&mut self, transaction_id: u16) {
        if let Some(transaction) = self.pending.remove(&transaction_id) {
            self.blocking.push_back(transaction);
        }
    }
}

struct ClientInner {
    config: ClientConfig,
    confirmation: Arc<dyn ModbusConfirmation>,
    debug: AtomicBool,
    connected: AtomicBool,
    state: Mutex<ClientState>,
}

/// Modbus/TCP client
pub struct ModbusClient {
    inner: Arc<ClientInner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ModbusClient {
    /// Client with the default sequence generator starting at
    /// `config.transaction_start`
    pub fn new(config: ClientConfig, confirmation: Arc<dyn ModbusConfirmation>) -> Self {
        let generator = Box::new(SequenceGenerator::new(config.transaction_start));
        Self::with_generator(config, confirmation, generator)
    }

    pub fn with_generator(
        config: ClientConfig,
        confirmation: Arc<dyn ModbusConfirmation>,
        generator: Box<dyn TransactionIdGenerator>,
    ) -> Self {
        let debug = config.debug;
        let state = ClientState {
            generator,
            pool: BufferPool::new(),
            pending: HashMap::new(),
            blocking: VecDeque::new(),
            outbound: None,
        };

        Self {
            inner: Arc::new(ClientInner {
                config,
                confirmation,
                debug: AtomicBool::new(debug),
                connected: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Start the connection supervisor; later calls are no-ops
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) -> Result<()> {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ModbusError::connection(format!("No tokio runtime: {}", e)))?;
        let inner = Arc::clone(&self.inner);
        *supervisor = Some(runtime.spawn(supervise(inner)));
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    pub fn enable_debug(&self, on_or_off: bool) {
        self.inner.debug.store(on_or_off, Ordering::Relaxed);
    }

    pub fn debug_enabled(&self) -> bool {
        self.inner.debug.load(Ordering::Relaxed)
    }

    /// Requests sent and not yet confirmed
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Requests waiting for a connection
    pub fn blocking_count(&self) -> usize {
        self.inner.state.lock().blocking.len()
    }

    /// Issue a raw request; `data` is the PDU without the function code
    pub fn request(&self, function_code: u8, data: &[u8]) -> Result<u16> {
        self.request_with(function_code, data, Arc::clone(&self.inner.confirmation))
    }

    /// Like [`request`](Self::request) with a confirmation for this request only
    pub fn request_with(
        &self,
        function_code: u8,
        data: &[u8],
        confirmation: Arc<dyn ModbusConfirmation>,
    ) -> Result<u16> {
        if data.len() + 1 > MODBUS_MAX_PDU_LENGTH {
            return Err(ModbusError::PduOverflow {
                needed: data.len() + 1,
                available: MODBUS_MAX_PDU_LENGTH,
            });
        }
        self.submit(function_code, confirmation, |pdu| pdu.put_slice(data))
    }

    pub fn read_coils(&self, address: u16, quantity: u16) -> Result<u16> {
        check_quantity("coil", quantity, MODBUS_MAX_READ_BITS)?;
        self.submit_default(FunctionCode::ReadCoils, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(quantity)
        })
    }

    pub fn read_discrete_inputs(&self, address: u16, quantity: u16) -> Result<u16> {
        check_quantity("discrete input", quantity, MODBUS_MAX_READ_BITS)?;
        self.submit_default(FunctionCode::ReadDiscreteInputs, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(quantity)
        })
    }

    pub fn read_holding_registers(&self, address: u16, quantity: u16) -> Result<u16> {
        check_quantity("holding register", quantity, MODBUS_MAX_READ_REGISTERS)?;
        self.submit_default(FunctionCode::ReadHoldingRegisters, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(quantity)
        })
    }

    pub fn read_input_registers(&self, address: u16, quantity: u16) -> Result<u16> {
        check_quantity("input register", quantity, MODBUS_MAX_READ_REGISTERS)?;
        self.submit_default(FunctionCode::ReadInputRegisters, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(quantity)
        })
    }

    pub fn write_coil(&self, address: u16, value: bool) -> Result<u16> {
        self.submit_default(FunctionCode::WriteSingleCoil, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(if value { 0xFF00 } else { 0x0000 })
        })
    }

    pub fn write_register(&self, address: u16, value: u16) -> Result<u16> {
        self.submit_default(FunctionCode::WriteSingleRegister, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(value)
        })
    }

    /// `status` holds packed coils, LSB first; only the bytes covering
    /// `quantity` are sent
    pub fn write_coils(&self, address: u16, quantity: u16, status: &[u8]) -> Result<u16> {
        check_quantity("coil", quantity, MODBUS_MAX_WRITE_BITS)?;
        let count = coil_byte_count(quantity);
        if status.len() < count {
            return Err(ModbusError::invalid_argument(format!(
                "{} coils need {} status bytes, {} given",
                quantity,
                count,
                status.len()
            )));
        }

        self.submit_default(FunctionCode::WriteMultipleCoils, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(quantity)?;
            pdu.put_u8(count as u8)?;
            pdu.put_slice(&status[..count])
        })
    }

    pub fn write_registers(&self, address: u16, registers: &[u16]) -> Result<u16> {
        let quantity = register_quantity(registers)?;
        check_quantity("holding register", quantity, MODBUS_MAX_WRITE_REGISTERS)?;

        self.submit_default(FunctionCode::WriteMultipleRegisters, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(quantity)?;
            pdu.put_u8((quantity * 2) as u8)?;
            pdu.put_u16_words(registers)
        })
    }

    pub fn mask_write_register(&self, address: u16, and_mask: u16, or_mask: u16) -> Result<u16> {
        self.submit_default(FunctionCode::MaskWriteRegister, |pdu| {
            pdu.put_u16(address)?;
            pdu.put_u16(and_mask)?;
            pdu.put_u16(or_mask)
        })
    }

    /// Write `registers` at `write_address`, then read `read_quantity`
    /// registers from `read_address`
    pub fn write_read_registers(
        &self,
        write_address: u16,
        registers: &[u16],
        read_address: u16,
        read_quantity: u16,
    ) -> Result<u16> {
        let write_quantity = register_quantity(registers)?;
        check_quantity("read register", read_quantity, MODBUS_MAX_WR_READ_REGISTERS)?;
        check_quantity("write register", write_quantity, MODBUS_MAX_WR_WRITE_REGISTERS)?;

        self.submit_default(FunctionCode::WriteAndReadRegisters, |pdu| {
            pdu.put_u16(read_address)?;
            pdu.put_u16(read_quantity)?;
            pdu.put_u16(write_address)?;
            pdu.put_u16(write_quantity)?;
            pdu.put_u8((write_quantity * 2) as u8)?;
            pdu.put_u16_words(registers)
        })
    }

    pub fn read_queues(&self, address: u16) -> Result<u16> {
        self.submit_default(FunctionCode::ReadFifoQueue, |pdu| pdu.put_u16(address))
    }

    /// User-defined function; the confirmation arrives as `on_private_response`
    pub fn do_private_function(&self, function_code: u8, data: &[u8]) -> Result<u16> {
        self.request(function_code, data)
    }

    fn submit_default<F>(&self, function: FunctionCode, fill: F) -> Result<u16>
    where
        F: FnOnce(&mut PduBuffer) -> Result<()>,
    {
        self.submit(function.code(), Arc::clone(&self.inner.confirmation), fill)
    }

    fn submit<F>(
        &self,
        function_code: u8,
        confirmation: Arc<dyn ModbusConfirmation>,
        fill: F,
    ) -> Result<u16>
    where
        F: FnOnce(&mut PduBuffer) -> Result<()>,
    {
        let unit_id = self.inner.config.unit_id;
        let mut state = self.inner.state.lock();

        let mut pdu = state.pool.acquire();
        if let Err(e) = fill(&mut pdu) {
            state.pool.release(pdu);
            return Err(e);
        }

        let transaction_id = match state.next_free_id() {
            Ok(transaction_id) => transaction_id,
            Err(e) => {
                state.pool.release(pdu);
                return Err(e);
            },
        };
        let queued = state.outbound.is_none();
        state.dispatch(
            Transaction {
                transaction_id,
                function_code,
                pdu,
                confirmation,
            },
            unit_id,
        );
        drop(state);

        if self.debug_enabled() {
            debug!(
                "Request {} for function 0x{:02X} {}",
                transaction_id,
                function_code,
                if queued { "queued until connected" } else { "sent" }
            );
        }
        Ok(transaction_id)
    }
}

impl Drop for ModbusClient {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.lock().take() {
            handle.abort();
        }
    }
}

fn check_quantity(what: &str, quantity: u16, max: u16) -> Result<()> {
    if quantity < 1 || quantity > max {
        return Err(ModbusError::invalid_argument(format!(
            "{} quantity {} out of range [1, {}]",
            what, quantity, max
        )));
    }
    Ok(())
}

fn register_quantity(registers: &[u16]) -> Result<u16> {
    u16::try_from(registers.len())
        .map_err(|_| ModbusError::invalid_argument(format!("{} registers", registers.len())))
}

/// Connect, serve a session, reconnect; forever
///
/// The retry counter only resets once a session has proved healthy, so a peer
/// that accepts and immediately drops the socket is paced like a refused one.
async fn supervise(inner: Arc<ClientInner>) {
    let address = inner.config.address();
    let mut attempt: u32 = 0;

    loop {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                info!("Connected to Modbus server {}", address);
                let started = Instant::now();
                let session = run_session(&inner, stream).await;
                warn!("Connection to {} lost: {}", address, session.reason);

                if session.received || started.elapsed() >= STABLE_SESSION {
                    attempt = 0;
                    tokio::task::yield_now().await;
                    continue;
                }

                let delay = inner.config.retry.delay(attempt);
                if inner.debug_enabled() || attempt == 0 {
                    warn!(
                        "{} closed the connection before answering, retry in {}ms",
                        address,
                        delay.as_millis()
                    );
                }
                attempt = attempt.saturating_add(1);
                pause(delay).await;
            },
            Err(e) => {
                let delay = inner.config.retry.delay(attempt);
                if inner.debug_enabled() || attempt == 0 {
                    warn!(
                        "Failed to connect to {}: {}, retry in {}ms",
                        address,
                        e,
                        delay.as_millis()
                    );
                }
                attempt = attempt.saturating_add(1);
                pause(delay).await;
            },
        }
    }
}

async fn pause(delay: Duration) {
    if delay.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(delay).await;
    }
}

/// How a session ended
struct SessionEnd {
    reason: ModbusError,
    /// At least one frame arrived from the peer
    received: bool,
}

/// Serve one connection until it fails
async fn run_session(inner: &Arc<ClientInner>, stream: TcpStream) -> SessionEnd {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut received = false;

    inner.open_session(tx);

    let result = tokio::select! {
        result = read_loop(&mut reader, inner, &mut received) => result,
        result = write_loop(&mut writer, &mut rx, inner) => result,
    };

    inner.close_session(&mut rx);

    let reason = match result {
        Err(e) => e,
        Ok(()) => ModbusError::NotConnected,
    };
    SessionEnd { reason, received }
}

async fn write_loop<W>(
    writer: &mut W,
    rx: &mut mpsc::UnboundedReceiver<Outbound>,
    inner: &ClientInner,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        if let Err(e) = writer.write_all(&outbound.frame).await {
            inner.state.lock().requeue(outbound.transaction_id);
            return Err(e.into());
        }

        if inner.debug.load(Ordering::Relaxed) {
            debug!(
                "Sent {}-byte request as transaction {}: {}",
                outbound.frame.len(),
                outbound.transaction_id,
                hex::format_adu(&outbound.frame)
            );
        }
    }
    Ok(())
}

async fn read_loop(
    reader: &mut OwnedReadHalf,
    inner: &ClientInner,
    received: &mut bool,
) -> Result<()> {
    let mut pdu = [0u8; MODBUS_MAX_PDU_LENGTH];
    loop {
        let header = read_header(reader).await?;
        let size = read_pdu(reader, &header, &mut pdu).await?;
        *received = true;
        inner.confirm(&header, &pdu[..size])?;
    }
}

impl ClientInner {
    fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    /// Attach the writer channel and replay everything queued while offline
    fn open_session(&self, tx: mpsc::UnboundedSender<Outbound>) {
        let mut state = self.state.lock();
        state.outbound = Some(tx);
        self.connected.store(true, Ordering::Release);

        let replay: Vec<Transaction> = state.blocking.drain(..).collect();
        if !replay.is_empty() {
            info!("Replaying {} queued request(s)", replay.len());
        }
        for transaction in replay {
            state.dispatch(transaction, self.config.unit_id);
        }
    }

    /// Detach the writer, requeue unsent frames and abandon the rest
    fn close_session(&self, rx: &mut mpsc::UnboundedReceiver<Outbound>) {
        let abandoned: Vec<Transaction> = {
            let mut state = self.state.lock();
            state.outbound = None;
            self.connected.store(false, Ordering::Release);

            while let Ok(outbound) = rx.try_recv() {
                state.requeue(outbound.transaction_id);
            }

            let mut abandoned: Vec<Transaction> =
                state.pending.drain().map(|(_, transaction)| transaction).collect();
            abandoned.sort_by_key(|transaction| transaction.transaction_id);
            abandoned
        };

        if abandoned.is_empty() {
            return;
        }

        warn!("Abandoned {} unconfirmed request(s)", abandoned.len());
        for transaction in &abandoned {
            transaction
                .confirmation
                .on_abandoned(transaction.transaction_id, transaction.function_code);
        }

        let mut state = self.state.lock();
        for transaction in abandoned {
            state.pool.release(transaction.pdu);
        }
    }

    /// Match one confirmation; `Err` only for frames that break the session
    fn confirm(&self, header: &MbapHeader, pdu: &[u8]) -> Result<()> {
        let debug = self.debug_enabled();
        let pending = self.state.lock().pending.remove(&header.transaction_id);
        let Some(transaction) = pending else {
            if debug {
                debug!(
                    "Discarded non-pending confirmation {}",
                    header.transaction_id
                );
            }
            return Ok(());
        };

        let result = self.apply(header, pdu, &transaction, debug);
        if result.is_err() {
            // The session is about to be torn down
            transaction
                .confirmation
                .on_abandoned(transaction.transaction_id, transaction.function_code);
        }
        self.state.lock().pool.release(transaction.pdu);
        result
    }

    fn apply(
        &self,
        header: &MbapHeader,
        pdu: &[u8],
        transaction: &Transaction,
        debug: bool,
    ) -> Result<()> {
        let transaction_id = header.transaction_id;

        if header.protocol_id != MODBUS_PROTOCOL || header.unit_id != self.config.unit_id {
            if debug {
                debug!(
                    "Discarded non-modbus-tcp confirmation({}, {}, {}, {})",
                    transaction_id, header.protocol_id, header.length, header.unit_id
                );
            }
            return Ok(());
        }

        let raw_code = pdu[0];
        let function_code = raw_code & 0x7F;
        if function_code != transaction.function_code {
            if debug {
                debug!(
                    "Discarded confirmation {} for unexpected function 0x{:02X}",
                    transaction_id, raw_code
                );
            }
            return Ok(());
        }

        if debug {
            debug!(
                "Received confirmation({}, {}, {}, {}) for function 0x{:02X}",
                transaction_id, header.protocol_id, header.length, header.unit_id, function_code
            );
        }

        let mut reader = PduReader::new(&pdu[1..]);
        let address = transaction.pdu.leading_address();
        let confirmation = transaction.confirmation.as_ref();

        if raw_code & 0x80 != 0 {
            let exception_code = reader.read_u8()?;
            confirmation.on_exception(transaction_id, function_code, address, exception_code);
        } else {
            apply_positive(confirmation, transaction, &mut reader, address)?;
        }

        let dirty = reader.discard_remaining();
        if dirty > 0 && debug {
            debug!(
                "Discarded last {} byte(s) of confirmation {}",
                dirty, transaction_id
            );
        }
        Ok(())
    }
}

/// Decode a positive confirmation and invoke the matching callback
fn apply_positive(
    confirmation: &dyn ModbusConfirmation,
    transaction: &Transaction,
    reader: &mut PduReader<'_>,
    address: u16,
) -> std::result::Result<(), FrameError> {
    let transaction_id = transaction.transaction_id;

    match FunctionCode::from(transaction.function_code) {
        function @ (FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs) => {
            let quantity = request_quantity(&transaction.pdu);
            let count = reader.read_u8()?;
            let status = reader.read_bytes(count as usize)?;
            if function == FunctionCode::ReadCoils {
                confirmation.on_coils(transaction_id, address, quantity, status);
            } else {
                confirmation.on_discrete_inputs(transaction_id, address, quantity, status);
            }
        },
        FunctionCode::ReadHoldingRegisters | FunctionCode::WriteAndReadRegisters => {
            let count = reader.read_u8()? / 2;
            let registers = reader.read_u16_words(count as usize)?;
            confirmation.on_holding_registers(transaction_id, address, &registers);
        },
        FunctionCode::ReadInputRegisters => {
            let count = reader.read_u8()? / 2;
            let registers = reader.read_u16_words(count as usize)?;
            confirmation.on_input_registers(transaction_id, address, &registers);
        },
        function @ (FunctionCode::WriteSingleCoil
        | FunctionCode::WriteSingleRegister
        | FunctionCode::WriteMultipleCoils
        | FunctionCode::WriteMultipleRegisters) => {
            let echoed_address = reader.read_u16()?;
            let value = reader.read_u16()?;
            confirmation.on_echo_response(transaction_id, function.code(), echoed_address, value);
        },
        FunctionCode::MaskWriteRegister => {
            let echoed_address = reader.read_u16()?;
            let and_mask = reader.read_u16()?;
            let or_mask = reader.read_u16()?;
            confirmation.on_mask_write_response(transaction_id, echoed_address, and_mask, or_mask);
        },
        FunctionCode::ReadFifoQueue => {
            let _byte_count = reader.read_u16()?;
            let count = reader.read_u16()?;
            let registers = reader.read_u16_words(count as usize)?;
            confirmation.on_queue_registers(transaction_id, address, &registers);
        },
        function => {
            confirmation.on_private_response(transaction_id, function.code(), reader.read_remaining());
        },
    }
    Ok(())
}

/// Second word of a read request
fn request_quantity(pdu: &PduBuffer) -> u16 {
    let data = pdu.as_slice();
    if data.len() >= 4 {
        u16::from_be_bytes([data[2], data[3]])
    } else {
        0
    }
}

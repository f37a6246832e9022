//! In-memory register bank
//!
//! Backs the simulator and the tests. Coils and discrete inputs share one
//! address block, holding and input registers share another; FIFO queues are
//! keyed by their pointer address. Extended identification objects can be
//! added next to the standard ones from the server configuration.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::exception;
use crate::server::{AccessResult, RegisterAccess};

#[derive(Debug)]
struct Bank {
    coils: Vec<bool>,
    discrete_inputs: Vec<bool>,
    holding_registers: Vec<u16>,
    input_registers: Vec<u16>,
    fifo_queues: HashMap<u16, Vec<u16>>,
    identification: HashMap<u8, String>,
}

/// Mutex-protected PLC image implementing [`RegisterAccess`]
#[derive(Debug)]
pub struct MemoryRegisters {
    bit_start: u16,
    register_start: u16,
    debug: bool,
    bank: Mutex<Bank>,
}

impl MemoryRegisters {
    /// `bit_count` coils and discrete inputs from `bit_start`,
    /// `register_count` holding and input registers from `register_start`
    pub fn new(bit_start: u16, bit_count: u16, register_start: u16, register_count: u16) -> Self {
        Self {
            bit_start,
            register_start,
            debug: false,
            bank: Mutex::new(Bank {
                coils: vec![false; bit_count as usize],
                discrete_inputs: vec![false; bit_count as usize],
                holding_registers: vec![0; register_count as usize],
                input_registers: vec![0; register_count as usize],
                fifo_queues: HashMap::new(),
                identification: HashMap::new(),
            }),
        }
    }

    /// Log why requests get rejected
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.discrete_inputs.len();
        let index = self.bit_range(address, 1, amount)?.start;
        bank.discrete_inputs[index] = value;
        Ok(())
    }

    pub fn set_input_registers(&self, address: u16, values: &[u16]) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.input_registers.len();
        let range = self.register_range(address, values.len(), amount)?;
        bank.input_registers[range].copy_from_slice(values);
        Ok(())
    }

    pub fn holding_registers(&self, address: u16, quantity: u16) -> AccessResult<Vec<u16>> {
        let bank = self.bank.lock();
        let range = self.register_range(address, quantity as usize, bank.holding_registers.len())?;
        Ok(bank.holding_registers[range].to_vec())
    }

    pub fn set_fifo_queue(&self, address: u16, values: Vec<u16>) {
        self.bank.lock().fifo_queues.insert(address, values);
    }

    /// Device identification object 0x07 and above
    pub fn set_identification_object(&self, object_id: u8, value: impl Into<String>) {
        self.bank.lock().identification.insert(object_id, value.into());
    }

    fn bit_range(&self, address: u16, count: usize, amount: usize) -> AccessResult<std::ops::Range<usize>> {
        check_range(address, count, self.bit_start, amount, self.debug)
    }

    fn register_range(
        &self,
        address: u16,
        count: usize,
        amount: usize,
    ) -> AccessResult<std::ops::Range<usize>> {
        check_range(address, count, self.register_start, amount, self.debug)
    }
}

/// Index range of `count` items at `address` in a block starting at `start`
fn check_range(
    address: u16,
    count: usize,
    start: u16,
    amount: usize,
    debug: bool,
) -> AccessResult<std::ops::Range<usize>> {
    let amount16 = amount.min(u16::MAX as usize) as u16;
    if address < start {
        return Err(exception::illegal_address(address, start, amount16, debug));
    }

    let offset = (address - start) as usize;
    if offset + count > amount {
        return Err(exception::illegal_address_range(
            address,
            count as u16,
            start,
            amount16,
            debug,
        ));
    }
    Ok(offset..offset + count)
}

fn pack_bits(bits: &[bool], status: &mut [u8]) {
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            status[i / 8] |= 1 << (i % 8);
        }
    }
}

fn unpack_bits(status: &[u8], bits: &mut [bool]) {
    for (i, bit) in bits.iter_mut().enumerate() {
        *bit = (status[i / 8] >> (i % 8)) & 1 == 1;
    }
}

impl RegisterAccess for MemoryRegisters {
    fn read_coils(&self, address: u16, quantity: u16, status: &mut [u8]) -> AccessResult {
        let bank = self.bank.lock();
        let range = self.bit_range(address, quantity as usize, bank.coils.len())?;
        pack_bits(&bank.coils[range], status);
        Ok(())
    }

    fn read_discrete_inputs(&self, address: u16, quantity: u16, status: &mut [u8]) -> AccessResult {
        let bank = self.bank.lock();
        let range = self.bit_range(address, quantity as usize, bank.discrete_inputs.len())?;
        pack_bits(&bank.discrete_inputs[range], status);
        Ok(())
    }

    fn read_holding_registers(&self, address: u16, registers: &mut [u16]) -> AccessResult {
        let bank = self.bank.lock();
        let range = self.register_range(address, registers.len(), bank.holding_registers.len())?;
        registers.copy_from_slice(&bank.holding_registers[range]);
        Ok(())
    }

    fn read_input_registers(&self, address: u16, registers: &mut [u16]) -> AccessResult {
        let bank = self.bank.lock();
        let range = self.register_range(address, registers.len(), bank.input_registers.len())?;
        registers.copy_from_slice(&bank.input_registers[range]);
        Ok(())
    }

    fn write_coil(&self, address: u16, value: bool) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.coils.len();
        let index = self.bit_range(address, 1, amount)?.start;
        bank.coils[index] = value;
        Ok(())
    }

    fn write_register(&self, address: u16, value: u16) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.holding_registers.len();
        let index = self.register_range(address, 1, amount)?.start;
        bank.holding_registers[index] = value;
        Ok(())
    }

    fn write_coils(&self, address: u16, quantity: u16, status: &[u8]) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.coils.len();
        let range = self.bit_range(address, quantity as usize, amount)?;
        unpack_bits(status, &mut bank.coils[range]);
        Ok(())
    }

    fn write_registers(&self, address: u16, registers: &[u16]) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.holding_registers.len();
        let range = self.register_range(address, registers.len(), amount)?;
        bank.holding_registers[range].copy_from_slice(registers);
        Ok(())
    }

    fn mask_write_register(&self, address: u16, and_mask: u16, or_mask: u16) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.holding_registers.len();
        let index = self.register_range(address, 1, amount)?.start;
        let current = bank.holding_registers[index];
        bank.holding_registers[index] = (current & and_mask) | (or_mask & !and_mask);
        Ok(())
    }

    fn write_read_registers(
        &self,
        write_address: u16,
        written: &[u16],
        read_address: u16,
        read: &mut [u16],
    ) -> AccessResult {
        let mut bank = self.bank.lock();
        let amount = bank.holding_registers.len();
        let write_range = self.register_range(write_address, written.len(), amount)?;
        let read_range = self.register_range(read_address, read.len(), amount)?;

        bank.holding_registers[write_range].copy_from_slice(written);
        read.copy_from_slice(&bank.holding_registers[read_range]);
        Ok(())
    }

    fn read_fifo_queue(&self, address: u16, queue: &mut Vec<u16>) -> AccessResult {
        let bank = self.bank.lock();
        match bank.fifo_queues.get(&address) {
            Some(values) => {
                queue.extend_from_slice(values);
                Ok(())
            },
            None => Err(exception::illegal_address(address, address, 0, self.debug)),
        }
    }

    fn access_private_device_identification(&self, object_id: u8) -> Option<String> {
        self.bank.lock().identification.get(&object_id).cloned()
    }
}

//! Reusable PDU buffers
//!
//! Every request owns one fixed-capacity buffer until its confirmation is
//! handled. Buffers move in and out of the pool by value, so a released
//! buffer can no longer be reached by the transaction that used it.

use crate::constants::MODBUS_MAX_PDU_LENGTH;
use crate::error::{ModbusError, Result};

/// Fixed-capacity request payload (PDU data without the function code)
#[derive(Debug)]
pub struct PduBuffer {
    data: Box<[u8; MODBUS_MAX_PDU_LENGTH]>,
    len: usize,
}

impl PduBuffer {
    fn new() -> Self {
        Self {
            data: Box::new([0u8; MODBUS_MAX_PDU_LENGTH]),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        MODBUS_MAX_PDU_LENGTH
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Forget the payload; stale bytes stay behind the length mark
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// First big-endian word, the start address for every addressed request
    pub fn leading_address(&self) -> u16 {
        if self.len >= 2 {
            u16::from_be_bytes([self.data[0], self.data[1]])
        } else {
            0
        }
    }

    pub fn put_u8(&mut self, value: u8) -> Result<()> {
        self.put_slice(&[value])
    }

    pub fn put_u16(&mut self, value: u16) -> Result<()> {
        self.put_slice(&value.to_be_bytes())
    }

    pub fn put_u16_words(&mut self, values: &[u16]) -> Result<()> {
        self.ensure(values.len() * 2)?;
        for value in values {
            self.put_u16(*value)?;
        }
        Ok(())
    }

    pub fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        self.ensure(bytes.len())?;
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        Ok(())
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let available = MODBUS_MAX_PDU_LENGTH - self.len;
        if needed > available {
            return Err(ModbusError::PduOverflow { needed, available });
        }
        Ok(())
    }
}

/// Free list of PDU buffers
#[derive(Debug, Default)]
pub struct BufferPool {
    free: Vec<PduBuffer>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop a free buffer or allocate a new one; the result is always empty
    pub fn acquire(&mut self) -> PduBuffer {
        match self.free.pop() {
            Some(mut buffer) => {
                buffer.clear();
                buffer
            },
            None => PduBuffer::new(),
        }
    }

    pub fn release(&mut self, buffer: PduBuffer) {
        self.free.push(buffer);
    }

    /// Buffers waiting in the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::codec::PduReader;

    #[test]
    fn test_acquire_allocates_when_empty() {
        let mut pool = BufferPool::new();
        let a = pool.acquire();
        let b = pool.acquire();

        assert_eq!(pool.available(), 0);
        assert!(a.is_empty());
        assert_eq!(b.capacity(), MODBUS_MAX_PDU_LENGTH);
    }

    #[test]
    fn test_release_then_acquire_reuses() {
        let mut pool = BufferPool::new();
        let mut buffer = pool.acquire();
        buffer.put_u16(0x0010).unwrap();
        buffer.put_u16(0x0003).unwrap();
        buffer.put_u8(6).unwrap();
        buffer.put_u16_words(&[1, 2, 3]).unwrap();
        pool.release(buffer);

        assert_eq!(pool.available(), 1);
        let mut reused = pool.acquire();
        assert_eq!(pool.available(), 0);
        assert!(reused.is_empty());

        // Length-prefixed content never sees the previous payload
        reused.put_u16(0x0020).unwrap();
        reused.put_u16(0x0001).unwrap();
        reused.put_u8(2).unwrap();
        reused.put_u16(0xABCD).unwrap();

        let mut reader = PduReader::new(reused.as_slice());
        assert_eq!(reader.read_u16().unwrap(), 0x0020);
        assert_eq!(reader.read_u16().unwrap(), 0x0001);
        let count = reader.read_u8().unwrap() as usize;
        assert_eq!(reader.read_bytes(count).unwrap(), &[0xAB, 0xCD]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_overflow_is_rejected() {
        let mut pool = BufferPool::new();
        let mut buffer = pool.acquire();
        buffer.put_slice(&[0u8; MODBUS_MAX_PDU_LENGTH - 1]).unwrap();

        let err = buffer.put_u16(1).unwrap_err();
        assert!(matches!(
            err,
            ModbusError::PduOverflow {
                needed: 2,
                available: 1
            }
        ));
        assert_eq!(buffer.len(), MODBUS_MAX_PDU_LENGTH - 1);
        buffer.put_u8(0xFF).unwrap();
        assert_eq!(buffer.len(), MODBUS_MAX_PDU_LENGTH);
    }

    #[test]
    fn test_leading_address() {
        let mut pool = BufferPool::new();
        let mut buffer = pool.acquire();
        assert_eq!(buffer.leading_address(), 0);
        buffer.put_u16(0x1234).unwrap();
        assert_eq!(buffer.leading_address(), 0x1234);
    }
}

//! Modbus/TCP frame codec
//!
//! Frame layout: [Transaction ID(2)][Protocol ID(2)][Length(2)][Unit ID(1)][FC(1)][Data(N)]
//! All fields are big-endian and the length field counts Unit ID + FC + Data.
//! Encoders are pure; the readers pull exactly one header or one PDU from an
//! async byte stream and report how the stream fell short.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::constants::{
    MODBUS_MAX_MBAP_LENGTH_FIELD, MODBUS_MAX_PDU_LENGTH, MODBUS_MBAP_LENGTH,
    MODBUS_MIN_MBAP_LENGTH_FIELD,
};
use crate::error::FrameError;
use crate::exception::ExceptionCode;

/// Modbus TCP MBAP header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Transaction identifier
    pub transaction_id: u16,
    /// Protocol identifier (0 for Modbus)
    pub protocol_id: u16,
    /// Length field (Unit ID + PDU)
    pub length: u16,
    /// Unit identifier
    pub unit_id: u8,
}

impl MbapHeader {
    /// Parse the 7 header bytes without validating them
    pub fn decode(raw: &[u8; MODBUS_MBAP_LENGTH]) -> Self {
        Self {
            transaction_id: u16::from_be_bytes([raw[0], raw[1]]),
            protocol_id: u16::from_be_bytes([raw[2], raw[3]]),
            length: u16::from_be_bytes([raw[4], raw[5]]),
            unit_id: raw[6],
        }
    }

    /// Length field must hold at least a function code and at most a full PDU
    pub fn validate(&self) -> Result<(), FrameError> {
        let length = self.length as usize;
        if !(MODBUS_MIN_MBAP_LENGTH_FIELD..=MODBUS_MAX_MBAP_LENGTH_FIELD).contains(&length) {
            return Err(FrameError::InvalidLength(self.length));
        }
        Ok(())
    }

    /// Bytes following the header: function code + data
    pub fn pdu_length(&self) -> usize {
        (self.length as usize).saturating_sub(1)
    }
}

/// Append a positive ADU to `dst`
///
/// `data` excludes the function code and must fit in a PDU.
pub fn encode_adu(
    dst: &mut BytesMut,
    transaction_id: u16,
    protocol_id: u16,
    unit_id: u8,
    function_code: u8,
    data: &[u8],
) {
    debug_assert!(data.len() < MODBUS_MAX_PDU_LENGTH);
    let length = (data.len() + 2) as u16;

    dst.reserve(MODBUS_MBAP_LENGTH + 1 + data.len());
    dst.put_u16(transaction_id);
    dst.put_u16(protocol_id);
    dst.put_u16(length);
    dst.put_u8(unit_id);
    dst.put_u8(function_code);
    dst.put_slice(data);
}

/// Append an exception ADU to `dst`: function code with the high bit set and one code byte
pub fn encode_exception_adu(
    dst: &mut BytesMut,
    transaction_id: u16,
    protocol_id: u16,
    unit_id: u8,
    function_code: u8,
    exception: ExceptionCode,
) {
    encode_adu(
        dst,
        transaction_id,
        protocol_id,
        unit_id,
        function_code | 0x80,
        &[exception.code()],
    );
}

/// Read until `buf` is full or the stream ends, returning the byte count
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Read and validate one MBAP header
pub async fn read_header<R>(reader: &mut R) -> Result<MbapHeader, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; MODBUS_MBAP_LENGTH];
    let got = read_full(reader, &mut raw).await?;

    if got < MODBUS_MBAP_LENGTH {
        if got == 0 {
            return Err(FrameError::Disconnected);
        }
        return Err(FrameError::HeaderTruncated {
            got,
            expected: MODBUS_MBAP_LENGTH,
        });
    }

    let header = MbapHeader::decode(&raw);
    header.validate()?;
    Ok(header)
}

/// Read the PDU announced by `header` into `buf`, returning its length
pub async fn read_pdu<R>(
    reader: &mut R,
    header: &MbapHeader,
    buf: &mut [u8; MODBUS_MAX_PDU_LENGTH],
) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin,
{
    let expected = header.pdu_length();
    if expected > MODBUS_MAX_PDU_LENGTH {
        return Err(FrameError::InvalidLength(header.length));
    }

    let got = read_full(reader, &mut buf[..expected]).await?;
    if got < expected {
        return Err(FrameError::PduTruncated { got, expected });
    }
    Ok(expected)
}

/// Checked big-endian cursor over a received PDU
#[derive(Debug)]
pub struct PduReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> PduReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn read_u8(&mut self) -> Result<u8, FrameError> {
        let bytes = self.read_bytes(1)?;
        Ok(bytes[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, FrameError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], FrameError> {
        if count > self.remaining() {
            return Err(FrameError::MalformedPdu(format!(
                "need {} bytes at offset {}, {} left",
                count,
                self.position,
                self.remaining()
            )));
        }
        let bytes = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Read `count` big-endian words
    pub fn read_u16_words(&mut self, count: usize) -> Result<Vec<u16>, FrameError> {
        let bytes = self.read_bytes(count * 2)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Everything not yet consumed
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let bytes = &self.data[self.position..];
        self.position = self.data.len();
        bytes
    }

    /// Drop unconsumed bytes, returning how many there were
    pub fn discard_remaining(&mut self) -> usize {
        self.read_remaining().len()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn frame(transaction_id: u16, unit_id: u8, function_code: u8, data: &[u8]) -> BytesMut {
        let mut dst = BytesMut::new();
        encode_adu(&mut dst, transaction_id, 0, unit_id, function_code, data);
        dst
    }

    #[test]
    fn test_encode_adu_layout() {
        let adu = frame(0x1234, 0xFF, 0x03, &[0x00, 0x10, 0x00, 0x02]);
        assert_eq!(
            adu.as_ref(),
            &[0x12, 0x34, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x00, 0x10, 0x00, 0x02]
        );
    }

    #[test]
    fn test_encode_exception_adu() {
        let mut adu = BytesMut::new();
        encode_exception_adu(&mut adu, 7, 0, 0xFF, 0x03, ExceptionCode::IllegalDataValue);
        assert_eq!(
            adu.as_ref(),
            &[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0xFF, 0x83, 0x03]
        );
    }

    #[tokio::test]
    async fn test_header_and_pdu_round_trip() {
        for len in 0..MODBUS_MAX_PDU_LENGTH {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let adu = frame(0xBEEF, 0xFF, 0x41, &data);

            let mut stream: &[u8] = adu.as_ref();
            let header = read_header(&mut stream).await.unwrap();
            assert_eq!(header.transaction_id, 0xBEEF);
            assert_eq!(header.protocol_id, 0);
            assert_eq!(header.length as usize, len + 2);
            assert_eq!(header.unit_id, 0xFF);

            let mut pdu = [0u8; MODBUS_MAX_PDU_LENGTH];
            let size = read_pdu(&mut stream, &header, &mut pdu).await.unwrap();
            assert_eq!(size, len + 1);
            assert_eq!(pdu[0], 0x41);
            assert_eq!(&pdu[1..size], data.as_slice());
            assert!(stream.is_empty());
        }
    }

    #[tokio::test]
    async fn test_read_header_disconnected() {
        let mut stream: &[u8] = &[];
        let err = read_header(&mut stream).await.unwrap_err();
        assert!(matches!(err, FrameError::Disconnected));
    }

    #[tokio::test]
    async fn test_read_header_truncated() {
        let mut stream: &[u8] = &[0x00, 0x01, 0x00];
        let err = read_header(&mut stream).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::HeaderTruncated {
                got: 3,
                expected: 7
            }
        ));
    }

    #[tokio::test]
    async fn test_read_header_invalid_length() {
        let mut stream: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0xFF];
        let err = read_header(&mut stream).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(1)));

        let mut stream: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0xFF];
        let err = read_header(&mut stream).await.unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength(256)));
    }

    #[tokio::test]
    async fn test_read_pdu_truncated() {
        let mut stream: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x02];
        let header = read_header(&mut stream).await.unwrap();
        let mut pdu = [0u8; MODBUS_MAX_PDU_LENGTH];
        let err = read_pdu(&mut stream, &header, &mut pdu).await.unwrap_err();
        assert!(matches!(
            err,
            FrameError::PduTruncated {
                got: 2,
                expected: 5
            }
        ));
    }

    #[test]
    fn test_pdu_reader() {
        let data = [0x10, 0x00, 0x2A, 0x00, 0x01, 0x00, 0x02, 0xEE];
        let mut reader = PduReader::new(&data);

        assert_eq!(reader.read_u8().unwrap(), 0x10);
        assert_eq!(reader.read_u16().unwrap(), 0x002A);
        assert_eq!(reader.read_u16_words(2).unwrap(), vec![1, 2]);
        assert_eq!(reader.remaining(), 1);
        assert!(reader.read_u16().is_err());
        assert_eq!(reader.discard_remaining(), 1);
        assert_eq!(reader.remaining(), 0);
        assert!(matches!(
            reader.read_u8().unwrap_err(),
            FrameError::MalformedPdu(_)
        ));
    }
}

//! Hex dumps for frame tracing

use std::fmt::Write;

/// Encode bytes to uppercase hex string
/// Example: [0x12, 0x34, 0xAB] -> "1234AB"
pub fn encode_upper(data: &[u8]) -> String {
    let mut result = String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(&mut result, "{:02X}", byte);
    }
    result
}

/// Render an ADU as `[header] pdu`, e.g. `[0001 0000 0006 FF] 03 0010 0002`
///
/// The header is split into its fields and the PDU into the function code
/// followed by big-endian words, which is how frames are read off a capture.
pub fn format_adu(adu: &[u8]) -> String {
    if adu.len() < 7 {
        return encode_upper(adu);
    }

    let mut result = String::with_capacity(adu.len() * 3 + 4);
    let _ = write!(
        &mut result,
        "[{} {} {} {}]",
        encode_upper(&adu[0..2]),
        encode_upper(&adu[2..4]),
        encode_upper(&adu[4..6]),
        encode_upper(&adu[6..7])
    );

    if let Some((function_code, data)) = adu[7..].split_first() {
        let _ = write!(&mut result, " {:02X}", function_code);
        for chunk in data.chunks(2) {
            result.push(' ');
            result.push_str(&encode_upper(chunk));
        }
    }
    result
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_encode_upper() {
        assert_eq!(encode_upper(&[0x12, 0x34, 0xAB]), "1234AB");
        assert_eq!(encode_upper(&[]), "");
        assert_eq!(encode_upper(&[0x0F]), "0F");
    }

    #[test]
    fn test_format_adu() {
        let adu = [
            0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x00, 0x10, 0x00, 0x02,
        ];
        assert_eq!(format_adu(&adu), "[0001 0000 0006 FF] 03 0010 0002");
    }

    #[test]
    fn test_format_adu_odd_tail_and_short() {
        let adu = [0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0xFF, 0x83, 0x03];
        assert_eq!(format_adu(&adu), "[0007 0000 0003 FF] 83 03");
        assert_eq!(format_adu(&[0xAB, 0xCD]), "ABCD");
        assert_eq!(format_adu(&adu[..7]), "[0007 0000 0003 FF]");
    }
}

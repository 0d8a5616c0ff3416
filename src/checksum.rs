//! Checksums used by the C12.18 link layer and the C12.19 table services.
//!
//! Two independent checks protect a table read travelling over a serial line:
//!
//! - The **frame CRC** covers a whole link frame (start byte through payload) and is
//!   appended to it in little-endian byte order. It is the CRC-16/X.25 variant:
//!   - Polynomial: x^16 + x^12 + x^5 + 1 (0x1021), processed bit-reflected (0x8408)
//!   - Initial value: 0xFFFF
//!   - XOR output: 0xFFFF
//! - The **table checksum** covers only the table data carried inside a read
//!   response or a write request. It is the two's complement of the byte sum, so a
//!   valid block sums to zero modulo 256 once the checksum is added.

/// CRC-16/X.25 polynomial in reflected form (0x1021 bit-reversed).
pub(crate) const CRC16_POLYNOMIAL_REFLECTED: u16 = 0x8408;

/// CRC-16/X.25 initial value.
pub(crate) const CRC16_INIT: u16 = 0xFFFF;

/// CRC-16/X.25 XOR output value.
pub(crate) const CRC16_XOR_OUTPUT: u16 = 0xFFFF;

/// Number of bits in a byte.
const BITS_PER_BYTE: u32 = 8;

/// LSB mask used by the reflected shift register.
const LSB_MASK_16: u16 = 0x0001;

/// Computes the CRC-16/X.25 of `data`.
///
/// The result is transmitted little-endian at the end of a frame.
///
/// # Examples
///
/// ```
/// use ansi_c12::checksum::frame_crc;
///
/// assert_eq!(frame_crc(b"123456789"), 0x906E);
/// assert_eq!(frame_crc(&[]), 0x0000);
/// ```
pub fn frame_crc(data: &[u8]) -> u16 {
    let mut crc = CRC16_INIT;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..BITS_PER_BYTE {
            if crc & LSB_MASK_16 != 0 {
                crc = (crc >> 1) ^ CRC16_POLYNOMIAL_REFLECTED;
            } else {
                crc >>= 1;
            }
        }
    }

    crc ^ CRC16_XOR_OUTPUT
}

/// Computes the 8-bit checksum appended to table data.
///
/// Sum of all bytes modulo 256, minus one, inverted.
///
/// ```
/// use ansi_c12::checksum::table_checksum;
///
/// assert_eq!(table_checksum(b"data data data"), 0xF2);
/// ```
pub fn table_checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte));
    sum.wrapping_sub(1) ^ 0xFF
}

/// Returns `true` if `checksum` is the table checksum of `data`.
pub fn verify_table_checksum(data: &[u8], checksum: u8) -> bool {
    table_checksum(data) == checksum
}

//! Alphabet-43 text encoding for binary modules.
//!
//! The bytes are read as one big-endian number and written in base 43 over
//! the QR-code alphanumeric set minus space and `%`. Each leading zero byte
//! becomes one leading `0`, so the encoding is exactly reversible.
//!
//! Both directions are quadratic in the input length. That is fine for
//! modules of a few kilobytes, which is what a card compiles to; callers
//! cap the size they accept (see [`super::MAX_URL_MODULE_BYTES`]).

use crate::error::{Error, Result};

/// The 43 digit characters, in value order.
pub const ALPHABET: &[u8; 43] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ$*+-./:";

const BASE: u32 = 43;

/// Encode `bytes` as alphabet-43 text.
pub fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|&&b| b == 0).count();

    // Base-43 digits, least significant first. 256 needs ~1.47 digits of 43.
    let mut digits: Vec<u8> = Vec::with_capacity(bytes.len() * 3 / 2 + 1);
    for &byte in &bytes[zeros..] {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            carry += (*digit as u32) << 8;
            *digit = (carry % BASE) as u8;
            carry /= BASE;
        }
        while carry > 0 {
            digits.push((carry % BASE) as u8);
            carry /= BASE;
        }
    }

    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat_n('0', zeros));
    out.extend(digits.iter().rev().map(|&d| ALPHABET[d as usize] as char));
    out
}

/// Decode alphabet-43 text back to bytes.
///
/// # Errors
///
/// [`Error::InvalidEncoding`] on any character outside [`ALPHABET`].
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let zeros = text.chars().take_while(|&c| c == '0').count();

    // Base-256 digits, least significant first.
    let mut bytes: Vec<u8> = Vec::with_capacity(text.len());
    for (offset, ch) in text.chars().enumerate().skip(zeros) {
        let value = digit_value(ch).ok_or(Error::InvalidEncoding { ch, offset })?;

        let mut carry = value;
        for byte in bytes.iter_mut() {
            carry += (*byte as u32) * BASE;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}

fn digit_value(ch: char) -> Option<u32> {
    if !ch.is_ascii() {
        return None;
    }
    ALPHABET
        .iter()
        .position(|&a| a == ch as u8)
        .map(|pos| pos as u32)
}

/// Escape encoded text for use as a query-string value.
///
/// `+` is the only alphabet character a query string reads differently.
pub fn escape_query(encoded: &str) -> String {
    encoded.replace('+', "%2B")
}

/// Reverse [`escape_query`], also accepting a literal `+`.
pub fn unescape_query(value: &str) -> String {
    value.replace("%2B", "+").replace("%2b", "+")
}

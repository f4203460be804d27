//! Decoded-message view and identity conversions
//!
//! The GTP codec and transaction layers live elsewhere; the context layer
//! only sees the handful of fields a Create Session Request must expose for
//! UE admission, plus the TBCD/IMSI and wire-APN conversions those fields
//! need.

use crate::error::{ContextError, ContextResult};

/// Maximum IMSI length in digits
pub const MAX_IMSI_BCD_LEN: usize = 15;
/// Maximum IMSI length in packed bytes
pub const MAX_IMSI_LEN: usize = 8;
/// Maximum APN length in characters
pub const MAX_APN_LEN: usize = 100;

/// The fields of a decoded Create Session Request that drive UE admission.
///
/// Both identity fields are optional on the wire; their absence is a
/// protocol error the context layer reports.
#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    /// IMSI in packed TBCD bytes, as carried by the IMSI IE
    pub imsi: Option<Vec<u8>>,
    /// APN in wire label encoding (length-prefixed labels)
    pub apn: Option<Vec<u8>>,
    /// EPS bearer id of the default bearer to be created
    pub ebi: u8,
}

/// Pack an IMSI digit string into TBCD bytes (low nibble first, 0xF filler)
pub fn imsi_bcd_to_buffer(bcd: &str) -> ContextResult<Vec<u8>> {
    if bcd.is_empty() || bcd.len() > MAX_IMSI_BCD_LEN {
        return Err(ContextError::InvalidImsi(bcd.to_string()));
    }

    let mut digits = Vec::with_capacity(bcd.len());
    for c in bcd.chars() {
        let d = c
            .to_digit(10)
            .ok_or_else(|| ContextError::InvalidImsi(bcd.to_string()))?;
        digits.push(d as u8);
    }

    let mut buf = Vec::with_capacity(digits.len().div_ceil(2));
    for pair in digits.chunks(2) {
        let low = pair[0];
        let high = if pair.len() == 2 { pair[1] } else { 0x0f };
        buf.push((high << 4) | low);
    }
    Ok(buf)
}

/// Unpack TBCD bytes into an IMSI digit string, skipping 0xF filler
pub fn imsi_buffer_to_bcd(buf: &[u8]) -> String {
    let mut bcd = String::with_capacity(buf.len() * 2);
    for byte in buf {
        let low = byte & 0x0f;
        let high = (byte >> 4) & 0x0f;
        if low < 10 {
            bcd.push((b'0' + low) as char);
        }
        if high < 10 {
            bcd.push((b'0' + high) as char);
        }
    }
    bcd
}

/// Decode a wire-encoded APN (length-prefixed labels) into dotted form
pub fn apn_parse(wire: &[u8]) -> ContextResult<String> {
    if wire.is_empty() {
        return Err(ContextError::MalformedApn);
    }

    let mut apn = String::new();
    let mut pos = 0usize;
    while pos < wire.len() {
        let len = wire[pos] as usize;
        pos += 1;
        if len == 0 || pos + len > wire.len() {
            return Err(ContextError::MalformedApn);
        }
        let label =
            std::str::from_utf8(&wire[pos..pos + len]).map_err(|_| ContextError::MalformedApn)?;
        if !apn.is_empty() {
            apn.push('.');
        }
        apn.push_str(label);
        pos += len;
    }

    if apn.len() > MAX_APN_LEN {
        return Err(ContextError::ApnTooLong(apn.len()));
    }
    Ok(apn)
}

// ============================================================================
// Tests
// ============================================================================

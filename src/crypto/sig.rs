//! ECDSA P-256 verification of device signatures.
//!
//! Devices sign the canonical vote message with their bound key, but the
//! platforms they run on disagree about signature encoding: some emit the
//! fixed-width 64-byte `r ‖ s` form, others wrap the two integers in an
//! ASN.1 DER SEQUENCE. Verification guesses the encoding from the length,
//! and on failure converts to the other form and retries once. Everything
//! here is pure; malformed input means `false`, never a panic.

use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};

/// Length of a raw `r ‖ s` signature.
pub const RAW_SIGNATURE_LEN: usize = 64;
/// Length of each big-endian signature component.
const COMPONENT_LEN: usize = 32;

/// Verify `signature` over `message` with the given raw uncompressed P-256
/// public key, accepting either signature encoding.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    if signature.len() == RAW_SIGNATURE_LEN {
        verify_raw(&key, message, signature) || verify_der(&key, message, &raw_to_der(signature))
    } else {
        verify_der(&key, message, signature)
            || der_to_raw(signature).map_or(false, |raw| verify_raw(&key, message, &raw))
    }
}

fn verify_raw(key: &VerifyingKey, message: &[u8], raw: &[u8]) -> bool {
    Signature::from_slice(raw).map_or(false, |sig| key.verify(message, &sig).is_ok())
}

fn verify_der(key: &VerifyingKey, message: &[u8], der: &[u8]) -> bool {
    Signature::from_der(der).map_or(false, |sig| key.verify(message, &sig).is_ok())
}

/// Wrap a raw 64-byte signature in a DER SEQUENCE of two INTEGERs.
pub fn raw_to_der(raw: &[u8]) -> Vec<u8> {
    let (r, s) = raw.split_at(raw.len() / 2);
    let r = der_integer(r);
    let s = der_integer(s);
    let mut der = Vec::with_capacity(2 + r.len() + s.len());
    der.push(0x30);
    der.push((r.len() + s.len()) as u8);
    der.extend_from_slice(&r);
    der.extend_from_slice(&s);
    der
}

/// Encode one INTEGER with the minimal length DER demands: leading zero
/// bytes stripped, then a single zero byte re-added if the high bit is set
/// (INTEGERs are signed and ours are not).
fn der_integer(bytes: &[u8]) -> Vec<u8> {
    let mut start = 0;
    while start < bytes.len() - 1 && bytes[start] == 0 {
        start += 1;
    }
    let trimmed = &bytes[start..];

    let mut out = Vec::with_capacity(trimmed.len() + 3);
    out.push(0x02);
    if trimmed[0] & 0x80 != 0 {
        out.push(trimmed.len() as u8 + 1);
        out.push(0x00);
    } else {
        out.push(trimmed.len() as u8);
    }
    out.extend_from_slice(trimmed);
    out
}

/// Unwrap a DER signature back to the fixed-width form, zero-padding each
/// integer to 32 bytes. Integers wider than 32 bytes mean the signature is
/// not over P-256 (or is malformed) and yield `None`.
pub fn der_to_raw(der: &[u8]) -> Option<[u8; RAW_SIGNATURE_LEN]> {
    if der.len() < 8 || der[0] != 0x30 {
        return None;
    }
    let mut offset = 1;
    let mut length = *der.get(offset)? as usize;
    offset += 1;
    if length & 0x80 != 0 {
        // Long-form length; the low bits count the length bytes.
        let count = length & 0x7f;
        length = 0;
        for _ in 0..count {
            length = (length << 8) | *der.get(offset)? as usize;
            offset += 1;
        }
    }
    let end = offset.checked_add(length)?;
    if der.len() < end {
        return None;
    }

    let (r, offset) = read_integer(der, offset)?;
    let (s, _) = read_integer(der, offset)?;

    let mut raw = [0u8; RAW_SIGNATURE_LEN];
    raw[COMPONENT_LEN - r.len()..COMPONENT_LEN].copy_from_slice(r);
    raw[RAW_SIGNATURE_LEN - s.len()..].copy_from_slice(s);
    Some(raw)
}

/// Read one INTEGER at `offset`, returning its value normalised to at most
/// 32 bytes plus the offset just past it.
fn read_integer(der: &[u8], offset: usize) -> Option<(&[u8], usize)> {
    if *der.get(offset)? != 0x02 {
        return None;
    }
    let length = *der.get(offset + 1)? as usize;
    let start = offset + 2;
    let end = start.checked_add(length)?;
    let mut value = der.get(start..end)?;

    // Strip the sign byte a DER encoder adds when the high bit is set.
    if value.len() > COMPONENT_LEN && value[0] == 0 {
        value = &value[1..];
    }
    if value.len() > COMPONENT_LEN {
        return None;
    }
    Some((value, end))
}

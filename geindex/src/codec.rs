//! Little-endian field helpers over `bytes::{Buf, BufMut}` with bounds
//! checks that surface truncated input as corruption instead of panicking.

use bytes::{Buf, BufMut};

use crate::errors::{GeIndexError, GeIndexResult};

pub(crate) fn ensure_remaining(buf: &impl Buf, needed: usize, what: &str) -> GeIndexResult<()> {
    if buf.remaining() < needed {
        Err(GeIndexError::corruption(format!(
            "truncated {}: need {} bytes, {} left",
            what,
            needed,
            buf.remaining()
        )))
    } else {
        Ok(())
    }
}

pub(crate) fn get_u8(buf: &mut impl Buf, what: &str) -> GeIndexResult<u8> {
    ensure_remaining(&*buf, 1, what)?;
    Ok(buf.get_u8())
}

pub(crate) fn get_u16(buf: &mut impl Buf, what: &str) -> GeIndexResult<u16> {
    ensure_remaining(&*buf, 2, what)?;
    Ok(buf.get_u16_le())
}

pub(crate) fn get_u32(buf: &mut impl Buf, what: &str) -> GeIndexResult<u32> {
    ensure_remaining(&*buf, 4, what)?;
    Ok(buf.get_u32_le())
}

pub(crate) fn get_u64(buf: &mut impl Buf, what: &str) -> GeIndexResult<u64> {
    ensure_remaining(&*buf, 8, what)?;
    Ok(buf.get_u64_le())
}

pub(crate) fn get_bool(buf: &mut impl Buf, what: &str) -> GeIndexResult<bool> {
    match get_u8(buf, what)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(GeIndexError::corruption(format!(
            "invalid boolean byte {} in {}",
            other, what
        ))),
    }
}

/// Reads a `u32` length-prefixed UTF-8 string.
pub(crate) fn get_string(buf: &mut impl Buf, what: &str) -> GeIndexResult<String> {
    let len = get_u32(buf, what)? as usize;
    ensure_remaining(&*buf, len, what)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes)
        .map_err(|e| GeIndexError::corruption(format!("invalid UTF-8 in {}: {}", what, e)))
}

pub(crate) fn put_string(buf: &mut impl BufMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

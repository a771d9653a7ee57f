//! Little-endian primitives shared by the record and preamble codecs.

use crate::error::{CoreError, CoreResult};
use std::io::Read;

/// Upper bound for a single length-prefixed field.
pub(crate) const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;

pub(crate) fn read_array<const N: usize, R: Read>(r: &mut R) -> CoreResult<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u16<R: Read>(r: &mut R) -> CoreResult<u16> {
    Ok(u16::from_le_bytes(read_array(r)?))
}

pub(crate) fn read_u32<R: Read>(r: &mut R) -> CoreResult<u32> {
    Ok(u32::from_le_bytes(read_array(r)?))
}

pub(crate) fn read_u64<R: Read>(r: &mut R) -> CoreResult<u64> {
    Ok(u64::from_le_bytes(read_array(r)?))
}

/// Reads a `u32` length prefix followed by that many bytes.
pub(crate) fn read_bytes<R: Read>(r: &mut R) -> CoreResult<Vec<u8>> {
    let len = read_u32(r)?;
    if len > MAX_FIELD_LEN {
        return Err(CoreError::decode(format!(
            "field length {len} exceeds limit {MAX_FIELD_LEN}"
        )));
    }

    let mut buf = Vec::new();
    r.take(u64::from(len)).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(CoreError::decode(format!(
            "field truncated: expected {len} bytes, got {}",
            buf.len()
        )));
    }
    Ok(buf)
}

pub(crate) fn write_bytes(buf: &mut Vec<u8>, data: &[u8]) {
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_roundtrip() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"payload");
        assert_eq!(read_bytes(&mut buf.as_slice()).unwrap(), b"payload");
    }

    #[test]
    fn truncated_field_is_rejected() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, b"payload");
        buf.truncate(8);
        assert!(matches!(
            read_bytes(&mut buf.as_slice()),
            Err(CoreError::Decode { .. })
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let buf = u32::MAX.to_le_bytes();
        assert!(read_bytes(&mut buf.as_slice()).is_err());
    }
}

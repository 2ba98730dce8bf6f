//! Run-length coding for presence bitfields exchanged with peers.
//!
//! The encoding is a sequence of runs, each introduced by an unsigned LEB128
//! header `h`:
//!
//! - `h & 1 == 1`: a repeated run of `h >> 2` bytes, all `0xff` when
//!   `h & 2 == 2` and all `0x00` otherwise
//! - `h & 1 == 0`: a literal run; the next `h >> 1` bytes are copied as-is

use crate::VlogTreeError;

/// Decoding refuses to produce more than this many bytes
pub const MAX_DECODED_LENGTH: usize = 16 * 1024 * 1024;

const MIN_REPEAT: usize = 4;

/// Encode a bitfield's bytes
pub fn encode(bytes: &[u8]) -> Result<Vec<u8>, VlogTreeError> {
    let mut output = Vec::new();
    let mut literal_start = 0usize;
    let mut position = 0usize;

    while position < bytes.len() {
        let byte = bytes[position];
        let mut end = position;
        while end < bytes.len() && bytes[end] == byte {
            end += 1;
        }

        if (byte == 0x00 || byte == 0xff) && end - position >= MIN_REPEAT {
            write_literal(&mut output, &bytes[literal_start..position])?;
            let fill = if byte == 0xff { 2 } else { 0 };
            let header = (((end - position) as u64) << 2) | fill | 1;
            write_header(&mut output, header)?;
            literal_start = end;
        }
        position = end;
    }
    write_literal(&mut output, &bytes[literal_start..])?;

    Ok(output)
}

/// Decode bytes produced by [encode]
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, VlogTreeError> {
    let mut input = encoded;
    let mut output = Vec::new();

    while !input.is_empty() {
        let header = leb128::read::unsigned(&mut input)
            .map_err(|error| VlogTreeError::MalformedBitfield(format!("{error}")))?;

        if header & 1 == 1 {
            let length = usize::try_from(header >> 2)
                .map_err(|error| VlogTreeError::MalformedBitfield(format!("{error}")))?;
            check_length(output.len(), length)?;
            let fill = if header & 2 == 2 { 0xff } else { 0x00 };
            output.resize(output.len() + length, fill);
        } else {
            let length = usize::try_from(header >> 1)
                .map_err(|error| VlogTreeError::MalformedBitfield(format!("{error}")))?;
            check_length(output.len(), length)?;
            if input.len() < length {
                return Err(VlogTreeError::MalformedBitfield(format!(
                    "Literal run of {length} bytes but only {} remain",
                    input.len()
                )));
            }
            let (literal, rest) = input.split_at(length);
            output.extend_from_slice(literal);
            input = rest;
        }
    }

    Ok(output)
}

fn check_length(current: usize, additional: usize) -> Result<(), VlogTreeError> {
    match current.checked_add(additional) {
        Some(total) if total <= MAX_DECODED_LENGTH => Ok(()),
        _ => Err(VlogTreeError::MalformedBitfield(format!(
            "Decoded bitfield exceeds {MAX_DECODED_LENGTH} bytes"
        ))),
    }
}

fn write_header(output: &mut Vec<u8>, header: u64) -> Result<(), VlogTreeError> {
    leb128::write::unsigned(output, header)
        .map_err(|error| VlogTreeError::EncodeFailed(format!("{error}")))?;
    Ok(())
}

fn write_literal(output: &mut Vec<u8>, literal: &[u8]) -> Result<(), VlogTreeError> {
    if literal.is_empty() {
        return Ok(());
    }
    write_header(output, (literal.len() as u64) << 1)?;
    output.extend_from_slice(literal);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    #[test]
    fn it_collapses_long_runs() -> Result<()> {
        let mut bytes = vec![0xff; 1024];
        bytes.extend(vec![0x00; 4096]);

        let encoded = encode(&bytes)?;
        assert!(encoded.len() < 8);
        assert_eq!(decode(&encoded)?, bytes);
        Ok(())
    }

    #[test]
    fn it_keeps_short_runs_literal() -> Result<()> {
        let bytes = vec![0x80, 0x00, 0x00, 0x41, 0xff, 0xff, 0xff, 0xff, 0xff, 0x07];
        let encoded = encode(&bytes)?;

        // literal(4) ‖ 0xff×5 ‖ literal(1)
        assert_eq!(
            encoded,
            vec![8, 0x80, 0x00, 0x00, 0x41, (5 << 2) | 3, 2, 0x07]
        );
        assert_eq!(decode(&encoded)?, bytes);
        Ok(())
    }

    #[test]
    fn it_encodes_nothing_as_nothing() -> Result<()> {
        assert!(encode(&[])?.is_empty());
        assert!(decode(&[])?.is_empty());
        Ok(())
    }

    #[test]
    fn it_rejects_truncated_literals() {
        assert!(matches!(
            decode(&[6, 0xaa]),
            Err(VlogTreeError::MalformedBitfield(_))
        ));
    }

    #[test]
    fn it_rejects_oversized_runs() -> Result<()> {
        let mut encoded = Vec::new();
        leb128::write::unsigned(&mut encoded, ((MAX_DECODED_LENGTH as u64 + 1) << 2) | 1)?;

        assert!(matches!(
            decode(&encoded),
            Err(VlogTreeError::MalformedBitfield(_))
        ));
        Ok(())
    }

    #[test]
    fn it_rejects_truncated_headers() {
        assert!(decode(&[0x80]).is_err());
    }
}

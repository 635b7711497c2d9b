//! PNG text-chunk insertion.
//!
//! The lossless container carries the parameter string, the workflow JSON,
//! and each emitted field as its own text chunk, inserted after `IHDR` in an
//! already-encoded PNG stream. Latin-1-safe entries use `tEXt`; anything
//! else is written as an uncompressed `iTXt` chunk.

use crate::error::EncodeError;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// CRC-32 (IEEE 802.3) over chunk type + data, as PNG requires.
fn crc32(bytes: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

fn chunk(kind: &[u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 12);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut checked = kind.to_vec();
    checked.extend_from_slice(data);
    out.extend_from_slice(&crc32(&checked).to_be_bytes());
    out
}

fn text_chunk(keyword: &str, text: &str) -> Vec<u8> {
    let latin1_safe = text.chars().all(|c| (c as u32) < 256);
    if latin1_safe {
        let mut data = keyword.as_bytes().to_vec();
        data.push(0);
        data.extend(text.chars().map(|c| c as u8));
        chunk(b"tEXt", &data)
    } else {
        // iTXt: keyword \0 compression-flag \0 compression-method \0
        // language \0 translated-keyword \0 utf8-text
        let mut data = keyword.as_bytes().to_vec();
        data.extend_from_slice(&[0, 0, 0, 0, 0]);
        data.extend_from_slice(text.as_bytes());
        chunk(b"iTXt", &data)
    }
}

/// Inserts text entries after the IHDR chunk of an encoded PNG stream.
pub fn insert_text_chunks(
    encoded: &[u8],
    entries: &[(String, String)],
) -> Result<Vec<u8>, EncodeError> {
    let malformed = |reason: &str| EncodeError::InvalidContainer {
        container: "png",
        reason: reason.to_string(),
    };
    if encoded.len() < 8 || encoded[..8] != PNG_SIGNATURE {
        return Err(malformed("missing signature"));
    }
    // First chunk must be IHDR; its total size is 8 + length + 12.
    if encoded.len() < 16 || &encoded[12..16] != b"IHDR" {
        return Err(malformed("first chunk is not IHDR"));
    }
    let ihdr_len = u32::from_be_bytes([encoded[8], encoded[9], encoded[10], encoded[11]]) as usize;
    let insert_at = 8 + 8 + ihdr_len + 4;
    if encoded.len() < insert_at {
        return Err(malformed("truncated IHDR"));
    }

    let mut out = Vec::with_capacity(encoded.len() + entries.len() * 64);
    out.extend_from_slice(&encoded[..insert_at]);
    for (keyword, text) in entries {
        out.extend_from_slice(&text_chunk(keyword, text));
    }
    out.extend_from_slice(&encoded[insert_at..]);
    Ok(out)
}

/// Reads back all text entries (tEXt and uncompressed iTXt). Test helper
/// matching what downstream viewers parse.
pub fn read_text_chunks(encoded: &[u8]) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if encoded.len() < 8 || encoded[..8] != PNG_SIGNATURE {
        return out;
    }
    let mut pos = 8;
    while pos + 12 <= encoded.len() {
        let len = u32::from_be_bytes([
            encoded[pos],
            encoded[pos + 1],
            encoded[pos + 2],
            encoded[pos + 3],
        ]) as usize;
        let kind = &encoded[pos + 4..pos + 8];
        let data_start = pos + 8;
        let Some(data) = encoded.get(data_start..data_start + len) else {
            break;
        };
        if kind == b"tEXt" {
            if let Some(nul) = data.iter().position(|&b| b == 0) {
                let keyword = String::from_utf8_lossy(&data[..nul]).to_string();
                let text: String = data[nul + 1..].iter().map(|&b| b as char).collect();
                out.push((keyword, text));
            }
        } else if kind == b"iTXt" {
            if let Some(nul) = data.iter().position(|&b| b == 0) {
                let keyword = String::from_utf8_lossy(&data[..nul]).to_string();
                // Skip compression flag/method and two empty NUL-terminated
                // fields.
                let mut cursor = nul + 3;
                for _ in 0..2 {
                    if let Some(next) = data[cursor..].iter().position(|&b| b == 0) {
                        cursor += next + 1;
                    }
                }
                let text = String::from_utf8_lossy(&data[cursor..]).to_string();
                out.push((keyword, text));
            }
        }
        pos = data_start + len + 4;
    }
    out
}

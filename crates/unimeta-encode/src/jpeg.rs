//! JPEG segment splicing.
//!
//! The EXIF-constrained container: one APP1 segment holds the whole block,
//! with a hard per-segment ceiling, and the plain-text COM marker carries
//! the parameter string when EXIF has been dropped entirely.

use crate::error::EncodeError;

/// Hard single-segment payload ceiling: segment length field is 16-bit and
/// includes itself.
pub const SEGMENT_LIMIT: usize = 65_533;

/// COM payloads are clamped a little below the segment ceiling.
pub const COM_TEXT_LIMIT: usize = 60_000;

fn check_soi(encoded: &[u8]) -> Result<(), EncodeError> {
    if encoded.len() < 2 || encoded[0] != 0xFF || encoded[1] != 0xD8 {
        return Err(EncodeError::InvalidContainer {
            container: "jpeg",
            reason: "missing SOI marker".to_string(),
        });
    }
    Ok(())
}

fn segment(marker: u8, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    if payload.len() + 2 > 65_535 {
        return Err(EncodeError::EncoderRejected {
            size: payload.len(),
            limit: SEGMENT_LIMIT,
        });
    }
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((payload.len() as u16 + 2).to_be_bytes()));
    out.extend_from_slice(payload);
    Ok(out)
}

/// Inserts an APP1 EXIF segment right after SOI.
///
/// Fails with [`EncodeError::EncoderRejected`] when the block exceeds the
/// single-segment ceiling; the fallback controller escalates on that.
pub fn insert_app1_exif(encoded: &[u8], exif_block: &[u8]) -> Result<Vec<u8>, EncodeError> {
    check_soi(encoded)?;
    if exif_block.len() > SEGMENT_LIMIT {
        return Err(EncodeError::EncoderRejected {
            size: exif_block.len(),
            limit: SEGMENT_LIMIT,
        });
    }
    let app1 = segment(0xE1, exif_block)?;
    let mut out = Vec::with_capacity(encoded.len() + app1.len());
    out.extend_from_slice(&encoded[..2]);
    out.extend_from_slice(&app1);
    out.extend_from_slice(&encoded[2..]);
    Ok(out)
}

/// Appends a plain-text COM marker right after SOI. Text beyond
/// [`COM_TEXT_LIMIT`] bytes is truncated at a UTF-8 boundary.
pub fn append_com_marker(encoded: &[u8], text: &str) -> Result<Vec<u8>, EncodeError> {
    check_soi(encoded)?;
    let mut bytes = text.as_bytes();
    if bytes.len() > COM_TEXT_LIMIT {
        let mut cut = COM_TEXT_LIMIT;
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        bytes = &bytes[..cut];
    }
    let com = segment(0xFE, bytes)?;
    let mut out = Vec::with_capacity(encoded.len() + com.len());
    out.extend_from_slice(&encoded[..2]);
    out.extend_from_slice(&com);
    out.extend_from_slice(&encoded[2..]);
    Ok(out)
}

/// Walks the segment stream and returns the payload of the first marker of
/// the given kind. Test helper matching downstream readers.
pub fn find_segment(encoded: &[u8], marker: u8) -> Option<Vec<u8>> {
    if encoded.len() < 2 || encoded[0] != 0xFF || encoded[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= encoded.len() {
        if encoded[pos] != 0xFF {
            return None;
        }
        let kind = encoded[pos + 1];
        // Standalone markers and entropy-coded data end the scan.
        if kind == 0xDA {
            return None;
        }
        let len = u16::from_be_bytes([encoded[pos + 2], encoded[pos + 3]]) as usize;
        let payload = encoded.get(pos + 4..pos + 2 + len)?;
        if kind == marker {
            return Some(payload.to_vec());
        }
        pos += 2 + len;
    }
    None
}

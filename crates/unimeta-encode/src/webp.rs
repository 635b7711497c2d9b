//! WebP EXIF chunk insertion.
//!
//! The RIFF container needs a `VP8X` header chunk with the EXIF flag set
//! before an `EXIF` chunk is meaningful. Encoders typically emit plain
//! `VP8L`/`VP8 ` streams, so a `VP8X` is synthesized from the canvas size
//! when absent. Failure here is non-fatal to the save.

use crate::error::EncodeError;

const VP8X_EXIF_FLAG: u8 = 0x08;

fn malformed(reason: &str) -> EncodeError {
    EncodeError::InvalidContainer {
        container: "webp",
        reason: reason.to_string(),
    }
}

fn chunk(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8 + 1);
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn vp8x_chunk(width: u32, height: u32) -> Vec<u8> {
    let mut payload = vec![VP8X_EXIF_FLAG, 0, 0, 0];
    payload.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    payload.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    chunk(b"VP8X", &payload)
}

/// Appends an `EXIF` chunk (and a `VP8X` header when missing) to an encoded
/// WebP stream. `width`/`height` describe the canvas for a synthesized
/// `VP8X`.
pub fn insert_exif_chunk(
    encoded: &[u8],
    exif_block: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u8>, EncodeError> {
    if encoded.len() < 12 || &encoded[..4] != b"RIFF" || &encoded[8..12] != b"WEBP" {
        return Err(malformed("missing RIFF/WEBP header"));
    }
    if width == 0 || height == 0 {
        return Err(malformed("zero canvas dimension"));
    }

    let body = &encoded[12..];
    let has_vp8x = body.len() >= 4 && &body[..4] == b"VP8X";

    let mut out = Vec::with_capacity(encoded.len() + exif_block.len() + 40);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&[0, 0, 0, 0]); // patched below
    out.extend_from_slice(b"WEBP");

    if has_vp8x {
        // Set the EXIF bit on the existing header chunk.
        let mut patched = body.to_vec();
        patched[8] |= VP8X_EXIF_FLAG;
        out.extend_from_slice(&patched);
    } else {
        out.extend_from_slice(&vp8x_chunk(width, height));
        out.extend_from_slice(body);
    }
    // The EXIF chunk payload is the block without the "Exif\0\0" prefix.
    let payload = exif_block.strip_prefix(b"Exif\0\0".as_slice()).unwrap_or(exif_block);
    out.extend_from_slice(&chunk(b"EXIF", payload));

    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    Ok(out)
}

/// Returns the payload of the first chunk with the given fourcc.
pub fn find_chunk(encoded: &[u8], fourcc: &[u8; 4]) -> Option<Vec<u8>> {
    if encoded.len() < 12 || &encoded[..4] != b"RIFF" {
        return None;
    }
    let mut pos = 12;
    while pos + 8 <= encoded.len() {
        let kind = &encoded[pos..pos + 4];
        let len = u32::from_le_bytes([
            encoded[pos + 4],
            encoded[pos + 5],
            encoded[pos + 6],
            encoded[pos + 7],
        ]) as usize;
        let payload = encoded.get(pos + 8..pos + 8 + len)?;
        if kind == fourcc {
            return Some(payload.to_vec());
        }
        pos += 8 + len + (len % 2);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbaImage};
    use std::io::Cursor;

    fn encoded_webp() -> Vec<u8> {
        let image = RgbaImage::from_pixel(6, 4, image::Rgba([10, 20, 30, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::WebP).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn exif_chunk_is_appended_with_vp8x() {
        let webp = encoded_webp();
        let block = crate::exif::dump(
            &[],
            &[(
                crate::exif::TAG_USER_COMMENT,
                crate::exif::user_comment("Steps: 20"),
            )],
        );
        let with_exif = insert_exif_chunk(&webp, &block, 6, 4).unwrap();
        let vp8x = find_chunk(&with_exif, b"VP8X").unwrap();
        assert_eq!(vp8x[0] & VP8X_EXIF_FLAG, VP8X_EXIF_FLAG);
        // Canvas dims: stored minus one, 24-bit little endian.
        assert_eq!(vp8x[4], 5);
        assert_eq!(vp8x[7], 3);
        let exif = find_chunk(&with_exif, b"EXIF").unwrap();
        assert_eq!(&exif[..4], b"II*\0");
    }

    #[test]
    fn riff_size_is_patched() {
        let webp = encoded_webp();
        let with_exif = insert_exif_chunk(&webp, b"Exif\0\0II*\0rest", 6, 4).unwrap();
        let declared =
            u32::from_le_bytes([with_exif[4], with_exif[5], with_exif[6], with_exif[7]]) as usize;
        assert_eq!(declared, with_exif.len() - 8);
    }

    #[test]
    fn non_webp_is_rejected() {
        assert!(matches!(
            insert_exif_chunk(b"JFIF", b"x", 1, 1),
            Err(EncodeError::InvalidContainer { .. })
        ));
    }
}

//! Single-segment EXIF byte assembly.
//!
//! Builds the `Exif\0\0` + little-endian TIFF structure carrying the
//! workflow graph (0th IFD, camera-identity tags) and the parameter string
//! (Exif IFD `UserComment`). Fragmented multi-segment EXIF is out of scope;
//! oversize payloads are handled by the staged fallback, not here.

/// 0th-IFD tag carrying the workflow JSON (`Model`).
pub const TAG_MODEL: u16 = 0x0110;
/// 0th-IFD tag anchor for extra text entries (`Make`, decremented per entry).
pub const TAG_MAKE: u16 = 0x010F;
/// 0th-IFD pointer to the Exif IFD.
pub const TAG_EXIF_IFD: u16 = 0x8769;
/// Exif-IFD tag carrying the parameter string.
pub const TAG_USER_COMMENT: u16 = 0x9286;

const TYPE_ASCII: u16 = 2;
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;

/// A tag value in one of the TIFF types this crate emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ExifValue {
    /// NUL-terminated ASCII (the terminator is appended here).
    Ascii(String),
    /// Raw bytes.
    Undefined(Vec<u8>),
    /// One 32-bit unsigned value.
    Long(u32),
}

impl ExifValue {
    fn type_code(&self) -> u16 {
        match self {
            ExifValue::Ascii(_) => TYPE_ASCII,
            ExifValue::Undefined(_) => TYPE_UNDEFINED,
            ExifValue::Long(_) => TYPE_LONG,
        }
    }

    fn count(&self) -> u32 {
        match self {
            ExifValue::Ascii(s) => s.len() as u32 + 1,
            ExifValue::Undefined(bytes) => bytes.len() as u32,
            ExifValue::Long(_) => 1,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            ExifValue::Ascii(s) => {
                let mut bytes = s.as_bytes().to_vec();
                bytes.push(0);
                bytes
            }
            ExifValue::Undefined(bytes) => bytes.clone(),
            ExifValue::Long(v) => v.to_le_bytes().to_vec(),
        }
    }
}

/// Encodes a `UserComment` payload: `UNICODE\0` prefix plus UTF-16BE text.
pub fn user_comment(text: &str) -> ExifValue {
    let mut bytes = b"UNICODE\0".to_vec();
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    ExifValue::Undefined(bytes)
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

struct RawEntry {
    tag: u16,
    type_code: u16,
    count: u32,
    payload: Vec<u8>,
}

/// Serializes one IFD at `ifd_offset`; long payloads are appended to `data`
/// (whose final file position starts at `data_offset`).
fn write_ifd(
    entries: &[RawEntry],
    data_offset: u32,
    next_ifd: u32,
    data: &mut Vec<u8>,
) -> Vec<u8> {
    let mut out = Vec::new();
    push_u16(&mut out, entries.len() as u16);
    for entry in entries {
        push_u16(&mut out, entry.tag);
        push_u16(&mut out, entry.type_code);
        push_u32(&mut out, entry.count);
        if entry.payload.len() <= 4 {
            let mut inline = entry.payload.clone();
            inline.resize(4, 0);
            out.extend_from_slice(&inline);
        } else {
            push_u32(&mut out, data_offset + data.len() as u32);
            data.extend_from_slice(&entry.payload);
        }
    }
    push_u32(&mut out, next_ifd);
    out
}

fn to_raw(entries: &[(u16, ExifValue)]) -> Vec<RawEntry> {
    let mut raw: Vec<RawEntry> = entries
        .iter()
        .map(|(tag, value)| RawEntry {
            tag: *tag,
            type_code: value.type_code(),
            count: value.count(),
            payload: value.payload(),
        })
        .collect();
    // TIFF requires ascending tag order within an IFD.
    raw.sort_by_key(|e| e.tag);
    raw
}

/// Assembles a complete `Exif\0\0` block from 0th-IFD and Exif-IFD entries.
pub fn dump(zeroth: &[(u16, ExifValue)], exif: &[(u16, ExifValue)]) -> Vec<u8> {
    let mut zeroth_raw = to_raw(zeroth);
    let exif_raw = to_raw(exif);

    if !exif_raw.is_empty() {
        // Placeholder; patched below once the Exif IFD offset is known.
        zeroth_raw.push(RawEntry {
            tag: TAG_EXIF_IFD,
            type_code: TYPE_LONG,
            count: 1,
            payload: 0u32.to_le_bytes().to_vec(),
        });
        zeroth_raw.sort_by_key(|e| e.tag);
    }

    let ifd0_offset = 8u32;
    let ifd0_size = 2 + zeroth_raw.len() as u32 * 12 + 4;
    let exif_ifd_offset = ifd0_offset + ifd0_size;
    let exif_ifd_size = if exif_raw.is_empty() {
        0
    } else {
        2 + exif_raw.len() as u32 * 12 + 4
    };
    let data_offset = exif_ifd_offset + exif_ifd_size;

    if !exif_raw.is_empty() {
        for entry in &mut zeroth_raw {
            if entry.tag == TAG_EXIF_IFD {
                entry.payload = exif_ifd_offset.to_le_bytes().to_vec();
            }
        }
    }

    let mut data = Vec::new();
    let ifd0 = write_ifd(&zeroth_raw, data_offset, 0, &mut data);
    let exif_ifd = if exif_raw.is_empty() {
        Vec::new()
    } else {
        write_ifd(&exif_raw, data_offset, 0, &mut data)
    };

    let mut out = b"Exif\0\0".to_vec();
    out.extend_from_slice(b"II*\0");
    out.extend_from_slice(&ifd0_offset.to_le_bytes());
    out.extend_from_slice(&ifd0);
    out.extend_from_slice(&exif_ifd);
    out.extend_from_slice(&data);
    out
}

/// Extracts the UTF-16BE `UserComment` text back out of a dumped block.
/// Test helper mirroring what downstream readers do.
pub fn read_user_comment(block: &[u8]) -> Option<String> {
    let needle = b"UNICODE\0";
    let start = block
        .windows(needle.len())
        .position(|w| w == needle)?
        + needle.len();
    let payload = &block[start..];
    let mut units = Vec::new();
    for pair in payload.chunks_exact(2) {
        let unit = u16::from_be_bytes([pair[0], pair[1]]);
        if unit == 0 {
            break;
        }
        units.push(unit);
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_starts_with_exif_and_tiff_headers() {
        let block = dump(&[], &[(TAG_USER_COMMENT, user_comment("Steps: 20"))]);
        assert_eq!(&block[..6], b"Exif\0\0");
        assert_eq!(&block[6..10], b"II*\0");
    }

    #[test]
    fn user_comment_round_trips() {
        let text = "a cat\nNegative prompt: ugly\nSteps: 20, Seed: 123";
        let block = dump(&[], &[(TAG_USER_COMMENT, user_comment(text))]);
        assert_eq!(read_user_comment(&block).as_deref(), Some(text));
    }

    #[test]
    fn workflow_payload_lands_in_zeroth_ifd() {
        let workflow = r#"prompt:{"1":{"class_type":"KSampler"}}"#;
        let block = dump(
            &[(TAG_MODEL, ExifValue::Ascii(workflow.to_string()))],
            &[(TAG_USER_COMMENT, user_comment("params"))],
        );
        let haystack = block.as_slice();
        let found = haystack
            .windows(workflow.len())
            .any(|w| w == workflow.as_bytes());
        assert!(found);
    }

    #[test]
    fn size_scales_with_payload() {
        let small = dump(&[], &[(TAG_USER_COMMENT, user_comment("x"))]);
        let big = dump(
            &[],
            &[(TAG_USER_COMMENT, user_comment(&"y".repeat(10_000)))],
        );
        assert!(big.len() > small.len() + 15_000);
    }

    #[test]
    fn non_ascii_text_survives_utf16() {
        let text = "乱れ髪 ✨ prompt";
        let block = dump(&[], &[(TAG_USER_COMMENT, user_comment(text))]);
        assert_eq!(read_user_comment(&block).as_deref(), Some(text));
    }
}

//! Bit-exact FLV framing primitives shared by the GOP buffer.
//!
//! Pure, synchronous, allocation-light: these functions parse a single
//! header or tag out of a byte slice and report how many bytes were
//! consumed, so a caller can drive incremental parsing over a growing
//! buffer without ever re-scanning already-emitted bytes.

pub const HEADER_LEN: usize = 9;
const TAG_HEADER_LEN: usize = 11;
const PREV_TAG_SIZE_LEN: usize = 4;

pub const TAG_TYPE_AUDIO: u8 = 8;
pub const TAG_TYPE_VIDEO: u8 = 9;
pub const TAG_TYPE_SCRIPT: u8 = 18;

const ON_METADATA_MARKER: &[u8] = b"onMetadata";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlvHeader {
    pub version: u8,
    pub flags: u8,
    pub data_offset: u32,
}

/// Parse the 9-byte FLV file header. Returns `None` if `buf` is too short
/// or doesn't start with the `"FLV"` signature.
pub fn parse_header(buf: &[u8]) -> Option<FlvHeader> {
    if buf.len() < HEADER_LEN || &buf[0..3] != b"FLV" {
        return None;
    }

    Some(FlvHeader {
        version: buf[3],
        flags: buf[4],
        data_offset: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagHeader {
    pub tag_type: u8,
    pub data_size: u32,
    pub timestamp: u32,
    pub stream_id: u32,
}

/// A fully-parsed tag: the 4-byte previous-tag-size field, the 11-byte tag
/// header, and the tag's payload all live contiguously starting at the
/// offset this was parsed from; `total_len` is how many bytes the whole
/// unit (prev-size + header + payload) occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTag {
    pub header: TagHeader,
    pub payload_offset: usize,
    pub total_len: usize,
}

/// Attempt to parse one `[prev-tag-size][tag header][payload]` unit
/// starting at `buf[0]`. Returns `None` if `buf` doesn't yet hold the full
/// tag (caller should wait for more bytes), not if the tag is malformed —
/// malformed detection is the caller's job (tag sizes that never resolve to
/// a plausible boundary).
pub fn parse_tag(buf: &[u8]) -> Option<ParsedTag> {
    if buf.len() < PREV_TAG_SIZE_LEN + TAG_HEADER_LEN {
        return None;
    }

    let header_start = PREV_TAG_SIZE_LEN;
    let tag_type = buf[header_start];
    let data_size = u32::from_be_bytes([
        0,
        buf[header_start + 1],
        buf[header_start + 2],
        buf[header_start + 3],
    ]);
    let timestamp_lower = u32::from_be_bytes([
        0,
        buf[header_start + 4],
        buf[header_start + 5],
        buf[header_start + 6],
    ]);
    let timestamp_ext = buf[header_start + 7] as u32;
    let timestamp = (timestamp_ext << 24) | timestamp_lower;
    let stream_id = u32::from_be_bytes([
        0,
        buf[header_start + 8],
        buf[header_start + 9],
        buf[header_start + 10],
    ]);

    let payload_offset = PREV_TAG_SIZE_LEN + TAG_HEADER_LEN;
    let total_len = payload_offset + data_size as usize;

    if buf.len() < total_len {
        return None;
    }

    Some(ParsedTag {
        header: TagHeader {
            tag_type,
            data_size,
            timestamp,
            stream_id,
        },
        payload_offset,
        total_len,
    })
}

/// Upper nibble of a video tag's first payload byte: 1 ⇒ keyframe.
pub fn video_frame_type(payload: &[u8]) -> Option<u8> {
    payload.first().map(|byte| byte >> 4)
}

pub fn is_keyframe(payload: &[u8]) -> bool {
    video_frame_type(payload) == Some(1)
}

/// Whether a script tag's payload begins with the AMF0-encoded string
/// `"onMetadata"` (type marker `0x02`, 2-byte big-endian length, then the
/// UTF-8 bytes).
pub fn is_on_metadata_script(payload: &[u8]) -> bool {
    const PREFIX_LEN: usize = 1 + 2; // marker + length
    if payload.len() < PREFIX_LEN + ON_METADATA_MARKER.len() {
        return false;
    }
    if payload[0] != 0x02 {
        return false;
    }
    let len = u16::from_be_bytes([payload[1], payload[2]]) as usize;
    len == ON_METADATA_MARKER.len()
        && &payload[PREFIX_LEN..PREFIX_LEN + ON_METADATA_MARKER.len()] == ON_METADATA_MARKER
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Vec<u8> {
        vec![b'F', b'L', b'V', 1, 0x05, 0x00, 0x00, 0x00, 0x09]
    }

    fn amf0_on_metadata() -> Vec<u8> {
        let mut payload = vec![0x02, 0x00, 0x0A];
        payload.extend_from_slice(b"onMetadata");
        payload.extend_from_slice(&[0x08, 0x00, 0x00, 0x00, 0x00]); // ECMA array, empty
        payload
    }

    fn build_tag(tag_type: u8, payload: &[u8]) -> Vec<u8> {
        let mut tag = Vec::new();
        tag.extend_from_slice(&0u32.to_be_bytes()); // previous tag size placeholder
        tag.push(tag_type);
        let size = payload.len() as u32;
        tag.extend_from_slice(&size.to_be_bytes()[1..4]);
        tag.extend_from_slice(&[0, 0, 0]); // timestamp
        tag.push(0); // timestamp extended
        tag.extend_from_slice(&[0, 0, 0]); // stream id
        tag.extend_from_slice(payload);
        tag
    }

    #[test]
    fn parses_well_formed_header() {
        let header = parse_header(&sample_header()).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.flags, 0x05);
        assert_eq!(header.data_offset, 9);
    }

    #[test]
    fn rejects_short_or_bad_signature() {
        assert!(parse_header(b"FL").is_none());
        assert!(parse_header(b"NOTFLVHDR").is_none());
    }

    #[test]
    fn parses_script_tag_with_on_metadata() {
        let payload = amf0_on_metadata();
        let tag = build_tag(TAG_TYPE_SCRIPT, &payload);
        let parsed = parse_tag(&tag).unwrap();
        assert_eq!(parsed.header.tag_type, TAG_TYPE_SCRIPT);
        assert_eq!(parsed.total_len, tag.len());
        let tag_payload = &tag[parsed.payload_offset..parsed.total_len];
        assert!(is_on_metadata_script(tag_payload));
    }

    #[test]
    fn incomplete_tag_returns_none() {
        let payload = vec![0u8; 20];
        let tag = build_tag(TAG_TYPE_VIDEO, &payload);
        assert!(parse_tag(&tag[..tag.len() - 5]).is_none());
    }

    #[test]
    fn keyframe_detection_reads_upper_nibble() {
        assert!(is_keyframe(&[0x17, 0, 0]));
        assert!(!is_keyframe(&[0x27, 0, 0]));
        assert_eq!(video_frame_type(&[]), None);
    }

    #[test]
    fn video_tag_timestamp_combines_extension_byte() {
        let mut tag = build_tag(TAG_TYPE_VIDEO, &[0x17, 0, 0]);
        // timestamp lower 3 bytes at offset 4+4=8..11, ext byte at 11
        tag[8] = 0x00;
        tag[9] = 0x00;
        tag[10] = 0x01;
        tag[11] = 0x02; // extension becomes the high byte
        let parsed = parse_tag(&tag).unwrap();
        assert_eq!(parsed.header.timestamp, (2u32 << 24) | 1);
    }
}

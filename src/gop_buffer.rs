//! Bootstrap-prefix cache for late-joining viewers.
//!
//! Maintains `header_prefix` (FLV header through the first `onMetadata`
//! script tag, or up to the first tag if none appears), `previous_gop`, and
//! `current_gop`. `bootstrap()` hands a fresh viewer enough bytes to begin
//! decoding without waiting a full GOP interval.

use bytes::{Bytes, BytesMut};

use crate::flv;

/// Bound on how far the parser will scan forward looking for a tag boundary
/// before giving up and treating the stream as unparseable-for-now. This
/// keeps a corrupt or non-FLV byte stream from making `ingest` do
/// unbounded work per call; the raw bytes are still forwarded regardless.
const RESYNC_SCAN_LIMIT: usize = 4 * 1024 * 1024;

/// Outcome of one `consume_header` attempt.
enum HeaderProgress {
    /// Header (and onMetadata tag, if any) fully captured.
    Found,
    /// Not enough bytes yet to decide either way.
    Waiting,
    /// Scanned past `RESYNC_SCAN_LIMIT` without finding a valid header;
    /// `pending` has been cleared so the byte stream can't pin unbounded
    /// memory waiting for an "FLV" signature that may never arrive.
    GaveUp,
}

#[derive(Debug, Default)]
pub struct GopBuffer {
    header_prefix: BytesMut,
    header_seen: bool,
    previous_gop: BytesMut,
    current_gop: BytesMut,
    pending: BytesMut,
    /// Byte offset within `pending` the parser has already scanned up to
    /// without finding a valid tag boundary (malformed-stream resync).
    scan_offset: usize,
}

impl GopBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and parse as much as can be resolved immediately.
    /// Never blocks; never re-emits or rewrites bytes already folded into
    /// `header_prefix`/`previous_gop`/`current_gop`. Returns `true` if this
    /// call gave up on finding a tag boundary within the resync scan limit
    /// (malformed or non-FLV stream), so the caller can count it.
    pub fn ingest(&mut self, chunk: &[u8]) -> bool {
        self.pending.extend_from_slice(chunk);
        self.drive_parser()
    }

    /// `header_prefix ++ previous_gop ++ current_gop`, or empty if the
    /// header hasn't been observed yet.
    pub fn bootstrap(&self) -> Bytes {
        if !self.header_seen {
            return Bytes::new();
        }

        let mut out =
            BytesMut::with_capacity(self.header_prefix.len() + self.previous_gop.len() + self.current_gop.len());
        out.extend_from_slice(&self.header_prefix);
        out.extend_from_slice(&self.previous_gop);
        out.extend_from_slice(&self.current_gop);
        out.freeze()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn header_seen(&self) -> bool {
        self.header_seen
    }

    fn drive_parser(&mut self) -> bool {
        if !self.header_seen {
            match self.consume_header() {
                HeaderProgress::Found => {}
                HeaderProgress::Waiting => return false,
                HeaderProgress::GaveUp => return true,
            }
        }

        let mut resynced = false;
        loop {
            let window = &self.pending[self.scan_offset..];
            match flv::parse_tag(window) {
                Some(parsed) => {
                    let tag_bytes = self.pending[self.scan_offset..self.scan_offset + parsed.total_len].to_vec();
                    let payload = &tag_bytes[parsed.payload_offset..parsed.total_len];

                    if parsed.header.tag_type == flv::TAG_TYPE_VIDEO && flv::is_keyframe(payload) {
                        self.previous_gop = std::mem::take(&mut self.current_gop);
                        self.current_gop = BytesMut::new();
                    }
                    self.current_gop.extend_from_slice(&tag_bytes);

                    self.scan_offset += parsed.total_len;
                }
                None => {
                    if window.len() > RESYNC_SCAN_LIMIT {
                        // Can't resolve a tag boundary within a sane lookahead;
                        // stop updating bootstrap state until the stream
                        // resynchronizes. Raw bytes are still forwarded by the
                        // caller regardless of what GopBuffer does.
                        self.scan_offset = self.pending.len();
                        resynced = true;
                    }
                    break;
                }
            }
        }

        self.compact();
        resynced
    }

    /// Consume the FLV header and, if present, the leading `onMetadata`
    /// script tag into `header_prefix`.
    fn consume_header(&mut self) -> HeaderProgress {
        let header = match flv::parse_header(&self.pending) {
            Some(header) => header,
            None => {
                // Either too short so far, or the stream will never start
                // with "FLV" at all. Both look the same here, so bound the
                // wait the same way the tag-boundary search below does:
                // past the scan limit, give up and drop what's accumulated
                // rather than growing `pending` for the life of the run.
                if self.pending.len() > RESYNC_SCAN_LIMIT {
                    self.pending.clear();
                    return HeaderProgress::GaveUp;
                }
                return HeaderProgress::Waiting;
            }
        };

        let offset = header.data_offset.max(flv::HEADER_LEN as u32) as usize;
        if self.pending.len() < offset {
            if self.pending.len() > RESYNC_SCAN_LIMIT {
                self.pending.clear();
                return HeaderProgress::GaveUp;
            }
            return HeaderProgress::Waiting;
        }

        // Peek at the first tag after the header: if it's an onMetadata
        // script tag, fold it into the header prefix too; otherwise the
        // prefix ends at the header.
        match flv::parse_tag(&self.pending[offset..]) {
            Some(parsed) => {
                let tag_end = offset + parsed.total_len;
                let payload_start = offset + parsed.payload_offset;
                let payload = &self.pending[payload_start..tag_end];
                let is_meta =
                    parsed.header.tag_type == flv::TAG_TYPE_SCRIPT && flv::is_on_metadata_script(payload);

                if is_meta {
                    self.header_prefix.extend_from_slice(&self.pending[..tag_end]);
                    self.scan_offset = tag_end;
                } else {
                    self.header_prefix.extend_from_slice(&self.pending[..offset]);
                    self.scan_offset = offset;
                }
                self.header_seen = true;
                HeaderProgress::Found
            }
            None => {
                if self.pending.len() - offset > RESYNC_SCAN_LIMIT {
                    // No script tag is going to arrive; stop waiting.
                    self.header_prefix.extend_from_slice(&self.pending[..offset]);
                    self.scan_offset = offset;
                    self.header_seen = true;
                    return HeaderProgress::Found;
                }
                HeaderProgress::Waiting
            }
        }
    }

    /// Drop bytes already folded into header/GOP state from `pending` so it
    /// doesn't grow unbounded, keeping only the unparsed tail.
    fn compact(&mut self) {
        if self.scan_offset > 0 {
            let _ = self.pending.split_to(self.scan_offset);
            self.scan_offset = 0;
        }
    }
}

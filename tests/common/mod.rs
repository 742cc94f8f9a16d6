//! Shared helpers assembling byte-exact logs for the integration tests.

#![allow(dead_code)]

use barogram::{Decoder, Frame, FramePayload, FrameKind, LogEvent, LOG_MAGIC};

/// Encode an unsigned variable-byte integer, 7 bits per byte.
pub fn encode_unsigned_vb(mut value: u32) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            return out;
        }
    }
}

/// Encode a signed variable-byte integer with zig-zag mapping.
pub fn encode_signed_vb(value: i32) -> Vec<u8> {
    encode_unsigned_vb((value.wrapping_shl(1) ^ (value >> 31)) as u32)
}

/// Byte-level builder for a whole log session.
pub struct LogBuilder {
    bytes: Vec<u8>,
}

impl LogBuilder {
    /// Start a session with the magic product line.
    pub fn new() -> Self {
        Self {
            bytes: LOG_MAGIC.to_vec(),
        }
    }

    /// Append one `H <key>:<value>` header line.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.bytes
            .extend_from_slice(format!("H {key}:{value}\n").as_bytes());
        self
    }

    /// The main-frame definitions most scenarios share: a loop iteration
    /// counter carried by the increment predictor and an absolute
    /// variable-byte timestamp.
    pub fn minimal_main_defs(self) -> Self {
        self.header("Field I name", "loopIteration,time")
            .header("Field I signed", "0,0")
            .header("Field I predictor", "6,0")
            .header("Field I encoding", "1,1")
            .header("Field P predictor", "6,2")
            .header("Field P encoding", "1,0")
    }

    /// Append raw bytes.
    pub fn push(mut self, bytes: &[u8]) -> Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    /// Append a frame marker byte.
    pub fn marker(self, marker: u8) -> Self {
        let bytes = [marker];
        self.push(&bytes)
    }

    /// Append an unsigned variable-byte value.
    pub fn uvb(self, value: u32) -> Self {
        let bytes = encode_unsigned_vb(value);
        self.push(&bytes)
    }

    /// Append a signed variable-byte value.
    pub fn svb(self, value: i32) -> Self {
        let bytes = encode_signed_vb(value);
        self.push(&bytes)
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Everything one callback invocation reported, with the borrowed
/// payload copied out.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Fields {
        kind: FrameKind,
        valid: bool,
        values: Vec<i32>,
        start: usize,
        size: usize,
    },
    Event {
        event: LogEvent,
        start: usize,
        size: usize,
    },
    Corrupt {
        kind: FrameKind,
        start: usize,
        size: usize,
    },
}

impl Seen {
    pub fn capture(frame: Frame<'_>) -> Self {
        match frame.payload {
            Some(FramePayload::Fields(values)) => Seen::Fields {
                kind: frame.kind,
                valid: frame.valid,
                values: values.to_vec(),
                start: frame.start,
                size: frame.size,
            },
            Some(FramePayload::Event(event)) => Seen::Event {
                event: event.clone(),
                start: frame.start,
                size: frame.size,
            },
            None => Seen::Corrupt {
                kind: frame.kind,
                start: frame.start,
                size: frame.size,
            },
        }
    }
}

/// Run one pass over the data section, collecting every framed unit.
pub fn collect_frames(decoder: &mut Decoder<'_>, raw: bool, start: usize) -> Vec<Seen> {
    let mut seen = Vec::new();
    decoder
        .parse_log_data(raw, start, None, &mut |frame: Frame<'_>| {
            seen.push(Seen::capture(frame));
        })
        .expect("data section should decode");
    seen
}

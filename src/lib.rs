//! An efficient decoder for the Blackbox flight data recorder log format.
//!
//! Blackbox logs are emitted at loop rate by multicopter flight
//! controllers: a text header describing the firmware, its tuning values
//! and the field layout of every frame type, followed by a stream of
//! differentially-encoded binary frames with no length prefixes. This
//! crate reverses that encoding, reconstructing absolute field values
//! from predictor arithmetic and history, while staying resilient to
//! truncation and byte-level corruption in the middle of the stream.
//!
//! Bind a [`Decoder`] to a byte buffer, parse the header, then walk the
//! data section; every framed unit, corrupt stretches included, is
//! published to a [`FrameSink`] of your choosing.
//!
//! ```no_run
//! use barogram::{Decoder, Frame, FramePayload};
//!
//! let bytes = std::fs::read("flight.bbl").unwrap();
//! let mut decoder = Decoder::new(&bytes);
//! let data_start = decoder.parse_header(0, bytes.len()).unwrap();
//! decoder
//!     .parse_log_data(false, data_start, None, &mut |frame: Frame<'_>| {
//!         if let (true, Some(FramePayload::Fields(values))) = (frame.valid, frame.payload) {
//!             println!("{:?} {:?}", frame.kind, values);
//!         }
//!     })
//!     .unwrap();
//! ```
//!
//! The decoder is synchronous and single-threaded; all state is owned by
//! the instance, and distinct instances may run in parallel on disjoint
//! inputs.

pub mod decode;
pub mod event;
pub mod header;
pub mod schema;
pub mod stats;
pub mod stream;

pub use decode::{DecodeError, Decoder, Frame, FramePayload, FrameSink};
pub use event::LogEvent;
pub use header::{Firmware, HeaderError, SysConfig, LOG_MAGIC};
pub use schema::{Encoding, FrameDef, FrameDefs, FrameKind, Predictor};
pub use stats::Stats;

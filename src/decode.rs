//! Frame-level decoding: history rings, predictor evaluation, and the
//! dispatcher state machine.
//!
//! The data section is a run of frames with no length prefixes and no
//! terminators; a frame's boundary is only established once the byte
//! after it turns out to be another frame marker (or a clean end of
//! stream). The dispatcher therefore always holds at most one frame in
//! flight, and condemns it as corrupt when the byte after it is not a
//! believable boundary, rewinding to resynchronize one byte past the
//! failed frame's start.
//!
//! Decoded frames are published to a caller-supplied [`FrameSink`]. The
//! arrays handed to the sink are owned by the decoder and reused for the
//! next frame; a sink that wants to keep them must copy them out.

use thiserror::Error;

use crate::event::{self, LogEvent};
use crate::header::{self, HeaderError, SysConfig};
use crate::schema::{
    Encoding, FrameDef, FrameDefs, FrameKind, Predictor, ITERATION_INDEX, TIME_INDEX,
};
use crate::stats::Stats;
use crate::stream::ByteStream;

/// Largest frame a healthy log can produce, marker included. Anything
/// longer is treated as corruption.
pub(crate) const MAX_FRAME_SIZE: usize = 256;

/// Largest believable forward jump of the loop iteration counter between
/// consecutive accepted frames.
const MAX_ITERATION_JUMP: i64 = 5000;
/// Largest believable forward jump of the timestamp between consecutive
/// accepted frames, in microseconds.
const MAX_TIME_JUMP: i64 = 10_000_000;

/// An error that makes the data section unprocessable. Corruption within
/// individual frames is not an error; the dispatcher recovers from it and
/// reports it through the sink and the statistics.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame schema is unusable or was never parsed.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// The header declared a predictor this decoder does not implement.
    #[error("Unsupported field predictor {0}.")]
    UnsupportedPredictor(i64),
    /// The header declared an encoding this decoder does not implement.
    #[error("Unsupported field encoding {0}.")]
    UnsupportedEncoding(i64),
    /// A field has no predictor assigned.
    #[error("Field {index} of the {kind} frame definition has no predictor.")]
    MissingPredictor { kind: FrameKind, index: usize },
    /// A field has no encoding assigned.
    #[error("Field {index} of the {kind} frame definition has no encoding.")]
    MissingEncoding { kind: FrameKind, index: usize },
    /// A prediction referenced `motor[0]`, which the I definition lacks.
    #[error("Attempted to base a prediction on motor[0] without a motor[0] field.")]
    MissingMotorReference,
    /// A prediction referenced the GPS home position without a usable
    /// home frame definition.
    #[error("Attempted to base a prediction on the GPS home position without a home definition.")]
    MissingHomeReference,
}

/// One framed unit delivered to the sink.
#[derive(Debug)]
pub struct Frame<'a> {
    pub kind: FrameKind,
    /// Whether the frame passed validation. Corrupt stretches and frames
    /// rejected by iteration or time checks are delivered invalid.
    pub valid: bool,
    /// Decoded content, absent for corrupt stretches. Borrowed from the
    /// decoder and overwritten after the callback returns.
    pub payload: Option<FramePayload<'a>>,
    /// Byte offset of the frame marker within the input buffer.
    pub start: usize,
    /// Bytes spanned, marker included.
    pub size: usize,
}

/// Decoded frame content.
#[derive(Debug)]
pub enum FramePayload<'a> {
    /// Field values of an I, P, G, H or S frame, in definition order.
    Fields(&'a [i32]),
    /// The decoded event of an E frame.
    Event(&'a LogEvent),
}

/// Receiver for framed units, invoked inline as the dispatcher advances.
pub trait FrameSink {
    fn on_frame_ready(&mut self, frame: Frame<'_>);
}

impl<F: FnMut(Frame<'_>)> FrameSink for F {
    fn on_frame_ready(&mut self, frame: Frame<'_>) {
        self(frame)
    }
}

/// Dispatcher state: between frames, or holding one frame whose boundary
/// has not been established yet.
#[derive(Debug, Clone, Copy)]
enum DispatchState {
    Seeking,
    InFrame {
        kind: FrameKind,
        start: usize,
        premature_eof: bool,
    },
}

/// Context the predictors draw on besides the frame's own history.
struct PredictContext<'c> {
    config: &'c SysConfig,
    motor0: Option<usize>,
    home: Option<HomeContext<'c>>,
    last_main_time: Option<i32>,
}

struct HomeContext<'c> {
    values: &'c [i32],
    coord0: Option<usize>,
    coord1: Option<usize>,
}

/// Decoder for one log session's byte range.
///
/// Bind it to a buffer, parse the header to establish the schema, then
/// walk the data section with [`parse_log_data`](Self::parse_log_data).
pub struct Decoder<'a> {
    data: &'a [u8],
    sys_config: SysConfig,
    frame_defs: FrameDefs,
    stats: Stats,

    // Main-frame history: three backing buffers addressed by slot index,
    // so that rotating generations never aliases two live borrows.
    main_ring: [Vec<i32>; 3],
    main_current: usize,
    /// Slots holding the previous and previous-previous accepted frames.
    /// Both point at the same slot right after an I frame.
    main_history: Option<(usize, usize)>,

    /// Slot 0 is the decode target, slot 1 the published home position.
    gps_home_ring: [Vec<i32>; 2],
    gps_home_valid: bool,
    last_gps: Vec<i32>,
    last_slow: Vec<i32>,
    last_event: Option<LogEvent>,

    /// Iteration of the last accepted main frame, -1 before the first.
    last_iteration: i64,
    /// Timestamp of the last accepted main frame, -1 before the first.
    last_time: i64,
    main_stream_valid: bool,
}

impl<'a> Decoder<'a> {
    /// Bind a decoder to an input buffer.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            sys_config: SysConfig::default(),
            frame_defs: FrameDefs::default(),
            stats: Stats::default(),
            main_ring: [Vec::new(), Vec::new(), Vec::new()],
            main_current: 0,
            main_history: None,
            gps_home_ring: [Vec::new(), Vec::new()],
            gps_home_valid: false,
            last_gps: Vec::new(),
            last_slow: Vec::new(),
            last_event: None,
            last_iteration: -1,
            last_time: -1,
            main_stream_valid: false,
        }
    }

    /// The configuration parsed from the header.
    pub fn sys_config(&self) -> &SysConfig {
        &self.sys_config
    }

    /// The frame definitions parsed from the header.
    pub fn frame_defs(&self) -> &FrameDefs {
        &self.frame_defs
    }

    /// Counters accumulated over all parsing since the last reset.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Parse the header lines in `data[start..end]`, populating the
    /// configuration and frame definitions and sizing the history
    /// buffers. Returns the offset of the first data-section byte.
    pub fn parse_header(&mut self, start: usize, end: usize) -> Result<usize, HeaderError> {
        let mut stream = ByteStream::window(self.data, start, end);
        header::parse(&mut stream, &mut self.sys_config, &mut self.frame_defs)?;
        self.allocate_history();
        self.reset_data_state();
        Ok(stream.pos)
    }

    /// Zero the history buffers and last-frame markers, keeping the
    /// configuration and definitions. Decoding restarted afterwards
    /// behaves as if the data section had never been read.
    pub fn reset_data_state(&mut self) {
        self.last_iteration = -1;
        self.last_time = -1;
        self.main_stream_valid = false;
        self.gps_home_valid = false;
        self.last_event = None;
        self.main_current = 0;
        self.main_history = None;
        for slot in &mut self.main_ring {
            slot.fill(0);
        }
        for slot in &mut self.gps_home_ring {
            slot.fill(0);
        }
        self.last_gps.fill(0);
        self.last_slow.fill(0);
    }

    /// Clear everything, configuration and definitions included, as if
    /// the decoder had just been bound to the buffer.
    pub fn reset_all_state(&mut self) {
        self.sys_config = SysConfig::default();
        self.frame_defs = FrameDefs::default();
        self.stats.reset();
        for slot in &mut self.main_ring {
            slot.clear();
        }
        for slot in &mut self.gps_home_ring {
            slot.clear();
        }
        self.last_gps.clear();
        self.last_slow.clear();
        self.reset_data_state();
    }

    /// Publish a GPS home position supplied by the caller, as if an H
    /// frame carrying it had been decoded. A length mismatch against the
    /// H definition invalidates the home position instead.
    pub fn set_gps_home_history(&mut self, values: &[i32]) {
        let count = self.frame_defs.gps_home.as_ref().map_or(0, FrameDef::count);
        if count > 0 && count == values.len() {
            self.gps_home_ring[1].copy_from_slice(values);
            self.gps_home_valid = true;
        } else {
            self.gps_home_valid = false;
        }
    }

    /// Decode every frame in `data[start..end]` (the whole buffer tail
    /// when `end` is `None`), publishing each framed unit to the sink.
    ///
    /// With `raw` set, prediction is suppressed and fields carry the
    /// values found on the wire; frame validation is suspended with it.
    pub fn parse_log_data<S: FrameSink>(
        &mut self,
        raw: bool,
        start: usize,
        end: Option<usize>,
        sink: &mut S,
    ) -> Result<(), DecodeError> {
        // The same gate the header parser applies, repeated here so a
        // decoder whose header was never parsed fails identically.
        self.frame_defs.require_main_definitions()?;

        // Deltas cannot be trusted until an I frame is seen.
        self.main_stream_valid = false;

        let end = end.unwrap_or(self.data.len());
        let mut stream = ByteStream::window(self.data, start, end);
        let mut state = DispatchState::Seeking;

        loop {
            let marker = stream.read_char();

            if let DispatchState::InFrame {
                kind,
                start: frame_start,
                premature_eof,
            } = state
            {
                let boundary = match marker {
                    Some(_) => stream.pos - 1,
                    None => stream.pos,
                };
                let size = boundary - frame_start;
                let framed = match marker {
                    Some(m) => FrameKind::from_marker(m).is_some(),
                    None => !premature_eof,
                };

                if size <= MAX_FRAME_SIZE && framed {
                    self.complete_frame(kind, frame_start, size, raw, sink);
                    state = DispatchState::Seeking;
                } else {
                    self.stats.total_corrupt_frames += 1;
                    self.stats.frame_mut(kind).corrupt_count += 1;
                    self.main_stream_valid = false;
                    sink.on_frame_ready(Frame {
                        kind,
                        valid: false,
                        payload: None,
                        start: frame_start,
                        size,
                    });
                    // Resume the marker search one byte past the failed
                    // frame's start, in case it was merely truncated.
                    stream.pos = frame_start + 1;
                    stream.eof = false;
                    state = DispatchState::Seeking;
                    continue;
                }
            }

            let Some(marker) = marker else { break };

            let frame_start = stream.pos - 1;
            state = match FrameKind::from_marker(marker) {
                Some(kind)
                    if kind == FrameKind::Event || self.frame_defs.get(kind).is_some() =>
                {
                    self.parse_frame_body(kind, &mut stream, raw)?;
                    DispatchState::InFrame {
                        kind,
                        start: frame_start,
                        premature_eof: stream.eof,
                    }
                }
                _ => DispatchState::Seeking,
            };
        }

        Ok(())
    }

    fn allocate_history(&mut self) {
        let main = self.frame_defs.intra.as_ref().map_or(0, FrameDef::count);
        for slot in &mut self.main_ring {
            slot.clear();
            slot.resize(main, 0);
        }
        let home = self.frame_defs.gps_home.as_ref().map_or(0, FrameDef::count);
        for slot in &mut self.gps_home_ring {
            slot.clear();
            slot.resize(home, 0);
        }
        let gps = self.frame_defs.gps.as_ref().map_or(0, FrameDef::count);
        self.last_gps.clear();
        self.last_gps.resize(gps, 0);
        let slow = self.frame_defs.slow.as_ref().map_or(0, FrameDef::count);
        self.last_slow.clear();
        self.last_slow.resize(slow, 0);
    }

    fn parse_frame_body(
        &mut self,
        kind: FrameKind,
        stream: &mut ByteStream<'_>,
        raw: bool,
    ) -> Result<(), DecodeError> {
        match kind {
            FrameKind::Intra => self.parse_main_frame(kind, stream, raw, 0),
            FrameKind::Inter => {
                let skipped = self.count_skipped_to_next();
                self.parse_main_frame(kind, stream, raw, skipped)
            }
            FrameKind::Gps | FrameKind::GpsHome | FrameKind::Slow => {
                self.parse_auxiliary_frame(kind, stream, raw)
            }
            FrameKind::Event => {
                self.last_event = event::parse(stream);
                Ok(())
            }
        }
    }

    fn parse_main_frame(
        &mut self,
        kind: FrameKind,
        stream: &mut ByteStream<'_>,
        raw: bool,
        skipped: i64,
    ) -> Result<(), DecodeError> {
        let def = match kind {
            FrameKind::Intra => self.frame_defs.intra.as_ref(),
            _ => self.frame_defs.inter.as_ref(),
        };
        let Some(def) = def else {
            return Ok(());
        };

        let mut current = std::mem::take(&mut self.main_ring[self.main_current]);
        let (previous, previous2) = match (kind, self.main_history) {
            // P frames may reach back two generations; an I frame only
            // consults the previous one.
            (FrameKind::Inter, Some((p, p2))) => {
                (Some(self.main_ring[p].as_slice()), Some(self.main_ring[p2].as_slice()))
            }
            (_, Some((p, _))) => (Some(self.main_ring[p].as_slice()), None),
            _ => (None, None),
        };

        let ctx = self.predict_context();
        let result = parse_fields(
            stream,
            def,
            kind,
            &ctx,
            previous,
            previous2,
            skipped,
            raw,
            self.sys_config.data_version,
            &mut current,
        );
        self.main_ring[self.main_current] = current;
        result
    }

    fn parse_auxiliary_frame(
        &mut self,
        kind: FrameKind,
        stream: &mut ByteStream<'_>,
        raw: bool,
    ) -> Result<(), DecodeError> {
        let Some(def) = self.frame_defs.get(kind) else {
            return Ok(());
        };

        let mut current = match kind {
            FrameKind::Gps => std::mem::take(&mut self.last_gps),
            FrameKind::GpsHome => std::mem::take(&mut self.gps_home_ring[0]),
            FrameKind::Slow => std::mem::take(&mut self.last_slow),
            _ => return Ok(()),
        };

        let ctx = self.predict_context();
        let result = parse_fields(
            stream,
            def,
            kind,
            &ctx,
            None,
            None,
            0,
            raw,
            self.sys_config.data_version,
            &mut current,
        );

        match kind {
            FrameKind::Gps => self.last_gps = current,
            FrameKind::GpsHome => self.gps_home_ring[0] = current,
            FrameKind::Slow => self.last_slow = current,
            _ => {}
        }
        result
    }

    fn predict_context(&self) -> PredictContext<'_> {
        PredictContext {
            config: &self.sys_config,
            motor0: self
                .frame_defs
                .intra
                .as_ref()
                .and_then(|def| def.index_of("motor[0]")),
            home: self.frame_defs.gps_home.as_ref().map(|def| HomeContext {
                values: &self.gps_home_ring[1],
                coord0: def.index_of("GPS_home[0]"),
                coord1: def.index_of("GPS_home[1]"),
            }),
            last_main_time: self
                .main_history
                .and_then(|(p, _)| self.main_ring[p].get(TIME_INDEX).copied()),
        }
    }

    fn complete_frame<S: FrameSink>(
        &mut self,
        kind: FrameKind,
        start: usize,
        size: usize,
        raw: bool,
        sink: &mut S,
    ) {
        {
            let frame_stats = self.stats.frame_mut(kind);
            frame_stats.bytes += size as u64;
            frame_stats.size_count[size] += 1;
        }
        self.stats.total_bytes += size as u64;

        match kind {
            FrameKind::Intra => self.complete_intra(start, size, raw, sink),
            FrameKind::Inter => self.complete_inter(start, size, raw, sink),
            FrameKind::Gps => self.complete_gps(start, size, sink),
            FrameKind::GpsHome => self.complete_gps_home(start, size, sink),
            FrameKind::Slow => self.complete_slow(start, size, sink),
            FrameKind::Event => self.complete_event(start, size, sink),
        }
    }

    fn complete_intra<S: FrameSink>(&mut self, start: usize, size: usize, raw: bool, sink: &mut S) {
        let iteration = field_i64(&self.main_ring[self.main_current], ITERATION_INDEX);
        let time = field_i64(&self.main_ring[self.main_current], TIME_INDEX);

        // The first frame of a pass has nothing to be validated against.
        let accept =
            raw || self.last_iteration == -1 || self.jumps_believable(iteration, time);

        if accept {
            let skipped = self.count_skipped_until(iteration);
            self.stats.intentionally_absent_iterations += skipped;
            self.last_iteration = iteration;
            self.last_time = time;
            self.main_stream_valid = true;
        } else {
            self.main_stream_valid = false;
        }

        let valid = self.main_stream_valid;
        if valid {
            self.stats.frame_mut(FrameKind::Intra).valid_count += 1;
            let values = &self.main_ring[self.main_current];
            self.stats.note_field_values(FrameKind::Intra, values);
        }

        sink.on_frame_ready(Frame {
            kind: FrameKind::Intra,
            valid,
            payload: Some(FramePayload::Fields(&self.main_ring[self.main_current])),
            start,
            size,
        });

        if accept {
            // Both history generations collapse onto the fresh I frame;
            // deltas never reach back across it.
            let slot = self.main_current;
            self.main_history = Some((slot, slot));
            self.main_current = (slot + 1) % 3;
        }
    }

    fn complete_inter<S: FrameSink>(&mut self, start: usize, size: usize, raw: bool, sink: &mut S) {
        let iteration = field_i64(&self.main_ring[self.main_current], ITERATION_INDEX);
        let time = field_i64(&self.main_ring[self.main_current], TIME_INDEX);

        let accept =
            raw || (self.main_stream_valid && self.jumps_believable(iteration, time));

        if accept {
            let skipped = self.count_skipped_until(iteration);
            self.stats.intentionally_absent_iterations += skipped;
            self.last_iteration = iteration;
            self.last_time = time;
        } else {
            self.main_stream_valid = false;
        }

        let valid = accept && self.main_stream_valid;
        if valid {
            self.stats.frame_mut(FrameKind::Inter).valid_count += 1;
            let values = &self.main_ring[self.main_current];
            self.stats.note_field_values(FrameKind::Inter, values);
        }

        sink.on_frame_ready(Frame {
            kind: FrameKind::Inter,
            valid,
            payload: Some(FramePayload::Fields(&self.main_ring[self.main_current])),
            start,
            size,
        });

        if accept {
            let slot = self.main_current;
            let previous = self.main_history.map_or(slot, |(p, _)| p);
            self.main_history = Some((slot, previous));
            self.main_current = (slot + 1) % 3;
        }
    }

    fn complete_gps<S: FrameSink>(&mut self, start: usize, size: usize, sink: &mut S) {
        // Positions are deltas against the home position; without a home
        // they decode but cannot be trusted.
        let valid = self.gps_home_valid;
        if valid {
            self.stats.frame_mut(FrameKind::Gps).valid_count += 1;
            self.stats.note_field_values(FrameKind::Gps, &self.last_gps);
        }
        sink.on_frame_ready(Frame {
            kind: FrameKind::Gps,
            valid,
            payload: Some(FramePayload::Fields(&self.last_gps)),
            start,
            size,
        });
    }

    fn complete_gps_home<S: FrameSink>(&mut self, start: usize, size: usize, sink: &mut S) {
        let [decoded, published] = &mut self.gps_home_ring;
        published.copy_from_slice(decoded);
        self.gps_home_valid = true;

        self.stats.frame_mut(FrameKind::GpsHome).valid_count += 1;
        self.stats
            .note_field_values(FrameKind::GpsHome, &self.gps_home_ring[1]);

        sink.on_frame_ready(Frame {
            kind: FrameKind::GpsHome,
            valid: true,
            payload: Some(FramePayload::Fields(&self.gps_home_ring[1])),
            start,
            size,
        });
    }

    fn complete_slow<S: FrameSink>(&mut self, start: usize, size: usize, sink: &mut S) {
        self.stats.frame_mut(FrameKind::Slow).valid_count += 1;
        self.stats.note_field_values(FrameKind::Slow, &self.last_slow);

        sink.on_frame_ready(Frame {
            kind: FrameKind::Slow,
            valid: true,
            payload: Some(FramePayload::Fields(&self.last_slow)),
            start,
            size,
        });
    }

    fn complete_event<S: FrameSink>(&mut self, start: usize, size: usize, sink: &mut S) {
        if let Some(LogEvent::LoggingResume { iteration, time }) = &self.last_event {
            // Adopt the carried markers so the forward jump after the
            // logging pause is accepted.
            self.last_iteration = i64::from(*iteration);
            self.last_time = i64::from(*time);
        }

        if let Some(event) = &self.last_event {
            self.stats.frame_mut(FrameKind::Event).valid_count += 1;
            sink.on_frame_ready(Frame {
                kind: FrameKind::Event,
                valid: true,
                payload: Some(FramePayload::Event(event)),
                start,
                size,
            });
        }
    }

    fn jumps_believable(&self, iteration: i64, time: i64) -> bool {
        iteration >= self.last_iteration
            && iteration < self.last_iteration + MAX_ITERATION_JUMP
            && time >= self.last_time
            && time < self.last_time + MAX_TIME_JUMP
    }

    /// Whether the sampling policy logs the given loop iteration.
    fn should_log(&self, iteration: i64) -> bool {
        let interval_i = i64::from(self.sys_config.frame_interval_i.max(1));
        let num = i64::from(self.sys_config.frame_interval_p_num);
        let denom = i64::from(self.sys_config.frame_interval_p_denom.max(1));
        (iteration % interval_i + num - 1) % denom < num
    }

    /// Unlogged iterations between the last accepted frame and the next
    /// one the sampling policy would log.
    fn count_skipped_to_next(&self) -> i64 {
        if self.last_iteration == -1 {
            return 0;
        }
        let mut count = 0;
        let mut iteration = self.last_iteration + 1;
        while !self.should_log(iteration) {
            count += 1;
            iteration += 1;
        }
        count
    }

    /// Unlogged iterations strictly between the last accepted frame and
    /// `target`.
    fn count_skipped_until(&self, target: i64) -> u64 {
        if self.last_iteration == -1 {
            return 0;
        }
        let mut count = 0;
        for iteration in self.last_iteration + 1..target {
            if !self.should_log(iteration) {
                count += 1;
            }
        }
        count
    }
}

/// Walk a frame definition, decoding every field and applying its
/// predictor.
#[allow(clippy::too_many_arguments)]
fn parse_fields(
    stream: &mut ByteStream<'_>,
    def: &FrameDef,
    kind: FrameKind,
    ctx: &PredictContext<'_>,
    previous: Option<&[i32]>,
    previous2: Option<&[i32]>,
    skipped: i64,
    raw: bool,
    data_version: i32,
    current: &mut [i32],
) -> Result<(), DecodeError> {
    let count = def.count();
    let mut i = 0;
    while i < count {
        let encoding_id = *def
            .encodings()
            .get(i)
            .ok_or(DecodeError::MissingEncoding { kind, index: i })?;
        let encoding = Encoding::from_id(encoding_id)
            .ok_or(DecodeError::UnsupportedEncoding(encoding_id))?;

        match encoding {
            Encoding::SignedVb => {
                let value = stream.read_signed_vb();
                decode_into(current, i, value, def, kind, ctx, previous, previous2, skipped, raw)?;
                i += 1;
            }
            Encoding::UnsignedVb => {
                let value = stream.read_unsigned_vb() as i32;
                decode_into(current, i, value, def, kind, ctx, previous, previous2, skipped, raw)?;
                i += 1;
            }
            Encoding::Neg14Bit => {
                let value = stream.read_neg_14bit();
                decode_into(current, i, value, def, kind, ctx, previous, previous2, skipped, raw)?;
                i += 1;
            }
            Encoding::Null => {
                decode_into(current, i, 0, def, kind, ctx, previous, previous2, skipped, raw)?;
                i += 1;
            }
            Encoding::Tag8_8Svb => {
                // The group spans the run of consecutive fields sharing
                // this encoding, capped at eight.
                let mut group = 1;
                while group < 8
                    && i + group < count
                    && def.encodings().get(i + group) == Some(&Encoding::TAG8_8SVB_ID)
                {
                    group += 1;
                }
                let values = stream.read_tag8_8svb(group);
                for (j, &value) in values.iter().enumerate() {
                    decode_into(
                        current, i + j, value, def, kind, ctx, previous, previous2, skipped, raw,
                    )?;
                }
                i += group;
            }
            Encoding::Tag2_3S32 => {
                let values = stream.read_tag2_3s32();
                for (j, &value) in values.iter().enumerate() {
                    if i + j < count {
                        decode_into(
                            current, i + j, value, def, kind, ctx, previous, previous2, skipped,
                            raw,
                        )?;
                    }
                }
                i += 3;
            }
            Encoding::Tag8_4S16 => {
                let values = if data_version < 2 {
                    stream.read_tag8_4s16_v1()
                } else {
                    stream.read_tag8_4s16_v2()
                };
                for (j, &value) in values.iter().enumerate() {
                    if i + j < count {
                        decode_into(
                            current, i + j, value, def, kind, ctx, previous, previous2, skipped,
                            raw,
                        )?;
                    }
                }
                i += 4;
            }
        }
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn decode_into(
    current: &mut [i32],
    index: usize,
    raw_value: i32,
    def: &FrameDef,
    kind: FrameKind,
    ctx: &PredictContext<'_>,
    previous: Option<&[i32]>,
    previous2: Option<&[i32]>,
    skipped: i64,
    raw: bool,
) -> Result<(), DecodeError> {
    let predictor_id = if raw {
        0
    } else {
        *def.predictors()
            .get(index)
            .ok_or(DecodeError::MissingPredictor { kind, index })?
    };
    let value = apply_predictor(
        ctx, index, predictor_id, raw_value, current, previous, previous2, skipped,
    )?;
    if let Some(slot) = current.get_mut(index) {
        *slot = value;
    }
    Ok(())
}

/// Turn a decoded delta into an absolute value. Arithmetic runs in 64
/// bits and wraps to i32 on store, matching the firmware's own overflow
/// behaviour.
#[allow(clippy::too_many_arguments)]
fn apply_predictor(
    ctx: &PredictContext<'_>,
    index: usize,
    predictor_id: i64,
    raw_value: i32,
    current: &[i32],
    previous: Option<&[i32]>,
    previous2: Option<&[i32]>,
    skipped: i64,
) -> Result<i32, DecodeError> {
    let predictor = Predictor::from_id(predictor_id)
        .ok_or(DecodeError::UnsupportedPredictor(predictor_id))?;

    let value = i64::from(raw_value);
    let result = match predictor {
        Predictor::None => value,
        Predictor::Previous => value + previous.map_or(0, |p| field_i64(p, index)),
        Predictor::StraightLine => match previous {
            Some(p) => {
                value + 2 * field_i64(p, index) - field_i64(previous2.unwrap_or(p), index)
            }
            None => value,
        },
        Predictor::Average2 => match previous {
            // Truncating division, toward zero also for negative sums.
            Some(p) => {
                value + (field_i64(p, index) + field_i64(previous2.unwrap_or(p), index)) / 2
            }
            None => value,
        },
        Predictor::MinThrottle => value + i64::from(ctx.config.min_throttle),
        Predictor::Motor0 => {
            let motor0 = ctx.motor0.ok_or(DecodeError::MissingMotorReference)?;
            value + field_i64(current, motor0)
        }
        Predictor::Inc => skipped + 1 + previous.map_or(0, |p| field_i64(p, index)),
        Predictor::HomeCoord => value + home_field(ctx, 0)?,
        Predictor::HomeCoord1 => value + home_field(ctx, 1)?,
        Predictor::Midpoint => value + 1500,
        Predictor::VbatRef => value + i64::from(ctx.config.vbat_ref),
        Predictor::LastMainFrameTime => value + ctx.last_main_time.map_or(0, i64::from),
    };

    Ok(result as i32)
}

fn home_field(ctx: &PredictContext<'_>, which: usize) -> Result<i64, DecodeError> {
    let home = ctx.home.as_ref().ok_or(DecodeError::MissingHomeReference)?;
    let index = if which == 0 { home.coord0 } else { home.coord1 };
    let index = index.ok_or(DecodeError::MissingHomeReference)?;
    Ok(field_i64(home.values, index))
}

fn field_i64(values: &[i32], index: usize) -> i64 {
    values.get(index).copied().map_or(0, i64::from)
}

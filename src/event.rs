//! Event frame payloads.
//!
//! An `E` frame is a one-byte event type followed by a payload whose
//! shape depends on the type. Event types this decoder does not know
//! about are consumed and discarded; the surrounding frame is still
//! framed so the dispatcher keeps its byte accounting.

use either::Either;
use tartan_bitfield::bitfield;
use zerocopy::FromBytes;

use crate::stream::ByteStream;

/// Payload of the end-of-log event, NUL terminator included.
pub const END_OF_LOG_MESSAGE: &str = "End of log\0";

/// A decoded event record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    /// The flight controller beeped to let sound and log be aligned.
    SyncBeep { time: u32 },
    AutotuneCycleStart {
        phase: u8,
        cycle: u8,
        rising: bool,
        p: u8,
        i: u8,
        d: u8,
    },
    AutotuneCycleResult {
        overshot: u8,
        p: u8,
        i: u8,
        d: u8,
    },
    /// Angles in degrees; the wire carries decidegrees.
    AutotuneTargets {
        current_angle: f64,
        target_angle: i8,
        target_angle_at_peak: i8,
        first_peak_angle: f64,
        second_peak_angle: f64,
    },
    /// A tuning value changed in flight. `value` is the wire value, an
    /// integer or a float depending on the adjustment; `scaled` has the
    /// function's display scale applied, rounded to four decimals.
    InflightAdjustment {
        function: u8,
        name: &'static str,
        value: Either<i32, f32>,
        scaled: f64,
    },
    /// Logging restarted after a pause; the decoder adopts the carried
    /// iteration and time so the forward jump is accepted.
    LoggingResume { iteration: u32, time: u32 },
    GtuneCycleResult { axis: u8, gyro_avg: i32, new_p: i16 },
    /// Flight mode flags changed.
    FlightMode { new_flags: u32, last_flags: u32 },
    TwitchTest { stage: u8, value: f32 },
    /// The firmware closed the log cleanly.
    LogEnd,
}

/// Display name and scales for one inflight-adjustment function. The
/// integer and float payloads scale differently.
struct AdjustmentFunction {
    name: &'static str,
    scale: f64,
    scale_float: f64,
}

const fn adjustment(name: &'static str, scale: f64, scale_float: f64) -> AdjustmentFunction {
    AdjustmentFunction {
        name,
        scale,
        scale_float,
    }
}

const ADJUSTMENT_FUNCTIONS: [AdjustmentFunction; 22] = [
    adjustment("None", 1.0, 1.0),
    adjustment("RC Rate", 0.01, 1.0),
    adjustment("RC Expo", 0.01, 1.0),
    adjustment("Throttle Expo", 0.01, 1.0),
    adjustment("Pitch & Roll Rate", 0.01, 1.0),
    adjustment("Yaw rate", 0.01, 1.0),
    adjustment("Pitch & Roll P", 0.1, 1.0),
    adjustment("Pitch & Roll I", 0.001, 0.1),
    adjustment("Pitch & Roll D", 1.0, 1000.0),
    adjustment("Yaw P", 0.1, 1.0),
    adjustment("Yaw I", 0.001, 0.1),
    adjustment("Yaw D", 1.0, 1000.0),
    adjustment("Rate Profile", 1.0, 1.0),
    adjustment("Pitch Rate", 0.01, 1.0),
    adjustment("Roll Rate", 0.01, 1.0),
    adjustment("Pitch P", 0.1, 1.0),
    adjustment("Pitch I", 0.001, 0.1),
    adjustment("Pitch D", 1.0, 1000.0),
    adjustment("Roll P", 0.1, 1.0),
    adjustment("Roll I", 0.001, 0.1),
    adjustment("Roll D", 1.0, 1000.0),
    adjustment("RC Yaw Expo", 0.01, 1.0),
];

/// Decode one event record from the cursor. Returns `None` for event
/// types with no decoding and for a spurious end-of-log marker; the
/// consumed bytes stay consumed either way.
pub(crate) fn parse(stream: &mut ByteStream<'_>) -> Option<LogEvent> {
    match stream.read_u8() {
        0 => Some(LogEvent::SyncBeep {
            time: stream.read_unsigned_vb(),
        }),
        10 => {
            #[repr(C, packed)]
            #[derive(FromBytes)]
            struct CycleStart {
                phase: u8,
                cycle_and_rising: u8,
                p: u8,
                i: u8,
                d: u8,
            }

            bitfield! {
                struct CycleAndRising(u8) {
                    [0..7] cycle: u8,
                    [7] rising,
                }
            }

            let raw: [u8; 5] = stream.read_array();
            let CycleStart {
                phase,
                cycle_and_rising,
                p,
                i,
                d,
            } = zerocopy::transmute!(raw);
            let packed = CycleAndRising(cycle_and_rising);

            Some(LogEvent::AutotuneCycleStart {
                phase,
                cycle: packed.cycle(),
                rising: packed.rising(),
                p,
                i,
                d,
            })
        }
        11 => {
            #[repr(C, packed)]
            #[derive(FromBytes)]
            struct CycleResult {
                overshot: u8,
                p: u8,
                i: u8,
                d: u8,
            }

            let raw: [u8; 4] = stream.read_array();
            let CycleResult { overshot, p, i, d } = zerocopy::transmute!(raw);

            Some(LogEvent::AutotuneCycleResult { overshot, p, i, d })
        }
        12 => Some(LogEvent::AutotuneTargets {
            current_angle: stream.read_s16() as f64 / 10.0,
            target_angle: stream.read_s8(),
            target_angle_at_peak: stream.read_s8(),
            first_peak_angle: stream.read_s16() as f64 / 10.0,
            second_peak_angle: stream.read_s16() as f64 / 10.0,
        }),
        13 => {
            bitfield! {
                struct AdjustmentHeader(u8) {
                    [0..7] function: u8,
                    [7] is_float,
                }
            }

            let header = AdjustmentHeader(stream.read_u8());
            let function = header.function();
            let entry = ADJUSTMENT_FUNCTIONS.get(function as usize);
            let name = entry.map(|e| e.name).unwrap_or("Unknown");

            let (value, scaled) = if header.is_float() {
                let raw = f32::from_bits(stream.read_u32());
                let scale = entry.map(|e| e.scale_float).unwrap_or(1.0);
                (Either::Right(raw), raw as f64 * scale)
            } else {
                let raw = stream.read_signed_vb();
                let scale = entry.map(|e| e.scale).unwrap_or(1.0);
                (Either::Left(raw), raw as f64 * scale)
            };

            Some(LogEvent::InflightAdjustment {
                function,
                name,
                value,
                scaled: (scaled * 10_000.0).round() / 10_000.0,
            })
        }
        14 => Some(LogEvent::LoggingResume {
            iteration: stream.read_unsigned_vb(),
            time: stream.read_unsigned_vb(),
        }),
        20 => Some(LogEvent::GtuneCycleResult {
            axis: stream.read_u8(),
            gyro_avg: stream.read_signed_vb(),
            new_p: stream.read_s16(),
        }),
        30 => Some(LogEvent::FlightMode {
            new_flags: stream.read_unsigned_vb(),
            last_flags: stream.read_unsigned_vb(),
        }),
        40 => Some(LogEvent::TwitchTest {
            stage: stream.read_u8(),
            value: f32::from_bits(stream.read_u32()),
        }),
        255 => {
            let message = stream.read_string(END_OF_LOG_MESSAGE.len());
            if message == END_OF_LOG_MESSAGE {
                // A real end marker; pin the window so no byte beyond it
                // is ever read.
                stream.end = stream.pos;
                Some(LogEvent::LogEnd)
            } else {
                // Data that happened to look like an event header.
                None
            }
        }
        _ => None,
    }
}

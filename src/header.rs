//! Text-header parsing: system configuration and frame definitions.
//!
//! A log session opens with a run of text lines, each `H <key>:<value>\n`,
//! terminated by the first data-frame marker. The keys describe the
//! firmware that wrote the log, the tuning values some predictors depend
//! on, and the field layout of every frame type. Keys this decoder does
//! not recognize are retained verbatim rather than rejected, because
//! firmwares add headers freely between releases.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use thiserror::Error;

use crate::schema::{FrameDefs, FrameKind, Predictor};
use crate::stream::ByteStream;

/// Magic first line of every log session.
pub const LOG_MAGIC: &[u8] = b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n";

/// Longest header line the parser will scan for a terminator.
const MAX_HEADER_LINE: usize = 1024;

/// An error establishing the frame schema from the header.
#[derive(Debug, Error)]
pub enum HeaderError {
    /// No usable I-frame definition was found.
    #[error("Log is missing required definitions for I frames, header may be corrupt.")]
    MissingIntraDefinitions,
    /// No P-frame definition was found.
    #[error("Log is missing required definitions for P frames, header may be corrupt.")]
    MissingInterDefinitions,
    /// A definition's predictor or encoding list does not cover every field.
    #[error("Field definitions for {kind} frames are incomplete, header may be corrupt.")]
    IncompleteDefinitions { kind: FrameKind },
}

/// Firmware family that wrote the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Firmware {
    #[default]
    Unknown,
    Baseflight,
    Cleanflight,
    Betaflight,
    Inav,
}

/// Process-lifetime configuration populated from the header. Immutable
/// once the data section begins.
#[derive(Debug, Clone)]
pub struct SysConfig {
    /// Denominator of the I-frame interval: one I frame per this many
    /// logged iterations.
    pub frame_interval_i: i32,
    /// Numerator of the fraction of intervening iterations logged as P
    /// frames.
    pub frame_interval_p_num: i32,
    /// Denominator of the P-frame fraction.
    pub frame_interval_p_denom: i32,
    /// Selects between the two `tag8_4s16` wire layouts.
    pub data_version: i32,
    pub firmware: Firmware,
    /// Numeric firmware version mined from the revision line.
    pub firmware_version: Option<(u32, u32, u32)>,
    pub min_throttle: i32,
    pub max_throttle: i32,
    pub rc_rate: i32,
    pub loop_time: i32,
    pub vbat_ref: i32,
    pub vbat_scale: i32,
    pub vbat_min_cell_voltage: i32,
    pub vbat_warning_cell_voltage: i32,
    pub vbat_max_cell_voltage: i32,
    /// Gyro output scale. Converted to radians per microsecond for
    /// firmwares that log degrees per second.
    pub gyro_scale: f64,
    pub acc_1g: i32,
    pub gyro_lpf: i32,
    pub current_meter_offset: i32,
    pub current_meter_scale: i32,
    pub device_uid: Option<String>,
    pub craft_name: Option<String>,
    /// Named integer tuning parameters with no dedicated field above.
    pub extras: BTreeMap<String, Vec<i64>>,
    /// Header lines that were not recognized at all, as key and value.
    pub unknown: Vec<(String, String)>,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            frame_interval_i: 32,
            frame_interval_p_num: 1,
            frame_interval_p_denom: 1,
            data_version: 1,
            firmware: Firmware::Unknown,
            firmware_version: None,
            min_throttle: 1150,
            max_throttle: 1850,
            rc_rate: 90,
            loop_time: 0,
            vbat_ref: 4095,
            vbat_scale: 110,
            vbat_min_cell_voltage: 33,
            vbat_warning_cell_voltage: 35,
            vbat_max_cell_voltage: 43,
            gyro_scale: 1.0,
            acc_1g: 1,
            gyro_lpf: 0,
            current_meter_offset: 0,
            current_meter_scale: 400,
            device_uid: None,
            craft_name: None,
            extras: BTreeMap::new(),
            unknown: Vec::new(),
        }
    }
}

/// Consume header lines from the cursor until the first data marker,
/// populating the configuration and frame definitions, then validate and
/// fix up the definitions.
///
/// The cursor is left on the first byte of the data section.
pub(crate) fn parse(
    stream: &mut ByteStream<'_>,
    config: &mut SysConfig,
    defs: &mut FrameDefs,
) -> Result<(), HeaderError> {
    loop {
        match stream.read_char() {
            Some(b'H') => parse_line(stream, config, defs),
            Some(_) => {
                stream.unread_char();
                break;
            }
            None => break,
        }
    }

    finish(config, defs)
}

/// Parse one `<key>:<value>\n` line after its `H ` marker. Malformed
/// lines (no space, no separator, no terminator within bounds) are
/// skipped without error, leaving the cursor wherever the scan stopped.
fn parse_line(stream: &mut ByteStream<'_>, config: &mut SysConfig, defs: &mut FrameDefs) {
    if stream.peek() != Some(b' ') {
        return;
    }
    stream.read_char();

    let mut line = Vec::with_capacity(64);
    let mut terminated = false;
    for _ in 0..MAX_HEADER_LINE {
        match stream.read_char() {
            Some(b'\n') => {
                terminated = true;
                break;
            }
            Some(byte) => line.push(byte),
            None => return,
        }
    }
    if !terminated {
        return;
    }

    let line: String = line.iter().map(|&b| b as char).collect();
    let Some((key, value)) = line.split_once(':') else {
        return;
    };

    apply(key, value, config, defs);
}

fn apply(key: &str, value: &str, config: &mut SysConfig, defs: &mut FrameDefs) {
    if let Some(rest) = key.strip_prefix("Field ") {
        apply_field_definition(rest, value, config, defs);
        return;
    }

    match key {
        "Product" => {}
        "I interval" => {
            if let Ok(interval) = value.parse::<i32>() {
                config.frame_interval_i = interval.max(1);
            }
        }
        "P interval" => {
            if let Some((num, denom)) = value.split_once('/') {
                if let (Ok(num), Ok(denom)) = (num.parse::<i32>(), denom.parse::<i32>()) {
                    if num >= 1 && denom >= 1 {
                        config.frame_interval_p_num = num;
                        config.frame_interval_p_denom = denom;
                    }
                }
            }
        }
        // Tolerated for older logs; the interval fraction supersedes them.
        "P denom" | "P ratio" => {}
        "Data version" => parse_int(value, &mut config.data_version),
        "Firmware type" => {
            config.firmware = match value {
                "Cleanflight" => Firmware::Cleanflight,
                _ => Firmware::Baseflight,
            };
        }
        "Firmware revision" => apply_firmware_revision(value, config),
        "minthrottle" => parse_int(value, &mut config.min_throttle),
        "maxthrottle" => parse_int(value, &mut config.max_throttle),
        "rcRate" => parse_int(value, &mut config.rc_rate),
        "looptime" => parse_int(value, &mut config.loop_time),
        "vbatref" => parse_int(value, &mut config.vbat_ref),
        "vbatscale" => parse_int(value, &mut config.vbat_scale),
        "acc_1G" => parse_int(value, &mut config.acc_1g),
        "gyro_lpf" => parse_int(value, &mut config.gyro_lpf),
        "gyro.scale" | "gyro_scale" => {
            config.gyro_scale = hex_to_f32(value) as f64;
            // Baseflight logs radians per microsecond directly; the later
            // firmwares log degrees per second and leave the conversion
            // to the consumer.
            if matches!(
                config.firmware,
                Firmware::Cleanflight | Firmware::Betaflight | Firmware::Inav
            ) {
                config.gyro_scale *= (PI / 180.0) * 0.000_001;
            }
        }
        "vbatcellvoltage" => {
            let mut parts = value.split(',').map(str::parse::<i32>);
            if let (Some(Ok(min)), Some(Ok(warning)), Some(Ok(max))) =
                (parts.next(), parts.next(), parts.next())
            {
                config.vbat_min_cell_voltage = min;
                config.vbat_warning_cell_voltage = warning;
                config.vbat_max_cell_voltage = max;
            }
        }
        "currentMeter" => {
            let mut parts = value.split(',').map(str::parse::<i32>);
            if let (Some(Ok(offset)), Some(Ok(scale))) = (parts.next(), parts.next()) {
                config.current_meter_offset = offset;
                config.current_meter_scale = scale;
            }
        }
        "Device UID" => config.device_uid = Some(value.to_string()),
        "Craft name" => config.craft_name = Some(value.to_string()),
        _ => {
            // Comma-separated integer lists are tuning parameters such as
            // rollPID or rates; everything else is retained verbatim.
            match parse_comma_separated(value) {
                Some(values) => {
                    config.extras.insert(key.to_string(), values);
                }
                None => config.unknown.push((key.to_string(), value.to_string())),
            }
        }
    }
}

/// `Field <marker> <property>` lines build up the frame definitions.
fn apply_field_definition(rest: &str, value: &str, config: &mut SysConfig, defs: &mut FrameDefs) {
    let recognized = (|| {
        let (marker, property) = rest.split_once(' ')?;
        let kind = FrameKind::from_marker(*marker.as_bytes().first()?)?;
        if marker.len() != 1 {
            return None;
        }
        let def = defs.get_or_insert(kind)?;

        match property {
            "name" => def.set_names(value.split(',').map(rename_legacy_field).collect()),
            "signed" => def.set_signed(value.split(',').map(|v| v.trim() == "1").collect()),
            "predictor" => def.predictors = parse_comma_separated(value)?,
            "encoding" => def.encodings = parse_comma_separated(value)?,
            _ => return None,
        }
        Some(())
    })();

    if recognized.is_none() {
        config
            .unknown
            .push((format!("Field {rest}"), value.to_string()));
    }
}

/// Early firmwares named the gyro fields `gyroData`; every consumer knows
/// them as `gyroADC`.
fn rename_legacy_field(name: &str) -> String {
    match name.strip_prefix("gyroData") {
        Some(rest) if rest.starts_with('[') => format!("gyroADC{rest}"),
        _ => name.to_string(),
    }
}

/// The revision line both upgrades the firmware family (the type line
/// cannot distinguish the Cleanflight forks) and carries the numeric
/// version.
fn apply_firmware_revision(value: &str, config: &mut SysConfig) {
    let mut words = value.split_whitespace();
    let Some(product) = words.next() else {
        return;
    };
    let version = words.clone().find_map(parse_version);

    if product.ends_with("flight") {
        if product == "Betaflight" {
            config.firmware = Firmware::Betaflight;
        }
        if version.is_some() {
            config.firmware_version = version;
        }
    } else if product == "INAV" {
        if let Some(version) = version {
            config.firmware = Firmware::Inav;
            config.firmware_version = Some(version);
        }
    }
}

fn parse_version(word: &str) -> Option<(u32, u32, u32)> {
    let mut parts = word.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().map(|p| p.parse().ok()).unwrap_or(Some(0))?;
    Some((major, minor, patch))
}

fn parse_int(value: &str, slot: &mut i32) {
    if let Ok(parsed) = value.trim().parse() {
        *slot = parsed;
    }
}

fn parse_comma_separated(value: &str) -> Option<Vec<i64>> {
    value
        .split(',')
        .map(|part| part.trim().parse::<i64>().ok())
        .collect()
}

/// A 32-bit IEEE 754 value written as eight hex digits.
fn hex_to_f32(value: &str) -> f32 {
    let digits = value.trim().trim_start_matches("0x");
    u32::from_str_radix(digits, 16)
        .map(f32::from_bits)
        .unwrap_or(0.0)
}

impl FrameDefs {
    /// Validate that the I and P definitions exist and cover every field.
    /// The header parser gates on this once the header is read, and the
    /// data pass repeats the same gate, so the two cannot drift.
    pub(crate) fn require_main_definitions(&self) -> Result<(), HeaderError> {
        let Some(intra) = self.intra.as_ref() else {
            return Err(HeaderError::MissingIntraDefinitions);
        };
        if intra.count() == 0 {
            return Err(HeaderError::MissingIntraDefinitions);
        }
        if !intra.is_complete() {
            return Err(HeaderError::IncompleteDefinitions {
                kind: FrameKind::Intra,
            });
        }

        let Some(inter) = self.inter.as_ref() else {
            return Err(HeaderError::MissingInterDefinitions);
        };
        if !inter.is_complete() {
            return Err(HeaderError::IncompleteDefinitions {
                kind: FrameKind::Inter,
            });
        }

        Ok(())
    }
}

/// Validate the definitions and apply the fixups that depend on the whole
/// header having been read.
fn finish(_config: &mut SysConfig, defs: &mut FrameDefs) -> Result<(), HeaderError> {
    // P frames share the I frame's field list; the header only carries
    // their predictors and encodings.
    if let Some(intra) = defs.intra.clone() {
        if let Some(inter) = defs.inter.as_mut() {
            inter.inherit_shape(&intra);
        }
    }

    defs.require_main_definitions()?;

    // Home coordinates are logged as latitude and longitude pairs that
    // share one predictor identifier; the trailing half of each pair is
    // retargeted onto the second home coordinate.
    if let Some(gps) = defs.gps.as_mut() {
        for i in 1..gps.predictors.len() {
            if gps.predictors[i - 1] == Predictor::HOME_COORD_ID
                && gps.predictors[i] == Predictor::HOME_COORD_ID
            {
                gps.predictors[i] = Predictor::HOME_COORD_1_ID;
            }
        }
    }

    Ok(())
}

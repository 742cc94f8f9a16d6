//! Frame schemas parsed from the log header.
//!
//! A log describes its own layout: for each frame type the header lists
//! the field names, their signedness, and the predictor and encoding used
//! for every field. Predictor and encoding identifiers are kept as the
//! raw integers found in the header and resolved through an exhaustive
//! match when a frame is decoded, so that an identifier this decoder does
//! not know about surfaces as a schema violation rather than silently
//! falling through.

use std::collections::HashMap;
use std::fmt;

/// Index of the loop iteration counter within a main frame.
pub const ITERATION_INDEX: usize = 0;
/// Index of the timestamp, in microseconds, within a main frame.
pub const TIME_INDEX: usize = 1;

/// The frame types a log can carry, keyed by their one-byte markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `I`: self-contained main frame holding absolute values.
    Intra,
    /// `P`: main frame holding deltas against the frames before it.
    Inter,
    /// `G`: GPS position frame, encoded against the home position.
    Gps,
    /// `H`: GPS home position frame.
    GpsHome,
    /// `S`: slowly-changing state, logged on change only.
    Slow,
    /// `E`: event frame with a type byte and a per-type payload.
    Event,
}

impl FrameKind {
    /// Map a marker byte to its frame type.
    pub fn from_marker(marker: u8) -> Option<Self> {
        Some(match marker {
            b'I' => Self::Intra,
            b'P' => Self::Inter,
            b'G' => Self::Gps,
            b'H' => Self::GpsHome,
            b'S' => Self::Slow,
            b'E' => Self::Event,
            _ => return None,
        })
    }

    /// The marker byte introducing frames of this type.
    pub fn marker(self) -> u8 {
        match self {
            Self::Intra => b'I',
            Self::Inter => b'P',
            Self::Gps => b'G',
            Self::GpsHome => b'H',
            Self::Slow => b'S',
            Self::Event => b'E',
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Intra => 0,
            Self::Inter => 1,
            Self::Gps => 2,
            Self::GpsHome => 3,
            Self::Slow => 4,
            Self::Event => 5,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.marker() as char)
    }
}

/// Rules recovering an absolute field value from a decoded delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    /// The decoded value is already absolute.
    None,
    /// Add the value of this field in the previous frame.
    Previous,
    /// Extrapolate a straight line through the two previous frames.
    StraightLine,
    /// Add the average of the two previous frames, truncated toward zero.
    Average2,
    /// Add the `minthrottle` motor value from the system configuration.
    MinThrottle,
    /// Add the value already decoded for `motor[0]` in this frame.
    Motor0,
    /// The field increments once per loop iteration; no delta is carried.
    Inc,
    /// Add the first GPS home coordinate.
    HomeCoord,
    /// Add the stick midpoint, 1500 microseconds.
    Midpoint,
    /// Add the battery reference voltage from the system configuration.
    VbatRef,
    /// Add the timestamp of the last main frame.
    LastMainFrameTime,
    /// Add the second GPS home coordinate. Assigned during header parsing
    /// to the trailing half of a home coordinate pair.
    HomeCoord1,
}

impl Predictor {
    /// Identifier carried in the header for [`Predictor::HomeCoord`].
    pub const HOME_COORD_ID: i64 = 7;
    /// Identifier assigned to [`Predictor::HomeCoord1`].
    pub const HOME_COORD_1_ID: i64 = 256;

    /// Resolve a header identifier, `None` for identifiers this decoder
    /// does not implement.
    pub fn from_id(id: i64) -> Option<Self> {
        Some(match id {
            0 => Self::None,
            1 => Self::Previous,
            2 => Self::StraightLine,
            3 => Self::Average2,
            4 => Self::MinThrottle,
            5 => Self::Motor0,
            6 => Self::Inc,
            7 => Self::HomeCoord,
            8 => Self::Midpoint,
            9 => Self::VbatRef,
            10 => Self::LastMainFrameTime,
            256 => Self::HomeCoord1,
            _ => return None,
        })
    }
}

/// Wire encodings a field can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Zig-zag variable-byte.
    SignedVb,
    /// Plain variable-byte.
    UnsignedVb,
    /// Variable-byte, sign-extended from 14 bits and negated.
    Neg14Bit,
    /// Presence-masked group of up to eight signed variable-bytes.
    Tag8_8Svb,
    /// Width-selected group of three signed values.
    Tag2_3S32,
    /// Width-selected group of four signed values.
    Tag8_4S16,
    /// No bytes on the wire; the value is zero.
    Null,
}

impl Encoding {
    /// Identifier carried in the header for [`Encoding::Tag8_8Svb`].
    pub const TAG8_8SVB_ID: i64 = 6;

    /// Resolve a header identifier, `None` for identifiers this decoder
    /// does not implement.
    pub fn from_id(id: i64) -> Option<Self> {
        Some(match id {
            0 => Self::SignedVb,
            1 => Self::UnsignedVb,
            3 => Self::Neg14Bit,
            6 => Self::Tag8_8Svb,
            7 => Self::Tag2_3S32,
            8 => Self::Tag8_4S16,
            9 => Self::Null,
            _ => return None,
        })
    }
}

/// Field layout of one frame type.
///
/// The four arrays are parallel; `predictors` and `encodings` hold the
/// raw identifiers from the header. After header parsing completes, the
/// I and P definitions are guaranteed to have all four arrays at the
/// same length.
#[derive(Debug, Clone, Default)]
pub struct FrameDef {
    names: Vec<String>,
    signed: Vec<bool>,
    pub(crate) predictors: Vec<i64>,
    pub(crate) encodings: Vec<i64>,
    name_to_index: HashMap<String, usize>,
}

impl FrameDef {
    /// Number of fields.
    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// Field names, in wire order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Signedness flags, parallel to the names.
    pub fn signed(&self) -> &[bool] {
        &self.signed
    }

    /// Raw predictor identifiers, parallel to the names.
    pub fn predictors(&self) -> &[i64] {
        &self.predictors
    }

    /// Raw encoding identifiers, parallel to the names.
    pub fn encodings(&self) -> &[i64] {
        &self.encodings
    }

    /// Position of a field by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Whether every parallel array covers every field.
    pub fn is_complete(&self) -> bool {
        let n = self.names.len();
        n > 0 && self.predictors.len() == n && self.encodings.len() == n
    }

    pub(crate) fn set_names(&mut self, names: Vec<String>) {
        self.name_to_index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        self.signed.resize(names.len(), false);
        self.names = names;
    }

    pub(crate) fn set_signed(&mut self, signed: Vec<bool>) {
        self.signed = signed;
    }

    /// Adopt another definition's names, signedness and name map. The P
    /// definition carries no field list of its own and inherits the I
    /// definition's.
    pub(crate) fn inherit_shape(&mut self, other: &FrameDef) {
        self.names = other.names.clone();
        self.signed = other.signed.clone();
        self.name_to_index = other.name_to_index.clone();
    }
}

/// The frame definitions found in a header. G and H travel together in
/// practice; S is independent. E frames carry no definition.
#[derive(Debug, Clone, Default)]
pub struct FrameDefs {
    pub intra: Option<FrameDef>,
    pub inter: Option<FrameDef>,
    pub gps: Option<FrameDef>,
    pub gps_home: Option<FrameDef>,
    pub slow: Option<FrameDef>,
}

impl FrameDefs {
    /// The definition for a frame type, if the header provided one.
    pub fn get(&self, kind: FrameKind) -> Option<&FrameDef> {
        match kind {
            FrameKind::Intra => self.intra.as_ref(),
            FrameKind::Inter => self.inter.as_ref(),
            FrameKind::Gps => self.gps.as_ref(),
            FrameKind::GpsHome => self.gps_home.as_ref(),
            FrameKind::Slow => self.slow.as_ref(),
            FrameKind::Event => None,
        }
    }

    pub(crate) fn get_or_insert(&mut self, kind: FrameKind) -> Option<&mut FrameDef> {
        let slot = match kind {
            FrameKind::Intra => &mut self.intra,
            FrameKind::Inter => &mut self.inter,
            FrameKind::Gps => &mut self.gps,
            FrameKind::GpsHome => &mut self.gps_home,
            FrameKind::Slow => &mut self.slow,
            FrameKind::Event => return None,
        };
        Some(slot.get_or_insert_with(FrameDef::default))
    }
}

//! Decode statistics accumulated by the dispatcher.

use crate::schema::FrameKind;

/// Observed range of one field's decoded values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldStats {
    pub min: i32,
    pub max: i32,
}

/// Counters for one frame type.
#[derive(Debug, Clone)]
pub struct FrameTypeStats {
    /// Bytes spanned by framed frames, markers included.
    pub bytes: u64,
    /// Histogram of framed sizes, indexed by size in bytes.
    pub size_count: Vec<u32>,
    /// Frames delivered as valid.
    pub valid_count: u64,
    /// Corrupt stretches attributed to this frame type.
    pub corrupt_count: u64,
    /// Per-field value ranges over all valid frames.
    pub field: Vec<FieldStats>,
}

impl Default for FrameTypeStats {
    fn default() -> Self {
        Self {
            bytes: 0,
            size_count: vec![0; crate::decode::MAX_FRAME_SIZE + 1],
            valid_count: 0,
            corrupt_count: 0,
            field: Vec::new(),
        }
    }
}

/// Counters for one decoding pass, accumulated across calls until reset.
#[derive(Debug, Clone)]
pub struct Stats {
    /// Bytes spanned by framed frames of every type.
    pub total_bytes: u64,
    /// Corrupt stretches over all frame types.
    pub total_corrupt_frames: u64,
    /// Loop iterations the sampling policy deliberately left unlogged,
    /// credited as frames are accepted.
    pub intentionally_absent_iterations: u64,
    frames: [FrameTypeStats; 6],
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            total_bytes: 0,
            total_corrupt_frames: 0,
            intentionally_absent_iterations: 0,
            frames: std::array::from_fn(|_| FrameTypeStats::default()),
        }
    }
}

impl Stats {
    /// Counters for one frame type.
    pub fn frame(&self, kind: FrameKind) -> &FrameTypeStats {
        &self.frames[kind.index()]
    }

    pub(crate) fn frame_mut(&mut self, kind: FrameKind) -> &mut FrameTypeStats {
        &mut self.frames[kind.index()]
    }

    /// Fold a valid frame's values into the per-field ranges.
    pub(crate) fn note_field_values(&mut self, kind: FrameKind, values: &[i32]) {
        let field = &mut self.frame_mut(kind).field;
        for (i, &value) in values.iter().enumerate() {
            match field.get_mut(i) {
                Some(stats) => {
                    stats.min = stats.min.min(value);
                    stats.max = stats.max.max(value);
                }
                None => field.push(FieldStats {
                    min: value,
                    max: value,
                }),
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

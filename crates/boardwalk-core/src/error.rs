use thiserror::Error;

/// Why a mutation (or a bulk overwrite) was refused.
///
/// Validation runs before any field is written, so a refused mutation never
/// leaves the session half-applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("tempo {0} outside {min}..={max} bpm", min = crate::model::MIN_TEMPO, max = crate::model::MAX_TEMPO)]
    TempoOutOfRange(u32),
    #[error("swing {0} outside 0..={max}", max = crate::model::MAX_SWING)]
    SwingOutOfRange(u32),
    #[error("track not found: {0}")]
    UnknownTrack(String),
    #[error("track id already in use: {0}")]
    DuplicateTrack(String),
    #[error("session already has the maximum of {max} tracks", max = crate::model::MAX_TRACKS)]
    TooManyTracks,
    #[error("step {step} out of bounds for track with {step_count} steps")]
    StepOutOfBounds { step: usize, step_count: usize },
    #[error("unsupported step count {0}")]
    InvalidStepCount(usize),
    #[error("track index {index} out of bounds for {len} tracks")]
    TrackIndexOutOfBounds { index: usize, len: usize },
    #[error("invalid track name: {0}")]
    InvalidName(String),
    #[error("invalid sample reference: {0}")]
    InvalidSample(String),
    #[error("volume {0} outside 0.0..=1.0")]
    VolumeOutOfRange(f32),
    #[error("transpose {0} outside {min}..={max}", min = crate::model::MIN_TRANSPOSE, max = crate::model::MAX_TRANSPOSE)]
    TransposeOutOfRange(i32),
    #[error("pitch lock {0} outside {min}..={max}", min = crate::model::MIN_TRANSPOSE, max = crate::model::MAX_TRANSPOSE)]
    PitchOutOfRange(i32),
    #[error("track {track_id} arrays disagree with step count {step_count}")]
    ArrayLengthMismatch { track_id: String, step_count: usize },
}

impl ValidationError {
    /// Stable machine-readable label, used for metrics and error frames.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::TempoOutOfRange(_) => "tempo_out_of_range",
            ValidationError::SwingOutOfRange(_) => "swing_out_of_range",
            ValidationError::UnknownTrack(_) => "unknown_track",
            ValidationError::DuplicateTrack(_) => "duplicate_track",
            ValidationError::TooManyTracks => "too_many_tracks",
            ValidationError::StepOutOfBounds { .. } => "step_out_of_bounds",
            ValidationError::InvalidStepCount(_) => "invalid_step_count",
            ValidationError::TrackIndexOutOfBounds { .. } => "track_index_out_of_bounds",
            ValidationError::InvalidName(_) => "invalid_name",
            ValidationError::InvalidSample(_) => "invalid_sample",
            ValidationError::VolumeOutOfRange(_) => "volume_out_of_range",
            ValidationError::TransposeOutOfRange(_) => "transpose_out_of_range",
            ValidationError::PitchOutOfRange(_) => "pitch_out_of_range",
            ValidationError::ArrayLengthMismatch { .. } => "array_length_mismatch",
        }
    }
}

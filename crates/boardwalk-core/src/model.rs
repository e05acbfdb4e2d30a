use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub type TrackId = String;

pub const MIN_TEMPO: u32 = 60;
pub const MAX_TEMPO: u32 = 180;
pub const DEFAULT_TEMPO: u32 = 120;
pub const MAX_SWING: u32 = 100;
pub const DEFAULT_SWING: u32 = 0;
pub const MAX_TRACKS: usize = 16;
pub const DEFAULT_STEP_COUNT: usize = 16;
pub const VALID_STEP_COUNTS: [usize; 10] = [4, 8, 12, 16, 24, 32, 48, 64, 96, 128];
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_SAMPLE_LEN: usize = 64;
pub const MIN_TRANSPOSE: i32 = -24;
pub const MAX_TRANSPOSE: i32 = 24;
pub const INITIAL_VERSION: u64 = 1;

/// The authoritative document for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub tracks: Vec<Track>,
    pub tempo: u32,
    pub swing: u32,
    pub version: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            tempo: DEFAULT_TEMPO,
            swing: DEFAULT_SWING,
            version: INITIAL_VERSION,
        }
    }
}

impl SessionState {
    pub fn track(&self, track_id: &str) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == track_id)
    }

    pub(crate) fn track_mut(&mut self, track_id: &str) -> Result<&mut Track, ValidationError> {
        self.tracks
            .iter_mut()
            .find(|t| t.id == track_id)
            .ok_or_else(|| ValidationError::UnknownTrack(track_id.to_string()))
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    /// Checks every structural bound. Used for documents that arrive whole
    /// (HTTP create/overwrite, store hydration) rather than as a mutation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_tempo(self.tempo)?;
        validate_swing(self.swing)?;
        if self.tracks.len() > MAX_TRACKS {
            return Err(ValidationError::TooManyTracks);
        }
        for (index, track) in self.tracks.iter().enumerate() {
            if self.tracks[..index].iter().any(|t| t.id == track.id) {
                return Err(ValidationError::DuplicateTrack(track.id.clone()));
            }
            track.validate()?;
        }
        Ok(())
    }

    /// Replaces the editable content with `other`, keeping this session's
    /// version lineage. The caller bumps the version.
    pub fn overwrite_content(&mut self, other: SessionContent) {
        self.tracks = other.tracks;
        self.tempo = other.tempo;
        self.swing = other.swing;
    }
}

/// Session content without the version counter, as accepted by the HTTP
/// create/overwrite endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContent {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default = "default_tempo")]
    pub tempo: u32,
    #[serde(default)]
    pub swing: u32,
}

impl Default for SessionContent {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            tempo: DEFAULT_TEMPO,
            swing: DEFAULT_SWING,
        }
    }
}

impl SessionContent {
    pub fn into_state(self) -> SessionState {
        SessionState {
            tracks: self.tracks,
            tempo: self.tempo,
            swing: self.swing,
            version: INITIAL_VERSION,
        }
    }
}

fn default_tempo() -> u32 {
    DEFAULT_TEMPO
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub sample: String,
    pub steps: Vec<bool>,
    pub parameter_locks: Vec<Option<ParameterLock>>,
    pub step_count: usize,
    pub volume: f32,
    #[serde(default)]
    pub muted: bool,
    #[serde(default)]
    pub soloed: bool,
    #[serde(default)]
    pub transpose: i32,
}

impl Track {
    pub fn new(id: impl Into<TrackId>, name: impl Into<String>, sample: impl Into<String>) -> Self {
        Self::with_step_count(id, name, sample, DEFAULT_STEP_COUNT)
    }

    pub fn with_step_count(
        id: impl Into<TrackId>,
        name: impl Into<String>,
        sample: impl Into<String>,
        step_count: usize,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sample: sample.into(),
            steps: vec![false; step_count],
            parameter_locks: vec![None; step_count],
            step_count,
            volume: 1.0,
            muted: false,
            soloed: false,
            transpose: 0,
        }
    }

    /// Changes the step count together with both backing arrays.
    ///
    /// This is the only place `step_count` is written after construction, so
    /// `steps.len() == parameter_locks.len() == step_count` holds whenever it
    /// returns.
    pub fn resize_steps(&mut self, step_count: usize) {
        self.steps.resize(step_count, false);
        self.parameter_locks.resize(step_count, None);
        self.step_count = step_count;
    }

    pub fn clear(&mut self) {
        self.steps.iter_mut().for_each(|s| *s = false);
        self.parameter_locks.iter_mut().for_each(|l| *l = None);
    }

    pub fn check_step(&self, step: usize) -> Result<(), ValidationError> {
        if step >= self.step_count {
            return Err(ValidationError::StepOutOfBounds {
                step,
                step_count: self.step_count,
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name(&self.name)?;
        validate_sample(&self.sample)?;
        validate_step_count(self.step_count)?;
        if self.steps.len() != self.step_count || self.parameter_locks.len() != self.step_count {
            return Err(ValidationError::ArrayLengthMismatch {
                track_id: self.id.clone(),
                step_count: self.step_count,
            });
        }
        validate_volume(self.volume)?;
        validate_transpose(self.transpose)?;
        for lock in self.parameter_locks.iter().flatten() {
            lock.validate()?;
        }
        Ok(())
    }
}

/// Sparse per-step overrides.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterLock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

impl ParameterLock {
    pub fn is_empty(&self) -> bool {
        self.pitch.is_none() && self.volume.is_none()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(pitch) = self.pitch {
            if !(MIN_TRANSPOSE..=MAX_TRANSPOSE).contains(&pitch) {
                return Err(ValidationError::PitchOutOfRange(pitch));
            }
        }
        if let Some(volume) = self.volume {
            validate_volume(volume)?;
        }
        Ok(())
    }

    /// An all-empty lock is stored as no lock at all.
    pub fn normalize(lock: Option<ParameterLock>) -> Option<ParameterLock> {
        lock.filter(|l| !l.is_empty())
    }
}

pub fn validate_tempo(tempo: u32) -> Result<(), ValidationError> {
    if !(MIN_TEMPO..=MAX_TEMPO).contains(&tempo) {
        return Err(ValidationError::TempoOutOfRange(tempo));
    }
    Ok(())
}

pub fn validate_swing(swing: u32) -> Result<(), ValidationError> {
    if swing > MAX_SWING {
        return Err(ValidationError::SwingOutOfRange(swing));
    }
    Ok(())
}

pub fn validate_step_count(step_count: usize) -> Result<(), ValidationError> {
    if !VALID_STEP_COUNTS.contains(&step_count) {
        return Err(ValidationError::InvalidStepCount(step_count));
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

pub fn validate_sample(sample: &str) -> Result<(), ValidationError> {
    if sample.trim().is_empty() || sample.chars().count() > MAX_SAMPLE_LEN {
        return Err(ValidationError::InvalidSample(sample.to_string()));
    }
    Ok(())
}

pub fn validate_volume(volume: f32) -> Result<(), ValidationError> {
    if !volume.is_finite() || !(0.0..=1.0).contains(&volume) {
        return Err(ValidationError::VolumeOutOfRange(volume));
    }
    Ok(())
}

pub fn validate_transpose(transpose: i32) -> Result<(), ValidationError> {
    if !(MIN_TRANSPOSE..=MAX_TRANSPOSE).contains(&transpose) {
        return Err(ValidationError::TransposeOutOfRange(transpose));
    }
    Ok(())
}

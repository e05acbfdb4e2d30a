//! Mutating actions.
//!
//! `Mutation` is the only list of state-changing actions. The registry
//! (`MutationKind`), the coordinator's apply handler (`Mutation::apply`), the
//! broadcast payload (`Change`) and the client's apply handler
//! (`Change::apply_to`) are all exhaustive matches over it, so adding a
//! variant without handling it everywhere is a compile error.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{
    validate_name, validate_sample, validate_step_count, validate_swing, validate_tempo,
    validate_transpose, validate_volume, ParameterLock, SessionState, Track, TrackId, MAX_TRACKS,
};

/// Client-originated state changes, tagged on the wire by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    ToggleStep {
        track_id: TrackId,
        step: usize,
    },
    SetTempo {
        tempo: u32,
    },
    SetSwing {
        swing: u32,
    },
    SetTrackStepCount {
        track_id: TrackId,
        step_count: usize,
    },
    ReorderTracks {
        from_index: usize,
        to_index: usize,
    },
    RenameTrack {
        track_id: TrackId,
        name: String,
    },
    SetParameterLock {
        track_id: TrackId,
        step: usize,
        #[serde(default)]
        lock: Option<ParameterLock>,
    },
    AddTrack {
        track: Track,
    },
    DeleteTrack {
        track_id: TrackId,
    },
    ClearTrack {
        track_id: TrackId,
    },
    SetTrackVolume {
        track_id: TrackId,
        volume: f32,
    },
    SetTrackMuted {
        track_id: TrackId,
        muted: bool,
    },
    SetTrackSoloed {
        track_id: TrackId,
        soloed: bool,
    },
    SetTrackTranspose {
        track_id: TrackId,
        transpose: i32,
    },
    SetTrackSample {
        track_id: TrackId,
        sample: String,
    },
}

/// The mutating-type registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    ToggleStep,
    SetTempo,
    SetSwing,
    SetTrackStepCount,
    ReorderTracks,
    RenameTrack,
    SetParameterLock,
    AddTrack,
    DeleteTrack,
    ClearTrack,
    SetTrackVolume,
    SetTrackMuted,
    SetTrackSoloed,
    SetTrackTranspose,
    SetTrackSample,
}

impl MutationKind {
    pub const ALL: [MutationKind; 15] = [
        MutationKind::ToggleStep,
        MutationKind::SetTempo,
        MutationKind::SetSwing,
        MutationKind::SetTrackStepCount,
        MutationKind::ReorderTracks,
        MutationKind::RenameTrack,
        MutationKind::SetParameterLock,
        MutationKind::AddTrack,
        MutationKind::DeleteTrack,
        MutationKind::ClearTrack,
        MutationKind::SetTrackVolume,
        MutationKind::SetTrackMuted,
        MutationKind::SetTrackSoloed,
        MutationKind::SetTrackTranspose,
        MutationKind::SetTrackSample,
    ];

    /// Client→coordinator `type` value.
    pub fn wire_name(self) -> &'static str {
        match self {
            MutationKind::ToggleStep => "toggle_step",
            MutationKind::SetTempo => "set_tempo",
            MutationKind::SetSwing => "set_swing",
            MutationKind::SetTrackStepCount => "set_track_step_count",
            MutationKind::ReorderTracks => "reorder_tracks",
            MutationKind::RenameTrack => "rename_track",
            MutationKind::SetParameterLock => "set_parameter_lock",
            MutationKind::AddTrack => "add_track",
            MutationKind::DeleteTrack => "delete_track",
            MutationKind::ClearTrack => "clear_track",
            MutationKind::SetTrackVolume => "set_track_volume",
            MutationKind::SetTrackMuted => "set_track_muted",
            MutationKind::SetTrackSoloed => "set_track_soloed",
            MutationKind::SetTrackTranspose => "set_track_transpose",
            MutationKind::SetTrackSample => "set_track_sample",
        }
    }

    /// Coordinator→client `type` value of the matching broadcast.
    pub fn changed_type(self) -> &'static str {
        match self {
            MutationKind::ToggleStep => "toggle_step_changed",
            MutationKind::SetTempo => "set_tempo_changed",
            MutationKind::SetSwing => "set_swing_changed",
            MutationKind::SetTrackStepCount => "set_track_step_count_changed",
            MutationKind::ReorderTracks => "reorder_tracks_changed",
            MutationKind::RenameTrack => "rename_track_changed",
            MutationKind::SetParameterLock => "set_parameter_lock_changed",
            MutationKind::AddTrack => "add_track_changed",
            MutationKind::DeleteTrack => "delete_track_changed",
            MutationKind::ClearTrack => "clear_track_changed",
            MutationKind::SetTrackVolume => "set_track_volume_changed",
            MutationKind::SetTrackMuted => "set_track_muted_changed",
            MutationKind::SetTrackSoloed => "set_track_soloed_changed",
            MutationKind::SetTrackTranspose => "set_track_transpose_changed",
            MutationKind::SetTrackSample => "set_track_sample_changed",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<MutationKind> {
        MutationKind::ALL
            .into_iter()
            .find(|kind| kind.wire_name() == name)
    }
}

/// True when `type_name` is a registered mutating message type.
pub fn is_mutating_type(type_name: &str) -> bool {
    MutationKind::from_wire_name(type_name).is_some()
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::ToggleStep { .. } => MutationKind::ToggleStep,
            Mutation::SetTempo { .. } => MutationKind::SetTempo,
            Mutation::SetSwing { .. } => MutationKind::SetSwing,
            Mutation::SetTrackStepCount { .. } => MutationKind::SetTrackStepCount,
            Mutation::ReorderTracks { .. } => MutationKind::ReorderTracks,
            Mutation::RenameTrack { .. } => MutationKind::RenameTrack,
            Mutation::SetParameterLock { .. } => MutationKind::SetParameterLock,
            Mutation::AddTrack { .. } => MutationKind::AddTrack,
            Mutation::DeleteTrack { .. } => MutationKind::DeleteTrack,
            Mutation::ClearTrack { .. } => MutationKind::ClearTrack,
            Mutation::SetTrackVolume { .. } => MutationKind::SetTrackVolume,
            Mutation::SetTrackMuted { .. } => MutationKind::SetTrackMuted,
            Mutation::SetTrackSoloed { .. } => MutationKind::SetTrackSoloed,
            Mutation::SetTrackTranspose { .. } => MutationKind::SetTrackTranspose,
            Mutation::SetTrackSample { .. } => MutationKind::SetTrackSample,
        }
    }

    /// Authoritative apply: validates, writes, and bumps `version` by one.
    /// On error `state` is untouched.
    pub fn apply(&self, state: &mut SessionState) -> Result<Change, ValidationError> {
        let change = self.apply_local(state)?;
        state.version += 1;
        Ok(change)
    }

    /// Optimistic apply used by clients ahead of the coordinator's echo. Does
    /// not touch `version`, which only the coordinator advances.
    pub fn apply_local(&self, state: &mut SessionState) -> Result<Change, ValidationError> {
        match self {
            Mutation::ToggleStep { track_id, step } => {
                let track = state.track_mut(track_id)?;
                track.check_step(*step)?;
                track.steps[*step] = !track.steps[*step];
                Ok(Change::ToggleStepChanged {
                    track_id: track_id.clone(),
                    step: *step,
                    active: track.steps[*step],
                })
            }
            Mutation::SetTempo { tempo } => {
                validate_tempo(*tempo)?;
                state.tempo = *tempo;
                Ok(Change::SetTempoChanged { tempo: *tempo })
            }
            Mutation::SetSwing { swing } => {
                validate_swing(*swing)?;
                state.swing = *swing;
                Ok(Change::SetSwingChanged { swing: *swing })
            }
            Mutation::SetTrackStepCount {
                track_id,
                step_count,
            } => {
                validate_step_count(*step_count)?;
                let track = state.track_mut(track_id)?;
                track.resize_steps(*step_count);
                Ok(Change::SetTrackStepCountChanged {
                    track_id: track_id.clone(),
                    step_count: *step_count,
                })
            }
            Mutation::ReorderTracks {
                from_index,
                to_index,
            } => {
                let len = state.tracks.len();
                for index in [*from_index, *to_index] {
                    if index >= len {
                        return Err(ValidationError::TrackIndexOutOfBounds { index, len });
                    }
                }
                let track = state.tracks.remove(*from_index);
                state.tracks.insert(*to_index, track);
                Ok(Change::ReorderTracksChanged {
                    track_ids: state.track_ids(),
                })
            }
            Mutation::RenameTrack { track_id, name } => {
                validate_name(name)?;
                let name = name.trim().to_string();
                let track = state.track_mut(track_id)?;
                track.name = name.clone();
                Ok(Change::RenameTrackChanged {
                    track_id: track_id.clone(),
                    name,
                })
            }
            Mutation::SetParameterLock {
                track_id,
                step,
                lock,
            } => {
                if let Some(lock) = lock {
                    lock.validate()?;
                }
                let lock = ParameterLock::normalize(*lock);
                let track = state.track_mut(track_id)?;
                track.check_step(*step)?;
                track.parameter_locks[*step] = lock;
                Ok(Change::SetParameterLockChanged {
                    track_id: track_id.clone(),
                    step: *step,
                    lock,
                })
            }
            Mutation::AddTrack { track } => {
                if state.tracks.len() >= MAX_TRACKS {
                    return Err(ValidationError::TooManyTracks);
                }
                if state.track(&track.id).is_some() {
                    return Err(ValidationError::DuplicateTrack(track.id.clone()));
                }
                track.validate()?;
                state.tracks.push(track.clone());
                Ok(Change::AddTrackChanged {
                    track: track.clone(),
                })
            }
            Mutation::DeleteTrack { track_id } => {
                let index = state
                    .tracks
                    .iter()
                    .position(|t| &t.id == track_id)
                    .ok_or_else(|| ValidationError::UnknownTrack(track_id.clone()))?;
                state.tracks.remove(index);
                Ok(Change::DeleteTrackChanged {
                    track_id: track_id.clone(),
                })
            }
            Mutation::ClearTrack { track_id } => {
                state.track_mut(track_id)?.clear();
                Ok(Change::ClearTrackChanged {
                    track_id: track_id.clone(),
                })
            }
            Mutation::SetTrackVolume { track_id, volume } => {
                validate_volume(*volume)?;
                state.track_mut(track_id)?.volume = *volume;
                Ok(Change::SetTrackVolumeChanged {
                    track_id: track_id.clone(),
                    volume: *volume,
                })
            }
            Mutation::SetTrackMuted { track_id, muted } => {
                state.track_mut(track_id)?.muted = *muted;
                Ok(Change::SetTrackMutedChanged {
                    track_id: track_id.clone(),
                    muted: *muted,
                })
            }
            Mutation::SetTrackSoloed { track_id, soloed } => {
                state.track_mut(track_id)?.soloed = *soloed;
                Ok(Change::SetTrackSoloedChanged {
                    track_id: track_id.clone(),
                    soloed: *soloed,
                })
            }
            Mutation::SetTrackTranspose {
                track_id,
                transpose,
            } => {
                validate_transpose(*transpose)?;
                state.track_mut(track_id)?.transpose = *transpose;
                Ok(Change::SetTrackTransposeChanged {
                    track_id: track_id.clone(),
                    transpose: *transpose,
                })
            }
            Mutation::SetTrackSample { track_id, sample } => {
                validate_sample(sample)?;
                state.track_mut(track_id)?.sample = sample.clone();
                Ok(Change::SetTrackSampleChanged {
                    track_id: track_id.clone(),
                    sample: sample.clone(),
                })
            }
        }
    }
}

/// The applied result of a mutation as broadcast by the coordinator.
///
/// Every variant carries absolute values (`active`, the full track order, the
/// stored lock) rather than deltas, so applying the same change twice leaves
/// the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    ToggleStepChanged {
        track_id: TrackId,
        step: usize,
        active: bool,
    },
    SetTempoChanged {
        tempo: u32,
    },
    SetSwingChanged {
        swing: u32,
    },
    SetTrackStepCountChanged {
        track_id: TrackId,
        step_count: usize,
    },
    ReorderTracksChanged {
        track_ids: Vec<TrackId>,
    },
    RenameTrackChanged {
        track_id: TrackId,
        name: String,
    },
    SetParameterLockChanged {
        track_id: TrackId,
        step: usize,
        #[serde(default)]
        lock: Option<ParameterLock>,
    },
    AddTrackChanged {
        track: Track,
    },
    DeleteTrackChanged {
        track_id: TrackId,
    },
    ClearTrackChanged {
        track_id: TrackId,
    },
    SetTrackVolumeChanged {
        track_id: TrackId,
        volume: f32,
    },
    SetTrackMutedChanged {
        track_id: TrackId,
        muted: bool,
    },
    SetTrackSoloedChanged {
        track_id: TrackId,
        soloed: bool,
    },
    SetTrackTransposeChanged {
        track_id: TrackId,
        transpose: i32,
    },
    SetTrackSampleChanged {
        track_id: TrackId,
        sample: String,
    },
}

impl Change {
    pub fn kind(&self) -> MutationKind {
        match self {
            Change::ToggleStepChanged { .. } => MutationKind::ToggleStep,
            Change::SetTempoChanged { .. } => MutationKind::SetTempo,
            Change::SetSwingChanged { .. } => MutationKind::SetSwing,
            Change::SetTrackStepCountChanged { .. } => MutationKind::SetTrackStepCount,
            Change::ReorderTracksChanged { .. } => MutationKind::ReorderTracks,
            Change::RenameTrackChanged { .. } => MutationKind::RenameTrack,
            Change::SetParameterLockChanged { .. } => MutationKind::SetParameterLock,
            Change::AddTrackChanged { .. } => MutationKind::AddTrack,
            Change::DeleteTrackChanged { .. } => MutationKind::DeleteTrack,
            Change::ClearTrackChanged { .. } => MutationKind::ClearTrack,
            Change::SetTrackVolumeChanged { .. } => MutationKind::SetTrackVolume,
            Change::SetTrackMutedChanged { .. } => MutationKind::SetTrackMuted,
            Change::SetTrackSoloedChanged { .. } => MutationKind::SetTrackSoloed,
            Change::SetTrackTransposeChanged { .. } => MutationKind::SetTrackTranspose,
            Change::SetTrackSampleChanged { .. } => MutationKind::SetTrackSample,
        }
    }

    /// Client-side apply of a coordinator broadcast. Idempotent.
    ///
    /// An error means the local copy has diverged from the coordinator (for
    /// example it never saw the track being edited); callers resynchronize
    /// from a snapshot.
    pub fn apply_to(&self, state: &mut SessionState) -> Result<(), ValidationError> {
        match self {
            Change::ToggleStepChanged {
                track_id,
                step,
                active,
            } => {
                let track = state.track_mut(track_id)?;
                track.check_step(*step)?;
                track.steps[*step] = *active;
            }
            Change::SetTempoChanged { tempo } => state.tempo = *tempo,
            Change::SetSwingChanged { swing } => state.swing = *swing,
            Change::SetTrackStepCountChanged {
                track_id,
                step_count,
            } => state.track_mut(track_id)?.resize_steps(*step_count),
            Change::ReorderTracksChanged { track_ids } => {
                if track_ids.len() != state.tracks.len() {
                    return Err(ValidationError::TrackIndexOutOfBounds {
                        index: track_ids.len(),
                        len: state.tracks.len(),
                    });
                }
                let mut reordered = Vec::with_capacity(track_ids.len());
                for id in track_ids {
                    let track = state
                        .track(id)
                        .cloned()
                        .ok_or_else(|| ValidationError::UnknownTrack(id.clone()))?;
                    reordered.push(track);
                }
                state.tracks = reordered;
            }
            Change::RenameTrackChanged { track_id, name } => {
                state.track_mut(track_id)?.name = name.clone()
            }
            Change::SetParameterLockChanged {
                track_id,
                step,
                lock,
            } => {
                let track = state.track_mut(track_id)?;
                track.check_step(*step)?;
                track.parameter_locks[*step] = *lock;
            }
            Change::AddTrackChanged { track } => {
                match state.tracks.iter_mut().find(|t| t.id == track.id) {
                    Some(existing) => *existing = track.clone(),
                    None => state.tracks.push(track.clone()),
                }
            }
            Change::DeleteTrackChanged { track_id } => {
                state.tracks.retain(|t| &t.id != track_id);
            }
            Change::ClearTrackChanged { track_id } => state.track_mut(track_id)?.clear(),
            Change::SetTrackVolumeChanged { track_id, volume } => {
                state.track_mut(track_id)?.volume = *volume
            }
            Change::SetTrackMutedChanged { track_id, muted } => {
                state.track_mut(track_id)?.muted = *muted
            }
            Change::SetTrackSoloedChanged { track_id, soloed } => {
                state.track_mut(track_id)?.soloed = *soloed
            }
            Change::SetTrackTransposeChanged {
                track_id,
                transpose,
            } => state.track_mut(track_id)?.transpose = *transpose,
            Change::SetTrackSampleChanged { track_id, sample } => {
                state.track_mut(track_id)?.sample = sample.clone()
            }
        }
        Ok(())
    }
}

use boardwalk_core::{Mutation, TrackId};
use serde::{Deserialize, Serialize};

/// What the UI asks the sync module to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Shared edit: applied locally, then sent to the coordinator.
    Mutate(Mutation),
    /// View-only change; never leaves this client.
    Local(LocalAction),
}

impl From<Mutation> for Action {
    fn from(mutation: Mutation) -> Self {
        Action::Mutate(mutation)
    }
}

impl From<LocalAction> for Action {
    fn from(action: LocalAction) -> Self {
        Action::Local(action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalAction {
    SelectTrack(Option<TrackId>),
    FocusStep(Option<usize>),
}

/// Per-client UI state that is not part of the shared session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalState {
    pub selected_track: Option<TrackId>,
    pub focused_step: Option<usize>,
}

impl LocalState {
    pub(crate) fn apply(&mut self, action: LocalAction) {
        match action {
            LocalAction::SelectTrack(track) => {
                self.selected_track = track;
                self.focused_step = None;
            }
            LocalAction::FocusStep(step) => self.focused_step = step,
        }
    }
}

use serde::{Deserialize, Serialize};

/// Load lifecycle of a data source or one of its tiles.
///
/// The derive order is the lattice order: `Pending < Loading < Ready`. A single source only
/// ever moves forward along it.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DataState {
    /// Not requested yet.
    #[default]
    Pending,
    /// Request in flight (or failed and waiting for a retry).
    Loading,
    /// Available.
    Ready,
}

impl DataState {
    /// Advances to `next` unless that would move backwards.
    pub fn advance(&mut self, next: DataState) -> bool {
        if next > *self {
            *self = next;
            true
        } else {
            false
        }
    }
}

/// Worst-of merge across sources. `None` when no source has an opinion.
pub fn merge_states(states: impl IntoIterator<Item = DataState>) -> Option<DataState> {
    states.into_iter().min()
}

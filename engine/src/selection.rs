//! Pick the active entity from the roster.

use tavern_types::{EntityId, RosterEntry};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("roster is empty; there is no entity to select")]
    EmptyRoster,
    /// Inconsistent backend data: the roster must flag at most one default.
    #[error("roster flags {} entities as default ({})", .ids.len(), format_ids(.ids))]
    MultipleDefaults { ids: Vec<EntityId> },
}

fn format_ids(ids: &[EntityId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The single default-flagged entry, or the first entry when none is flagged.
pub fn resolve_selection(roster: &[RosterEntry]) -> Result<EntityId, SelectionError> {
    let first = roster.first().ok_or(SelectionError::EmptyRoster)?;
    let defaults: Vec<EntityId> = roster
        .iter()
        .filter(|entry| entry.is_default)
        .map(|entry| entry.id)
        .collect();

    match defaults.as_slice() {
        [] => {
            tracing::debug!(entity = %first.id, "No default entity flagged, selecting first");
            Ok(first.id)
        }
        [only] => Ok(*only),
        _ => Err(SelectionError::MultipleDefaults { ids: defaults }),
    }
}

//! Status rows for all known migrations.

use crate::migration::{MigrationId, MigrationSet, MigrationStatus};

/// A single row of the status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub id: MigrationId,
    pub version: Option<String>,
    pub applied_at: Option<String>,
    pub description: String,
    pub status: MigrationStatus,
}

impl StatusRow {
    /// The row as display cells: id, version, applied at, description, status.
    #[must_use]
    pub fn cells(&self) -> [String; 5] {
        [
            self.id.to_string(),
            self.version.clone().unwrap_or_default(),
            self.applied_at.clone().unwrap_or_default(),
            self.description.clone(),
            self.status.to_string(),
        ]
    }
}

/// One row per migration of a merged set (see [`crate::source::merge`]), in id order.
#[must_use]
pub fn render(merged: &MigrationSet) -> Vec<StatusRow> {
    merged
        .iter()
        .map(|mig| StatusRow {
            id: mig.id(),
            version: mig.version().map(str::to_string),
            applied_at: mig.applied_at().map(str::to_string),
            description: mig.description().to_string(),
            status: mig.status(),
        })
        .collect()
}

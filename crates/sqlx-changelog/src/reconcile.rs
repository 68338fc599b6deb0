//! Selecting the migrations to run.
//!
//! [`plan`] is a pure function over the local and remote migration sets,
//! every error it returns is raised before any database change.

use std::{fmt, str::FromStr};

use crate::{
    migration::{Migration, MigrationId, MigrationSet},
    Error,
};

/// Direction of a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Apply pending migrations in ascending order.
    Up,
    /// Revert applied migrations in descending order.
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Up => "up",
            Direction::Down => "down",
        })
    }
}

/// What to do with migrations that are in the changelog
/// but have no local file.
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RemoteOnlyPolicy {
    /// Fail if one would be run.
    #[default]
    Abort,
    /// Ignore them entirely.
    Skip,
    /// Run everything before the first one.
    Upto,
}

impl FromStr for RemoteOnlyPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            "upto" => Ok(Self::Upto),
            p => Err(anyhow::anyhow!(
                "invalid remote-only policy `{}`, use one of: abort, skip, upto",
                p
            )),
        }
    }
}

/// Filters for a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// Run exactly this migration.
    pub only: Option<MigrationId>,
    /// Run all migrations up to and including this one, in direction order.
    pub to: Option<MigrationId>,
    pub remote_only: RemoteOnlyPolicy,
}

impl Selection {
    #[must_use]
    pub fn only(id: impl Into<MigrationId>) -> Self {
        Self {
            only: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn to(id: impl Into<MigrationId>) -> Self {
        Self {
            to: Some(id.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn remote_only(mut self, policy: RemoteOnlyPolicy) -> Self {
        self.remote_only = policy;
        self
    }
}

/// Compute the ordered list of migrations to run.
///
/// - `up` considers local migrations missing from the changelog, ascending.
/// - `down` considers everything in the changelog, descending, and
///   reverts a single migration unless `only` or `to` is given.
///
/// # Errors
///
/// Unknown targets and remote-only migrations that would have to be
/// executed are reported, see [`Error`].
pub fn plan(
    local: &MigrationSet,
    remote: &MigrationSet,
    direction: Direction,
    selection: &Selection,
) -> Result<Vec<Migration>, Error> {
    let mut candidates: Vec<Migration> = match direction {
        Direction::Up => local
            .iter()
            .filter(|mig| !remote.contains(mig.id()))
            .cloned()
            .collect(),
        Direction::Down => remote.iter().rev().cloned().collect(),
    };

    if selection.remote_only == RemoteOnlyPolicy::Skip {
        candidates.retain(|mig| {
            if mig.is_remote_only() {
                tracing::debug!(id = %mig.id(), "skipping remote-only migration");
            }
            !mig.is_remote_only()
        });
    }

    if let Some(only) = selection.only {
        if selection.to.is_some() {
            tracing::warn!(%only, "both `only` and `to` were given, `to` is ignored");
        }

        let mig = candidates
            .into_iter()
            .find(|mig| mig.id() == only)
            .ok_or(Error::UnknownMigrationTarget {
                id: only,
                direction,
            })?;

        if mig.is_remote_only() {
            return Err(Error::RemoteOnlyTargetRejected { id: only });
        }

        candidates = vec![mig];
    } else if let Some(to) = selection.to {
        let end = candidates
            .iter()
            .position(|mig| mig.id() == to)
            .ok_or(Error::UnknownMigrationTarget { id: to, direction })?;

        candidates.truncate(end + 1);
    }

    if selection.remote_only == RemoteOnlyPolicy::Upto {
        if let Some(idx) = candidates.iter().position(Migration::is_remote_only) {
            tracing::debug!(
                id = %candidates[idx].id(),
                "stopping before remote-only migration"
            );
            candidates.truncate(idx);
        }
    }

    if direction == Direction::Down && selection.only.is_none() && selection.to.is_none() {
        candidates.truncate(1);
    }

    if let Some(blocking) = candidates.iter().find(|mig| mig.is_remote_only()) {
        return Err(Error::RemoteOnlyMigrationBlocking { id: blocking.id() });
    }

    Ok(candidates)
}

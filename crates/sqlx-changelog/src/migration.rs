//! Migration records and ordered migration sets.

use regex::Regex;
use std::{
    collections::{btree_map, BTreeMap},
    fmt,
    num::ParseIntError,
    str::FromStr,
    sync::OnceLock,
};

use crate::{db::ChangelogEntry, Error};

/// The line separating the up script from the down script in a migration file.
pub const UNDO_MARKER: &str = "-- @UNDO";

/// Identifier of a migration, taken from the numeric prefix of its file name.
///
/// Identifiers are compared numerically, so `10` sorts after `9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MigrationId(u64);

impl MigrationId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for MigrationId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MigrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MigrationId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Status of a migration relative to the changelog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Found locally, not recorded in the changelog.
    Pending,
    /// Recorded in the changelog.
    Migrated,
    /// Recorded in the changelog, but the file is missing locally.
    RemoteOnly,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MigrationStatus::Pending => "PENDING",
            MigrationStatus::Migrated => "MIGRATED",
            MigrationStatus::RemoteOnly => "REMOTE ONLY",
        })
    }
}

/// A single SQL migration.
///
/// Migrations are rebuilt from the migrations directory and the changelog table
/// on every run, see [`crate::source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    id: MigrationId,
    description: String,
    file: Option<String>,
    version: Option<String>,
    applied_at: Option<String>,
    up: Option<String>,
    down: Option<String>,
    remote_only: bool,
}

impl Migration {
    /// Create a pending migration from the name and content of a migration file.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedMigrationFile`] is returned if the file name does not
    /// follow the `{id}_{description}.sql` pattern.
    pub fn from_file(file_name: &str, content: &str) -> Result<Self, Error> {
        let (id, description) = parse_file_name(file_name)?;
        let (up, down) = split_scripts(content);

        Ok(Self {
            id,
            description,
            file: Some(file_name.to_string()),
            version: None,
            applied_at: None,
            up: Some(up.to_string()),
            down: down.map(str::to_string),
            remote_only: false,
        })
    }

    /// Create an applied migration from a changelog row.
    ///
    /// If `local` is given, its file and scripts are carried over,
    /// otherwise the migration is marked as remote-only.
    #[must_use]
    pub fn from_changelog(entry: ChangelogEntry, local: Option<&Migration>) -> Self {
        match local {
            Some(local) => Self {
                id: entry.id,
                description: entry.description,
                file: local.file.clone(),
                version: entry.version,
                applied_at: Some(entry.applied_at),
                up: local.up.clone(),
                down: local.down.clone(),
                remote_only: false,
            },
            None => Self {
                id: entry.id,
                description: entry.description,
                file: None,
                version: entry.version,
                applied_at: Some(entry.applied_at),
                up: None,
                down: None,
                remote_only: true,
            },
        }
    }

    #[must_use]
    pub fn id(&self) -> MigrationId {
        self.id
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The local file name, absent for remote-only migrations.
    #[must_use]
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn applied_at(&self) -> Option<&str> {
        self.applied_at.as_deref()
    }

    #[must_use]
    pub fn up_script(&self) -> Option<&str> {
        self.up.as_deref()
    }

    #[must_use]
    pub fn down_script(&self) -> Option<&str> {
        self.down.as_deref()
    }

    #[must_use]
    pub fn is_remote_only(&self) -> bool {
        self.remote_only
    }

    /// Whether the migration has a down script.
    #[must_use]
    pub fn is_reversible(&self) -> bool {
        self.down.is_some()
    }

    #[must_use]
    pub fn status(&self) -> MigrationStatus {
        if self.remote_only {
            MigrationStatus::RemoteOnly
        } else if self.applied_at.is_some() {
            MigrationStatus::Migrated
        } else {
            MigrationStatus::Pending
        }
    }

    /// File name used in error messages.
    pub(crate) fn display_file(&self) -> String {
        self.file
            .clone()
            .unwrap_or_else(|| format!("{}_<missing>", self.id))
    }
}

/// Migrations keyed and ordered by their id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet(BTreeMap<MigrationId, Migration>);

impl MigrationSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a migration, returning the one it replaced with the same id.
    pub fn insert(&mut self, migration: Migration) -> Option<Migration> {
        self.0.insert(migration.id, migration)
    }

    #[must_use]
    pub fn get(&self, id: MigrationId) -> Option<&Migration> {
        self.0.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: MigrationId) -> bool {
        self.0.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate in ascending id order, use `.rev()` for the down direction.
    pub fn iter(&self) -> btree_map::Values<'_, MigrationId, Migration> {
        self.0.values()
    }

    pub fn ids(&self) -> impl DoubleEndedIterator<Item = MigrationId> + '_ {
        self.0.keys().copied()
    }
}

impl FromIterator<Migration> for MigrationSet {
    fn from_iter<T: IntoIterator<Item = Migration>>(iter: T) -> Self {
        Self(iter.into_iter().map(|mig| (mig.id, mig)).collect())
    }
}

impl IntoIterator for MigrationSet {
    type Item = Migration;
    type IntoIter = btree_map::IntoValues<MigrationId, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

impl<'a> IntoIterator for &'a MigrationSet {
    type Item = &'a Migration;
    type IntoIter = btree_map::Values<'a, MigrationId, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.values()
    }
}

fn file_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?P<id>[0-9]+)_(?P<slug>[^.]+)\.sql$").expect("invalid file name pattern")
    })
}

/// Split `{id}_{slug}.sql` into the id and a human readable description.
///
/// # Errors
///
/// [`Error::MalformedMigrationFile`] if the name does not match the pattern
/// or the id does not fit into a signed 64-bit integer.
pub fn parse_file_name(file_name: &str) -> Result<(MigrationId, String), Error> {
    let captures =
        file_name_pattern()
            .captures(file_name)
            .ok_or_else(|| Error::MalformedMigrationFile {
                file: file_name.to_string(),
                reason: "expected a name like `{id}_{description}.sql`".into(),
            })?;

    let id = captures["id"]
        .parse::<MigrationId>()
        .map_err(|err| Error::MalformedMigrationFile {
            file: file_name.to_string(),
            reason: format!("invalid id: {err}").into(),
        })?;

    // Ids are stored as signed 64-bit integers in the changelog.
    if i64::try_from(id.get()).is_err() {
        return Err(Error::MalformedMigrationFile {
            file: file_name.to_string(),
            reason: format!("id {id} is larger than {}", i64::MAX).into(),
        });
    }

    let description = captures["slug"]
        .split(|c| c == '-' || c == '_')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    Ok((id, description))
}

/// Split a migration file into its up script and optional down script.
///
/// The separator is the first line consisting only of [`UNDO_MARKER`],
/// surrounding whitespace aside.
#[must_use]
pub fn split_scripts(content: &str) -> (&str, Option<&str>) {
    let mut line_start = 0;

    for line in content.split_inclusive('\n') {
        let line_end = line_start + line.len();

        if line.trim() == UNDO_MARKER {
            return (&content[..line_start], Some(&content[line_end..]));
        }

        line_start = line_end;
    }

    (content, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timestamp_file_names() {
        let (id, description) = parse_file_name("20211215162220_create-users-table.sql").unwrap();
        assert_eq!(id, MigrationId::new(20211215162220));
        assert_eq!(description, "create users table");
    }

    #[test]
    fn underscores_in_slug_become_spaces() {
        let (id, description) = parse_file_name("7_add_email_column.sql").unwrap();
        assert_eq!(id.get(), 7);
        assert_eq!(description, "add email column");
    }

    #[test]
    fn rejects_malformed_file_names() {
        for name in ["README.md", "abc_thing.sql", "12.sql", "12_.sql", "12_thing.txt"] {
            assert!(
                matches!(
                    parse_file_name(name),
                    Err(Error::MalformedMigrationFile { .. })
                ),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn ids_sort_numerically() {
        let mut ids = vec![MigrationId::new(10), MigrationId::new(9), MigrationId::new(100)];
        ids.sort();
        assert_eq!(ids, [9, 10, 100].map(MigrationId::new));
    }

    #[test]
    fn splits_on_undo_marker() {
        let (up, down) = split_scripts("CREATE TABLE a (id INTEGER);\n-- @UNDO\nDROP TABLE a;\n");
        assert_eq!(up, "CREATE TABLE a (id INTEGER);\n");
        assert_eq!(down, Some("DROP TABLE a;\n"));
    }

    #[test]
    fn marker_must_be_a_whole_line() {
        let content = "-- @UNDONE: tidy later\nCREATE TABLE a (id INTEGER); -- @UNDO\n";
        let (up, down) = split_scripts(content);
        assert_eq!(up, content);
        assert_eq!(down, None);

        let mig = Migration::from_file("1_x.sql", content).unwrap();
        assert_eq!(mig.up_script(), Some(content));
        assert!(!mig.is_reversible());
    }

    #[test]
    fn marker_line_may_be_indented() {
        let (up, down) = split_scripts("SELECT 1;\r\n  -- @UNDO  \r\nSELECT 2;\r\n");
        assert_eq!(up, "SELECT 1;\r\n");
        assert_eq!(down, Some("SELECT 2;\r\n"));
    }

    #[test]
    fn marker_on_last_line_gives_empty_down_script() {
        let (up, down) = split_scripts("SELECT 1;\n-- @UNDO");
        assert_eq!(up, "SELECT 1;\n");
        assert_eq!(down, Some(""));
    }

    #[test]
    fn rejects_ids_outside_the_changelog_range() {
        let max = format!("{}_ok.sql", i64::MAX);
        assert_eq!(parse_file_name(&max).unwrap().0.get(), i64::MAX as u64);

        let too_large = format!("{}_too-large.sql", i64::MAX as u64 + 1);
        assert!(matches!(
            parse_file_name(&too_large),
            Err(Error::MalformedMigrationFile { .. })
        ));
    }

    #[test]
    fn missing_marker_means_irreversible() {
        let mig = Migration::from_file("1_seed.sql", "INSERT INTO a VALUES (1);").unwrap();
        assert_eq!(mig.up_script(), Some("INSERT INTO a VALUES (1);"));
        assert!(!mig.is_reversible());
        assert_eq!(mig.status(), MigrationStatus::Pending);
    }

    #[test]
    fn changelog_row_keeps_local_scripts() {
        let local = Migration::from_file("3_thing.sql", "SELECT 1;\n-- @UNDO\nSELECT 2;").unwrap();
        let entry = ChangelogEntry {
            id: MigrationId::new(3),
            version: Some("1.2".into()),
            applied_at: "2021-12-15 16:22:20".into(),
            description: "thing".into(),
        };

        let mig = Migration::from_changelog(entry.clone(), Some(&local));
        assert_eq!(mig.status(), MigrationStatus::Migrated);
        assert_eq!(mig.version(), Some("1.2"));
        assert_eq!(mig.up_script(), local.up_script());
        assert_eq!(mig.down_script(), local.down_script());

        let remote = Migration::from_changelog(entry, None);
        assert_eq!(remote.status(), MigrationStatus::RemoteOnly);
        assert!(remote.up_script().is_none());
        assert!(remote.down_script().is_none());
    }

    #[test]
    fn set_iterates_in_id_order() {
        let set = ["2_b.sql", "10_c.sql", "0_a.sql"]
            .into_iter()
            .map(|name| Migration::from_file(name, "").unwrap())
            .collect::<MigrationSet>();

        let ids = set.ids().map(MigrationId::get).collect::<Vec<_>>();
        assert_eq!(ids, [0, 2, 10]);

        let rev = set.iter().rev().map(|m| m.id().get()).collect::<Vec<_>>();
        assert_eq!(rev, [10, 2, 0]);
    }
}

//! Field-origin partition
//!
//! Every mutable canonical column has exactly one source kind allowed to
//! write it. Identity columns (natural-key parts and foreign keys) are written
//! once on insert and belong to nobody. The merge engine checks each planned
//! segment against [`FIELD_OWNERS`] before writing anything.

use std::fmt;

use serde::Serialize;

use crate::error::{MergeError, MergeResult};
use crate::staging::SourceKind;

/// Canonical tables, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CanonicalTable {
    Track,
    Race,
    Entry,
    Result,
    Payout,
    Workout,
}

impl CanonicalTable {
    pub const ALL: [CanonicalTable; 6] = [
        CanonicalTable::Track,
        CanonicalTable::Race,
        CanonicalTable::Entry,
        CanonicalTable::Result,
        CanonicalTable::Payout,
        CanonicalTable::Workout,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            CanonicalTable::Track => "track",
            CanonicalTable::Race => "race",
            CanonicalTable::Entry => "entry",
            CanonicalTable::Result => "result",
            CanonicalTable::Payout => "payout",
            CanonicalTable::Workout => "workout",
        }
    }

    pub fn id_column(self) -> &'static str {
        match self {
            CanonicalTable::Track => "track_id",
            CanonicalTable::Race => "race_id",
            CanonicalTable::Entry => "entry_id",
            CanonicalTable::Result => "result_id",
            CanonicalTable::Payout => "payout_id",
            CanonicalTable::Workout => "workout_id",
        }
    }

    /// Position in the merge order; referenced tables come first
    pub fn merge_rank(self) -> u8 {
        match self {
            CanonicalTable::Track => 0,
            CanonicalTable::Race => 1,
            CanonicalTable::Entry => 2,
            CanonicalTable::Result | CanonicalTable::Payout => 3,
            CanonicalTable::Workout => 4,
        }
    }
}

impl fmt::Display for CanonicalTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

use self::CanonicalTable as T;
use crate::staging::SourceKind as K;

/// (table, column, owning source kind)
pub const FIELD_OWNERS: &[(CanonicalTable, &str, SourceKind)] = &[
    // race, as scheduled
    (T::Race, "surface", K::PpRace),
    (T::Race, "distance_yards", K::PpRace),
    (T::Race, "course", K::PpRace),
    (T::Race, "age_restriction", K::PpRace),
    (T::Race, "sex_restriction", K::PpRace),
    (T::Race, "purse", K::PpRace),
    (T::Race, "wager_text", K::PpRace),
    (T::Race, "program_selections", K::PpRace),
    // race, as run
    (T::Race, "run_surface", K::ChartRace),
    (T::Race, "run_distance_yards", K::ChartRace),
    (T::Race, "track_condition", K::ChartRace),
    (T::Race, "winning_time", K::ChartRace),
    (T::Race, "field_size", K::ChartRace),
    // entry
    (T::Entry, "horse_name", K::PpEntry),
    (T::Entry, "sire", K::PpEntry),
    (T::Entry, "dam", K::PpEntry),
    (T::Entry, "trainer", K::PpEntry),
    (T::Entry, "jockey", K::PpEntry),
    (T::Entry, "lasix", K::PpEntry),
    (T::Entry, "blinkers", K::PpEntry),
    (T::Entry, "ml_odds", K::PpEntry),
    (T::Entry, "speed_fig_last", K::PpEntry),
    (T::Entry, "pace_fig1", K::PpEntry),
    (T::Entry, "pace_fig2", K::PpEntry),
    (T::Entry, "pace_fig3", K::PpEntry),
    (T::Entry, "class_rating", K::PpEntry),
    (T::Entry, "last_comment", K::PpEntry),
    (T::Entry, "scratch_flag", K::ChartScratch),
    (T::Entry, "scratch_reason", K::ChartScratch),
    // result
    (T::Result, "charted_horse_name", K::ChartEntry),
    (T::Result, "finish_position", K::ChartEntry),
    (T::Result, "final_odds", K::ChartEntry),
    (T::Result, "win_payoff", K::ChartEntry),
    (T::Result, "place_payoff", K::ChartEntry),
    (T::Result, "show_payoff", K::ChartEntry),
    (T::Result, "dq_flag", K::ChartEntry),
    // payout
    (T::Payout, "pool", K::ChartPayout),
    (T::Payout, "payout_amount", K::ChartPayout),
    // workout
    (T::Workout, "surface", K::PpWorkout),
    (T::Workout, "course_type", K::PpWorkout),
    (T::Workout, "rank_in_set", K::PpWorkout),
    (T::Workout, "set_size", K::PpWorkout),
    (T::Workout, "raw_time", K::PpWorkout),
    (T::Workout, "bullet", K::PpWorkout),
];

pub fn owner_of(table: CanonicalTable, column: &str) -> Option<SourceKind> {
    FIELD_OWNERS
        .iter()
        .find(|(t, c, _)| *t == table && *c == column)
        .map(|(_, _, kind)| *kind)
}

/// Fail with [`MergeError::CanonicalConflict`] unless `kind` owns every column
pub fn check_columns<'a>(
    table: CanonicalTable,
    kind: SourceKind,
    columns: impl IntoIterator<Item = &'a str>,
) -> MergeResult<()> {
    for column in columns {
        let owner = owner_of(table, column);
        if owner != Some(kind) {
            return Err(MergeError::CanonicalConflict {
                table,
                column: column.to_string(),
                owner,
                attempted: kind,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_column_has_one_owner() {
        let mut seen = HashSet::new();
        for (table, column, _) in FIELD_OWNERS {
            assert!(seen.insert((*table, *column)), "{table}.{column} listed twice");
        }
    }

    #[test]
    fn test_pp_and_chart_partition_entry() {
        assert_eq!(owner_of(T::Entry, "trainer"), Some(K::PpEntry));
        assert_eq!(owner_of(T::Entry, "scratch_flag"), Some(K::ChartScratch));
        assert_eq!(owner_of(T::Result, "finish_position"), Some(K::ChartEntry));
        assert_eq!(owner_of(T::Entry, "program_number"), None);
    }

    #[test]
    fn test_foreign_writer_is_conflict() {
        assert!(check_columns(T::Entry, K::PpEntry, ["trainer", "ml_odds"]).is_ok());

        let err = check_columns(T::Entry, K::ChartEntry, ["trainer"]).unwrap_err();
        assert!(matches!(
            err,
            MergeError::CanonicalConflict { owner: Some(K::PpEntry), attempted: K::ChartEntry, .. }
        ));
    }

    #[test]
    fn test_identity_column_is_unowned() {
        let err = check_columns(T::Race, K::PpRace, ["race_number"]).unwrap_err();
        assert!(matches!(err, MergeError::CanonicalConflict { owner: None, .. }));
    }

    #[test]
    fn test_merge_order() {
        let mut tables = CanonicalTable::ALL.to_vec();
        tables.sort_by_key(|t| t.merge_rank());
        assert_eq!(tables.first(), Some(&T::Track));
        assert!(T::Race.merge_rank() < T::Entry.merge_rank());
        assert!(T::Entry.merge_rank() < T::Result.merge_rank());
    }
}

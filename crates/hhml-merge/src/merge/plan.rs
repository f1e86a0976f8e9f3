//! Staged row → canonical writes
//!
//! Each staged row maps to the identity writes it depends on plus at most one
//! segment write carrying the columns its kind owns. A chart finisher line,
//! for example, ensures its race and entry exist and writes the result
//! segment; it never touches the entry's past-performance columns.

use hhml_common::types::{EntryKey, PayoutKey, RaceKey, WorkoutKey};

use crate::error::{MergeError, MergeResult};
use crate::identity::{self, track_id};
use crate::ledger::FileId;
use crate::merge::ownership::CanonicalTable;
use crate::merge::write::{CanonicalWrite, Segment, SqlValue};
use crate::staging::ParsedRow;

fn race_identity(key: &RaceKey) -> CanonicalWrite {
    CanonicalWrite::identity(
        CanonicalTable::Race,
        identity::race_id_for(key).as_uuid(),
        key.natural_key(),
        vec![
            ("track_id", SqlValue::Uuid(track_id(&key.track).as_uuid())),
            ("race_date", SqlValue::Date(key.race_date)),
            ("race_number", SqlValue::Int(Some(key.race_number))),
        ],
    )
}

fn entry_identity(key: &EntryKey) -> CanonicalWrite {
    CanonicalWrite::identity(
        CanonicalTable::Entry,
        identity::entry_id_for(key).as_uuid(),
        key.natural_key(),
        vec![
            ("race_id", SqlValue::Uuid(identity::race_id_for(&key.race).as_uuid())),
            ("program_number", SqlValue::Text(Some(key.program.to_string()))),
        ],
    )
}

fn result_identity(key: &EntryKey) -> CanonicalWrite {
    let entry = identity::entry_id_for(key);
    CanonicalWrite::identity(
        CanonicalTable::Result,
        identity::result_id(entry).as_uuid(),
        key.natural_key(),
        vec![
            ("race_id", SqlValue::Uuid(identity::race_id_for(&key.race).as_uuid())),
            ("entry_id", SqlValue::Uuid(entry.as_uuid())),
        ],
    )
}

fn payout_identity(key: &PayoutKey) -> CanonicalWrite {
    CanonicalWrite::identity(
        CanonicalTable::Payout,
        identity::payout_id_for(key).as_uuid(),
        key.natural_key(),
        vec![
            ("race_id", SqlValue::Uuid(identity::race_id_for(&key.race).as_uuid())),
            ("wager_type", SqlValue::Text(Some(key.wager_type.clone()))),
            ("winning_numbers", SqlValue::Text(Some(key.combination.clone()))),
        ],
    )
}

fn workout_identity(key: &WorkoutKey) -> CanonicalWrite {
    CanonicalWrite::identity(
        CanonicalTable::Workout,
        identity::workout_id_for(key).as_uuid(),
        key.natural_key(),
        vec![
            ("horse_name", SqlValue::Text(Some(key.horse_name.clone()))),
            ("work_date", SqlValue::Date(key.work_date)),
            ("track_id", SqlValue::Uuid(track_id(&key.track).as_uuid())),
            ("distance_furlongs", SqlValue::Float(Some(key.distance_furlongs()))),
        ],
    )
}

/// Canonical writes for one staged row, unordered
pub fn plan_row(row: &ParsedRow, file_id: FileId) -> MergeResult<Vec<CanonicalWrite>> {
    let kind = row.kind();
    let malformed = |e| MergeError::malformed(kind, e);
    let segment = |columns| Segment::new(kind, file_id, columns);

    let writes = match row {
        ParsedRow::PpRace(r) => {
            let key = r.race_key().map_err(malformed)?;
            vec![race_identity(&key).with_segment(segment(vec![
                ("surface", SqlValue::text(r.surface.as_deref())),
                ("distance_yards", SqlValue::Int(r.distance_yards)),
                ("course", SqlValue::text(r.course.as_deref())),
                ("age_restriction", SqlValue::text(r.age_restriction.as_deref())),
                ("sex_restriction", SqlValue::text(r.sex_restriction.as_deref())),
                ("purse", SqlValue::Int(r.purse)),
                ("wager_text", SqlValue::verbatim(r.wager_text.as_deref())),
                ("program_selections", SqlValue::verbatim(r.program_selections.as_deref())),
            ])?)]
        }
        ParsedRow::PpEntry(r) => {
            let key = r.entry_key().map_err(malformed)?;
            vec![
                race_identity(&key.race),
                entry_identity(&key).with_segment(segment(vec![
                    ("horse_name", SqlValue::text(r.horse_name.as_deref())),
                    ("sire", SqlValue::text(r.sire.as_deref())),
                    ("dam", SqlValue::text(r.dam.as_deref())),
                    ("trainer", SqlValue::text(r.trainer.as_deref())),
                    ("jockey", SqlValue::text(r.jockey.as_deref())),
                    ("lasix", SqlValue::Bool(r.lasix)),
                    ("blinkers", SqlValue::Bool(r.blinkers)),
                    ("ml_odds", SqlValue::verbatim(r.ml_odds.as_deref())),
                    ("speed_fig_last", SqlValue::Int(r.speed_fig_last)),
                    ("pace_fig1", SqlValue::Int(r.pace_fig1)),
                    ("pace_fig2", SqlValue::Int(r.pace_fig2)),
                    ("pace_fig3", SqlValue::Int(r.pace_fig3)),
                    ("class_rating", SqlValue::Float(r.class_rating)),
                    ("last_comment", SqlValue::text(r.last_comment.as_deref())),
                ])?),
            ]
        }
        ParsedRow::PpWorkout(r) => {
            let key = r.workout_key().map_err(malformed)?;
            vec![workout_identity(&key).with_segment(segment(vec![
                ("surface", SqlValue::text(r.surface.as_deref())),
                ("course_type", SqlValue::text(r.course_type.as_deref())),
                ("rank_in_set", SqlValue::Int(r.rank_in_set)),
                ("set_size", SqlValue::Int(r.set_size)),
                ("raw_time", SqlValue::verbatim(r.raw_time.as_deref())),
                ("bullet", SqlValue::Bool(r.bullet)),
            ])?)]
        }
        ParsedRow::ChartRace(r) => {
            let key = r.race_key().map_err(malformed)?;
            vec![race_identity(&key).with_segment(segment(vec![
                ("run_surface", SqlValue::text(r.surface.as_deref())),
                ("run_distance_yards", SqlValue::Int(r.distance_yards)),
                ("track_condition", SqlValue::text(r.track_condition.as_deref())),
                ("winning_time", SqlValue::verbatim(r.winning_time.as_deref())),
                ("field_size", SqlValue::Int(r.field_size)),
            ])?)]
        }
        ParsedRow::ChartEntry(r) => {
            let key = r.entry_key().map_err(malformed)?;
            vec![
                race_identity(&key.race),
                entry_identity(&key),
                result_identity(&key).with_segment(segment(vec![
                    ("charted_horse_name", SqlValue::text(r.horse_name.as_deref())),
                    ("finish_position", SqlValue::Int(r.finish_position)),
                    ("final_odds", SqlValue::Float(r.final_odds)),
                    ("win_payoff", SqlValue::Float(r.win_payoff)),
                    ("place_payoff", SqlValue::Float(r.place_payoff)),
                    ("show_payoff", SqlValue::Float(r.show_payoff)),
                    ("dq_flag", SqlValue::Bool(r.dq_flag)),
                ])?),
            ]
        }
        ParsedRow::ChartPayout(r) => {
            let key = r.payout_key().map_err(malformed)?;
            vec![
                race_identity(&key.race),
                payout_identity(&key).with_segment(segment(vec![
                    ("pool", SqlValue::Float(r.pool)),
                    ("payout_amount", SqlValue::Float(r.payout_amount)),
                ])?),
            ]
        }
        ParsedRow::ChartScratch(r) => {
            let key = r.entry_key().map_err(malformed)?;
            // Only ever asserted; nothing maps a false scratch flag
            vec![
                race_identity(&key.race),
                entry_identity(&key).with_segment(segment(vec![
                    ("scratch_flag", SqlValue::Bool(Some(true))),
                    ("scratch_reason", SqlValue::text(r.reason.as_deref())),
                ])?),
            ]
        }
    };

    Ok(writes)
}

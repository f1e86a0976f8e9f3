//! Typed parser rows, one struct per source kind
//!
//! The external parser emits one JSON object per row, tagged with `kind`.
//! Every field is optional at this layer; key fields are validated when the
//! natural key is derived, so a row missing its race number is rejected as
//! malformed instead of failing the whole file.

use std::fmt;
use std::str::FromStr;

use hhml_common::fingerprint::RowFields;
use hhml_common::types::{EntryKey, PayoutKey, RaceKey, TrackCode, WorkoutKey};
use hhml_common::{HhmlError, Result};
use serde::{Deserialize, Serialize};

use crate::ledger::FileType;

/// Staged record kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    PpRace,
    PpEntry,
    PpWorkout,
    ChartRace,
    ChartEntry,
    ChartPayout,
    ChartScratch,
}

impl SourceKind {
    pub const ALL: [SourceKind; 7] = [
        SourceKind::PpRace,
        SourceKind::PpEntry,
        SourceKind::PpWorkout,
        SourceKind::ChartRace,
        SourceKind::ChartEntry,
        SourceKind::ChartPayout,
        SourceKind::ChartScratch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::PpRace => "pp_race",
            SourceKind::PpEntry => "pp_entry",
            SourceKind::PpWorkout => "pp_workout",
            SourceKind::ChartRace => "chart_race",
            SourceKind::ChartEntry => "chart_entry",
            SourceKind::ChartPayout => "chart_payout",
            SourceKind::ChartScratch => "chart_scratch",
        }
    }

    pub fn file_type(self) -> FileType {
        match self {
            SourceKind::PpRace | SourceKind::PpEntry | SourceKind::PpWorkout => FileType::Pp,
            _ => FileType::Chart,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = HhmlError;

    fn from_str(s: &str) -> Result<Self> {
        SourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| HhmlError::invalid("source_kind", format!("unknown kind '{s}'")))
    }
}

/// Natural key and fingerprint derivation shared by all row structs
pub trait KeyedRow {
    const KIND: SourceKind;

    /// `|`-separated natural key, unique per source file
    fn natural_key(&self) -> Result<String>;

    /// Semantically meaningful fields, normalised for fingerprinting
    fn fields(&self) -> Result<RowFields>;
}

fn race_fields(key: &RaceKey) -> RowFields {
    RowFields::new()
        .text("track_code", Some(key.track.as_str()))
        .date("race_date", Some(key.race_date))
        .int("race_number", Some(key.race_number))
}

/// Race header from a past-performance file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpRaceRow {
    pub track_code: Option<String>,
    pub race_date: Option<String>,
    pub race_number: Option<i32>,
    pub surface: Option<String>,
    pub distance_yards: Option<i32>,
    pub course: Option<String>,
    pub track_condition: Option<String>,
    pub age_restriction: Option<String>,
    pub sex_restriction: Option<String>,
    pub purse: Option<i32>,
    pub wager_text: Option<String>,
    pub program_selections: Option<String>,
}

impl PpRaceRow {
    pub fn race_key(&self) -> Result<RaceKey> {
        RaceKey::parse(self.track_code.as_deref(), self.race_date.as_deref(), self.race_number)
    }
}

impl KeyedRow for PpRaceRow {
    const KIND: SourceKind = SourceKind::PpRace;

    fn natural_key(&self) -> Result<String> {
        Ok(self.race_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        Ok(race_fields(&self.race_key()?)
            .text("surface", self.surface.as_deref())
            .int("distance_yards", self.distance_yards)
            .text("course", self.course.as_deref())
            .text("track_condition", self.track_condition.as_deref())
            .text("age_restriction", self.age_restriction.as_deref())
            .text("sex_restriction", self.sex_restriction.as_deref())
            .int("purse", self.purse)
            .verbatim("wager_text", self.wager_text.as_deref())
            .verbatim("program_selections", self.program_selections.as_deref()))
    }
}

/// Runner line from a past-performance file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpEntryRow {
    pub track_code: Option<String>,
    pub race_date: Option<String>,
    pub race_number: Option<i32>,
    pub program_number: Option<String>,
    pub horse_name: Option<String>,
    pub sire: Option<String>,
    pub dam: Option<String>,
    pub trainer: Option<String>,
    pub jockey: Option<String>,
    pub lasix: Option<bool>,
    pub blinkers: Option<bool>,
    pub ml_odds: Option<String>,
    pub speed_fig_last: Option<i32>,
    pub pace_fig1: Option<i32>,
    pub pace_fig2: Option<i32>,
    pub pace_fig3: Option<i32>,
    pub class_rating: Option<f64>,
    pub last_comment: Option<String>,
}

impl PpEntryRow {
    pub fn entry_key(&self) -> Result<EntryKey> {
        let race = RaceKey::parse(self.track_code.as_deref(), self.race_date.as_deref(), self.race_number)?;
        EntryKey::new(race, self.program_number.as_deref())
    }
}

impl KeyedRow for PpEntryRow {
    const KIND: SourceKind = SourceKind::PpEntry;

    fn natural_key(&self) -> Result<String> {
        Ok(self.entry_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        let key = self.entry_key()?;
        race_fields(&key.race)
            .text("program_number", Some(key.program.as_str()))
            .text("horse_name", self.horse_name.as_deref())
            .text("sire", self.sire.as_deref())
            .text("dam", self.dam.as_deref())
            .text("trainer", self.trainer.as_deref())
            .text("jockey", self.jockey.as_deref())
            .flag("lasix", self.lasix)
            .flag("blinkers", self.blinkers)
            .verbatim("ml_odds", self.ml_odds.as_deref())
            .int("speed_fig_last", self.speed_fig_last)
            .int("pace_fig1", self.pace_fig1)
            .int("pace_fig2", self.pace_fig2)
            .int("pace_fig3", self.pace_fig3)
            .text("last_comment", self.last_comment.as_deref())
            .float("class_rating", self.class_rating)
    }
}

/// Published workout from a past-performance file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpWorkoutRow {
    pub horse_name: Option<String>,
    pub work_date: Option<String>,
    pub track_code: Option<String>,
    pub distance_furlongs: Option<f64>,
    pub surface: Option<String>,
    pub course_type: Option<String>,
    pub rank_in_set: Option<i32>,
    pub set_size: Option<i32>,
    pub raw_time: Option<String>,
    pub bullet: Option<bool>,
}

impl PpWorkoutRow {
    pub fn workout_key(&self) -> Result<WorkoutKey> {
        WorkoutKey::parse(
            self.horse_name.as_deref(),
            self.work_date.as_deref(),
            self.track_code.as_deref(),
            self.distance_furlongs,
        )
    }
}

impl KeyedRow for PpWorkoutRow {
    const KIND: SourceKind = SourceKind::PpWorkout;

    fn natural_key(&self) -> Result<String> {
        Ok(self.workout_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        let key = self.workout_key()?;
        Ok(RowFields::new()
            .text("horse_name", Some(&key.horse_name))
            .date("work_date", Some(key.work_date))
            .text("track_code", Some(key.track.as_str()))
            .int("distance_hundredths", Some(key.distance_hundredths))
            .text("surface", self.surface.as_deref())
            .text("course_type", self.course_type.as_deref())
            .int("rank_in_set", self.rank_in_set)
            .int("set_size", self.set_size)
            .verbatim("raw_time", self.raw_time.as_deref())
            .flag("bullet", self.bullet))
    }
}

/// Race as run, from a result chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartRaceRow {
    pub track_code: Option<String>,
    pub race_date: Option<String>,
    pub race_number: Option<i32>,
    pub surface: Option<String>,
    pub distance_yards: Option<i32>,
    pub track_condition: Option<String>,
    pub winning_time: Option<String>,
    pub field_size: Option<i32>,
}

impl ChartRaceRow {
    pub fn race_key(&self) -> Result<RaceKey> {
        RaceKey::parse(self.track_code.as_deref(), self.race_date.as_deref(), self.race_number)
    }
}

impl KeyedRow for ChartRaceRow {
    const KIND: SourceKind = SourceKind::ChartRace;

    fn natural_key(&self) -> Result<String> {
        Ok(self.race_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        Ok(race_fields(&self.race_key()?)
            .text("surface", self.surface.as_deref())
            .int("distance_yards", self.distance_yards)
            .text("track_condition", self.track_condition.as_deref())
            .verbatim("winning_time", self.winning_time.as_deref())
            .int("field_size", self.field_size))
    }
}

/// Finisher line from a result chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartEntryRow {
    pub track_code: Option<String>,
    pub race_date: Option<String>,
    pub race_number: Option<i32>,
    pub program_number: Option<String>,
    pub horse_name: Option<String>,
    pub finish_position: Option<i32>,
    pub final_odds: Option<f64>,
    pub win_payoff: Option<f64>,
    pub place_payoff: Option<f64>,
    pub show_payoff: Option<f64>,
    pub dq_flag: Option<bool>,
}

impl ChartEntryRow {
    pub fn entry_key(&self) -> Result<EntryKey> {
        let race = RaceKey::parse(self.track_code.as_deref(), self.race_date.as_deref(), self.race_number)?;
        EntryKey::new(race, self.program_number.as_deref())
    }
}

impl KeyedRow for ChartEntryRow {
    const KIND: SourceKind = SourceKind::ChartEntry;

    fn natural_key(&self) -> Result<String> {
        Ok(self.entry_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        let key = self.entry_key()?;
        race_fields(&key.race)
            .text("program_number", Some(key.program.as_str()))
            .text("horse_name", self.horse_name.as_deref())
            .int("finish_position", self.finish_position)
            .flag("dq_flag", self.dq_flag)
            .float("final_odds", self.final_odds)?
            .float("win_payoff", self.win_payoff)?
            .float("place_payoff", self.place_payoff)?
            .float("show_payoff", self.show_payoff)
    }
}

/// Pool payout from a result chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartPayoutRow {
    pub track_code: Option<String>,
    pub race_date: Option<String>,
    pub race_number: Option<i32>,
    pub wager_type: Option<String>,
    pub winning_numbers: Option<String>,
    pub pool: Option<f64>,
    pub payout_amount: Option<f64>,
}

impl ChartPayoutRow {
    pub fn payout_key(&self) -> Result<PayoutKey> {
        let race = RaceKey::parse(self.track_code.as_deref(), self.race_date.as_deref(), self.race_number)?;
        PayoutKey::new(race, self.wager_type.as_deref(), self.winning_numbers.as_deref())
    }
}

impl KeyedRow for ChartPayoutRow {
    const KIND: SourceKind = SourceKind::ChartPayout;

    fn natural_key(&self) -> Result<String> {
        Ok(self.payout_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        let key = self.payout_key()?;
        race_fields(&key.race)
            .text("wager_type", Some(&key.wager_type))
            .verbatim("winning_numbers", Some(&key.combination))
            .float("pool", self.pool)?
            .float("payout_amount", self.payout_amount)
    }
}

/// Scratched runner from a result chart
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartScratchRow {
    pub track_code: Option<String>,
    pub race_date: Option<String>,
    pub race_number: Option<i32>,
    pub program_number: Option<String>,
    pub horse_name: Option<String>,
    pub reason: Option<String>,
}

impl ChartScratchRow {
    pub fn entry_key(&self) -> Result<EntryKey> {
        let race = RaceKey::parse(self.track_code.as_deref(), self.race_date.as_deref(), self.race_number)?;
        EntryKey::new(race, self.program_number.as_deref())
    }
}

impl KeyedRow for ChartScratchRow {
    const KIND: SourceKind = SourceKind::ChartScratch;

    fn natural_key(&self) -> Result<String> {
        Ok(self.entry_key()?.natural_key())
    }

    fn fields(&self) -> Result<RowFields> {
        let key = self.entry_key()?;
        Ok(race_fields(&key.race)
            .text("program_number", Some(key.program.as_str()))
            .text("horse_name", self.horse_name.as_deref())
            .text("reason", self.reason.as_deref()))
    }
}

/// One parser row of any kind, as read from the parser's JSON Lines output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParsedRow {
    PpRace(PpRaceRow),
    PpEntry(PpEntryRow),
    PpWorkout(PpWorkoutRow),
    ChartRace(ChartRaceRow),
    ChartEntry(ChartEntryRow),
    ChartPayout(ChartPayoutRow),
    ChartScratch(ChartScratchRow),
}

macro_rules! dispatch {
    ($row:expr, $r:ident => $body:expr) => {
        match $row {
            ParsedRow::PpRace($r) => $body,
            ParsedRow::PpEntry($r) => $body,
            ParsedRow::PpWorkout($r) => $body,
            ParsedRow::ChartRace($r) => $body,
            ParsedRow::ChartEntry($r) => $body,
            ParsedRow::ChartPayout($r) => $body,
            ParsedRow::ChartScratch($r) => $body,
        }
    };
}

impl ParsedRow {
    pub fn kind(&self) -> SourceKind {
        fn kind_of<R: KeyedRow>(_: &R) -> SourceKind {
            R::KIND
        }
        dispatch!(self, r => kind_of(r))
    }

    pub fn natural_key(&self) -> Result<String> {
        dispatch!(self, r => r.natural_key())
    }

    pub fn fingerprint(&self) -> Result<String> {
        dispatch!(self, r => r.fields()?.fingerprint())
    }

    /// Track the row was run or worked at
    pub fn track_code(&self) -> Result<TrackCode> {
        dispatch!(self, r => TrackCode::parse(r.track_code.as_deref()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn pp_entry() -> PpEntryRow {
        PpEntryRow {
            track_code: Some("CD".into()),
            race_date: Some("2023-05-01".into()),
            race_number: Some(1),
            program_number: Some("3".into()),
            horse_name: Some("Mage".into()),
            trainer: Some("Gustavo Delgado".into()),
            ml_odds: Some("5-2".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_kind_tag_round_trip() {
        let line = r#"{"kind":"pp_entry","track_code":"cd","race_date":"20230501","race_number":1,"program_number":"03","horse_name":"Mage"}"#;
        let row: ParsedRow = serde_json::from_str(line).unwrap();
        assert_eq!(row.kind(), SourceKind::PpEntry);
        assert_eq!(row.natural_key().unwrap(), "CD|2023-05-01|1|3");
    }

    #[test]
    fn test_same_row_different_formatting_same_fingerprint() {
        let a = ParsedRow::PpEntry(pp_entry());
        let mut noisy = pp_entry();
        noisy.track_code = Some(" cd".into());
        noisy.race_date = Some("20230501".into());
        noisy.program_number = Some("03".into());
        noisy.trainer = Some("GUSTAVO   DELGADO ".into());
        let b = ParsedRow::PpEntry(noisy);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_changed_value_changes_fingerprint() {
        let a = ParsedRow::PpEntry(pp_entry());
        let mut changed = pp_entry();
        changed.ml_odds = Some("3-1".into());
        assert_ne!(a.fingerprint().unwrap(), ParsedRow::PpEntry(changed).fingerprint().unwrap());
    }

    #[test]
    fn test_missing_key_field_is_malformed() {
        let mut row = pp_entry();
        row.program_number = None;
        let err = ParsedRow::PpEntry(row).natural_key().unwrap_err();
        assert!(matches!(err, HhmlError::MalformedRecord { ref field, .. } if field == "program_number"));
    }

    #[test]
    fn test_non_finite_odds_cannot_be_fingerprinted() {
        let row = ChartEntryRow {
            track_code: Some("CD".into()),
            race_date: Some("2023-05-01".into()),
            race_number: Some(1),
            program_number: Some("3".into()),
            final_odds: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(ParsedRow::ChartEntry(row).fingerprint().is_err());
    }

    #[test]
    fn test_kind_names() {
        for kind in SourceKind::ALL {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert_eq!(SourceKind::ChartScratch.file_type(), FileType::Chart);
        assert_eq!(SourceKind::PpWorkout.file_type(), FileType::Pp);
    }
}

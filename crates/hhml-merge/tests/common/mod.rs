//! Common test utilities: parser row builders and an in-memory pipeline

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use hhml_merge::config::IngestSettings;
use hhml_merge::ledger::{FileMeta, FileType};
use hhml_merge::pipeline::IngestPipeline;
use hhml_merge::staging::{
    ChartEntryRow, ChartPayoutRow, ChartRaceRow, ChartScratchRow, ParsedRow, PpEntryRow, PpRaceRow,
    PpWorkoutRow,
};
use hhml_merge::store::memory::MemoryStore;

pub const TRACK: &str = "CD";
pub const RACE_DATE: &str = "2023-05-01";

/// Pipeline over a fresh in-memory store with no retry delay
pub fn pipeline() -> (Arc<MemoryStore>, IngestPipeline) {
    let store = Arc::new(MemoryStore::new());
    let settings = IngestSettings {
        retry_backoff_ms: 0,
        ..IngestSettings::default()
    };
    (store.clone(), IngestPipeline::new(store, settings))
}

pub fn pp_meta(name: &str) -> FileMeta {
    FileMeta::new("equibase", FileType::Pp, name).with_track(TRACK)
}

pub fn chart_meta(name: &str) -> FileMeta {
    FileMeta::new("equibase", FileType::Chart, name).with_track(TRACK)
}

pub fn pp_race(race_number: i32) -> ParsedRow {
    ParsedRow::PpRace(PpRaceRow {
        track_code: Some(TRACK.into()),
        race_date: Some(RACE_DATE.into()),
        race_number: Some(race_number),
        surface: Some("D".into()),
        distance_yards: Some(1760),
        purse: Some(150_000),
        ..Default::default()
    })
}

pub fn pp_entry(program: &str, horse: &str, trainer: &str, ml_odds: &str) -> ParsedRow {
    ParsedRow::PpEntry(PpEntryRow {
        track_code: Some(TRACK.into()),
        race_date: Some(RACE_DATE.into()),
        race_number: Some(1),
        program_number: Some(program.into()),
        horse_name: Some(horse.into()),
        trainer: Some(trainer.into()),
        jockey: Some("Javier Castellano".into()),
        lasix: Some(true),
        ml_odds: Some(ml_odds.into()),
        ..Default::default()
    })
}

pub fn pp_workout(horse: &str, work_date: &str, raw_time: &str) -> ParsedRow {
    ParsedRow::PpWorkout(PpWorkoutRow {
        horse_name: Some(horse.into()),
        work_date: Some(work_date.into()),
        track_code: Some(TRACK.into()),
        distance_furlongs: Some(5.0),
        surface: Some("D".into()),
        raw_time: Some(raw_time.into()),
        bullet: Some(false),
        ..Default::default()
    })
}

pub fn chart_race(condition: &str) -> ParsedRow {
    ParsedRow::ChartRace(ChartRaceRow {
        track_code: Some(TRACK.into()),
        race_date: Some(RACE_DATE.into()),
        race_number: Some(1),
        surface: Some("D".into()),
        distance_yards: Some(1760),
        track_condition: Some(condition.into()),
        field_size: Some(2),
        ..Default::default()
    })
}

pub fn chart_entry(program: &str, horse: &str, finish: i32, dq: bool) -> ParsedRow {
    ParsedRow::ChartEntry(ChartEntryRow {
        track_code: Some(TRACK.into()),
        race_date: Some(RACE_DATE.into()),
        race_number: Some(1),
        program_number: Some(program.into()),
        horse_name: Some(horse.into()),
        finish_position: Some(finish),
        final_odds: Some(2.5),
        dq_flag: Some(dq),
        ..Default::default()
    })
}

pub fn chart_payout(wager: &str, numbers: &str, amount: f64) -> ParsedRow {
    ParsedRow::ChartPayout(ChartPayoutRow {
        track_code: Some(TRACK.into()),
        race_date: Some(RACE_DATE.into()),
        race_number: Some(1),
        wager_type: Some(wager.into()),
        winning_numbers: Some(numbers.into()),
        pool: Some(1_000_000.0),
        payout_amount: Some(amount),
    })
}

pub fn chart_scratch(program: &str, reason: &str) -> ParsedRow {
    ParsedRow::ChartScratch(ChartScratchRow {
        track_code: Some(TRACK.into()),
        race_date: Some(RACE_DATE.into()),
        race_number: Some(1),
        program_number: Some(program.into()),
        reason: Some(reason.into()),
        ..Default::default()
    })
}

/// The morning's past-performance file
pub fn pp_file() -> Vec<ParsedRow> {
    vec![
        pp_race(1),
        pp_entry("3", "Mage", "Gustavo Delgado", "5-2"),
        pp_entry("4", "Forte", "Todd Pletcher", "3-1"),
    ]
}

/// The evening's chart for race 1; only Mage's line varies
pub fn chart_file(mage_finish: i32, mage_dq: bool) -> Vec<ParsedRow> {
    vec![
        chart_race("FT"),
        chart_entry("3", "Mage", mage_finish, mage_dq),
        chart_entry("4", "Forte", 2, false),
        chart_payout("EXACTA", "3-4", 42.6),
    ]
}

//! Read operations on the canonical tables.
//!
//! Downstream consumers look rows up by natural key or surrogate id. A race's
//! result and payout rows only exist once its chart file has merged, so empty
//! results are normal for upcoming races.
//!
//! # Key Operations
//!
//! - `track_by_code()` - Track row for a track code
//! - `race_by_key()` / `race_by_id()` - One race
//! - `entries_for_race()` - Entries ordered by program number
//! - `results_for_race()` - Results ordered by finish position
//! - `payouts_for_race()` - Exotic and straight payouts
//! - `workouts_for_horse()` - Workouts, most recent first

use chrono::{DateTime, NaiveDate, Utc};
use hhml_common::types::{RaceKey, TrackCode};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::MergeResult;
use crate::identity::{race_id_for, track_id, RaceId};

/// Track model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Track {
    pub track_id: Uuid,
    pub track_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Race model with scheduled and as-run attributes
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Race {
    pub race_id: Uuid,
    pub track_id: Uuid,
    pub race_date: NaiveDate,
    pub race_number: i32,
    pub surface: Option<String>,
    pub distance_yards: Option<i32>,
    pub course: Option<String>,
    pub age_restriction: Option<String>,
    pub sex_restriction: Option<String>,
    pub purse: Option<i32>,
    pub wager_text: Option<String>,
    pub program_selections: Option<String>,
    pub run_surface: Option<String>,
    pub run_distance_yards: Option<i32>,
    pub track_condition: Option<String>,
    pub winning_time: Option<String>,
    pub field_size: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entry model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub entry_id: Uuid,
    pub race_id: Uuid,
    pub program_number: String,
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
    pub scratch_flag: bool,
    pub scratch_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result model (one per entry that ran)
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RaceResult {
    pub result_id: Uuid,
    pub race_id: Uuid,
    pub entry_id: Uuid,
    pub charted_horse_name: Option<String>,
    pub finish_position: Option<i32>,
    pub final_odds: Option<f64>,
    pub win_payoff: Option<f64>,
    pub place_payoff: Option<f64>,
    pub show_payoff: Option<f64>,
    pub dq_flag: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payout model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payout {
    pub payout_id: Uuid,
    pub race_id: Uuid,
    pub wager_type: String,
    pub winning_numbers: String,
    pub pool: Option<f64>,
    pub payout_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Workout model
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Workout {
    pub workout_id: Uuid,
    pub horse_name: String,
    pub work_date: NaiveDate,
    pub track_id: Uuid,
    pub distance_furlongs: f64,
    pub surface: Option<String>,
    pub course_type: Option<String>,
    pub rank_in_set: Option<i32>,
    pub set_size: Option<i32>,
    pub raw_time: Option<String>,
    pub bullet: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn track_by_code(pool: &PgPool, code: &TrackCode) -> MergeResult<Option<Track>> {
    let track = sqlx::query_as::<_, Track>(
        r#"
        SELECT track_id, track_code, created_at, updated_at
        FROM track
        WHERE track_code = $1
        "#,
    )
    .bind(code.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(track)
}

/// Retrieves a race by its natural key.
///
/// The key's track need not exist; a missing track simply yields `None`.
pub async fn race_by_key(pool: &PgPool, key: &RaceKey) -> MergeResult<Option<Race>> {
    let race = sqlx::query_as::<_, Race>(
        r#"
        SELECT *
        FROM race
        WHERE track_id = $1 AND race_date = $2 AND race_number = $3
        "#,
    )
    .bind(track_id(&key.track).as_uuid())
    .bind(key.race_date)
    .bind(key.race_number)
    .fetch_optional(pool)
    .await?;

    Ok(race)
}

pub async fn race_by_id(pool: &PgPool, race_id: RaceId) -> MergeResult<Option<Race>> {
    let race = sqlx::query_as::<_, Race>("SELECT * FROM race WHERE race_id = $1")
        .bind(race_id.as_uuid())
        .fetch_optional(pool)
        .await?;

    Ok(race)
}

/// Entries for a race, scratched entries included.
pub async fn entries_for_race(pool: &PgPool, key: &RaceKey) -> MergeResult<Vec<Entry>> {
    let entries = sqlx::query_as::<_, Entry>(
        r#"
        SELECT *
        FROM entry
        WHERE race_id = $1
        ORDER BY program_number
        "#,
    )
    .bind(race_id_for(key).as_uuid())
    .fetch_all(pool)
    .await?;

    Ok(entries)
}

/// Results for a race; unplaced finishers sort last.
pub async fn results_for_race(pool: &PgPool, key: &RaceKey) -> MergeResult<Vec<RaceResult>> {
    let results = sqlx::query_as::<_, RaceResult>(
        r#"
        SELECT *
        FROM result
        WHERE race_id = $1
        ORDER BY finish_position NULLS LAST
        "#,
    )
    .bind(race_id_for(key).as_uuid())
    .fetch_all(pool)
    .await?;

    Ok(results)
}

pub async fn payouts_for_race(pool: &PgPool, key: &RaceKey) -> MergeResult<Vec<Payout>> {
    let payouts = sqlx::query_as::<_, Payout>(
        r#"
        SELECT *
        FROM payout
        WHERE race_id = $1
        ORDER BY wager_type, winning_numbers
        "#,
    )
    .bind(race_id_for(key).as_uuid())
    .fetch_all(pool)
    .await?;

    Ok(payouts)
}

/// Workouts for a horse, newest first.
///
/// Horse names are matched case-insensitively.
pub async fn workouts_for_horse(pool: &PgPool, horse_name: &str) -> MergeResult<Vec<Workout>> {
    let workouts = sqlx::query_as::<_, Workout>(
        r#"
        SELECT *
        FROM workout
        WHERE LOWER(horse_name) = LOWER($1)
        ORDER BY work_date DESC, distance_furlongs
        "#,
    )
    .bind(horse_name.trim())
    .fetch_all(pool)
    .await?;

    Ok(workouts)
}

//! Identity resolver
//!
//! Surrogate ids are UUIDv5 digests of the normalised natural key under a
//! fixed namespace. Any process that sees the same key derives the same id,
//! so merges of different files for one race converge without a lookup or a
//! sequence. Only tracks are materialised here; every other row is created by
//! the merge engine when its first segment or identity write lands.

use std::fmt;

use chrono::NaiveDate;
use hhml_common::types::{EntryKey, PayoutKey, ProgramNumber, RaceKey, TrackCode, WorkoutKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MergeResult;
use crate::merge::ownership::CanonicalTable;
use crate::merge::write::{CanonicalWrite, SqlValue};
use crate::store::{MergeTransaction, RowState};

/// Namespace for every canonical id. Changing it re-keys the whole database.
pub const IDENTITY_NAMESPACE: Uuid = Uuid::from_u128(0x6b1f_2d6c_0e1a_4f0b_9d3e_2c5a_7f8e_9b10);

fn derive(parts: &[&str]) -> Uuid {
    Uuid::new_v5(&IDENTITY_NAMESPACE, parts.join("|").as_bytes())
}

macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

surrogate_id!(TrackId);
surrogate_id!(RaceId);
surrogate_id!(EntryId);
surrogate_id!(ResultId);
surrogate_id!(PayoutId);
surrogate_id!(WorkoutId);

pub fn track_id(code: &TrackCode) -> TrackId {
    TrackId(derive(&["track", code.as_str()]))
}

pub fn race_id(track: TrackId, race_date: NaiveDate, race_number: i32) -> RaceId {
    RaceId(derive(&[
        "race",
        &track.to_string(),
        &race_date.format("%Y-%m-%d").to_string(),
        &race_number.to_string(),
    ]))
}

pub fn entry_id(race: RaceId, program: &ProgramNumber) -> EntryId {
    EntryId(derive(&["entry", &race.to_string(), program.as_str()]))
}

/// A result is one per entry
pub fn result_id(entry: EntryId) -> ResultId {
    ResultId(derive(&["result", &entry.to_string()]))
}

pub fn payout_id(race: RaceId, wager_type: &str, combination: &str) -> PayoutId {
    PayoutId(derive(&["payout", &race.to_string(), wager_type, combination]))
}

pub fn workout_id(horse_name: &str, work_date: NaiveDate, track: TrackId, distance_hundredths: i64) -> WorkoutId {
    WorkoutId(derive(&[
        "workout",
        horse_name,
        &work_date.format("%Y-%m-%d").to_string(),
        &track.to_string(),
        &distance_hundredths.to_string(),
    ]))
}

pub fn race_id_for(key: &RaceKey) -> RaceId {
    race_id(track_id(&key.track), key.race_date, key.race_number)
}

pub fn entry_id_for(key: &EntryKey) -> EntryId {
    entry_id(race_id_for(&key.race), &key.program)
}

pub fn payout_id_for(key: &PayoutKey) -> PayoutId {
    payout_id(race_id_for(&key.race), &key.wager_type, &key.combination)
}

pub fn workout_id_for(key: &WorkoutKey) -> WorkoutId {
    workout_id(&key.horse_name, key.work_date, track_id(&key.track), key.distance_hundredths)
}

/// Bare identity write for a track row
pub fn track_write(code: &TrackCode) -> CanonicalWrite {
    CanonicalWrite::identity(
        CanonicalTable::Track,
        track_id(code).as_uuid(),
        code.to_string(),
        vec![("track_code", SqlValue::Text(Some(code.to_string())))],
    )
}

/// Resolve a track code to its id, inserting the track row on first use
///
/// Returns the id and whether this call created the row.
pub async fn resolve_track_id(tx: &mut dyn MergeTransaction, code: &TrackCode) -> MergeResult<(TrackId, bool)> {
    let write = track_write(code);
    let id = TrackId(write.id);
    match tx.row_state(CanonicalTable::Track, write.id, None).await? {
        RowState::Present { .. } => Ok((id, false)),
        RowState::Absent => {
            tx.insert_row(&write).await?;
            tracing::debug!(track_code = %code, track_id = %id, "Created track");
            Ok((id, true))
        }
    }
}

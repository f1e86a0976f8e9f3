//! Natural keys for canonical racing entities
//!
//! Every canonical row is identified by a real-world key (track, date, race
//! number, program number, ...). The types here normalise the raw values a
//! parser hands over so that `"cd"`, `" CD "` and `"CD"` name the same track
//! and `"03"` and `"3"` name the same program number.
//!
//! [`RaceKey::natural_key`] and friends render a `|`-separated canonical
//! string. It is the staging key and the input to surrogate id derivation, so
//! its format must never change.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{HhmlError, Result};
use crate::fingerprint::fold_text;

const KEY_SEPARATOR: char = '|';

/// Longest workout distance accepted, in furlongs (exclusive)
pub const MAX_WORKOUT_FURLONGS: f64 = 100.0;

fn key_component(field: &str, raw: Option<&str>) -> Result<String> {
    let value = raw.and_then(fold_text).ok_or_else(|| HhmlError::missing(field))?;
    if value.contains(KEY_SEPARATOR) {
        return Err(HhmlError::invalid(field, "contains the key separator '|'"));
    }
    Ok(value)
}

/// Parse a race or work date in `YYYY-MM-DD` or `YYYYMMDD` form
pub fn parse_date(field: &str, raw: Option<&str>) -> Result<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| HhmlError::missing(field))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y%m%d"))
        .map_err(|_| HhmlError::invalid(field, format!("'{raw}' is not a date")))
}

/// Track code, e.g. `CD` for Churchill Downs
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackCode(String);

impl TrackCode {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        key_component("track_code", raw).map(TrackCode)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Saddle-cloth program number. Coupled entries keep their letter (`1A`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProgramNumber(String);

impl ProgramNumber {
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        let value = key_component("program_number", raw)?;
        let stripped = value.trim_start_matches('0');
        if stripped.is_empty() {
            return Err(HhmlError::invalid("program_number", format!("'{value}' is not a program number")));
        }
        Ok(ProgramNumber(stripped.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Track + date + race number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RaceKey {
    pub track: TrackCode,
    pub race_date: NaiveDate,
    pub race_number: i32,
}

impl RaceKey {
    pub fn parse(track: Option<&str>, race_date: Option<&str>, race_number: Option<i32>) -> Result<Self> {
        let track = TrackCode::parse(track)?;
        let race_date = parse_date("race_date", race_date)?;
        let race_number = match race_number {
            Some(n) if n > 0 => n,
            Some(n) => return Err(HhmlError::invalid("race_number", format!("{n} is not positive"))),
            None => return Err(HhmlError::missing("race_number")),
        };
        Ok(Self {
            track,
            race_date,
            race_number,
        })
    }

    pub fn natural_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.track,
            self.race_date.format("%Y-%m-%d"),
            self.race_number,
            sep = KEY_SEPARATOR
        )
    }
}

impl fmt::Display for RaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.natural_key())
    }
}

/// Race + program number
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub race: RaceKey,
    pub program: ProgramNumber,
}

impl EntryKey {
    pub fn new(race: RaceKey, program: Option<&str>) -> Result<Self> {
        Ok(Self {
            race,
            program: ProgramNumber::parse(program)?,
        })
    }

    pub fn natural_key(&self) -> String {
        format!("{}{}{}", self.race.natural_key(), KEY_SEPARATOR, self.program)
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.natural_key())
    }
}

/// Race + pool type + winning combination
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PayoutKey {
    pub race: RaceKey,
    pub wager_type: String,
    pub combination: String,
}

impl PayoutKey {
    pub fn new(race: RaceKey, wager_type: Option<&str>, combination: Option<&str>) -> Result<Self> {
        let wager_type = key_component("wager_type", wager_type)?;
        // "3 - 5 - 1" and "3-5-1" are the same ticket
        let combination: String = key_component("winning_numbers", combination)?
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        Ok(Self {
            race,
            wager_type,
            combination,
        })
    }

    pub fn natural_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}",
            self.race.natural_key(),
            self.wager_type,
            self.combination,
            sep = KEY_SEPARATOR
        )
    }
}

/// Horse + work date + track + distance. Workouts are not tied to a race.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkoutKey {
    pub horse_name: String,
    pub work_date: NaiveDate,
    pub track: TrackCode,
    /// Distance in hundredths of a furlong, so the key is exact
    pub distance_hundredths: i64,
}

impl WorkoutKey {
    pub fn parse(
        horse_name: Option<&str>,
        work_date: Option<&str>,
        track: Option<&str>,
        distance_furlongs: Option<f64>,
    ) -> Result<Self> {
        let horse_name = key_component("horse_name", horse_name)?;
        let work_date = parse_date("work_date", work_date)?;
        let track = TrackCode::parse(track)?;
        let distance = distance_furlongs.ok_or_else(|| HhmlError::missing("distance_furlongs"))?;
        if !distance.is_finite() || distance <= 0.0 {
            return Err(HhmlError::invalid("distance_furlongs", format!("{distance} is not a distance")));
        }
        if distance >= MAX_WORKOUT_FURLONGS {
            return Err(HhmlError::invalid(
                "distance_furlongs",
                format!("{distance} exceeds {MAX_WORKOUT_FURLONGS} furlongs"),
            ));
        }
        Ok(Self {
            horse_name,
            work_date,
            track,
            distance_hundredths: (distance * 100.0).round() as i64,
        })
    }

    pub fn distance_furlongs(&self) -> f64 {
        self.distance_hundredths as f64 / 100.0
    }

    pub fn natural_key(&self) -> String {
        format!(
            "{}{sep}{}{sep}{}{sep}{}",
            self.horse_name,
            self.work_date.format("%Y-%m-%d"),
            self.track,
            self.distance_hundredths,
            sep = KEY_SEPARATOR
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn race() -> RaceKey {
        RaceKey::parse(Some("cd "), Some("2023-05-01"), Some(1)).unwrap()
    }

    #[test]
    fn test_race_key_normalises_track_and_date() {
        let compact = RaceKey::parse(Some("CD"), Some("20230501"), Some(1)).unwrap();
        assert_eq!(race(), compact);
        assert_eq!(race().natural_key(), "CD|2023-05-01|1");
    }

    #[test]
    fn test_race_key_rejects_missing_and_bad_values() {
        assert!(RaceKey::parse(None, Some("2023-05-01"), Some(1)).is_err());
        assert!(RaceKey::parse(Some("CD"), Some("May 1"), Some(1)).is_err());
        assert!(RaceKey::parse(Some("CD"), Some("2023-05-01"), Some(0)).is_err());
        assert!(RaceKey::parse(Some("CD"), Some("2023-05-01"), None).is_err());
    }

    #[test]
    fn test_program_number_strips_leading_zeros() {
        let a = EntryKey::new(race(), Some("03")).unwrap();
        let b = EntryKey::new(race(), Some("3")).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.natural_key(), "CD|2023-05-01|1|3");
        assert_eq!(ProgramNumber::parse(Some("1a")).unwrap().as_str(), "1A");
        assert!(ProgramNumber::parse(Some("00")).is_err());
    }

    #[test]
    fn test_separator_is_rejected() {
        assert!(TrackCode::parse(Some("C|D")).is_err());
    }

    #[test]
    fn test_payout_combination_ignores_spaces() {
        let a = PayoutKey::new(race(), Some("trifecta"), Some("3 - 5 - 1")).unwrap();
        let b = PayoutKey::new(race(), Some("TRIFECTA"), Some("3-5-1")).unwrap();
        assert_eq!(a.natural_key(), b.natural_key());
    }

    #[test]
    fn test_workout_distance_is_exact() {
        let a = WorkoutKey::parse(Some("Into Mischief"), Some("2023-04-20"), Some("KEE"), Some(4.0)).unwrap();
        let b = WorkoutKey::parse(Some("INTO MISCHIEF"), Some("20230420"), Some("kee"), Some(4.000001)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.distance_furlongs(), 4.0);
        assert!(WorkoutKey::parse(Some("X"), Some("2023-04-20"), Some("KEE"), Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_workout_distance_out_of_range() {
        let parse = |d| WorkoutKey::parse(Some("Mage"), Some("2023-04-20"), Some("CD"), Some(d));
        assert!(parse(1.0e300).is_err());
        assert!(parse(MAX_WORKOUT_FURLONGS).is_err());
        assert!(parse(-4.0).is_err());
        assert!(parse(99.5).is_ok());
    }
}

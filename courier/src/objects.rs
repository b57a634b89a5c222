//! Composite value objects shared by services.
//!
//! Every type here is built with [`Object::create`](crate::Object::create)
//! from untyped input and serializes back to the same wire form.

use crate::{
    DateTime, Id, Latitude, LocalizedText, Longitude, Object, PositiveInt, Result, Time,
    Timezone, collab::Entity,
};
use chrono::{NaiveDate, TimeDelta, TimeZone};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::json;

// ============================================================================
// Places
// ============================================================================

/// A point on the globe.
#[derive(Debug, Clone, PartialEq, Serialize, Object)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub lat: Latitude,
    /// Longitude in degrees.
    pub lng: Longitude,
}

impl Coordinate {
    /// Validate a pair of plain floats.
    pub fn from_raw(lat: f64, lng: f64) -> Result<Self> {
        Self::create(Some(json!({"lat": lat, "lng": lng})))
    }
}

/// A postal address.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Object)]
pub struct Address {
    pub city: String,
    pub street: String,
    pub region: String,
    pub country: String,
    pub postal_code: String,
    pub coordinate: Coordinate,
}

// ============================================================================
// Time ranges
// ============================================================================

/// A range of instants, `start` inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Object)]
pub struct Period {
    /// Last instant.
    pub end: DateTime,
    /// First instant.
    pub start: DateTime,
}

impl Period {
    /// Time between `start` and `end`.
    pub fn duration(&self) -> TimeDelta {
        self.end.diff(&self.start)
    }

    /// Local midnight in `zone` of every day the period touches, starting
    /// with the day of `start`.
    ///
    /// A day whose midnight falls in a DST gap starts at the first valid
    /// local instant after it.
    pub fn days(&self, zone: &Timezone) -> Vec<DateTime> {
        let tz = zone.zone();
        let mut date = self.start.as_chrono().with_timezone(&tz).date_naive();
        let mut days = Vec::new();
        loop {
            let Some(day) = local_midnight(tz, date) else {
                break;
            };
            if day >= self.end {
                break;
            }
            days.push(day);
            let Some(next) = date.succ_opt() else {
                break;
            };
            date = next;
        }
        days
    }
}

fn local_midnight(tz: Tz, date: NaiveDate) -> Option<DateTime> {
    let start = (0..24).find_map(|hour| {
        let local = date.and_hms_opt(hour, 0, 0)?;
        tz.from_local_datetime(&local).earliest()
    })?;
    DateTime::from_timestamp(start.timestamp_millis())
}

/// Opening hours within one day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Object)]
pub struct TimeSlot {
    /// Closing time.
    pub end: Time,
    /// Opening time.
    pub start: Time,
}

impl TimeSlot {
    /// Whether `hour:minute` falls within the slot, bounds included.
    pub fn is_between(&self, hour: u32, minute: u32) -> bool {
        let hours = f64::from(hour) + f64::from(minute) / 60.0;
        self.start.as_hour() <= hours && hours <= self.end.as_hour()
    }
}

/// Weekly opening hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Object)]
pub struct RegularHours {
    /// Days of the week, `0` for Monday.
    #[object(default)]
    pub weekday: Vec<u8>,
    /// Slots of each of those days.
    #[object(default)]
    pub slots: Vec<TimeSlot>,
}

/// Opening hours for one named date, such as a holiday.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Object)]
pub struct SpecialHours {
    pub opened: bool,
    pub date: DateTime,
    pub name: LocalizedText,
    #[object(default)]
    pub slots: Vec<TimeSlot>,
}

/// When a place is open.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Object)]
pub struct WorkingHours {
    #[object(default)]
    pub timezone: Timezone,
    pub always_open: bool,
    #[object(default)]
    pub regular_hours: Vec<RegularHours>,
    #[object(default)]
    pub special_hours: Vec<SpecialHours>,
}

// ============================================================================
// Entity state
// ============================================================================

/// Identity and bookkeeping of a stored entity.
///
/// Two states are equal when their ids are equal.
#[derive(Debug, Clone, Serialize, Object)]
pub struct EntityState {
    /// Identity.
    #[object(default = Id::new)]
    pub id: Id,
    /// Creation time.
    #[object(default = DateTime::now)]
    pub created_at: DateTime,
    /// Time of the last change.
    #[object(default = DateTime::now)]
    pub updated_at: DateTime,
    /// Number of saved changes.
    #[object(default = PositiveInt::zero)]
    pub version: PositiveInt,
}

impl EntityState {
    /// A state never saved.
    pub fn new() -> Self {
        let now = DateTime::now();
        Self {
            id: Id::new(),
            created_at: now,
            updated_at: now,
            version: PositiveInt::zero(),
        }
    }

    /// The state after one more change.
    pub fn evolve(&self) -> Self {
        Self {
            updated_at: DateTime::now(),
            version: self.version.increment(),
            ..self.clone()
        }
    }
}

impl Default for EntityState {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for EntityState {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityState {}

impl std::hash::Hash for EntityState {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Entity for EntityState {
    fn id(&self) -> &Id {
        &self.id
    }

    fn version(&self) -> PositiveInt {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn coordinate_bounds() {
        let point = Coordinate::from_raw(48.85, 2.35).unwrap();
        assert_eq!(point.lat.get(), 48.85);
        let err = Coordinate::from_raw(91.0, 2.35).unwrap_err();
        assert_eq!(err.errors()[0].field(), Some("lat"));
    }

    #[test]
    fn period_days_start_at_utc_midnight() {
        let hour = 3_600_000;
        let period = Period {
            start: DateTime::from_timestamp(10 * hour).unwrap(),
            end: DateTime::from_timestamp(24 * hour * 2 + 5 * hour).unwrap(),
        };
        let days: Vec<i64> = period
            .days(&Timezone::default())
            .iter()
            .map(DateTime::timestamp)
            .collect();
        assert_eq!(days, vec![0, 24 * hour, 48 * hour]);
        assert_eq!(period.duration(), TimeDelta::hours(43));
    }

    #[test]
    fn period_days_follow_the_local_zone() {
        let hour = 3_600_000;
        // 1970-01-01 was winter in Paris, one hour ahead of UTC.
        let paris = Timezone::create(Some(json!("Europe/Paris"))).unwrap();
        let period = Period {
            start: DateTime::from_timestamp(10 * hour).unwrap(),
            end: DateTime::from_timestamp(24 * hour * 2 + 5 * hour).unwrap(),
        };
        let days: Vec<i64> = period.days(&paris).iter().map(DateTime::timestamp).collect();
        assert_eq!(days, vec![-hour, 23 * hour, 47 * hour]);
    }

    #[test]
    fn period_days_skip_dst_gaps() {
        // America/Sao_Paulo jumped from 00:00 to 01:00 on 2018-11-04.
        let zone = Timezone::create(Some(json!("America/Sao_Paulo"))).unwrap();
        let start = zone
            .zone()
            .with_ymd_and_hms(2018, 11, 3, 12, 0, 0)
            .single()
            .unwrap();
        let period = Period {
            start: DateTime::from_timestamp(start.timestamp_millis()).unwrap(),
            end: DateTime::from_timestamp(start.timestamp_millis() + 30 * 3_600_000).unwrap(),
        };
        let days = period.days(&zone);
        assert_eq!(days.len(), 2);
        let second = days[1].as_chrono().with_timezone(&zone.zone());
        assert_eq!(second.format("%Y-%m-%d %H:%M").to_string(), "2018-11-04 01:00");
    }

    #[test]
    fn time_slot_bounds_are_inclusive() {
        let slot = TimeSlot::create(Some(json!({"start": "09:00", "end": "17:30"}))).unwrap();
        assert!(slot.is_between(9, 0));
        assert!(slot.is_between(17, 30));
        assert!(!slot.is_between(17, 31));
    }

    #[test]
    fn working_hours_defaults_and_nested_errors() {
        let hours = WorkingHours::create(Some(json!({
            "timezone": "Europe/Paris",
            "always_open": "false",
        })))
        .unwrap();
        assert_eq!(hours.timezone.as_str(), "Europe/Paris");
        assert!(hours.regular_hours.is_empty());
        assert!(hours.special_hours.is_empty());

        let err = WorkingHours::create(Some(json!({
            "timezone": "UTC",
            "always_open": false,
            "regular_hours": [{"weekday": [1], "slots": [{"start": "9h", "end": "10:00"}]}],
        })))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
        let regular = &err.errors()[0];
        assert_eq!(regular.field(), Some("regular_hours"));
        assert_eq!(regular.errors()[0].field(), Some("regular_hours[0]"));
    }

    #[test]
    fn entity_state_evolves() {
        let state = EntityState::create(Some(json!({}))).unwrap();
        assert_eq!(state.version, PositiveInt::zero());
        let next = state.evolve();
        assert_eq!(next.version.get(), 1);
        assert_eq!(next, state);
        assert!(next.updated_at >= state.updated_at);
    }
}

//! Leaf value objects shared by every service.
//!
//! Each primitive validates its input in [`Object::prepare`] and reports an
//! `invalid_field` error tagged with its canonical name. The hints carry the
//! expected type, the constraint that was violated and the received value.

use crate::{
    error::Error,
    outcome::Result,
    schema::{Construct, Object, Shape, float, integer},
};
use chrono::{TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Serialize, Serializer};
use serde_json::{Value, json};
use std::{
    collections::BTreeMap,
    fmt,
    sync::LazyLock,
};

const ID_PATTERN: &str = r"^[0-9a-z]{26}$";
const EMAIL_PATTERN: &str = r"^[^@]+@[^@]+$";
const TIME_PATTERN: &str = r"^(?:[01]?[0-9]|2[0-3]):[0-5][0-9]$";
const LOCALE_PATTERN: &str = r"^[a-z]{2,3}(-[A-Z][a-z]{3})?(-[A-Z]{2}|-[0-9]{3})?$";

static ID_RE: LazyLock<Regex> = LazyLock::new(|| compile(ID_PATTERN));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| compile(EMAIL_PATTERN));
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| compile(TIME_PATTERN));
static LOCALE_RE: LazyLock<Regex> = LazyLock::new(|| compile(LOCALE_PATTERN));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern is valid")
}

fn rejected(name: &str, expected: &str, constraints: Value, received: Value) -> Error {
    Error::invalid_field()
        .at(name)
        .with_hint("expected", expected)
        .with_hint("constraints", constraints)
        .with_hint("received", received)
}

/// Text of a string or a number, trimmed.
fn text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(text) => Some(text.trim().to_owned()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn matching(raw: Value, name: &str, re: &Regex, pattern: &str) -> Result<String> {
    match text(&raw) {
        Some(value) if re.is_match(&value) => Ok(value),
        _ => Err(rejected(name, "string", json!({"pattern": pattern}), raw)),
    }
}

/// Build a leaf from an already normalized string.
fn wrap_string<T>(raw: Value, wrap: fn(String) -> T) -> Result<T> {
    String::construct(raw).map(wrap)
}

const CROCKFORD: &[u8; 32] = b"0123456789abcdefghjkmnpqrstvwxyz";

/// A new lowercase ULID: 48 bits of millisecond time then 80 random bits.
fn new_ulid() -> String {
    let millis = u128::from(Utc::now().timestamp_millis().max(0).unsigned_abs()) & ((1 << 48) - 1);
    let entropy = rand::random::<u128>() & ((1 << 80) - 1);
    let value = (millis << 80) | entropy;
    (0..26)
        .map(|idx| {
            let shift = 125 - 5 * idx;
            char::from(CROCKFORD[((value >> shift) & 0x1f) as usize])
        })
        .collect()
}

// ============================================================================
// Id
// ============================================================================

/// A 26 character lowercase ULID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// A fresh, time ordered id.
    pub fn new() -> Self {
        Self(new_ulid())
    }

    /// The id as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Object for Id {
    fn name() -> &'static str {
        "id"
    }

    fn prepare(raw: Value) -> Result<Value> {
        matching(raw, Self::name(), &ID_RE, ID_PATTERN).map(Value::String)
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| wrap_string(raw, Id))
    }
}

// ============================================================================
// Email
// ============================================================================

/// A trimmed, lowercased email address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// The address as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The local part, before the `@`.
    pub fn local_part(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }

    /// A placeholder address for a user without one.
    pub fn anonymous(id: &Id) -> Self {
        Self(format!("{id}.no-reply@email.com"))
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Object for Email {
    fn name() -> &'static str {
        "email"
    }

    fn prepare(raw: Value) -> Result<Value> {
        matching(raw, Self::name(), &EMAIL_RE, EMAIL_PATTERN)
            .map(|email| Value::String(email.to_lowercase()))
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| wrap_string(raw, Email))
    }
}

// ============================================================================
// PositiveInt
// ============================================================================

/// A non-negative integer, typically a version counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PositiveInt(u64);

impl PositiveInt {
    /// Zero.
    pub const fn zero() -> Self {
        Self(0)
    }

    /// The wrapped value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The next value.
    pub const fn increment(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The previous value, stopping at zero.
    pub const fn decrement(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl Object for PositiveInt {
    fn name() -> &'static str {
        "positive_int"
    }

    fn prepare(raw: Value) -> Result<Value> {
        match integer(&raw).and_then(|number| u64::try_from(number).ok()) {
            Some(number) => Ok(Value::from(number)),
            None => Err(rejected(Self::name(), "integer", json!({"min": 0}), raw)),
        }
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| u64::construct(raw).map(PositiveInt))
    }
}

// ============================================================================
// DateTime
// ============================================================================

/// A UTC instant with millisecond precision, carried as epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DateTime(chrono::DateTime<Utc>);

impl DateTime {
    /// The current instant, truncated to milliseconds.
    pub fn now() -> Self {
        let now = Utc::now();
        Self::from_timestamp(now.timestamp_millis()).unwrap_or(Self(now))
    }

    /// The instant `millis` milliseconds after the epoch.
    pub fn from_timestamp(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Milliseconds since the epoch.
    pub fn timestamp(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`
    pub fn iso_format(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Shifted forward by `delta`.
    pub fn plus(&self, delta: TimeDelta) -> Self {
        Self(self.0 + delta)
    }

    /// Shifted backward by `delta`.
    pub fn minus(&self, delta: TimeDelta) -> Self {
        Self(self.0 - delta)
    }

    /// Absolute distance to `other`.
    pub fn diff(&self, other: &Self) -> TimeDelta {
        (self.0 - other.0).abs()
    }

    /// The wrapped chrono value.
    pub fn as_chrono(&self) -> chrono::DateTime<Utc> {
        self.0
    }
}

impl Serialize for DateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.timestamp())
    }
}

impl Object for DateTime {
    fn name() -> &'static str {
        "date_time"
    }

    fn prepare(raw: Value) -> Result<Value> {
        match integer(&raw).and_then(|number| i64::try_from(number).ok()) {
            Some(millis) if millis >= 0 && Self::from_timestamp(millis).is_some() => {
                Ok(Value::from(millis))
            }
            _ => Err(rejected(Self::name(), "integer", json!({"min": 0}), raw)),
        }
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| {
            let millis = i64::construct(raw.clone())?;
            Self::from_timestamp(millis)
                .ok_or_else(|| rejected(Self::name(), "integer", json!({"min": 0}), raw))
        })
    }
}

// ============================================================================
// Coordinates
// ============================================================================

macro_rules! bounded_float {
    ($(#[$meta:meta])* $name:ident, $canonical:literal, $min:literal, $max:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $name(f64);

        impl $name {
            /// The wrapped value.
            pub const fn get(self) -> f64 {
                self.0
            }
        }

        impl Object for $name {
            fn name() -> &'static str {
                $canonical
            }

            fn prepare(raw: Value) -> Result<Value> {
                match float(&raw) {
                    Some(number) if ($min..=$max).contains(&number) => Ok(Value::from(number)),
                    _ => Err(rejected(
                        Self::name(),
                        "float",
                        json!({"min": $min, "max": $max}),
                        raw,
                    )),
                }
            }

            fn shape() -> Shape<Self> {
                Shape::Leaf(|raw| f64::construct(raw).map($name))
            }
        }
    };
}

bounded_float!(
    /// Degrees north of the equator, within `[-90, 90]`.
    Latitude,
    "latitude",
    -90.0,
    90.0
);

bounded_float!(
    /// Degrees east of the prime meridian, within `[-180, 180]`.
    Longitude,
    "longitude",
    -180.0,
    180.0
);

// ============================================================================
// Time
// ============================================================================

/// A wall-clock time of day, `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Time(String);

impl Time {
    /// Hour component.
    pub fn hour(&self) -> u32 {
        self.component(0)
    }

    /// Minute component.
    pub fn minute(&self) -> u32 {
        self.component(1)
    }

    /// Fractional hours since midnight.
    pub fn as_hour(&self) -> f64 {
        f64::from(self.hour()) + f64::from(self.minute()) / 60.0
    }

    fn component(&self, idx: usize) -> u32 {
        self.0
            .split(':')
            .nth(idx)
            .and_then(|part| part.parse().ok())
            .unwrap_or_default()
    }
}

impl Object for Time {
    fn name() -> &'static str {
        "time"
    }

    fn prepare(raw: Value) -> Result<Value> {
        matching(raw, Self::name(), &TIME_RE, TIME_PATTERN).map(Value::String)
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| wrap_string(raw, Time))
    }
}

// ============================================================================
// Locale
// ============================================================================

/// A BCP-47 language tag subset, stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Locale(String);

impl Locale {
    /// The tag as text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Locale {
    fn default() -> Self {
        Self(String::from("en"))
    }
}

impl Object for Locale {
    fn name() -> &'static str {
        "locale"
    }

    fn prepare(raw: Value) -> Result<Value> {
        match text(&raw) {
            Some(tag) if LOCALE_RE.is_match(&tag) => Ok(Value::String(tag.to_lowercase())),
            _ => Err(Error::invalid_field()
                .at(Self::name())
                .with_hint("expected", "BCP47Locale")
                .with_hint("received", raw)),
        }
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| wrap_string(raw, Locale))
    }
}

/// Text keyed by locale tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct LocalizedText(BTreeMap<String, String>);

impl LocalizedText {
    /// The text for `locale`, if present.
    pub fn get(&self, locale: &str) -> Option<&str> {
        self.0.get(locale).map(String::as_str)
    }

    /// Every translation keyed by locale tag.
    pub fn translations(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl Object for LocalizedText {
    fn name() -> &'static str {
        "localized_text"
    }

    fn prepare(raw: Value) -> Result<Value> {
        let valid = raw.as_object().is_some_and(|map| {
            map.iter()
                .all(|(locale, text)| LOCALE_RE.is_match(locale) && text.is_string())
        });
        if valid {
            return Ok(raw);
        }
        Err(Error::invalid_field()
            .at(Self::name())
            .with_hint("expected", "Dictionary<BCP47Locale, string>")
            .with_hint("example", json!({"en-US": "English", "en": "An example"}))
            .with_hint("received", raw))
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| {
            serde_json::from_value(raw)
                .map(LocalizedText)
                .map_err(|err| Error::internal_from(&err))
        })
    }
}

// ============================================================================
// Timezone
// ============================================================================

/// An IANA time zone such as `Europe/Paris`, checked against the tz database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timezone(Tz);

impl Timezone {
    /// The zone name.
    pub fn as_str(&self) -> &'static str {
        self.0.name()
    }

    /// The zone, for local time conversions.
    pub fn zone(&self) -> Tz {
        self.0
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(Tz::UTC)
    }
}

impl Serialize for Timezone {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

fn parse_zone(raw: &Value) -> Option<Tz> {
    text(raw)?.parse::<Tz>().ok()
}

impl Object for Timezone {
    fn name() -> &'static str {
        "timezone"
    }

    fn prepare(raw: Value) -> Result<Value> {
        match parse_zone(&raw) {
            Some(zone) => Ok(Value::from(zone.name())),
            None => Err(rejected(Self::name(), "string", json!({"format": "iana"}), raw)),
        }
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| match parse_zone(&raw) {
            Some(zone) => Ok(Timezone(zone)),
            None => Err(rejected(Self::name(), "string", json!({"format": "iana"}), raw)),
        })
    }
}

// ============================================================================
// Map
// ============================================================================

/// A free-form JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Map(serde_json::Map<String, Value>);

impl Map {
    /// An empty map.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The value under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The wrapped JSON object.
    pub fn as_json(&self) -> &serde_json::Map<String, Value> {
        &self.0
    }
}

impl From<serde_json::Map<String, Value>> for Map {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Object for Map {
    fn name() -> &'static str {
        "map"
    }

    fn prepare(raw: Value) -> Result<Value> {
        if raw.is_object() {
            return Ok(raw);
        }
        Err(Error::invalid_field()
            .at(Self::name())
            .with_hint("expected", "object")
            .with_hint("received", raw))
    }

    fn shape() -> Shape<Self> {
        Shape::Leaf(|raw| serde_json::Map::construct(raw).map(Map))
    }
}

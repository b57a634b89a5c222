use courier::{
    Email, Error, ErrorKind, Object, Options, Result, SortDirection, combine,
    objects::{Address, WorkingHours},
};
use serde_json::{Value, json};

mod common;
use common::PlaceOrder;

fn trim_name(mut raw: Value) -> Result<Value> {
    if let Some(Value::String(name)) = raw.get_mut("name") {
        *name = name.trim().to_owned();
    }
    Ok(raw)
}

fn anonymous() -> String {
    String::from("anonymous")
}

#[derive(Clone, Debug, Object)]
#[object(name = "profile", prepare = trim_name)]
struct UserProfile {
    name: String,
    #[object(rename = "mail")]
    email: Email,
    #[object(default = anonymous)]
    nickname: String,
    age: Option<u8>,
}

#[derive(Clone, Debug, Object)]
struct Score {
    value: u32,
}

#[test]
fn test_derive_builds_composite() {
    let profile = UserProfile::create(Some(json!({
        "name": "  Ada ",
        "mail": " ADA@Example.com ",
        "age": "36",
        "ignored": true,
    })))
    .unwrap();
    assert_eq!(profile.name, "Ada");
    assert_eq!(profile.email.as_str(), "ada@example.com");
    assert_eq!(profile.nickname, "anonymous");
    assert_eq!(profile.age, Some(36));
    assert_eq!(UserProfile::name(), "profile");
}

#[test]
fn test_missing_fields_are_aggregated() {
    let err = UserProfile::create(Some(json!({}))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidField);
    let missing: Vec<_> = err.errors().iter().filter_map(Error::field).collect();
    assert_eq!(missing, vec!["name", "mail"]);
    assert!(
        err.errors()
            .iter()
            .all(|error| error.kind() == ErrorKind::MissingField)
    );
}

#[test]
fn test_absent_object_is_missing() {
    let err = PlaceOrder::create(None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingField);
    assert_eq!(err.field(), Some("place_order"));
}

#[test]
fn test_list_errors_carry_indexes() {
    let err = PlaceOrder::create(Some(json!({
        "id": "01arz3ndektsv4rrffq69g5fav",
        "quantity": 1,
        "tags": ["ok", [1], {"no": 1}],
    })))
    .unwrap_err();
    let tags = &err.errors()[0];
    assert_eq!(tags.field(), Some("tags"));
    let indexes: Vec<_> = tags.errors().iter().filter_map(Error::field).collect();
    assert_eq!(indexes, vec!["tags[1]", "tags[2]"]);
}

#[test]
fn test_nested_errors_are_tagged_with_their_key() {
    let err = Address::create(Some(json!({
        "city": "Paris",
        "street": "1 rue de Rivoli",
        "region": "IDF",
        "country": "FR",
        "postal_code": 75001,
        "coordinate": {"lat": "north", "lng": 2.35},
    })))
    .unwrap_err();
    assert_eq!(err.errors().len(), 1);
    let coordinate = &err.errors()[0];
    assert_eq!(coordinate.field(), Some("coordinate"));
    assert_eq!(coordinate.errors()[0].field(), Some("lat"));
    assert_eq!(coordinate.errors()[0].hint("received"), Some(&json!("north")));
}

#[test]
fn test_leaf_wraps_prepared_value() {
    let score = Score::create(Some(json!("42"))).unwrap();
    assert_eq!(score.value, 42);
    let err = Score::create(Some(json!(-3))).unwrap_err();
    assert_eq!(err.field(), Some("score"));
    assert_eq!(err.hint("expected"), Some(&json!("u32")));
}

#[test]
fn test_working_hours_round_trip_shape() {
    let raw = json!({
        "timezone": "UTC",
        "always_open": false,
        "regular_hours": [{"weekday": [0, 1, 2], "slots": [{"start": "08:00", "end": "12:00"}]}],
        "special_hours": [{
            "opened": true,
            "date": 1_700_000_000_000_i64,
            "name": {"en": "Holiday", "fr": "Férié"},
        }],
    });
    let hours = WorkingHours::create(Some(raw)).unwrap();
    assert_eq!(hours.regular_hours[0].weekday, vec![0, 1, 2]);
    assert!(hours.regular_hours[0].slots[0].is_between(10, 15));
    assert_eq!(hours.special_hours[0].name.get("fr"), Some("Férié"));
    assert!(hours.special_hours[0].slots.is_empty());

    let again = WorkingHours::create(Some(serde_json::to_value(&hours).unwrap())).unwrap();
    assert_eq!(again, hours);
}

#[test]
fn test_options_reject_unknown_values() {
    assert_eq!(
        SortDirection::create(Some(json!("ASC"))).unwrap(),
        SortDirection::Ascending
    );
    let err = SortDirection::create(Some(json!("UP"))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownOption);
    assert_eq!(err.hint("expected"), Some(&json!(SortDirection::options())));
}

#[test]
fn test_combine_inspects_every_result() {
    let results = vec![
        Email::create(Some(json!("a@b.c"))),
        Email::create(Some(json!("nope"))),
        Email::create(Some(json!(12))),
    ];
    let err = combine(results).unwrap_err();
    assert_eq!(err.errors().len(), 2);
}

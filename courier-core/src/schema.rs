//! Schema-driven construction of value objects.
//!
//! A value object turns an untyped JSON value into a typed, validated Rust
//! value through [`Object::create`]. Every field is validated even after the
//! first failure so that a caller receives the complete list of problems in
//! one aggregate error.
//!
//! # Shapes
//!
//! - **Leaf**: an object wrapping a single validated value (`Email`, `Id`,
//!   ...). [`Object::prepare`] does the validation and the normalized value is
//!   wrapped as is.
//! - **Composite**: an object with named fields described by a [`Schema`].
//!   Each field is read from the normalized JSON object and built through its
//!   [`FieldSchema`].
//!
//! Schemas are built once per type and cached for the lifetime of the
//! process, see [`Schema::cached`].
//!
//! # Field types
//!
//! A field type implements [`FieldValue`]. Scalars, `String`, `Value` and
//! every [`Object`] implement it through [`Construct`]; `Vec<T>` makes a list
//! field and `Option<T>` an optional one.

use crate::{
    error::Error,
    outcome::{Result, ResultExt, combine, combine_map},
};
use serde_json::{Map, Value};
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{OnceLock, PoisonError, RwLock},
};

// ============================================================================
// Object
// ============================================================================

/// A validated value object built from untyped input.
#[diagnostic::on_unimplemented(
    message = "`{Self}` is not a value object",
    label = "missing `Object` implementation",
    note = "Derive it with `#[derive(Object)]` or implement `Object::shape` by hand."
)]
pub trait Object: Sized + Clone + Send + Sync + 'static {
    /// Canonical snake_case name, used to tag errors about the whole object.
    fn name() -> &'static str;

    /// Normalize or validate the raw input before any field is read.
    fn prepare(raw: Value) -> Result<Value> {
        Ok(raw)
    }

    /// How the normalized input becomes `Self`.
    fn shape() -> Shape<Self>;

    /// Build `Self` from untyped input.
    fn create(raw: Option<Value>) -> Result<Self> {
        create(raw)
    }
}

/// How a value object is assembled from its normalized input.
pub enum Shape<T: 'static> {
    /// Wrap the normalized value.
    Leaf(fn(Value) -> Result<T>),
    /// Walk the fields of a schema.
    Composite(&'static Schema<T>),
}

/// The construction engine behind [`Object::create`].
pub fn create<T: Object>(raw: Option<Value>) -> Result<T> {
    let raw = match raw {
        None | Some(Value::Null) => return Err(Error::missing_field(T::name())),
        Some(raw) => raw,
    };
    let normalized = T::prepare(raw)?;
    match T::shape() {
        Shape::Leaf(wrap) => wrap(normalized).at(T::name()),
        Shape::Composite(schema) => schema.create(normalized, T::name()),
    }
}

// ============================================================================
// Schema
// ============================================================================

type Slot = Box<dyn Any + Send>;

type SchemaCache = RwLock<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>;

static SCHEMAS: OnceLock<SchemaCache> = OnceLock::new();

/// Field descriptors of a composite value object.
pub struct Schema<T> {
    fields: Vec<FieldSchema>,
    assemble: fn(&mut Fields) -> Result<T>,
}

impl<T: 'static> Schema<T> {
    /// Describe a composite from its fields, in declaration order, and the
    /// function assembling `T` from the built field values.
    pub fn new(fields: Vec<FieldSchema>, assemble: fn(&mut Fields) -> Result<T>) -> Self {
        Self { fields, assemble }
    }

    /// The process-wide schema of `T`, built by `build` on first use.
    pub fn cached(build: fn() -> Self) -> &'static Self {
        let registry = SCHEMAS.get_or_init(Default::default);
        let key = TypeId::of::<Self>();
        if let Some(schema) = Self::lookup(
            &registry.read().unwrap_or_else(PoisonError::into_inner),
            key,
        ) {
            return schema;
        }

        let built: &'static Self = Box::leak(Box::new(build()));
        let mut guard = registry.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(schema) = Self::lookup(&guard, key) {
            return schema;
        }
        guard.insert(key, built);
        built
    }

    fn lookup(
        registry: &HashMap<TypeId, &'static (dyn Any + Send + Sync)>,
        key: TypeId,
    ) -> Option<&'static Self> {
        let entry: &'static (dyn Any + Send + Sync) = *registry.get(&key)?;
        entry.downcast_ref::<Self>()
    }

    /// Field descriptors in declaration order.
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    fn create(&self, normalized: Value, name: &str) -> Result<T> {
        let Value::Object(input) = normalized else {
            return Err(Error::invalid_field()
                .at(name)
                .with_hint("expected", "object")
                .with_hint("received", normalized));
        };
        let slots = combine_map(
            self.fields
                .iter()
                .map(|field| (field.key, field.create(&input))),
        )?;
        (self.assemble)(&mut Fields { slots })
    }
}

/// Built field values handed to the assemble function of a [`Schema`].
pub struct Fields {
    slots: HashMap<&'static str, Slot>,
}

impl Fields {
    /// Take the built value of field `key`.
    pub fn take<V: 'static>(&mut self, key: &str) -> Result<V> {
        let slot = self.slots.remove(key).ok_or_else(|| {
            Error::internal().with_debug("message", format!("field `{key}` was not built"))
        })?;
        slot.downcast::<V>().map(|value| *value).map_err(|_| {
            Error::internal().with_debug(
                "message",
                format!(
                    "field `{key}` was not built as `{}`",
                    std::any::type_name::<V>()
                ),
            )
        })
    }
}

// ============================================================================
// FieldSchema
// ============================================================================

/// Descriptor of one field of a composite.
pub struct FieldSchema {
    key: &'static str,
    expected: &'static str,
    list: bool,
    optional: bool,
    default: Option<Box<dyn Fn() -> Slot + Send + Sync>>,
    absent: fn() -> Option<Slot>,
    build: fn(Value, &'static str) -> Result<Slot>,
}

impl FieldSchema {
    /// A field of type `F` read under `key`.
    pub fn of<F: FieldValue>(key: &'static str) -> Self {
        Self {
            key,
            expected: F::expected(),
            list: F::LIST,
            optional: F::OPTIONAL,
            default: None,
            absent: || F::absent().map(|value| Box::new(value) as Slot),
            build: |raw, key| F::build(raw, key).map(|value| Box::new(value) as Slot),
        }
    }

    /// A field of type `F` that falls back to `default()` when absent.
    pub fn with_default<F: FieldValue>(key: &'static str, default: fn() -> F) -> Self {
        Self {
            default: Some(Box::new(move || Box::new(default()) as Slot)),
            ..Self::of::<F>(key)
        }
    }

    /// Key of the field in the input object.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Name of the expected type.
    pub fn expected(&self) -> &'static str {
        self.expected
    }

    /// Whether the field holds a list.
    pub fn is_list(&self) -> bool {
        self.list
    }

    /// Whether the field may be absent.
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    /// Whether the field has a default factory.
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    fn create(&self, input: &Map<String, Value>) -> Result<Slot> {
        match input.get(self.key).filter(|raw| !raw.is_null()) {
            Some(raw) => (self.build)(raw.clone(), self.key),
            None => {
                if let Some(default) = &self.default {
                    return Ok(default());
                }
                (self.absent)().ok_or_else(|| Error::missing_field(self.key))
            }
        }
    }
}

impl std::fmt::Debug for FieldSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldSchema")
            .field("key", &self.key)
            .field("expected", &self.expected)
            .field("list", &self.list)
            .field("optional", &self.optional)
            .field("default", &self.default.is_some())
            .finish()
    }
}

// ============================================================================
// Field types
// ============================================================================

/// A type that can be built from a single JSON value.
pub trait Construct: Sized + Send + 'static {
    /// Name of the expected type, reported in `hints.expected`.
    fn expected() -> &'static str;

    /// Build from a present, non-null value.
    fn construct(raw: Value) -> Result<Self>;
}

/// A type usable as a field of a composite.
#[diagnostic::on_unimplemented(
    message = "`{Self}` cannot be used as a value object field",
    label = "missing `FieldValue` implementation",
    note = "Fields must be scalars, `String`, `serde_json::Value`, value objects, or `Vec`/`Option` of those."
)]
pub trait FieldValue: Sized + Send + 'static {
    /// Whether the field holds a list.
    const LIST: bool = false;
    /// Whether the field may be absent.
    const OPTIONAL: bool = false;

    /// Name of the expected element type.
    fn expected() -> &'static str;

    /// Value used when the field is absent, if absence is allowed.
    fn absent() -> Option<Self> {
        None
    }

    /// Build from a present, non-null value; errors are tagged with `key`.
    fn build(raw: Value, key: &'static str) -> Result<Self>;
}

impl<T: Construct> FieldValue for T {
    fn expected() -> &'static str {
        T::expected()
    }

    fn build(raw: Value, key: &'static str) -> Result<Self> {
        T::construct(raw).at(key)
    }
}

impl<T: Construct> FieldValue for Vec<T> {
    const LIST: bool = true;

    fn expected() -> &'static str {
        T::expected()
    }

    fn build(raw: Value, key: &'static str) -> Result<Self> {
        let Value::Array(items) = raw else {
            return Err(mismatch("list", raw).at(key));
        };
        combine(
            items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| T::construct(item).at(format!("{key}[{idx}]"))),
        )
        .at(key)
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    const LIST: bool = T::LIST;
    const OPTIONAL: bool = true;

    fn expected() -> &'static str {
        T::expected()
    }

    fn absent() -> Option<Self> {
        Some(None)
    }

    fn build(raw: Value, key: &'static str) -> Result<Self> {
        T::build(raw, key).map(Some)
    }
}

impl<T: Object> Construct for T {
    fn expected() -> &'static str {
        T::name()
    }

    fn construct(raw: Value) -> Result<Self> {
        T::create(Some(raw))
    }
}

/// An `invalid_field` error for a value of the wrong type.
pub fn mismatch(expected: &str, received: Value) -> Error {
    Error::invalid_field()
        .with_hint("expected", expected)
        .with_hint("received", received)
}

impl Construct for bool {
    fn expected() -> &'static str {
        "bool"
    }

    fn construct(raw: Value) -> Result<Self> {
        match &raw {
            Value::Bool(value) => Ok(*value),
            Value::String(text) if text == "true" || text == "True" => Ok(true),
            Value::String(text) if text == "false" || text == "False" => Ok(false),
            _ => Err(mismatch("bool", raw)),
        }
    }
}

impl Construct for String {
    fn expected() -> &'static str {
        "str"
    }

    fn construct(raw: Value) -> Result<Self> {
        match raw {
            Value::String(text) => Ok(text),
            Value::Number(number) => Ok(number.to_string()),
            other => Err(mismatch("str", other)),
        }
    }
}

impl Construct for Value {
    fn expected() -> &'static str {
        "any"
    }

    fn construct(raw: Value) -> Result<Self> {
        Ok(raw)
    }
}

impl Construct for Map<String, Value> {
    fn expected() -> &'static str {
        "object"
    }

    fn construct(raw: Value) -> Result<Self> {
        match raw {
            Value::Object(map) => Ok(map),
            other => Err(mismatch("object", other)),
        }
    }
}

/// Read an integer from a number or a numeric string.
///
/// Floats are truncated toward zero.
pub fn integer(raw: &Value) -> Option<i128> {
    match raw {
        Value::Number(number) => number
            .as_i64()
            .map(i128::from)
            .or_else(|| number.as_u64().map(i128::from))
            .or_else(|| {
                number
                    .as_f64()
                    .filter(|float| float.is_finite())
                    .map(|float| float.trunc() as i128)
            }),
        Value::String(text) => text.trim().parse::<i128>().ok(),
        _ => None,
    }
}

/// Read a finite float from a number or a numeric string.
pub fn float(raw: &Value) -> Option<f64> {
    let number = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|float| float.is_finite())
}

macro_rules! impl_construct_integer {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Construct for $ty {
                fn expected() -> &'static str {
                    stringify!($ty)
                }

                fn construct(raw: Value) -> Result<Self> {
                    integer(&raw)
                        .and_then(|number| <$ty>::try_from(number).ok())
                        .ok_or_else(|| mismatch(stringify!($ty), raw))
                }
            }
        )+
    };
}

impl_construct_integer!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

macro_rules! impl_construct_float {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Construct for $ty {
                fn expected() -> &'static str {
                    stringify!($ty)
                }

                fn construct(raw: Value) -> Result<Self> {
                    float(&raw)
                        .map(|number| number as $ty)
                        .ok_or_else(|| mismatch(stringify!($ty), raw))
                }
            }
        )+
    };
}

impl_construct_float!(f32, f64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq)]
    struct Pet {
        name: String,
        age: u8,
        tags: Vec<String>,
        vaccinated: bool,
        owner: Option<String>,
    }

    impl Object for Pet {
        fn name() -> &'static str {
            "pet"
        }

        fn shape() -> Shape<Self> {
            Shape::Composite(Schema::cached(|| {
                Schema::new(
                    vec![
                        FieldSchema::of::<String>("name"),
                        FieldSchema::of::<u8>("age"),
                        FieldSchema::with_default::<Vec<String>>("tags", Vec::new),
                        FieldSchema::of::<bool>("vaccinated"),
                        FieldSchema::of::<Option<String>>("owner"),
                    ],
                    |fields| {
                        Ok(Pet {
                            name: fields.take("name")?,
                            age: fields.take("age")?,
                            tags: fields.take("tags")?,
                            vaccinated: fields.take("vaccinated")?,
                            owner: fields.take("owner")?,
                        })
                    },
                )
            }))
        }
    }

    #[test]
    fn builds_a_composite() {
        let pet = Pet::create(Some(json!({
            "name": "Rex",
            "age": "4",
            "vaccinated": "True",
        })))
        .unwrap();
        assert_eq!(pet.name, "Rex");
        assert_eq!(pet.age, 4);
        assert!(pet.vaccinated);
        assert!(pet.tags.is_empty());
        assert_eq!(pet.owner, None);
    }

    #[test]
    fn absent_input_is_missing_object() {
        let err = Pet::create(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingField);
        assert_eq!(err.field(), Some("pet"));
        assert_eq!(Pet::create(Some(Value::Null)).unwrap_err().field(), Some("pet"));
    }

    #[test]
    fn every_field_failure_is_reported() {
        let err = Pet::create(Some(json!({"age": 300, "vaccinated": "maybe"}))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidField);
        let fields: Vec<_> = err.errors().iter().filter_map(Error::field).collect();
        assert_eq!(fields, vec!["name", "age", "vaccinated"]);
        assert_eq!(err.errors()[1].hint("expected"), Some(&json!("u8")));
        assert_eq!(err.errors()[1].hint("received"), Some(&json!(300)));
    }

    #[test]
    fn list_elements_are_tagged_with_their_index() {
        let err = Pet::create(Some(json!({
            "name": "Rex",
            "age": 1,
            "vaccinated": false,
            "tags": ["a", {"nested": true}, "c"],
        })))
        .unwrap_err();
        let list = &err.errors()[0];
        assert_eq!(list.field(), Some("tags"));
        assert_eq!(list.errors().len(), 1);
        assert_eq!(list.errors()[0].field(), Some("tags[1]"));
    }

    #[test]
    fn list_fields_require_arrays() {
        let err = Pet::create(Some(json!({
            "name": "Rex",
            "age": 1,
            "vaccinated": false,
            "tags": "a",
        })))
        .unwrap_err();
        assert_eq!(err.errors()[0].hint("expected"), Some(&json!("list")));
    }

    #[test]
    fn composites_require_objects() {
        let err = Pet::create(Some(json!([1, 2]))).unwrap_err();
        assert_eq!(err.field(), Some("pet"));
        assert_eq!(err.hint("expected"), Some(&json!("object")));
    }

    #[test]
    fn schema_is_built_once() {
        let Shape::Composite(first) = Pet::shape() else {
            panic!("pet is a composite");
        };
        let Shape::Composite(second) = Pet::shape() else {
            panic!("pet is a composite");
        };
        assert!(std::ptr::eq(first, second));
        assert_eq!(first.fields().len(), 5);
        assert!(first.fields()[2].is_list());
        assert!(first.fields()[2].has_default());
        assert!(first.fields()[4].is_optional());
    }

    #[test]
    fn scalar_coercions() {
        assert_eq!(i32::construct(json!(7.9)), Ok(7));
        assert_eq!(f64::construct(json!("2.5")), Ok(2.5));
        assert_eq!(String::construct(json!(12)), Ok("12".to_owned()));
        assert!(u8::construct(json!(-1)).is_err());
        assert!(bool::construct(json!(1)).is_err());
        assert!(String::construct(json!(true)).is_err());
    }
}

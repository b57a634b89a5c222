//! Procedural macros for Courier.
//!
//! - `#[derive(Object)]` - static field schema of a value object

use proc_macro::TokenStream;

mod object;

/// Derive `courier::Object` for a struct with named fields.
///
/// A struct whose only field is named `value` becomes a leaf object: the
/// whole input is validated as that field. Any other struct becomes a
/// composite whose fields are read by name, in declaration order.
///
/// # Struct attributes
///
/// - `#[object(name = "...")]` - canonical name, snake_case of the type by default
/// - `#[object(prepare = path)]` - `fn(Value) -> Result<Value>` run before any field
///
/// # Field attributes
///
/// - `#[object(default)]` - `Default::default()` when the field is absent
/// - `#[object(default = path)]` - `fn() -> T` called when the field is absent
/// - `#[object(rename = "...")]` - read the field under another key
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Object)]
/// struct Address {
///     street: String,
///     #[object(default = Locale::default)]
///     locale: Locale,
///     lines: Vec<String>,
///     postal_code: Option<String>,
/// }
/// ```
#[proc_macro_derive(Object, attributes(object))]
pub fn derive_object(input: TokenStream) -> TokenStream {
    object::derive_object_impl(input)
}

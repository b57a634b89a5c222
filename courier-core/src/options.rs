//! String-valued enumerations.
//!
//! [`options!`](crate::options!) declares an enum whose variants map to fixed
//! wire strings. The generated type is a leaf [`Object`], so it can be used as
//! a field of any composite; values outside the option list fail with an
//! `unknown_option` error listing the allowed options.

use crate::{
    error::Error,
    outcome::Result,
    schema::Object,
};
use serde_json::Value;

/// An enumeration of fixed string options.
pub trait Options: Object + Copy {
    /// Every variant, in declaration order.
    const ALL: &'static [Self];

    /// Wire string of the variant.
    fn as_str(self) -> &'static str;

    /// Wire strings of every variant.
    fn options() -> Vec<&'static str> {
        Self::ALL.iter().map(|option| option.as_str()).collect()
    }

    /// Parse a present value into a variant.
    fn parse(raw: Value) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|option| raw.as_str() == Some(option.as_str()))
            .ok_or_else(|| Error::unknown_option(&Self::options(), raw))
    }
}

/// Declare a string-valued enumeration.
///
/// ```rust,ignore
/// courier_core::options! {
///     /// Direction of a sorted listing.
///     pub enum SortDirection as "sort_direction" {
///         Ascending = "ASC",
///         Descending = "DESC",
///     }
/// }
/// ```
#[macro_export]
macro_rules! options {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident as $canonical:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $value:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $crate::Options for $name {
            const ALL: &'static [Self] = &[$(Self::$variant),+];

            fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl $crate::Object for $name {
            fn name() -> &'static str {
                $canonical
            }

            fn shape() -> $crate::schema::Shape<Self> {
                $crate::schema::Shape::Leaf(<Self as $crate::Options>::parse)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(<Self as $crate::Options>::as_str(*self))
            }
        }

        impl $crate::__private::serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error>
            where
                S: $crate::__private::serde::Serializer,
            {
                serializer.serialize_str(<Self as $crate::Options>::as_str(*self))
            }
        }
    };
}

crate::options! {
    /// Direction of a sorted listing.
    pub enum SortDirection as "sort_direction" {
        /// `ASC`
        Ascending = "ASC",
        /// `DESC`
        Descending = "DESC",
    }
}

crate::options! {
    /// Lifecycle status of a stored entity.
    pub enum EntityStatus as "entity_status" {
        /// `ACTIVE`
        Active = "ACTIVE",
        /// `DELETED`
        Deleted = "DELETED",
        /// `INACTIVE`
        Inactive = "INACTIVE",
        /// `ARCHIVED`
        Archived = "ARCHIVED",
    }
}

//! Property type system.
//!
//! Property types, their attribute schemas, typed values and the registry
//! of per-type parse/storage/format/filter rules.

pub mod formula;
mod handlers;
mod kind;
mod locale;
mod registry;
mod stored;
mod value;

pub use handlers::PropertyTypeHandler;
pub use kind::{
    DateAttributes, FormulaAttributes, MediaAttributes, NumberAttributes, PropertyKind,
    PropertyType, SelectAttributes, SelectOption, TextAttributes, TextEditor, ValueStore,
};
pub use locale::Locale;
pub use registry::PropertyTypeRegistry;
pub use stored::{MediaEntry, MultipleEntry, RangeCell, ScalarCell, StoredValue};
pub use value::{from_micros, to_micros, DateRange, MediaFile, NumberRange, TypedValue};

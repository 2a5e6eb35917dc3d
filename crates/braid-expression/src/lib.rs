//! Expression, template, invoke and transform engine for braid.
//!
//! Configuration files address message data through a compact locator
//! grammar instead of embedded code:
//!
//! ```text
//! EXPRESSION := <plane> [ ":" <path> ]
//! PLANE      := "input" | "input.payload" | "input.topic"
//!             | "input.topic_levels" | "input.user_properties"
//!             | "previous" | "user_data.<name>"
//!             | "static:<literal>" | "template:<text>"
//!             | "item" | "index" | "keyword_args" | "invoke_data" | "self"
//! PATH       := segment ("." segment)*      -- integers index sequences
//! ```
//!
//! Reads of missing data yield null, never an error. Writes are
//! restricted to the `user_data` scratch planes (and, inside a
//! transform, `previous`).
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`Expression`] | parse + evaluate + write locators |
//! | [`Template`] | `{{encoding://expr}}` text rendering |
//! | [`InvokeRegistry`] | named native functions callable from config |
//! | [`ConfigValue`] | resolved configuration: literal or deferred |
//! | [`Transforms`] | ordered copy/append/map/reduce/filter operators |

mod config_value;
mod data;
mod error;
mod expr;
mod invoke;
mod template;
mod transforms;

pub use config_value::{resolve_config_map, resolve_config_value, ConfigMap, ConfigValue};
pub use data::MessageData;
pub use error::ExpressionError;
pub use expr::{
    is_truthy, CoerceType, Expression, InputField, LocalContext, PathSegment, Plane,
};
pub use invoke::{InvokeFn, InvokeRegistry};
pub use template::{Template, TemplateEncoding};
pub use transforms::{SourceBinding, TransformSpec, Transforms};

//! Transformation DSL: operation registry, rule parser, and executor.
//!
//! Rules chain operations with `" + "` and pass arguments with `|`:
//!
//! ```
//! use feedforge::transform::transform;
//! use serde_json::json;
//!
//! let out = transform(json!("  wine, beer  "), "strip + split|, + list_first + uppercase")
//!     .unwrap();
//! assert_eq!(out, json!("WINE"));
//! ```

pub mod executor;
pub mod parser;
pub mod registry;

pub use executor::{apply_steps, bulk_apply, transform, Execution, RuleSet, StepFault};
pub use parser::parse_rule;
pub use registry::{apply_operation, is_registered, Context, OpError};

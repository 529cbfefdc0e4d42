//! Error types for constraint evaluation and plan rewriting.
//!
//! This module defines `PlanError`, the single error type surfaced by the crate.
//! Using the `thiserror` crate, every failure mode of the step evaluator, the
//! constraint scheduler, the unit registry and the message mutators is
//! represented as one variant, so callers can propagate everything with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Configuration`**: a constraint or step references a variable that has no
//!   value at evaluation time, or a message cannot be rewritten as requested.
//!   Indicates a mistake made before the scan started.
//! - **`CyclicDependency`**: the constraint graph contains a cycle. Raised when
//!   the step evaluator is built, before any step executes.
//! - **`UnitConversion`**: an unknown unit or a conversion across incompatible
//!   dimensions was requested.
//! - **`Config`**: wraps errors from `figment` while loading configuration files
//!   or environment overrides.
//! - **`InvalidConfig`**: configuration that parsed but is logically incorrect.
//!
//! None of these are recoverable by retrying; they all describe setup errors.

use thiserror::Error;

use crate::device::DeviceId;

/// Convenience alias for results using the crate error type.
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Primary error type for constraint evaluation and message rewriting.
#[derive(Error, Debug)]
pub enum PlanError {
    /// A referenced variable is missing or a message is malformed.
    ///
    /// **Error Type**: Permanent - the scan definition is wrong.
    ///
    /// **Recovery Strategy**: Abort the step, fix the constraint set or axis units.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The constraint dependency graph contains a cycle.
    ///
    /// `involved` lists the variables that could not be scheduled, in the order
    /// they were first seen while building the graph.
    #[error("Cyclic constraint dependency between: {}", format_ids(.involved))]
    CyclicDependency {
        /// Variables taking part in (or downstream of) the cycle
        involved: Vec<DeviceId>,
    },

    /// Unknown unit, or units of different physical dimensions.
    #[error("Cannot convert from '{from}' to '{to}': {reason}")]
    UnitConversion {
        /// Source unit
        from: String,
        /// Requested unit
        to: String,
        /// Why the conversion is impossible
        reason: String,
    },

    /// Configuration file or environment parsing failed.
    #[error("Configuration load error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but failed validation.
    #[error("Configuration validation error: {0}")]
    InvalidConfig(String),
}

impl From<figment::Error> for PlanError {
    fn from(value: figment::Error) -> Self {
        PlanError::Config(Box::new(value))
    }
}

impl PlanError {
    /// Shorthand for a `UnitConversion` error.
    pub fn unit_conversion(
        from: impl Into<String>,
        to: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PlanError::UnitConversion {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }
}

fn format_ids(ids: &[DeviceId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

//! # DAQ Plan Constraints
//!
//! Constrained multi-axis scanning for experiment plans. A scan supplies
//! target positions for its axes at every point; this crate fills in the
//! motors that are *derived* from those axes and makes sure every value
//! reaches its device in the device's own units.
//!
//! ## Crate Structure
//!
//! - **`constraint`**: linear constraints (`y = 2.0 * x - 0.5 * z` in mm) and
//!   the ordered `ConstraintSet`.
//! - **`scheduler`**: dependency-ordered evaluation of a constraint set, with
//!   cycle detection.
//! - **`units`**: the `UnitService` seam and the stock affine `UnitRegistry`.
//! - **`step`**: `make_one_nd_step`, which wraps a per-step function with
//!   axis unit conversion and constraint evaluation.
//! - **`plans`**: the `MsgPlan` trait, the `move_per_step` /
//!   `trigger_and_read` primitives and the `ScanNd` plan.
//! - **`mutators`**: message-stream rewriting (position exceptions and live
//!   relative offsets) and the `PlanExt` decorators.
//! - **`messages`**: the `Msg` command record plans yield.
//! - **`config`**: Figment-based loading of constraints, axis units and unit
//!   tables from TOML plus environment overrides.
//! - **`logging`**: optional `tracing-subscriber` setup.
//! - **`error`**: the `PlanError` enum.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use daq_plan_constraints::plans::{collect_msgs, ScanNd};
//! use daq_plan_constraints::{
//!     make_one_nd_step, AxisUnits, ConstraintSet, DeviceId, LinearConstraint, Step, UnitRegistry,
//! };
//!
//! let units = UnitRegistry::new()
//!     .with_native_units("x", "mm")
//!     .with_native_units("y", "mm");
//! let constants = ConstraintSet::new().with("y", LinearConstraint::new("mm").with_term(0.5, "x"));
//! let axis_units = AxisUnits::from([(DeviceId::from("x"), "um".to_string())]);
//! let per_step = make_one_nd_step(Some(constants), Some(axis_units), None, Arc::new(units))?;
//!
//! let steps: Vec<Step> = (0..3)
//!     .map(|i| Step::from([(DeviceId::from("x"), 1000.0 * f64::from(i))]))
//!     .collect();
//! let mut scan = ScanNd::new(vec![DeviceId::from("det")], steps, per_step);
//! let msgs = collect_msgs(&mut scan)?;
//!
//! let last_y = msgs
//!     .iter()
//!     .filter(|m| m.is_set_for(&DeviceId::from("y")))
//!     .last()
//!     .and_then(|m| m.position())
//!     .unwrap_or_default();
//! assert!((last_y - 1.0).abs() < 1e-9);
//! # Ok::<(), daq_plan_constraints::PlanError>(())
//! ```

pub mod config;
pub mod constraint;
pub mod device;
pub mod error;
pub mod logging;
pub mod messages;
pub mod mutators;
pub mod plans;
pub mod scheduler;
pub mod step;
pub mod units;

pub use config::PlanConfig;
pub use constraint::{ConstraintSet, LinearConstraint, Term};
pub use device::DeviceId;
pub use error::{PlanError, PlanResult};
pub use messages::Msg;
pub use mutators::{MsgMutator, OffsetFn, PlanExt, RelativeOffsets};
pub use plans::{MsgPlan, ScanNd};
pub use scheduler::{evaluation_order, EvaluationOrder};
pub use step::{
    default_per_step, make_one_nd_step, AxisUnits, PerStep, PositionCache, Step, StepEvaluator,
};
pub use units::{UnitConverter, UnitDefinition, UnitRegistry, UnitResolver, UnitService};

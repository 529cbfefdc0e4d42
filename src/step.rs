//! Per-step evaluation of axis units and constraints.
//!
//! Scan primitives call a [`PerStep`] function once per point with the target
//! position of every scanned axis. [`make_one_nd_step`] wraps such a function
//! so that, before it runs:
//!
//! 1. every axis listed in the axis unit map is converted from its scan unit
//!    into the device's native unit, and
//! 2. every constrained motor is filled in, in dependency order, from the
//!    (already converted) positions of the motors it depends on.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use daq_plan_constraints::{
//!     make_one_nd_step, ConstraintSet, DeviceId, LinearConstraint, PositionCache, Step,
//!     UnitRegistry,
//! };
//!
//! let constants = ConstraintSet::new()
//!     .with("y", LinearConstraint::new("mm").with_term(2.0, "x"));
//! let per_step = make_one_nd_step(Some(constants), None, None, Arc::new(UnitRegistry::new()))?;
//!
//! let mut step = Step::from([(DeviceId::from("x"), 3.0)]);
//! let msgs = per_step(&[], &mut step, &mut PositionCache::new())?;
//! assert_eq!(step[&DeviceId::from("y")], 6.0);
//! assert!(msgs.iter().any(|m| m.command == "set"));
//! # Ok::<(), daq_plan_constraints::PlanError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};

use crate::constraint::ConstraintSet;
use crate::device::DeviceId;
use crate::error::{PlanError, PlanResult};
use crate::messages::Msg;
use crate::plans::one_nd_step;
use crate::scheduler::{evaluation_order, EvaluationOrder};
use crate::units::UnitService;

/// Target positions for one scan point, unit-stripped
pub type Step = HashMap<DeviceId, f64>;

/// Last position commanded to each motor
pub type PositionCache = HashMap<DeviceId, f64>;

/// Scan unit of each axis, in conversion order
pub type AxisUnits = IndexMap<DeviceId, String>;

/// Function run at every scan point: `(detectors, step, pos_cache) -> messages`
pub type PerStep = Arc<
    dyn Fn(&[DeviceId], &mut Step, &mut PositionCache) -> PlanResult<Vec<Msg>> + Send + Sync,
>;

/// The stock per-step primitive as a [`PerStep`]
pub fn default_per_step() -> PerStep {
    Arc::new(one_nd_step)
}

/// Unit conversion and constraint fill-in applied to each step.
///
/// Built once per scan; holds only read-only state, so one instance can be
/// shared between threads.
pub struct StepEvaluator {
    constants: ConstraintSet,
    axis_units: AxisUnits,
    order: EvaluationOrder,
    units: Arc<dyn UnitService>,
}

impl std::fmt::Debug for StepEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEvaluator")
            .field("constants", &self.constants)
            .field("axis_units", &self.axis_units)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

impl StepEvaluator {
    /// Schedule `constants` and capture the unit system.
    ///
    /// Fails with [`PlanError::CyclicDependency`] before any step runs.
    pub fn new(
        constants: ConstraintSet,
        axis_units: AxisUnits,
        units: Arc<dyn UnitService>,
    ) -> PlanResult<Self> {
        let order = evaluation_order(&constants)?;
        Ok(Self {
            constants,
            axis_units,
            order,
            units,
        })
    }

    /// Order in which constraints are evaluated
    pub fn order(&self) -> &EvaluationOrder {
        &self.order
    }

    /// Rewrite `step` in place: native units first, then constraints.
    pub fn apply(&self, step: &mut Step) -> PlanResult<()> {
        for (axis, units) in &self.axis_units {
            let raw = *step.get(axis).ok_or_else(|| {
                PlanError::Configuration(format!(
                    "axis '{axis}' has scan units '{units}' but no value in this step"
                ))
            })?;

            // Dimensionless axes are passed through as given
            let value = match self.units.resolve(axis, units) {
                Some(native) if !units.is_empty() => self.units.convert(raw, units, &native)?,
                _ => raw,
            };
            trace!(axis = %axis, raw, value, units = %units, "Converted axis to native units");
            step.insert(axis.clone(), value);
        }

        for var in self.order.iter() {
            let Some(constraint) = self.constants.get(var) else {
                continue;
            };
            let native = self.units.resolve(var, &constraint.units);
            let value = constraint.evaluate(step, native.as_deref(), self.units.as_ref())?;
            trace!(motor = %var, value, units = ?native, "Evaluated constraint");
            step.insert(var.clone(), value);
        }

        Ok(())
    }
}

/// Build the per-step function for a scan.
///
/// With neither constraints nor axis units the wrapped function is returned
/// unchanged. `per_step = None` wraps [`one_nd_step`].
pub fn make_one_nd_step(
    constants: Option<ConstraintSet>,
    axis_units: Option<AxisUnits>,
    per_step: Option<PerStep>,
    units: Arc<dyn UnitService>,
) -> PlanResult<PerStep> {
    let per_step = per_step.unwrap_or_else(default_per_step);
    let constants = constants.unwrap_or_default();
    let axis_units = axis_units.unwrap_or_default();

    if constants.is_empty() && axis_units.is_empty() {
        return Ok(per_step);
    }

    let evaluator = StepEvaluator::new(constants, axis_units, units)?;
    debug!(evaluator = ?evaluator, "Built step evaluator");

    Ok(Arc::new(
        move |detectors: &[DeviceId],
              step: &mut Step,
              pos_cache: &mut PositionCache|
              -> PlanResult<Vec<Msg>> {
            evaluator.apply(step)?;
            per_step(detectors, step, pos_cache)
        },
    ))
}

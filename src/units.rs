//! Physical units for scan axes and derived motors.
//!
//! The step evaluator never touches a global registry. It receives a
//! [`UnitService`] (anything that can both resolve a device's native unit and
//! convert magnitudes) and asks it two questions:
//!
//! - [`UnitResolver::resolve`]: given a device and the unit a value is
//!   expressed in, which unit does the device natively take?
//! - [`UnitConverter::convert`]: turn a magnitude from one unit into another.
//!
//! [`UnitRegistry`] is the stock implementation. Units are affine maps onto a
//! base unit per dimension (`base = value * scale + offset`), which covers the
//! linear motor units (lengths, angles, delays) and offset scales such as
//! Celsius.
//!
//! # Example
//!
//! ```rust
//! use daq_plan_constraints::units::{UnitConverter, UnitRegistry, UnitResolver};
//! use daq_plan_constraints::DeviceId;
//!
//! let registry = UnitRegistry::new().with_native_units("stage_x", "mm");
//! let native = registry.resolve(&DeviceId::from("stage_x"), "um");
//! assert_eq!(native.as_deref(), Some("mm"));
//! let mm = registry.convert(1500.0, "um", "mm").unwrap();
//! assert!((mm - 1.5).abs() < 1e-12);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::device::DeviceId;
use crate::error::{PlanError, PlanResult};

/// Looks up the canonical unit a device expects for values given in `units`.
pub trait UnitResolver {
    /// Return the device's native unit, or `None` to leave values in `units`.
    ///
    /// Implementations should not vet `units` here: an incompatible or
    /// unknown unit must surface as an error from [`UnitConverter::convert`].
    fn resolve(&self, device: &DeviceId, units: &str) -> Option<String>;
}

/// Converts magnitudes between units.
pub trait UnitConverter {
    /// Convert `value` from `from` to `to`.
    ///
    /// Fails with [`PlanError::UnitConversion`] for unknown units or
    /// incompatible dimensions.
    fn convert(&self, value: f64, from: &str, to: &str) -> PlanResult<f64>;
}

/// Everything the step evaluator needs from a unit system.
pub trait UnitService: UnitResolver + UnitConverter + Send + Sync {}

impl<T> UnitService for T where T: UnitResolver + UnitConverter + Send + Sync {}

/// Definition of a single unit relative to its dimension's base unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDefinition {
    /// Physical dimension (e.g. "length", "angle")
    pub dimension: String,
    /// Base units per one of this unit
    pub scale: f64,
    /// Base units added after scaling (non-zero only for affine scales)
    #[serde(default)]
    pub offset: f64,
}

impl UnitDefinition {
    /// Linear unit with no offset
    pub fn linear(dimension: impl Into<String>, scale: f64) -> Self {
        Self {
            dimension: dimension.into(),
            scale,
            offset: 0.0,
        }
    }

    /// Affine unit (scale then offset)
    pub fn affine(dimension: impl Into<String>, scale: f64, offset: f64) -> Self {
        Self {
            dimension: dimension.into(),
            scale,
            offset,
        }
    }

    fn to_base(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    fn from_base(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}

/// Unit table plus per-device native units.
#[derive(Debug, Clone)]
pub struct UnitRegistry {
    units: HashMap<String, UnitDefinition>,
    native: HashMap<DeviceId, String>,
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitRegistry {
    /// Registry pre-populated with length, time, angle, temperature and
    /// dimensionless units.
    pub fn new() -> Self {
        let mut registry = Self::empty();

        for (names, scale) in [
            (&["m", "meter", "metre"][..], 1.0),
            (&["mm", "millimeter", "millimetre"][..], 1e-3),
            (&["um", "µm", "micron", "micrometer", "micrometre"][..], 1e-6),
            (&["nm", "nanometer", "nanometre"][..], 1e-9),
            (&["pm", "picometer", "picometre"][..], 1e-12),
            (&["in", "inch"][..], 0.0254),
        ] {
            registry.define_all(names, UnitDefinition::linear("length", scale));
        }

        for (names, scale) in [
            (&["s", "second"][..], 1.0),
            (&["ms", "millisecond"][..], 1e-3),
            (&["us", "µs", "microsecond"][..], 1e-6),
            (&["ns", "nanosecond"][..], 1e-9),
            (&["ps", "picosecond"][..], 1e-12),
            (&["fs", "femtosecond"][..], 1e-15),
        ] {
            registry.define_all(names, UnitDefinition::linear("time", scale));
        }

        for (names, scale) in [
            (&["rad", "radian"][..], 1.0),
            (&["mrad", "milliradian"][..], 1e-3),
            (&["deg", "degree", "degrees"][..], std::f64::consts::PI / 180.0),
        ] {
            registry.define_all(names, UnitDefinition::linear("angle", scale));
        }

        registry.define_all(&["K", "kelvin"], UnitDefinition::linear("temperature", 1.0));
        registry.define_all(
            &["degC", "celsius", "degree_Celsius"],
            UnitDefinition::affine("temperature", 1.0, 273.15),
        );

        registry.define_all(&["", "dimensionless"], UnitDefinition::linear("dimensionless", 1.0));

        registry
    }

    /// Registry without any unit definitions
    pub fn empty() -> Self {
        Self {
            units: HashMap::new(),
            native: HashMap::new(),
        }
    }

    /// Add or replace a unit definition
    pub fn define(&mut self, name: impl Into<String>, definition: UnitDefinition) {
        self.units.insert(name.into(), definition);
    }

    fn define_all(&mut self, names: &[&str], definition: UnitDefinition) {
        for name in names {
            self.define(*name, definition.clone());
        }
    }

    /// Register the native unit of a device
    pub fn set_native_units(&mut self, device: impl Into<DeviceId>, units: impl Into<String>) {
        self.native.insert(device.into(), units.into());
    }

    /// Builder form of [`set_native_units`](Self::set_native_units)
    pub fn with_native_units(
        mut self,
        device: impl Into<DeviceId>,
        units: impl Into<String>,
    ) -> Self {
        self.set_native_units(device, units);
        self
    }

    /// Look up a unit definition
    pub fn get(&self, units: &str) -> Option<&UnitDefinition> {
        self.units.get(units)
    }

    /// Whether a unit name is known
    pub fn is_known(&self, units: &str) -> bool {
        self.units.contains_key(units)
    }

    /// Native unit registered for a device, if any
    pub fn native_units(&self, device: &DeviceId) -> Option<&str> {
        self.native.get(device).map(String::as_str)
    }
}

impl UnitResolver for UnitRegistry {
    fn resolve(&self, device: &DeviceId, _units: &str) -> Option<String> {
        // Compatibility is checked by `convert`
        self.native.get(device).cloned()
    }
}

impl UnitConverter for UnitRegistry {
    fn convert(&self, value: f64, from: &str, to: &str) -> PlanResult<f64> {
        if from == to {
            return Ok(value);
        }

        let source = self
            .units
            .get(from)
            .ok_or_else(|| PlanError::unit_conversion(from, to, format!("unknown unit '{from}'")))?;
        let target = self
            .units
            .get(to)
            .ok_or_else(|| PlanError::unit_conversion(from, to, format!("unknown unit '{to}'")))?;

        if source.dimension != target.dimension {
            return Err(PlanError::unit_conversion(
                from,
                to,
                format!(
                    "dimension '{}' is not compatible with '{}'",
                    source.dimension, target.dimension
                ),
            ));
        }

        let converted = target.from_base(source.to_base(value));
        trace!(value, from, to, converted, "Converted quantity");
        Ok(converted)
    }
}

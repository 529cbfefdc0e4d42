//! Scan configuration using Figment
//!
//! Constraint sets, axis units and device native units are usually written
//! down once per beamline/table and reused for many scans. This module loads
//! them from:
//! 1. a TOML file (base configuration)
//! 2. environment variables (prefixed with `DAQ_PLAN_`, nested keys split on `__`)
//!
//! # Example
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [units.native]
//! stage_x = "mm"
//! delay = "ps"
//!
//! [units.definitions.step]
//! dimension = "length"
//! scale = 1.25e-6
//!
//! [axis_units]
//! stage_x = "um"
//!
//! [constants.stage_y]
//! units = "mm"
//! terms = [{ coeff = 0.5, var = "stage_x" }]
//! ```
//!
//! ```no_run
//! use daq_plan_constraints::config::PlanConfig;
//!
//! let config = PlanConfig::load_from("config/scan.toml")?;
//! config.validate()?;
//! let per_step = config.build_step(None)?;
//! # Ok::<(), daq_plan_constraints::PlanError>(())
//! ```

use std::path::Path;
use std::sync::Arc;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::constraint::ConstraintSet;
use crate::device::DeviceId;
use crate::error::{PlanError, PlanResult};
use crate::scheduler::evaluation_order;
use crate::step::{make_one_nd_step, AxisUnits, PerStep};
use crate::units::{UnitConverter, UnitDefinition, UnitRegistry};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "DAQ_PLAN_";

/// Top-level scan configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSection,
    /// Unit table extensions and device native units
    #[serde(default)]
    pub units: UnitsConfig,
    /// Scan unit of each axis
    #[serde(default)]
    pub axis_units: AxisUnits,
    /// Derived motors
    #[serde(default)]
    pub constants: ConstraintSet,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Unit configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitsConfig {
    /// Native unit of each device
    #[serde(default)]
    pub native: IndexMap<DeviceId, String>,
    /// Additional unit definitions
    #[serde(default)]
    pub definitions: IndexMap<String, UnitDefinition>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl PlanConfig {
    /// Load configuration from a TOML file and `DAQ_PLAN_` environment variables
    ///
    /// Example override: `DAQ_PLAN_LOGGING__LEVEL=debug`
    pub fn load_from<P: AsRef<Path>>(path: P) -> PlanResult<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?)
    }

    /// Parse configuration from an inline TOML document
    pub fn from_toml_str(toml: &str) -> PlanResult<Self> {
        Ok(Figment::from(Toml::string(toml)).extract()?)
    }

    /// Serialize back to TOML, e.g. to store the configuration next to scan data
    pub fn to_toml_string(&self) -> PlanResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| PlanError::InvalidConfig(format!("Failed to serialize config: {e}")))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PlanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(PlanError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(PlanError::InvalidConfig(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        for (name, definition) in &self.units.definitions {
            if !definition.scale.is_finite() || definition.scale == 0.0 {
                return Err(PlanError::InvalidConfig(format!(
                    "Unit '{name}' must have a finite, non-zero scale"
                )));
            }
            if !definition.offset.is_finite() {
                return Err(PlanError::InvalidConfig(format!(
                    "Unit '{name}' must have a finite offset"
                )));
            }
        }

        let registry = self.unit_registry();
        let known = |units: &str, context: String| {
            if registry.is_known(units) {
                Ok(())
            } else {
                Err(PlanError::InvalidConfig(format!(
                    "Unknown unit '{units}' for {context}"
                )))
            }
        };

        for (device, units) in &self.units.native {
            known(units, format!("native units of '{device}'"))?;
        }
        for (axis, units) in &self.axis_units {
            known(units, format!("scan axis '{axis}'"))?;
            if let Some(native) = registry.native_units(axis) {
                if !units.is_empty() {
                    registry.convert(0.0, units, native)?;
                }
            }
        }
        for (target, constraint) in self.constants.iter() {
            known(&constraint.units, format!("constraint '{target}'"))?;

            if constraint.terms.is_empty() {
                return Err(PlanError::InvalidConfig(format!(
                    "Constraint '{target}' has no terms"
                )));
            }
            if let Some(term) = constraint.terms.iter().find(|t| !t.coeff.is_finite()) {
                return Err(PlanError::InvalidConfig(format!(
                    "Constraint '{target}' has a non-finite coefficient on '{}'",
                    term.var
                )));
            }
        }

        evaluation_order(&self.constants)?;
        Ok(())
    }

    /// Unit registry with the built-in units plus this configuration's
    /// definitions and native units
    pub fn unit_registry(&self) -> UnitRegistry {
        let mut registry = UnitRegistry::new();
        for (name, definition) in &self.units.definitions {
            registry.define(name.clone(), definition.clone());
        }
        for (device, units) in &self.units.native {
            registry.set_native_units(device.clone(), units.clone());
        }
        registry
    }

    /// Build the per-step function described by this configuration
    pub fn build_step(&self, per_step: Option<PerStep>) -> PlanResult<PerStep> {
        make_one_nd_step(
            Some(self.constants.clone()),
            Some(self.axis_units.clone()),
            per_step,
            Arc::new(self.unit_registry()),
        )
    }
}

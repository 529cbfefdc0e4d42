//! Command messages yielded by plans.
//!
//! A plan does not talk to hardware. It yields `Msg` values that the execution
//! engine interprets one at a time, e.g.:
//!
//! ```text
//! Msg("open_run")
//! Msg("checkpoint")
//! Msg("set", stage_x, [1.5], group="set-…")
//! Msg("wait", group="set-…")
//! Msg("trigger", power_meter, group="trigger-…")
//! Msg("read", power_meter)
//! Msg("save")
//! Msg("close_run")
//! ```
//!
//! Message mutators (see [`crate::mutators`]) rewrite these in flight.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::device::DeviceId;

/// Command name for absolute moves, the only command mutators rewrite
pub const SET: &str = "set";

/// A single command for the execution engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    /// Command name (e.g. "set", "trigger", "read")
    pub command: String,
    /// Target device, if the command has one
    pub obj: Option<DeviceId>,
    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Value>,
    /// Keyword arguments, in insertion order
    #[serde(default)]
    pub kwargs: IndexMap<String, Value>,
    /// Run the message belongs to
    #[serde(default)]
    pub run: Option<String>,
}

impl Msg {
    /// Message without target or arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            obj: None,
            args: Vec::new(),
            kwargs: IndexMap::new(),
            run: None,
        }
    }

    /// Message addressed to a device
    pub fn to(command: impl Into<String>, obj: impl Into<DeviceId>) -> Self {
        Self {
            obj: Some(obj.into()),
            ..Self::new(command)
        }
    }

    /// `set` message moving `obj` to `position`
    pub fn set(obj: impl Into<DeviceId>, position: f64) -> Self {
        Self::to(SET, obj).with_arg(position)
    }

    /// Append a positional argument
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add or overwrite a keyword argument
    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Tag the message with a run identifier
    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = Some(run.into());
        self
    }

    /// Whether this is a `set` addressed to `device`
    pub fn is_set_for(&self, device: &DeviceId) -> bool {
        self.command == SET && self.obj.as_ref() == Some(device)
    }

    /// First positional argument as a number
    pub fn position(&self) -> Option<f64> {
        self.args.first().and_then(Value::as_f64)
    }
}

impl std::fmt::Display for Msg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Msg({:?}", self.command)?;
        if let Some(obj) = &self.obj {
            write!(f, ", obj={obj}")?;
        }
        if !self.args.is_empty() {
            write!(f, ", args={}", Value::from(self.args.clone()))?;
        }
        for (key, value) in &self.kwargs {
            write!(f, ", {key}={value}")?;
        }
        if let Some(run) = &self.run {
            write!(f, ", run={run:?}")?;
        }
        write!(f, ")")
    }
}

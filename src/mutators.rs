//! Message-stream rewriting.
//!
//! [`MsgMutator`] sits between a plan and the execution engine: every message
//! the inner plan yields passes through a mutation function, and whatever that
//! function returns is handed on instead. Two policies are built on it:
//!
//! - **position-exception injection** adds an `exceptions` keyword to every
//!   `set` addressed to one device, so the device may ignore the listed
//!   interlocks while moving;
//! - **relative-offset injection** adds a live offset to the target position of
//!   every `set` addressed to a device in an offset table.
//!
//! Both are available as plain functions and as [`PlanExt`] methods:
//!
//! ```rust
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use daq_plan_constraints::mutators::{OffsetFn, PlanExt};
//! use daq_plan_constraints::plans::{collect_msgs, ListPlan};
//! use daq_plan_constraints::{DeviceId, Msg};
//!
//! let offset: OffsetFn = Arc::new(|| 1.5);
//! let mut plan = ListPlan::new(vec![Msg::set("motor1", 10.0)])
//!     .set_relative_to_func(HashMap::from([(DeviceId::from("motor1"), offset)]))
//!     .inject_set_position_except("motor1", ["limit_switch"]);
//!
//! let msgs = collect_msgs(&mut plan)?;
//! assert_eq!(msgs[0].position(), Some(11.5));
//! assert!(msgs[0].kwargs.contains_key("exceptions"));
//! # Ok::<(), daq_plan_constraints::PlanError>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::device::DeviceId;
use crate::error::{PlanError, PlanResult};
use crate::messages::{Msg, SET};
use crate::plans::MsgPlan;

/// Keyword carrying the exception labels on rewritten `set` messages
pub const EXCEPTIONS_KWARG: &str = "exceptions";

/// Zero-argument function returning a device's current offset
pub type OffsetFn = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Offset provider per device
pub type RelativeOffsets = HashMap<DeviceId, OffsetFn>;

/// Plan wrapper passing every yielded message through `mutate`
pub struct MsgMutator<P, F> {
    plan: P,
    mutate: F,
}

impl<P, F> MsgMutator<P, F>
where
    P: MsgPlan,
    F: FnMut(Msg) -> PlanResult<Msg> + Send,
{
    /// Wrap `plan`
    pub fn new(plan: P, mutate: F) -> Self {
        Self { plan, mutate }
    }

    /// Unwrap the inner plan
    pub fn into_inner(self) -> P {
        self.plan
    }
}

impl<P, F> MsgPlan for MsgMutator<P, F>
where
    P: MsgPlan,
    F: FnMut(Msg) -> PlanResult<Msg> + Send,
{
    fn plan_type(&self) -> &str {
        self.plan.plan_type()
    }

    fn plan_name(&self) -> &str {
        self.plan.plan_name()
    }

    fn num_points(&self) -> usize {
        self.plan.num_points()
    }

    fn next_msg(&mut self) -> Option<PlanResult<Msg>> {
        let msg = self.plan.next_msg()?;
        Some(msg.and_then(&mut self.mutate))
    }

    fn reset(&mut self) {
        self.plan.reset()
    }
}

/// Wrap `plan` with an arbitrary message mutation
pub fn msg_mutator<P, F>(plan: P, mutate: F) -> MsgMutator<P, F>
where
    P: MsgPlan,
    F: FnMut(Msg) -> PlanResult<Msg> + Send,
{
    MsgMutator::new(plan, mutate)
}

/// Mutation adding `exceptions` to every `set` addressed to `device`.
pub fn set_position_except(
    device: DeviceId,
    exceptions: Vec<String>,
) -> impl Fn(Msg) -> PlanResult<Msg> + Send + Sync {
    let labels = Value::from(exceptions);
    move |mut msg: Msg| -> PlanResult<Msg> {
        if msg.is_set_for(&device) {
            debug!(device = %device, exceptions = %labels, "Injecting position exceptions");
            msg.kwargs.insert(EXCEPTIONS_KWARG.to_string(), labels.clone());
        }
        Ok(msg)
    }
}

/// Mutation shifting every `set` for a device in `offsets` by its current offset.
///
/// The offset function is called once per matching message. A matching `set`
/// without a numeric first argument is a configuration error.
pub fn set_relative(offsets: RelativeOffsets) -> impl Fn(Msg) -> PlanResult<Msg> + Send + Sync {
    move |mut msg: Msg| -> PlanResult<Msg> {
        if msg.command != SET {
            return Ok(msg);
        }
        let Some(offset_fn) = msg.obj.as_ref().and_then(|obj| offsets.get(obj)) else {
            return Ok(msg);
        };

        let position = msg.position().ok_or_else(|| {
            PlanError::Configuration(format!(
                "cannot apply relative offset to {msg}: first argument is not a number"
            ))
        })?;
        let offset = offset_fn();
        let shifted = position + offset;
        debug!(msg = %msg, offset, shifted, "Applying relative offset");

        msg.args[0] = Value::from(shifted);
        Ok(msg)
    }
}

/// Wrap `plan` so `set` messages for `device` carry `exceptions`
pub fn inject_set_position_except<P, I, S>(
    plan: P,
    device: impl Into<DeviceId>,
    exceptions: I,
) -> MsgMutator<P, impl Fn(Msg) -> PlanResult<Msg> + Send + Sync>
where
    P: MsgPlan,
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let exceptions = exceptions.into_iter().map(Into::into).collect();
    MsgMutator::new(plan, set_position_except(device.into(), exceptions))
}

/// Wrap `plan` so `set` messages are offset by the functions in `offsets`
pub fn set_relative_to_func<P>(
    plan: P,
    offsets: RelativeOffsets,
) -> MsgMutator<P, impl Fn(Msg) -> PlanResult<Msg> + Send + Sync>
where
    P: MsgPlan,
{
    MsgMutator::new(plan, set_relative(offsets))
}

/// Decorator-style access to the mutators
pub trait PlanExt: MsgPlan + Sized {
    /// See [`msg_mutator`]
    fn msg_mutator<F>(self, mutate: F) -> MsgMutator<Self, F>
    where
        F: FnMut(Msg) -> PlanResult<Msg> + Send,
    {
        MsgMutator::new(self, mutate)
    }

    /// See [`inject_set_position_except`]
    fn inject_set_position_except<I, S>(
        self,
        device: impl Into<DeviceId>,
        exceptions: I,
    ) -> MsgMutator<Self, impl Fn(Msg) -> PlanResult<Msg> + Send + Sync>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        inject_set_position_except(self, device, exceptions)
    }

    /// See [`set_relative_to_func`]
    fn set_relative_to_func(
        self,
        offsets: RelativeOffsets,
    ) -> MsgMutator<Self, impl Fn(Msg) -> PlanResult<Msg> + Send + Sync> {
        set_relative_to_func(self, offsets)
    }
}

impl<P: MsgPlan> PlanExt for P {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{collect_msgs, ListPlan};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn motor1() -> DeviceId {
        DeviceId::from("motor1")
    }

    #[test]
    fn test_position_except_rewrites_matching_set() {
        let mutate = set_position_except(motor1(), vec!["limit_switch".to_string()]);

        let out = mutate(Msg::set("motor1", 10.0)).unwrap();
        let expected = Msg::set("motor1", 10.0).with_kwarg("exceptions", vec!["limit_switch"]);
        assert_eq!(out, expected);
        assert_eq!(out.run, None);
    }

    #[test]
    fn test_position_except_preserves_run_and_kwargs() {
        let mutate = set_position_except(motor1(), vec!["a".to_string(), "b".to_string()]);
        let msg = Msg::set("motor1", 1.0)
            .with_arg("extra")
            .with_kwarg("group", "g")
            .with_kwarg("exceptions", "old")
            .with_run("run-1");

        let out = mutate(msg).unwrap();
        assert_eq!(out.args, vec![Value::from(1.0), Value::from("extra")]);
        assert_eq!(out.run.as_deref(), Some("run-1"));
        let keys: Vec<&str> = out.kwargs.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["group", "exceptions"]);
        assert_eq!(out.kwargs["exceptions"], Value::from(vec!["a", "b"]));
    }

    #[test]
    fn test_position_except_passes_other_messages() {
        let mutate = set_position_except(motor1(), vec!["limit_switch".to_string()]);

        let other_target = Msg::set("motor2", 10.0);
        assert_eq!(mutate(other_target.clone()).unwrap(), other_target);

        let other_command = Msg::to("read", "motor1");
        assert_eq!(mutate(other_command.clone()).unwrap(), other_command);
    }

    #[test]
    fn test_relative_offset_applied() {
        let offset: OffsetFn = Arc::new(|| 1.5);
        let mutate = set_relative(RelativeOffsets::from([(motor1(), offset)]));

        let out = mutate(Msg::set("motor1", 10.0)).unwrap();
        assert_eq!(out, Msg::set("motor1", 11.5));
    }

    #[test]
    fn test_relative_offset_evaluated_per_message() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let offset: OffsetFn = Arc::new(move || counter.fetch_add(1, Ordering::SeqCst) as f64);
        let mutate = set_relative(RelativeOffsets::from([(motor1(), offset)]));

        assert_eq!(mutate(Msg::set("motor1", 0.0)).unwrap().position(), Some(0.0));
        assert_eq!(mutate(Msg::set("motor1", 0.0)).unwrap().position(), Some(1.0));
        // Unrelated messages do not consult the table
        mutate(Msg::set("motor2", 0.0)).unwrap();
        mutate(Msg::to("read", "motor1")).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_relative_offset_requires_numeric_position() {
        let offset: OffsetFn = Arc::new(|| 1.0);
        let mutate = set_relative(RelativeOffsets::from([(motor1(), offset)]));

        let err = mutate(Msg::to("set", "motor1").with_arg("home")).unwrap_err();
        assert!(matches!(err, PlanError::Configuration(_)));
        assert!(mutate(Msg::to("set", "motor1")).is_err());
    }

    #[test]
    fn test_mutator_wraps_plan() {
        let plan = ListPlan::new(vec![
            Msg::new("open_run"),
            Msg::set("motor1", 2.0),
            Msg::set("motor2", 3.0),
            Msg::new("close_run"),
        ]);
        let mut wrapped = plan.inject_set_position_except("motor1", ["limit_switch"]);
        assert_eq!(wrapped.plan_type(), "list");

        let msgs = collect_msgs(&mut wrapped).unwrap();
        assert_eq!(msgs.len(), 4);
        assert!(msgs[1].kwargs.contains_key(EXCEPTIONS_KWARG));
        assert!(msgs[2].kwargs.is_empty());

        wrapped.reset();
        assert_eq!(collect_msgs(&mut wrapped).unwrap(), msgs);
    }

    #[test]
    fn test_into_inner_returns_unmutated_plan() {
        let plan = ListPlan::new(vec![Msg::set("motor1", 2.0)]);
        let wrapped = plan.inject_set_position_except("motor1", ["limit_switch"]);

        let mut inner = wrapped.into_inner();
        assert_eq!(collect_msgs(&mut inner).unwrap(), vec![Msg::set("motor1", 2.0)]);
    }

    #[test]
    fn test_generic_msg_mutator_forwards_errors() {
        let mut seen = 0;
        let mut plan = ListPlan::new(vec![Msg::new("a"), Msg::new("b")]).msg_mutator(move |msg: Msg| {
            seen += 1;
            if seen == 2 {
                Err(PlanError::Configuration(format!("rejected {}", msg.command)))
            } else {
                Ok(msg)
            }
        });

        assert_eq!(plan.next_msg().unwrap().unwrap().command, "a");
        assert!(matches!(plan.next_msg(), Some(Err(PlanError::Configuration(_)))));
    }
}

//! Message-yielding plans.
//!
//! Plans are pull-driven: the execution engine calls
//! [`MsgPlan::next_msg`] whenever it is ready for the next command, and may
//! wait arbitrarily long (e.g. for motion to finish) between calls. Nothing
//! here blocks or performs I/O; a plan can be dropped at any point.
//!
//! - [`ScanNd`] walks an ordered list of steps and runs a [`PerStep`] function
//!   at each one, yielding `open_run`, the per-step messages, then `close_run`.
//! - [`one_nd_step`] is the stock per-step function: move what changed, then
//!   trigger and read the detectors.
//! - [`ListPlan`] replays a fixed list of messages.
//!
//! # Example
//!
//! ```rust
//! use daq_plan_constraints::plans::{collect_msgs, ScanNd};
//! use daq_plan_constraints::{default_per_step, DeviceId, Step};
//!
//! let steps: Vec<Step> = [0.0, 1.0]
//!     .into_iter()
//!     .map(|x| Step::from([(DeviceId::from("stage_x"), x)]))
//!     .collect();
//! let mut plan = ScanNd::new(vec![DeviceId::from("power_meter")], steps, default_per_step());
//!
//! let msgs = collect_msgs(&mut plan)?;
//! assert_eq!(msgs.first().map(|m| m.command.as_str()), Some("open_run"));
//! assert_eq!(msgs.last().map(|m| m.command.as_str()), Some("close_run"));
//! # Ok::<(), daq_plan_constraints::PlanError>(())
//! ```

use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::device::DeviceId;
use crate::error::PlanResult;
use crate::messages::Msg;
use crate::step::{PerStep, PositionCache, Step};

/// A plan yields command messages for the execution engine, one at a time
pub trait MsgPlan: Send {
    /// Plan type identifier (e.g., "scan_nd", "list")
    fn plan_type(&self) -> &str;

    /// Human-readable plan name
    fn plan_name(&self) -> &str;

    /// Total number of points, when known
    fn num_points(&self) -> usize;

    /// Next message, `None` once the plan is exhausted.
    ///
    /// An `Err` ends the plan: callers must not expect further messages.
    fn next_msg(&mut self) -> Option<PlanResult<Msg>>;

    /// Reset the plan to start from the beginning
    fn reset(&mut self);
}

impl<P: MsgPlan + ?Sized> MsgPlan for Box<P> {
    fn plan_type(&self) -> &str {
        (**self).plan_type()
    }

    fn plan_name(&self) -> &str {
        (**self).plan_name()
    }

    fn num_points(&self) -> usize {
        (**self).num_points()
    }

    fn next_msg(&mut self) -> Option<PlanResult<Msg>> {
        (**self).next_msg()
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// Drain a plan, stopping at the first error
pub fn collect_msgs<P: MsgPlan + ?Sized>(plan: &mut P) -> PlanResult<Vec<Msg>> {
    let mut msgs = Vec::new();
    while let Some(msg) = plan.next_msg() {
        msgs.push(msg?);
    }
    Ok(msgs)
}

fn group_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Move every motor whose target differs from the cached position.
///
/// Emits `checkpoint`, one grouped `set` per moved motor (in name order) and a
/// `wait` on the group if anything moved.
pub fn move_per_step(step: &Step, pos_cache: &mut PositionCache) -> Vec<Msg> {
    let mut msgs = vec![Msg::new("checkpoint")];
    let group = group_name("set");

    let mut motors: Vec<(&DeviceId, f64)> = step.iter().map(|(m, p)| (m, *p)).collect();
    motors.sort_by(|a, b| a.0.cmp(b.0));

    let mut moved = false;
    for (motor, position) in motors {
        if pos_cache.get(motor) == Some(&position) {
            continue;
        }
        msgs.push(Msg::set(motor.clone(), position).with_kwarg("group", group.as_str()));
        pos_cache.insert(motor.clone(), position);
        moved = true;
    }

    if moved {
        msgs.push(Msg::new("wait").with_kwarg("group", group));
    }
    msgs
}

/// Trigger every detector, then bundle a reading of `detectors` and `extra`
/// into one `primary` event.
pub fn trigger_and_read(detectors: &[DeviceId], extra: &[DeviceId]) -> Vec<Msg> {
    let mut msgs = Vec::new();

    if !detectors.is_empty() {
        let group = group_name("trigger");
        msgs.extend(
            detectors
                .iter()
                .map(|det| Msg::to("trigger", det.clone()).with_kwarg("group", group.as_str())),
        );
        msgs.push(Msg::new("wait").with_kwarg("group", group));
    }

    msgs.push(Msg::new("create").with_kwarg("name", "primary"));
    msgs.extend(
        detectors
            .iter()
            .chain(extra.iter())
            .map(|obj| Msg::to("read", obj.clone())),
    );
    msgs.push(Msg::new("save"));
    msgs
}

/// Stock per-step function: move to `step`, then trigger and read.
pub fn one_nd_step(
    detectors: &[DeviceId],
    step: &mut Step,
    pos_cache: &mut PositionCache,
) -> PlanResult<Vec<Msg>> {
    let mut msgs = move_per_step(step, pos_cache);

    let mut motors: Vec<DeviceId> = step.keys().cloned().collect();
    motors.sort();
    msgs.extend(trigger_and_read(detectors, &motors));
    Ok(msgs)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanPhase {
    OpenRun,
    Steps,
    CloseRun,
    Done,
}

/// N-dimensional scan over an explicit list of steps
pub struct ScanNd {
    detectors: Vec<DeviceId>,
    steps: Vec<Step>,
    per_step: PerStep,

    // Execution state
    pos_cache: PositionCache,
    current_point: usize,
    pending: VecDeque<Msg>,
    phase: ScanPhase,
}

impl ScanNd {
    /// Create a scan visiting `steps` in order
    pub fn new(detectors: Vec<DeviceId>, steps: Vec<Step>, per_step: PerStep) -> Self {
        Self {
            detectors,
            steps,
            per_step,
            pos_cache: PositionCache::new(),
            current_point: 0,
            pending: VecDeque::new(),
            phase: ScanPhase::OpenRun,
        }
    }

    /// Motors touched by any step, sorted
    pub fn motors(&self) -> Vec<DeviceId> {
        let mut motors: Vec<DeviceId> = self
            .steps
            .iter()
            .flat_map(|step| step.keys().cloned())
            .collect();
        motors.sort();
        motors.dedup();
        motors
    }

    fn open_run(&self) -> Msg {
        let motors: Vec<Value> = self
            .motors()
            .iter()
            .map(|m| Value::from(m.as_str()))
            .collect();
        let detectors: Vec<Value> = self
            .detectors
            .iter()
            .map(|d| Value::from(d.as_str()))
            .collect();

        Msg::new("open_run")
            .with_kwarg("plan_name", self.plan_type())
            .with_kwarg("num_points", self.steps.len())
            .with_kwarg("motors", motors)
            .with_kwarg("detectors", detectors)
    }
}

impl MsgPlan for ScanNd {
    fn plan_type(&self) -> &str {
        "scan_nd"
    }

    fn plan_name(&self) -> &str {
        "N-Dimensional Scan"
    }

    fn num_points(&self) -> usize {
        self.steps.len()
    }

    fn next_msg(&mut self) -> Option<PlanResult<Msg>> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(Ok(msg));
            }

            match self.phase {
                ScanPhase::OpenRun => {
                    self.phase = ScanPhase::Steps;
                    return Some(Ok(self.open_run()));
                }
                ScanPhase::Steps => {
                    let Some(template) = self.steps.get(self.current_point) else {
                        self.phase = ScanPhase::CloseRun;
                        continue;
                    };
                    // Each point gets a fresh step the per-step function may rewrite
                    let mut step = template.clone();
                    self.current_point += 1;

                    match (self.per_step)(&self.detectors, &mut step, &mut self.pos_cache) {
                        Ok(msgs) => self.pending.extend(msgs),
                        Err(err) => {
                            debug!(point = self.current_point - 1, error = %err, "Step failed, ending scan");
                            self.phase = ScanPhase::Done;
                            return Some(Err(err));
                        }
                    }
                }
                ScanPhase::CloseRun => {
                    self.phase = ScanPhase::Done;
                    return Some(Ok(Msg::new("close_run").with_kwarg("exit_status", "success")));
                }
                ScanPhase::Done => return None,
            }
        }
    }

    fn reset(&mut self) {
        self.pos_cache.clear();
        self.current_point = 0;
        self.pending.clear();
        self.phase = ScanPhase::OpenRun;
    }
}

/// Plan that replays a fixed list of messages
#[derive(Debug, Clone, Default)]
pub struct ListPlan {
    msgs: Vec<Msg>,
    current_idx: usize,
}

impl ListPlan {
    /// Create a plan yielding `msgs` in order
    pub fn new(msgs: Vec<Msg>) -> Self {
        Self {
            msgs,
            current_idx: 0,
        }
    }

    /// Append a message
    pub fn then(mut self, msg: Msg) -> Self {
        self.msgs.push(msg);
        self
    }
}

impl MsgPlan for ListPlan {
    fn plan_type(&self) -> &str {
        "list"
    }

    fn plan_name(&self) -> &str {
        "Message List"
    }

    fn num_points(&self) -> usize {
        0
    }

    fn next_msg(&mut self) -> Option<PlanResult<Msg>> {
        let msg = self.msgs.get(self.current_idx)?.clone();
        self.current_idx += 1;
        Some(Ok(msg))
    }

    fn reset(&mut self) {
        self.current_idx = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlanError;
    use std::sync::Arc;

    fn commands(msgs: &[Msg]) -> Vec<&str> {
        msgs.iter().map(|m| m.command.as_str()).collect()
    }

    fn line(motor: &str, points: &[f64]) -> Vec<Step> {
        points
            .iter()
            .map(|p| Step::from([(DeviceId::from(motor), *p)]))
            .collect()
    }

    #[test]
    fn test_one_nd_step_commands() {
        let mut step = Step::from([(DeviceId::from("x"), 1.0)]);
        let mut cache = PositionCache::new();
        let msgs = one_nd_step(&[DeviceId::from("det")], &mut step, &mut cache).unwrap();

        assert_eq!(
            commands(&msgs),
            vec!["checkpoint", "set", "wait", "trigger", "wait", "create", "read", "read", "save"]
        );
        assert_eq!(cache[&DeviceId::from("x")], 1.0);
        // Moves and their wait share a group
        assert_eq!(msgs[1].kwargs["group"], msgs[2].kwargs["group"]);
    }

    #[test]
    fn test_move_per_step_skips_unchanged() {
        let mut cache = PositionCache::from([(DeviceId::from("x"), 1.0)]);
        let step = Step::from([(DeviceId::from("x"), 1.0), (DeviceId::from("y"), 2.0)]);

        let msgs = move_per_step(&step, &mut cache);
        assert_eq!(commands(&msgs), vec!["checkpoint", "set", "wait"]);
        assert_eq!(msgs[1].obj, Some(DeviceId::from("y")));

        // Nothing left to move
        let msgs = move_per_step(&step, &mut cache);
        assert_eq!(commands(&msgs), vec!["checkpoint"]);
    }

    #[test]
    fn test_scan_nd_events() {
        let mut plan = ScanNd::new(
            vec![DeviceId::from("det")],
            line("x", &[0.0, 1.0, 2.0]),
            Arc::new(one_nd_step),
        );
        assert_eq!(plan.num_points(), 3);

        let msgs = collect_msgs(&mut plan).unwrap();
        assert_eq!(msgs.first().unwrap().command, "open_run");
        assert_eq!(msgs.last().unwrap().command, "close_run");
        assert_eq!(msgs.iter().filter(|m| m.command == "save").count(), 3);

        let positions: Vec<f64> = msgs
            .iter()
            .filter(|m| m.command == "set")
            .filter_map(Msg::position)
            .collect();
        assert_eq!(positions, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_scan_nd_reset() {
        let mut plan = ScanNd::new(Vec::new(), line("x", &[5.0]), Arc::new(one_nd_step));
        let first = collect_msgs(&mut plan).unwrap();
        assert!(plan.next_msg().is_none());

        plan.reset();
        let second = collect_msgs(&mut plan).unwrap();
        assert_eq!(commands(&first), commands(&second));
    }

    #[test]
    fn test_scan_nd_stops_after_step_error() {
        let failing: PerStep = Arc::new(
            |_: &[DeviceId], _: &mut Step, _: &mut PositionCache| -> PlanResult<Vec<Msg>> {
                Err(PlanError::Configuration("boom".into()))
            },
        );
        let mut plan = ScanNd::new(Vec::new(), line("x", &[0.0, 1.0]), failing);

        assert_eq!(plan.next_msg().unwrap().unwrap().command, "open_run");
        assert!(matches!(plan.next_msg(), Some(Err(PlanError::Configuration(_)))));
        assert!(plan.next_msg().is_none());
    }

    #[test]
    fn test_list_plan() {
        let mut plan = ListPlan::new(vec![Msg::set("m", 1.0)]).then(Msg::new("wait"));
        let msgs = collect_msgs(&mut plan).unwrap();
        assert_eq!(commands(&msgs), vec!["set", "wait"]);

        plan.reset();
        assert_eq!(collect_msgs(&mut plan).unwrap(), msgs);
    }
}

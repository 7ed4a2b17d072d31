//! The actuator (§4.5): translates a hit `TaskData`'s `Action` into
//! controller calls, resolving `Target`s against the just-matched box and
//! the run's memory of prior matches.
//!
//! Grounded directly on `original_source/MaaFramework/Task/Actuator.cpp`'s
//! algorithm (freeze-wait, delay, dispatch-by-kind, freeze-wait, delay) and
//! its `raw + offset` rect arithmetic (`crate::common::Rect::offset_by`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::common::Rect;
use crate::context::SyncContext;
use crate::controller::{interruptible_sleep, Controller};
use crate::error::{Error, Result};
use crate::pipeline::{Action, TaskData};
use crate::vision::RecognitionResult;

/// Looks up and invokes a registered custom action by name, owning whatever
/// in-flight/pending-unregister bookkeeping the engine needs around the call
/// (§9 decision: `stop()` must not race a concurrent `run()`). Implemented by
/// [`crate::tasker::Tasker`]; kept as a trait so the actuator doesn't need to
/// know about that bookkeeping.
pub trait CustomActionInvoker {
    fn invoke(
        &self,
        name: &str,
        ctx: &SyncContext,
        task_name: &str,
        param: &Value,
        cur_box: Rect,
        cur_detail: &Value,
    ) -> Option<bool>;
}

/// What the engine should do after this node's action ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Continue,
    /// The node's action was `StopTask`, or a custom action returned
    /// `false` (§4.5 step 2/4: "return `false`" is an explicit termination
    /// signal, not a failure).
    StoppedByTask,
}

#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(node = %node.name))]
pub fn run(
    result: &RecognitionResult,
    node: &TaskData,
    controller: &Controller,
    pre_task_boxes: &HashMap<String, Rect>,
    custom_actions: &dyn CustomActionInvoker,
    sync_ctx: &SyncContext,
    exit: &AtomicBool,
) -> Result<ActionOutcome> {
    if let Some(freeze) = &node.pre_wait_freezes {
        wait_freezes(freeze, result.rect, pre_task_boxes, controller, exit)?;
    }
    interruptible_sleep(node.pre_delay, exit);
    if exit.load(Ordering::SeqCst) {
        return Err(Error::Interrupted);
    }

    let outcome = dispatch(&node.action, result, node, pre_task_boxes, controller, custom_actions, sync_ctx)?;

    if let Some(freeze) = &node.post_wait_freezes {
        wait_freezes(freeze, result.rect, pre_task_boxes, controller, exit)?;
    }
    interruptible_sleep(node.post_delay, exit);

    Ok(outcome)
}

fn wait_freezes(
    freeze: &crate::pipeline::WaitFreezes,
    self_box: Rect,
    pre_task_boxes: &HashMap<String, Rect>,
    controller: &Controller,
    exit: &AtomicBool,
) -> Result<()> {
    let rect = freeze
        .target
        .resolve(Some(self_box), pre_task_boxes, self_box)
        .unwrap_or(self_box)
        .offset_by(freeze.target_offset);
    controller.wait_freezes(rect, freeze.time, freeze.threshold, freeze.method, freeze.timeout, exit)
}

fn resolve_target(
    target: &crate::pipeline::Target,
    offset: Rect,
    self_box: Rect,
    pre_task_boxes: &HashMap<String, Rect>,
) -> Result<Rect> {
    target
        .resolve(Some(self_box), pre_task_boxes, self_box)
        .map(|rect| rect.offset_by(offset))
        .ok_or_else(|| Error::InvalidArgument(format!("target {target:?} did not resolve to a rect")))
}

fn jittered_point(rect: Rect) -> (i32, i32) {
    if rect.is_empty() {
        return rect.center();
    }
    let mut rng = rand::thread_rng();
    let x = rect.x + rng.gen_range(0..rect.w.max(1));
    let y = rect.y + rng.gen_range(0..rect.h.max(1));
    (x, y)
}

#[allow(clippy::too_many_arguments)]
fn dispatch(
    action: &Action,
    result: &RecognitionResult,
    node: &TaskData,
    pre_task_boxes: &HashMap<String, Rect>,
    controller: &Controller,
    custom_actions: &dyn CustomActionInvoker,
    sync_ctx: &SyncContext,
) -> Result<ActionOutcome> {
    match action {
        Action::DoNothing(_) => Ok(ActionOutcome::Continue),
        Action::Click(p) => {
            let rect = resolve_target(&p.target, p.target_offset, result.rect, pre_task_boxes)?;
            let (x, y) = jittered_point(rect);
            controller.click(x, y).wait();
            Ok(ActionOutcome::Continue)
        }
        Action::Swipe(p) => {
            let begin = resolve_target(&p.begin, p.begin_offset, result.rect, pre_task_boxes)?;
            let end = resolve_target(&p.end, p.end_offset, result.rect, pre_task_boxes)?;
            let (x1, y1) = jittered_point(begin);
            let (x2, y2) = jittered_point(end);
            controller.swipe(x1, y1, x2, y2, p.duration).wait();
            Ok(ActionOutcome::Continue)
        }
        Action::Key(p) => {
            for code in &p.key {
                controller.press_key(*code).wait();
            }
            Ok(ActionOutcome::Continue)
        }
        Action::StartApp(p) => {
            controller.start_app(p.package.clone()).wait();
            Ok(ActionOutcome::Continue)
        }
        Action::StopApp(p) => {
            controller.stop_app(p.package.clone()).wait();
            Ok(ActionOutcome::Continue)
        }
        Action::StopTask(_) => Ok(ActionOutcome::StoppedByTask),
        Action::Custom(p) => {
            let Some(ok) = custom_actions.invoke(
                &p.custom_action,
                sync_ctx,
                &node.name,
                &p.custom_action_param,
                result.rect,
                &result.detail,
            ) else {
                warn!(name = %p.custom_action, "custom action not registered");
                return Err(Error::InvalidArgument(format!("unregistered custom action {:?}", p.custom_action)));
            };
            Ok(if ok { ActionOutcome::Continue } else { ActionOutcome::StoppedByTask })
        }
    }
}

//! The Sync Context (§4.7): a re-entrant handle passed into every custom
//! recognizer/action, letting it synchronously drive the controller or run a
//! nested task inline — no re-queueing, so a callback can observe the
//! device mid-step without deadlocking against its own engine.
//!
//! Grounded on the teacher's `src/context.rs` (`Context`) and
//! `src/sync_context.rs` (`MaaSyncContext`), reconciled into one type: the
//! teacher carries both because its two crate generations evolved the same
//! idea separately; this crate has one call site for it.

use std::sync::{Arc, Mutex};

use crate::common::{Image, Rect};
use crate::error::Result;
use crate::job::Status;
use crate::tasker::{RunStatus, TaskId, Tasker};
use crate::vision::RecognitionResult;

/// Handle passed to [`crate::custom::CustomRecognizer::analyze`] and
/// [`crate::custom::CustomAction::run`].
#[derive(Clone)]
pub struct SyncContext {
    tasker: Tasker,
    run_status: Arc<Mutex<RunStatus>>,
}

impl SyncContext {
    pub(crate) fn new(tasker: Tasker, run_status: Arc<Mutex<RunStatus>>) -> Self {
        Self { tasker, run_status }
    }

    /// Run `entry` to completion inline, on the calling thread, reusing the
    /// owning engine's controller/resource (§4.7).
    pub fn run_task(&self, entry: &str) -> Result<()> {
        self.tasker.run_pipeline_inline(entry, &self.run_status)
    }

    /// Run just the recognizer for `node_name` against a fresh screenshot,
    /// without acting on it.
    pub fn run_recognizer(&self, node_name: &str) -> Option<RecognitionResult> {
        let node = self.tasker.resource().node(node_name)?;
        if self.tasker.controller().screencap().wait() != Status::Succeeded {
            return None;
        }
        let image = self.tasker.controller().get_image();
        let pre_task_boxes = self.run_status.lock().unwrap().rec_boxes.clone();
        let custom = match &node.recognition {
            crate::pipeline::Recognition::Custom(p) => self.tasker.custom_recognizer(&p.custom_recognition),
            _ => None,
        };
        crate::vision::dispatch(self, &image, &node, &pre_task_boxes, self.tasker.vision_backend().as_ref(), custom.as_deref())
    }

    /// Run just the action for `node_name` against an already-obtained
    /// recognition `result`.
    pub fn run_action(&self, node_name: &str, result: &RecognitionResult) -> Result<crate::actuator::ActionOutcome> {
        let node = self
            .tasker
            .resource()
            .node(node_name)
            .ok_or_else(|| crate::error::Error::InvalidArgument(format!("unknown node {node_name:?}")))?;
        let pre_task_boxes = self.run_status.lock().unwrap().rec_boxes.clone();
        crate::actuator::run(result, &node, self.tasker.controller(), &pre_task_boxes, &self.tasker, self, self.tasker.exit_flag())
    }

    pub fn click(&self, x: i32, y: i32) -> Result<()> {
        self.tasker.controller().click(x, y).get().unwrap_or(Ok(()))
    }

    pub fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: i32) -> Result<()> {
        self.tasker.controller().swipe(x1, y1, x2, y2, duration_ms).get().unwrap_or(Ok(()))
    }

    pub fn press_key(&self, code: i32) -> Result<()> {
        self.tasker.controller().press_key(code).get().unwrap_or(Ok(()))
    }

    pub fn touch_down(&self, contact: i32, x: i32, y: i32, pressure: i32) -> Result<()> {
        self.tasker.controller().touch_down(contact, x, y, pressure).get().unwrap_or(Ok(()))
    }

    pub fn touch_move(&self, contact: i32, x: i32, y: i32, pressure: i32) -> Result<()> {
        self.tasker.controller().touch_move(contact, x, y, pressure).get().unwrap_or(Ok(()))
    }

    pub fn touch_up(&self, contact: i32) -> Result<()> {
        self.tasker.controller().touch_up(contact).get().unwrap_or(Ok(()))
    }

    pub fn screencap(&self) -> Image {
        self.tasker.controller().screencap().wait();
        self.tasker.controller().get_image()
    }

    /// The current run's remembered box/detail for `node_name`, if it has
    /// hit yet this task run.
    pub fn get_task_result(&self, node_name: &str) -> Option<(Rect, serde_json::Value)> {
        let status = self.run_status.lock().unwrap();
        let rect = status.rec_boxes.get(node_name).copied()?;
        let detail = status.rec_details.get(node_name).cloned().unwrap_or(serde_json::Value::Null);
        Some((rect, detail))
    }

    pub fn task_id_status(&self, other_task_id: TaskId) -> Status {
        self.tasker.status(other_task_id)
    }
}

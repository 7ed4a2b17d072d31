//! The task engine (§4.6): `run_pipeline`'s recursive state machine, one
//! worker thread per bound resource, lifecycle callbacks.
//!
//! Grounded on the teacher's `src/instance.rs` (submit/status/wait pairing,
//! custom component registration bookkeeping) and
//! `original_source/.../MaaAPI.cpp`'s pipeline entry points.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::callback::CallbackRegistry;
use crate::common::Rect;
use crate::context::SyncContext;
use crate::controller::{interruptible_sleep, Controller};
use crate::custom::{CustomAction, CustomRecognizer};
use crate::error::{Error, Result};
use crate::job::{Job, JobKind, JobRegistry};
use crate::pipeline::TaskData;
use crate::resource::Resource;
use crate::vision::{self, VisionBackend};
use crate::{actuator, job::Status};

pub type TaskId = u64;

/// Per-in-flight-task-run status (§3 "Pipeline run status").
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    pub task_id: TaskId,
    pub hit_times: HashMap<String, u32>,
    pub rec_boxes: HashMap<String, Rect>,
    pub rec_details: HashMap<String, Value>,
    pub interrupted: bool,
}

pub type TaskResult = Result<RunStatus>;

struct RegisteredAction {
    action: Arc<dyn CustomAction>,
    in_flight: AtomicBool,
    pending_unregister: AtomicBool,
}

enum Work {
    Run { task_id: TaskId, entry: String, param: Option<Value> },
    Stop,
}

/// The task engine. One worker thread drains submitted task ids and runs
/// them to completion, serially, against one bound resource + controller.
#[derive(Clone)]
pub struct Tasker {
    #[allow(dead_code)]
    id: u64,
    controller: Controller,
    resource: Resource,
    vision_backend: Arc<dyn VisionBackend>,
    recognizers: Arc<Mutex<HashMap<String, Arc<dyn CustomRecognizer>>>>,
    actions: Arc<Mutex<HashMap<String, Arc<RegisteredAction>>>>,
    jobs: Arc<JobRegistry<TaskResult>>,
    exit: Arc<AtomicBool>,
    sender: Sender<Work>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
    callbacks: CallbackRegistry,
}

impl Tasker {
    pub fn new(id: u64, controller: Controller, resource: Resource, vision_backend: Arc<dyn VisionBackend>) -> Self {
        let (tx, rx) = mpsc::channel::<Work>();
        let jobs = Arc::new(JobRegistry::new());
        let exit = Arc::new(AtomicBool::new(false));
        let callbacks = CallbackRegistry::new(id);
        let recognizers = Arc::new(Mutex::new(HashMap::new()));
        let actions = Arc::new(Mutex::new(HashMap::new()));

        let this = Self {
            id,
            controller,
            resource,
            vision_backend,
            recognizers,
            actions,
            jobs,
            exit,
            sender: tx,
            worker: Arc::new(Mutex::new(None)),
            callbacks,
        };

        let worker_self = this.clone();
        let handle = thread::spawn(move || worker_loop(worker_self, rx));
        *this.worker.lock().unwrap() = Some(handle);
        this
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    pub fn register_recognizer(&self, name: impl Into<String>, recognizer: Arc<dyn CustomRecognizer>) {
        self.recognizers.lock().unwrap().insert(name.into(), recognizer);
    }

    pub fn unregister_recognizer(&self, name: &str) {
        self.recognizers.lock().unwrap().remove(name);
    }

    pub fn register_action(&self, name: impl Into<String>, action: Arc<dyn CustomAction>) {
        self.actions.lock().unwrap().insert(
            name.into(),
            Arc::new(RegisteredAction {
                action,
                in_flight: AtomicBool::new(false),
                pending_unregister: AtomicBool::new(false),
            }),
        );
    }

    /// Unregisters a custom action. If it's currently running, `stop()` is
    /// deferred until that run returns rather than called concurrently with
    /// it (§9 decision).
    pub fn unregister_action(&self, name: &str) {
        let removed = self.actions.lock().unwrap().remove(name);
        if let Some(entry) = removed {
            if entry.in_flight.load(Ordering::SeqCst) {
                entry.pending_unregister.store(true, Ordering::SeqCst);
            } else {
                entry.action.stop();
            }
        }
    }

    /// Submit `entry` as a new task (§4.6). Non-blocking: only enqueues.
    pub fn submit(&self, entry: impl Into<String>, param: Option<Value>) -> Job<TaskResult> {
        let task_id = self.jobs.submit(JobKind::Task);
        let _ = self.sender.send(Work::Run { task_id, entry: entry.into(), param });
        Job::new(task_id, self.jobs.clone())
    }

    pub fn status(&self, task_id: TaskId) -> Status {
        self.jobs.status(task_id)
    }

    pub fn wait(&self, task_id: TaskId) -> Status {
        self.jobs.wait(task_id)
    }

    pub fn all_finished(&self) -> bool {
        self.jobs.all_finished()
    }

    pub fn stop(&self) {
        self.exit.store(true, Ordering::SeqCst);
        for entry in self.actions.lock().unwrap().values() {
            entry.action.stop();
        }
        let _ = self.sender.send(Work::Stop);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.jobs.fail_all_outstanding(Err(Error::Interrupted));
    }

    /// Run `entry` to completion inline on the caller's thread, reusing this
    /// engine's controller/resource/recognizer-and-action registries without
    /// going through the command queue (§4.7's Sync Context `run_task`).
    pub fn run_pipeline_inline(&self, entry: &str, run_status: &Arc<Mutex<RunStatus>>) -> Result<()> {
        run_pipeline(self, entry, run_status)
    }

    pub fn make_sync_context(&self, run_status: Arc<Mutex<RunStatus>>) -> SyncContext {
        SyncContext::new(self.clone(), run_status)
    }

    pub(crate) fn controller(&self) -> &Controller {
        &self.controller
    }

    pub(crate) fn resource(&self) -> &Resource {
        &self.resource
    }

    pub(crate) fn vision_backend(&self) -> &Arc<dyn VisionBackend> {
        &self.vision_backend
    }

    pub(crate) fn custom_recognizer(&self, name: &str) -> Option<Arc<dyn CustomRecognizer>> {
        self.recognizers.lock().unwrap().get(name).cloned()
    }

    /// This engine's own stop signal, distinct from the controller's: a
    /// blocking pre/post-delay sleep or freeze-wait runs on this engine's
    /// worker thread and must answer to `Tasker::stop()` even while the
    /// bound controller stays alive for other owners.
    pub(crate) fn exit_flag(&self) -> &Arc<AtomicBool> {
        &self.exit
    }

}

impl actuator::CustomActionInvoker for Tasker {
    fn invoke(
        &self,
        name: &str,
        sync_ctx: &SyncContext,
        task_name: &str,
        param: &Value,
        cur_box: Rect,
        cur_detail: &Value,
    ) -> Option<bool> {
        let entry = self.actions.lock().unwrap().get(name).cloned()?;
        entry.in_flight.store(true, Ordering::SeqCst);
        let ok = entry.action.run(sync_ctx, task_name, param, cur_box, cur_detail);
        entry.in_flight.store(false, Ordering::SeqCst);
        if entry.pending_unregister.swap(false, Ordering::SeqCst) {
            entry.action.stop();
        }
        Some(ok)
    }
}

fn worker_loop(tasker: Tasker, rx: mpsc::Receiver<Work>) {
    while let Ok(work) = rx.recv() {
        if tasker.exit.load(Ordering::SeqCst) {
            break;
        }
        match work {
            Work::Stop => break,
            Work::Run { task_id, entry, param } => {
                tasker.jobs.set_running(task_id);
                tasker.callbacks.dispatch(
                    "task.started",
                    &format!("{{\"task_id\":{task_id},\"entry\":{entry:?}}}"),
                );
                let run_status = Arc::new(Mutex::new(RunStatus { task_id, ..RunStatus::default() }));
                if let Some(param) = param {
                    run_status.lock().unwrap().rec_details.insert("__param".to_string(), param);
                }
                let outcome = run_pipeline(&tasker, &entry, &run_status);
                let reason = match &outcome {
                    Ok(()) => "succeeded".to_string(),
                    Err(e) => e.to_string(),
                };
                tasker.callbacks.dispatch(
                    "task.finished",
                    &format!("{{\"task_id\":{task_id},\"reason\":{reason:?}}}"),
                );
                let status = run_status.lock().unwrap().clone();
                match outcome {
                    Ok(()) => tasker.jobs.complete(task_id, Ok(status)),
                    Err(e) => tasker.jobs.fail(task_id, Err(e)),
                }
            }
        }
    }
    info!(tasker_id = tasker.id, "tasker worker exiting");
}

/// `run_pipeline` (§4.6): find the first hit among ordered candidates, act
/// on it, recurse into its sub-pipelines depth-first, then advance.
#[instrument(skip(tasker, run_status))]
fn run_pipeline(tasker: &Tasker, entry: &str, run_status: &Arc<Mutex<RunStatus>>) -> Result<()> {
    let mut cur_list = vec![entry.to_string()];
    let started = Instant::now();

    loop {
        if tasker.exit.load(Ordering::SeqCst) {
            run_status.lock().unwrap().interrupted = true;
            return Err(Error::Interrupted);
        }
        if !tasker.resource.loaded() {
            return Err(Error::NotReady("no resource bundle loaded".into()));
        }

        let Some((node, result)) = find_first_hit(tasker, &cur_list, run_status)? else {
            let deadline_ms = candidate_timeout_ms(tasker, &cur_list);
            if started.elapsed() >= Duration::from_millis(deadline_ms) {
                let timeout_next = union_timeout_next(tasker, &cur_list);
                if timeout_next.is_empty() {
                    return Err(Error::Timeout(cur_list.first().cloned()));
                }
                cur_list = timeout_next;
                continue;
            }
            interruptible_sleep(50, &tasker.exit);
            continue;
        };

        {
            let mut status = run_status.lock().unwrap();
            let hit_times = status.hit_times.entry(node.name.clone()).or_insert(0);
            if *hit_times >= node.times_limit as u32 {
                drop(status);
                if node.runout_next.is_empty() {
                    return Err(Error::InvalidArgument(format!("node {:?} ran out with no runout_next", node.name)));
                }
                cur_list = node.runout_next.clone();
                continue;
            }
            *hit_times += 1;
            status.rec_boxes.insert(node.name.clone(), result.rect);
            status.rec_details.insert(node.name.clone(), result.detail.clone());
        }

        {
            let status = run_status.lock().unwrap();
            let hit_count = status.hit_times.get(&node.name).copied().unwrap_or(0);
            tasker.callbacks.dispatch(
                "task.node_hit",
                &format!("{{\"task_id\":{},\"node\":{:?},\"hit_count\":{hit_count}}}", status.task_id, node.name),
            );
        }

        let outcome = run_action(tasker, &result, &node, run_status)?;
        if outcome == actuator::ActionOutcome::StoppedByTask {
            return Err(Error::StoppedByTask(node.name.clone()));
        }

        let (subs, real_next): (Vec<String>, Vec<String>) = node
            .next
            .iter()
            .cloned()
            .partition(|name| tasker.resource.node(name).map(|n| n.is_sub).unwrap_or(false));
        for sub in subs {
            run_pipeline(tasker, &sub, run_status)?;
        }

        if real_next.is_empty() {
            return Ok(());
        }
        cur_list = real_next;
    }
}

fn candidate_timeout_ms(tasker: &Tasker, cur_list: &[String]) -> u64 {
    cur_list
        .iter()
        .filter_map(|name| tasker.resource.node(name).map(|n| n.timeout.max(0) as u64))
        .min()
        .unwrap_or(20_000)
}

fn union_timeout_next(tasker: &Tasker, cur_list: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for name in cur_list {
        if let Some(node) = tasker.resource.node(name) {
            for n in node.timeout_next {
                if !out.contains(&n) {
                    out.push(n);
                }
            }
        }
    }
    out
}

fn find_first_hit(
    tasker: &Tasker,
    cur_list: &[String],
    run_status: &Arc<Mutex<RunStatus>>,
) -> Result<Option<(TaskData, vision::RecognitionResult)>> {
    let screenshot_job = tasker.controller.screencap();
    if screenshot_job.wait() != Status::Succeeded {
        return Err(Error::TransportFailure("screencap failed".into()));
    }
    let image = tasker.controller.get_image();
    let pre_task_boxes = run_status.lock().unwrap().rec_boxes.clone();
    let sync_ctx = tasker.make_sync_context(run_status.clone());

    for name in cur_list {
        let Some(node) = tasker.resource.node(name) else {
            return Err(Error::InvalidArgument(format!("unknown node {name:?}")));
        };
        if !node.enabled {
            continue;
        }
        let custom = match &node.recognition {
            crate::pipeline::Recognition::Custom(p) => tasker.custom_recognizer(&p.custom_recognition),
            _ => None,
        };
        if let Some(result) = vision::dispatch(&sync_ctx, &image, &node, &pre_task_boxes, tasker.vision_backend.as_ref(), custom.as_deref()) {
            return Ok(Some((node, result)));
        }
    }
    Ok(None)
}

fn run_action(
    tasker: &Tasker,
    result: &vision::RecognitionResult,
    node: &TaskData,
    run_status: &Arc<Mutex<RunStatus>>,
) -> Result<actuator::ActionOutcome> {
    let pre_task_boxes = run_status.lock().unwrap().rec_boxes.clone();
    let sync_ctx = tasker.make_sync_context(run_status.clone());
    let outcome = actuator::run(result, node, &tasker.controller, &pre_task_boxes, tasker, &sync_ctx, &tasker.exit);
    if outcome.is_err() {
        warn!(node = %node.name, "actuator failed");
    }
    outcome
}

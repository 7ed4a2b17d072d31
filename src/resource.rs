//! The resource manager (§4.8): validates and atomically publishes a
//! pipeline graph.
//!
//! Grounded on the teacher's `resource.rs` (bundle loading as a job, default
//! param getters, hash) — the on-disk bundle *parsing* conventions stay out
//! of scope (§6); this module validates an already-parsed [`Graph`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{info, instrument};

use crate::callback::CallbackRegistry;
use crate::error::{Error, Result};
use crate::job::{Job, JobId, JobKind, JobRegistry};
use crate::options::{InferenceDevice, ResourceOption};
use crate::pipeline::{Graph, Recognition, TaskData};

pub type ResourceResult = Result<()>;

#[derive(Default, Clone)]
struct Published {
    graph: Arc<Graph>,
    loaded: bool,
}

enum Work {
    Load { id: JobId, path: String, graph: Graph },
    Stop,
}

/// Owns the currently-published pipeline graph and the job registry tracking
/// load attempts. Loads run on a dedicated worker thread (§5's "one worker
/// per resource manager, drains its load queue"); `load()` only enqueues.
#[derive(Clone)]
pub struct Resource {
    #[allow(dead_code)]
    id: u64,
    jobs: Arc<JobRegistry<ResourceResult>>,
    published: Arc<RwLock<Published>>,
    inference_device: Arc<Mutex<InferenceDevice>>,
    callbacks: CallbackRegistry,
    sender: Sender<Work>,
    exit: Arc<AtomicBool>,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Resource {
    pub fn new(id: u64) -> Self {
        let (tx, rx) = mpsc::channel::<Work>();
        let jobs = Arc::new(JobRegistry::new());
        let published = Arc::new(RwLock::new(Published::default()));
        let callbacks = CallbackRegistry::new(id);
        let exit = Arc::new(AtomicBool::new(false));

        let worker_jobs = jobs.clone();
        let worker_published = published.clone();
        let worker_callbacks = callbacks.clone();
        let worker_exit = exit.clone();
        let handle = thread::spawn(move || run_worker(id, rx, worker_jobs, worker_published, worker_exit, worker_callbacks));

        Self {
            id,
            jobs,
            published,
            inference_device: Arc::new(Mutex::new(InferenceDevice::default())),
            callbacks,
            sender: tx,
            exit,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    /// Validate and publish `graph` as a job (§4.8). Non-blocking: only
    /// enqueues onto the worker thread and returns. The previous graph, if
    /// any, stays live until this one passes validation — a failed load
    /// never tears down an already-loaded resource.
    #[instrument(skip(self, graph), fields(resource_id = self.id))]
    pub fn load(&self, path: impl Into<String>, graph: Graph) -> Job<ResourceResult> {
        let id = self.jobs.submit(JobKind::ResourceLoad);
        let _ = self.sender.send(Work::Load { id, path: path.into(), graph });
        Job::new(id, self.jobs.clone())
    }

    pub fn loaded(&self) -> bool {
        self.published.read().unwrap().loaded
    }

    pub fn graph(&self) -> Arc<Graph> {
        self.published.read().unwrap().graph.clone()
    }

    pub fn node(&self, name: &str) -> Option<TaskData> {
        self.graph().get(name).cloned()
    }

    /// Recognized `set_option` keys (§6: "resource: inference_device"). The
    /// chosen device is stored for the vision backend to read; this module
    /// doesn't own inference itself (§1).
    pub fn set_option(&self, option: ResourceOption) {
        match option {
            ResourceOption::InferenceDevice(device) => {
                *self.inference_device.lock().unwrap() = device;
            }
        }
    }

    pub fn inference_device(&self) -> InferenceDevice {
        *self.inference_device.lock().unwrap()
    }

    pub fn stop(&self) {
        self.exit.store(true, Ordering::SeqCst);
        let _ = self.sender.send(Work::Stop);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.jobs.fail_all_outstanding(Err(Error::Interrupted));
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        if Arc::strong_count(&self.worker) == 1 {
            self.stop();
        }
    }
}

fn run_worker(
    id: u64,
    rx: mpsc::Receiver<Work>,
    jobs: Arc<JobRegistry<ResourceResult>>,
    published: Arc<RwLock<Published>>,
    exit: Arc<AtomicBool>,
    callbacks: CallbackRegistry,
) {
    while let Ok(work) = rx.recv() {
        if exit.load(Ordering::SeqCst) {
            break;
        }
        match work {
            Work::Stop => break,
            Work::Load { id: job_id, path, graph } => {
                jobs.set_running(job_id);
                let outcome = validate(&graph).map_err(|e| {
                    info!(resource_id = id, path = %path, error = %e, "bundle validation failed");
                    e
                });
                if outcome.is_ok() {
                    *published.write().unwrap() = Published { graph: Arc::new(graph), loaded: true };
                }
                callbacks.dispatch(
                    "resource.loading",
                    &format!("{{\"path\":{path:?},\"ok\":{}}}", outcome.is_ok()),
                );
                jobs.complete(job_id, outcome);
            }
        }
    }
    info!(resource_id = id, "resource worker exiting");
}

/// Structural validation (§4.8): names unique (guaranteed by the map key
/// itself), every successor name resolvable, thresholds within `[0, 1]`.
fn validate(graph: &Graph) -> Result<()> {
    for (name, node) in graph {
        for successor in node.next.iter().chain(&node.timeout_next).chain(&node.runout_next) {
            if !graph.contains_key(successor) {
                return Err(Error::InvalidBundle(format!(
                    "node {name:?} references unknown successor {successor:?}"
                )));
            }
        }
        if let Some(cached_from) = &node.roi_cache_from {
            if !graph.contains_key(cached_from) {
                return Err(Error::InvalidBundle(format!(
                    "node {name:?} has roi_cache_from referencing unknown node {cached_from:?}"
                )));
            }
        }
        validate_thresholds(name, &node.recognition)?;
    }
    Ok(())
}

fn validate_thresholds(name: &str, recognition: &Recognition) -> Result<()> {
    let thresholds: Vec<f64> = match recognition {
        Recognition::TemplateMatch(p) => p.threshold.clone(),
        Recognition::Ocr(p) => vec![p.threshold],
        Recognition::Detect(p) => vec![p.threshold],
        Recognition::DirectHit(_) | Recognition::ColorMatch(_) | Recognition::Classify(_) | Recognition::Custom(_) => {
            Vec::new()
        }
    };
    for t in thresholds {
        if !(0.0..=1.0).contains(&t) {
            return Err(Error::InvalidBundle(format!(
                "node {name:?} has an out-of-range threshold {t} (must be within [0, 1])"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Action, DirectHit, DoNothing, TaskData};
    use std::collections::HashMap;

    fn node(next: Vec<&str>) -> TaskData {
        TaskData {
            name: "n".into(),
            recognition: Recognition::DirectHit(DirectHit {}),
            action: Action::DoNothing(DoNothing {}),
            next: next.into_iter().map(String::from).collect(),
            timeout_next: vec![],
            runout_next: vec![],
            is_sub: false,
            inverse: false,
            enabled: true,
            pre_delay: 0,
            post_delay: 0,
            pre_wait_freezes: None,
            post_wait_freezes: None,
            timeout: 1000,
            times_limit: 10,
            roi_cache_from: None,
        }
    }

    #[test]
    fn valid_graph_publishes_and_marks_loaded() {
        let resource = Resource::new(1);
        let mut graph = HashMap::new();
        graph.insert("a".to_string(), node(vec!["b"]));
        graph.insert("b".to_string(), node(vec![]));
        let job = resource.load("bundle", graph);
        assert_eq!(job.wait(), crate::job::Status::Succeeded);
        assert!(resource.loaded());
        assert!(resource.node("a").is_some());
    }

    #[test]
    fn dangling_successor_fails_validation_and_does_not_publish() {
        let resource = Resource::new(2);
        let mut graph = HashMap::new();
        graph.insert("a".to_string(), node(vec!["missing"]));
        let job = resource.load("bundle", graph);
        assert_eq!(job.wait(), crate::job::Status::Failed);
        assert!(!resource.loaded());
    }

    #[test]
    fn a_failed_reload_keeps_the_previous_graph_live() {
        let resource = Resource::new(3);
        let mut good = HashMap::new();
        good.insert("a".to_string(), node(vec![]));
        resource.load("good", good).wait();
        assert!(resource.loaded());

        let mut bad = HashMap::new();
        bad.insert("a".to_string(), node(vec!["missing"]));
        resource.load("bad", bad).wait();
        assert!(resource.loaded());
        assert!(resource.node("a").is_some());
    }
}

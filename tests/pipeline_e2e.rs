//! End-to-end coverage of the task engine against the bundled dbg transport.
//! Each test drives the public API the way an embedder would: build a
//! `Graph`, load it into a `Resource`, submit a task against a `Tasker`, and
//! assert on the returned `RunStatus` / job status / transport log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use screenpilot::common::{Image, PixelLayout, Rect};
use screenpilot::context::SyncContext;
use screenpilot::controller::dbg::{DbgTransport, RecordedStep};
use screenpilot::controller::{Controller, ControllerOption};
use screenpilot::custom::{CustomAction, CustomRecognizer};
use screenpilot::notification::{Event, EventSink};
use screenpilot::pipeline::{
    Action, Click, DirectHit, DoNothing, Recognition, Target, TaskData, TemplateMatch,
};
use screenpilot::vision::{RecognitionResult, VisionBackend};
use screenpilot::{Graph, Resource, Tasker};

struct NullBackend;

impl VisionBackend for NullBackend {
    fn template_match(&self, _image: &Image, _roi: Rect, _param: &TemplateMatch) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn color_match(&self, _image: &Image, _roi: Rect, _param: &screenpilot::pipeline::ColorMatch) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn ocr(&self, _image: &Image, _roi: Rect, _param: &screenpilot::pipeline::Ocr) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn classify(&self, _image: &Image, _roi: Rect, _param: &screenpilot::pipeline::Classify) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn detect(&self, _image: &Image, _roi: Rect, _param: &screenpilot::pipeline::Detect) -> Vec<RecognitionResult> {
        Vec::new()
    }
}

fn blank_frame(w: u32, h: u32) -> Image {
    Image::from_raw(w, h, PixelLayout::Gray8, vec![0; (w * h) as usize]).unwrap()
}

fn node(name: &str, recognition: Recognition, action: Action, next: Vec<&str>) -> TaskData {
    TaskData {
        name: name.to_string(),
        recognition,
        action,
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
        timeout: 20_000,
        times_limit: i32::MAX,
        roi_cache_from: None,
    }
}

fn make_tasker(graph: Graph, frames: Vec<Image>) -> Tasker {
    let controller = Controller::new(1, Box::new(DbgTransport::carousel(frames)));
    controller.connect().wait();
    let resource = Resource::new(1);
    resource.load("bundle", graph).wait();
    Tasker::new(2, controller, resource, Arc::new(NullBackend))
}

/// Scenario 1: a direct-hit linear pipeline hits both nodes in order and
/// reports a succeeded task with accurate hit counts.
#[test]
fn direct_hit_linear_pipeline_succeeds_with_ordered_hits() {
    let mut graph: Graph = HashMap::new();
    graph.insert(
        "a".to_string(),
        node("a", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec!["b"]),
    );
    graph.insert(
        "b".to_string(),
        node("b", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec![]),
    );

    let tasker = make_tasker(graph, vec![blank_frame(4, 4)]);

    let hits: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let hits2 = hits.clone();
    tasker.callbacks().register_typed(Arc::new(HitRecorder(hits2)));

    let job = tasker.submit("a", None);
    assert_eq!(job.wait(), screenpilot::Status::Succeeded);
    let status = job.get().unwrap().unwrap();
    assert_eq!(status.hit_times.get("a"), Some(&1));
    assert_eq!(status.hit_times.get("b"), Some(&1));
    assert_eq!(*hits.lock().unwrap(), vec!["a".to_string(), "b".to_string()]);

    tasker.stop();
}

struct HitRecorder(Arc<Mutex<Vec<String>>>);
impl EventSink for HitRecorder {
    fn on_event(&self, _source_id: u64, event: &Event) {
        if let Event::NodeHit { node, .. } = event {
            self.0.lock().unwrap().push(node.clone());
        }
    }
}

/// Scenario 2: a node that can never visually hit falls through to its
/// `timeout_next` once its own `timeout` elapses.
#[test]
fn timeout_next_branches_when_a_candidate_never_hits() {
    let mut graph: Graph = HashMap::new();
    let mut a = node(
        "a",
        Recognition::TemplateMatch(TemplateMatch {
            template: vec!["missing.png".to_string()],
            roi: Target::default(),
            roi_offset: Rect::ZERO,
            threshold: vec![0.7],
            order_by: "horizontal".to_string(),
            index: 0,
            green_mask: false,
        }),
        Action::DoNothing(DoNothing {}),
        vec!["b"],
    );
    a.timeout = 100;
    a.timeout_next = vec!["c".to_string()];
    graph.insert("a".to_string(), a);
    graph.insert("b".to_string(), node("b", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec![]));
    graph.insert("c".to_string(), node("c", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec![]));

    let tasker = make_tasker(graph, vec![blank_frame(4, 4)]);

    let started = Instant::now();
    let job = tasker.submit("a", None);
    assert_eq!(job.wait(), screenpilot::Status::Succeeded);
    let status = job.get().unwrap().unwrap();
    assert!(status.hit_times.contains_key("c"));
    assert!(!status.hit_times.contains_key("a"));
    assert!(started.elapsed() >= Duration::from_millis(100));

    tasker.stop();
}

/// Scenario 3: `times_limit` enforces a hit cap, after which the node's
/// `runout_next` takes over.
#[test]
fn times_limit_runs_out_to_runout_next() {
    let mut graph: Graph = HashMap::new();
    let mut a = node("a", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec!["a"]);
    a.times_limit = 3;
    a.runout_next = vec!["b".to_string()];
    graph.insert("a".to_string(), a);
    graph.insert("b".to_string(), node("b", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec![]));

    let tasker = make_tasker(graph, vec![blank_frame(4, 4)]);

    let job = tasker.submit("a", None);
    assert_eq!(job.wait(), screenpilot::Status::Succeeded);
    let status = job.get().unwrap().unwrap();
    assert_eq!(status.hit_times.get("a"), Some(&3));
    assert_eq!(status.hit_times.get("b"), Some(&1));

    tasker.stop();
}

/// Scenario 4: coordinate scaling maps a click expressed in the pipeline's
/// logical size down to the device's physical resolution.
#[test]
fn resolution_scaling_maps_logical_click_to_device_coordinates() {
    let (transport, shared_log) = DbgTransport::carousel_with_log(vec![blank_frame(540, 960)]);
    let controller = Controller::new(1, Box::new(transport));
    controller.connect().wait();
    assert_eq!(controller.get_resolution(), (540, 960));

    controller.set_option(ControllerOption::LogicalSize(1080, 1920));
    controller.set_option(ControllerOption::ResolutionScaling(true));

    assert_eq!(controller.click(200, 400).wait(), screenpilot::Status::Succeeded);

    let log = shared_log.lock().unwrap();
    let click = log.iter().find(|step| matches!(step, RecordedStep::Click { .. })).unwrap();
    match click {
        RecordedStep::Click { x, y } => assert_eq!((*x, *y), (100, 200)),
        _ => unreachable!(),
    }

    controller.stop();
}

/// Scenario 5: stopping the tasker mid-`pre_delay` interrupts the sleep
/// promptly instead of blocking until the delay elapses.
#[test]
fn stop_interrupts_a_node_blocked_in_pre_delay() {
    let mut graph: Graph = HashMap::new();
    let mut a = node("a", Recognition::DirectHit(DirectHit {}), Action::DoNothing(DoNothing {}), vec![]);
    a.pre_delay = 10_000;
    graph.insert("a".to_string(), a);

    let (transport, shared_log) = DbgTransport::carousel_with_log(vec![blank_frame(4, 4)]);
    let controller = Controller::new(1, Box::new(transport));
    controller.connect().wait();
    let resource = Resource::new(1);
    resource.load("bundle", graph).wait();
    let tasker = Tasker::new(2, controller.clone(), resource, Arc::new(NullBackend));

    let job = tasker.submit("a", None);
    std::thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    tasker.stop();
    assert!(started.elapsed() <= Duration::from_millis(5050));

    assert_eq!(job.wait(), screenpilot::Status::Failed);
    match job.get() {
        Some(Err(screenpilot::Error::Interrupted)) => {}
        other => panic!("expected Interrupted, got {other:?}"),
    }

    assert!(!shared_log.lock().unwrap().iter().any(|step| matches!(step, RecordedStep::Click { .. })));

    controller.stop();
}

/// Connecting an already-connected controller is a no-op: it succeeds
/// without a second `transport.connect()` reaching the transport's log.
#[test]
fn connect_on_an_already_connected_controller_is_idempotent() {
    let (transport, shared_log) = DbgTransport::carousel_with_log(vec![blank_frame(4, 4)]);
    let controller = Controller::new(1, Box::new(transport));
    assert_eq!(controller.connect().wait(), screenpilot::Status::Succeeded);
    assert_eq!(controller.connect().wait(), screenpilot::Status::Succeeded);

    let connects = shared_log.lock().unwrap().iter().filter(|step| matches!(step, RecordedStep::Connect)).count();
    assert_eq!(connects, 1, "a second connect() must not reach the transport");

    controller.stop();
}

/// Scenario 6: a custom recognizer supplies the box a click action then
/// resolves against, with the actuator's click jitter staying within it.
#[test]
fn custom_recognizer_result_drives_a_bounded_click() {
    struct FixedBoxRecognizer;
    impl CustomRecognizer for FixedBoxRecognizer {
        fn analyze(&self, sync_ctx: &SyncContext, _image: &Image, _roi: Rect, _task_name: &str, _param: &Value) -> Option<(Rect, Value)> {
            let _ = sync_ctx.screencap();
            Some((Rect::new(10, 10, 20, 20), Value::Null))
        }
    }

    let mut graph: Graph = HashMap::new();
    graph.insert(
        "a".to_string(),
        node(
            "a",
            Recognition::Custom(screenpilot::pipeline::CustomRecognition {
                custom_recognition: "fixed_box".to_string(),
                roi: Target::default(),
                roi_offset: Rect::ZERO,
                custom_recognition_param: Value::Null,
            }),
            Action::Click(Click::default()),
            vec![],
        ),
    );

    let (transport, shared_log) = DbgTransport::carousel_with_log(vec![blank_frame(64, 64)]);
    let controller = Controller::new(1, Box::new(transport));
    controller.connect().wait();
    let resource = Resource::new(1);
    resource.load("bundle", graph).wait();
    let tasker = Tasker::new(2, controller.clone(), resource, Arc::new(NullBackend));
    tasker.register_recognizer("fixed_box", Arc::new(FixedBoxRecognizer));

    let job = tasker.submit("a", None);
    assert_eq!(job.wait(), screenpilot::Status::Succeeded);

    let log = shared_log.lock().unwrap();
    let click = log.iter().find(|step| matches!(step, RecordedStep::Click { .. })).unwrap();
    match click {
        RecordedStep::Click { x, y } => {
            assert!((10..30).contains(x));
            assert!((10..30).contains(y));
        }
        _ => unreachable!(),
    }
    let screencaps = log.iter().filter(|step| matches!(step, RecordedStep::Screencap(_))).count();
    assert_eq!(screencaps, 2, "expected the pipeline's own screencap plus the recognizer's extra one via the sync context");
    drop(log);

    tasker.stop();
    controller.stop();
}

/// A custom action reaches back into the engine through the Sync Context:
/// it drives a click on the calling thread and reads back this run's
/// remembered result for its own node, bypassing the command queue entirely.
#[test]
fn custom_action_drives_controller_through_sync_context() {
    struct EchoAction(Arc<AtomicUsize>);
    impl CustomAction for EchoAction {
        fn run(&self, ctx: &SyncContext, _task_name: &str, _param: &Value, cur_box: Rect, _cur_detail: &Value) -> bool {
            ctx.click(cur_box.x, cur_box.y).unwrap();
            assert!(ctx.get_task_result("a").is_some());
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    let mut graph: Graph = HashMap::new();
    graph.insert(
        "a".to_string(),
        node(
            "a",
            Recognition::DirectHit(DirectHit {}),
            Action::Custom(screenpilot::pipeline::CustomAction {
                custom_action: "echo".to_string(),
                custom_action_param: Value::Null,
                target: Target::default(),
                target_offset: Rect::ZERO,
            }),
            vec![],
        ),
    );

    let tasker = make_tasker(graph, vec![blank_frame(4, 4)]);
    let calls = Arc::new(AtomicUsize::new(0));
    tasker.register_action("echo", Arc::new(EchoAction(calls.clone())));

    let job = tasker.submit("a", None);
    assert_eq!(job.wait(), screenpilot::Status::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tasker.stop();
}

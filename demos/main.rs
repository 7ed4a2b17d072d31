//! End-to-end walkthrough of the public API against the bundled dbg-replay
//! controller. Not part of the library's contract (§6) — a reference for
//! manual inspection, not something downstream crates depend on.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::Level;

use screenpilot::common::{Image, PixelLayout, Rect};
use screenpilot::context::SyncContext;
use screenpilot::controller::dbg::DbgTransport;
use screenpilot::controller::Controller;
use screenpilot::custom::{CustomAction, CustomRecognizer};
use screenpilot::pipeline::{
    Action, Classify, Click, ColorMatch, CustomAction as CustomActionParam, CustomRecognition, Detect, DirectHit, Ocr,
    Recognition, TaskData, TemplateMatch,
};
use screenpilot::vision::{RecognitionResult, VisionBackend};
use screenpilot::{Graph, Resource, Tasker};

/// This demo never exercises the built-in adapters — every node here is
/// either `DirectHit` or `Custom` — so the backend just needs to exist.
struct NullVisionBackend;

impl VisionBackend for NullVisionBackend {
    fn template_match(&self, _image: &Image, _roi: Rect, _param: &TemplateMatch) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn color_match(&self, _image: &Image, _roi: Rect, _param: &ColorMatch) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn ocr(&self, _image: &Image, _roi: Rect, _param: &Ocr) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn classify(&self, _image: &Image, _roi: Rect, _param: &Classify) -> Vec<RecognitionResult> {
        Vec::new()
    }
    fn detect(&self, _image: &Image, _roi: Rect, _param: &Detect) -> Vec<RecognitionResult> {
        Vec::new()
    }
}

/// A custom recognizer that always hits, echoing back the ROI it was asked
/// to search.
struct GreetingRecognizer;

impl CustomRecognizer for GreetingRecognizer {
    fn analyze(&self, sync_ctx: &SyncContext, image: &Image, roi: Rect, task_name: &str, param: &Value) -> Option<(Rect, Value)> {
        println!("    [GreetingRecognizer] searching {}x{} image in {roi:?} for node {task_name:?}, param={param}", image.width(), image.height());
        let extra = sync_ctx.screencap();
        println!("    [GreetingRecognizer] took an extra screencap ({}x{}) via the sync context", extra.width(), extra.height());
        Some((roi, serde_json::json!({"greeting": "hello from a custom recognizer"})))
    }
}

/// A custom action demonstrating the Sync Context: it drives the controller
/// directly on the calling thread instead of going through the command
/// queue, then asks the context for this task's own remembered result.
struct GreetingAction;

impl CustomAction for GreetingAction {
    fn run(&self, ctx: &SyncContext, task_name: &str, _param: &Value, cur_box: Rect, cur_detail: &Value) -> bool {
        println!("    [GreetingAction] running for node {task_name:?}, detail={cur_detail}");
        if let Err(e) = ctx.click(cur_box.x, cur_box.y) {
            eprintln!("    [GreetingAction] sync click failed: {e}");
            return false;
        }
        if let Some((rect, detail)) = ctx.get_task_result("greet") {
            println!("    [GreetingAction] this run's remembered box for 'greet': {rect:?}, {detail}");
        }
        true
    }

    fn stop(&self) {
        println!("    [GreetingAction] stop() called");
    }
}

fn demo_graph() -> Graph {
    let mut graph: Graph = HashMap::new();

    graph.insert(
        "entry".to_string(),
        TaskData {
            name: "entry".to_string(),
            recognition: Recognition::DirectHit(DirectHit {}),
            action: Action::Click(Click::default()),
            next: vec!["greet".to_string()],
            timeout_next: vec![],
            runout_next: vec![],
            is_sub: false,
            inverse: false,
            enabled: true,
            pre_delay: 0,
            post_delay: 0,
            pre_wait_freezes: None,
            post_wait_freezes: None,
            timeout: 5_000,
            times_limit: i32::MAX,
            roi_cache_from: None,
        },
    );

    graph.insert(
        "greet".to_string(),
        TaskData {
            name: "greet".to_string(),
            recognition: Recognition::Custom(CustomRecognition {
                custom_recognition: "greeting_recognizer".to_string(),
                roi: Default::default(),
                roi_offset: Rect::ZERO,
                custom_recognition_param: serde_json::json!({"hint": "demo"}),
            }),
            action: Action::Custom(CustomActionParam {
                custom_action: "greeting_action".to_string(),
                custom_action_param: Value::Null,
                target: Default::default(),
                target_offset: Rect::ZERO,
            }),
            next: vec![],
            timeout_next: vec![],
            runout_next: vec![],
            is_sub: false,
            inverse: false,
            enabled: true,
            pre_delay: 0,
            post_delay: 0,
            pre_wait_freezes: None,
            post_wait_freezes: None,
            timeout: 5_000,
            times_limit: i32::MAX,
            roi_cache_from: None,
        },
    );

    graph
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    println!("=== screenpilot demo ===\n");

    // 1. A controller wired to the bundled debug transport, which cycles
    //    through one fixed frame forever so recognition is deterministic.
    let frame = Image::from_raw(64, 64, PixelLayout::Gray8, vec![128; 64 * 64]).unwrap();
    let controller = Controller::new(1, Box::new(DbgTransport::carousel(vec![frame])));
    controller.callbacks().register_raw(Arc::new(|message, details| {
        println!("[controller] {message}: {details}");
    }));

    println!("[1] connecting...");
    controller.connect().wait();
    println!("    connected={}, uuid={}", controller.connected(), controller.get_uuid());

    // 2. A resource bundle with two nodes: a direct-hit entry that clicks,
    //    then a custom recognizer/action pair.
    println!("\n[2] loading resource bundle...");
    let resource = Resource::new(1);
    resource.callbacks().register_raw(Arc::new(|message, details| {
        println!("[resource] {message}: {details}");
    }));
    let load = resource.load("demo-bundle", demo_graph());
    println!("    load status: {:?}", load.wait());

    // 3. A tasker bound to that controller and resource, with the demo's
    //    custom components registered.
    println!("\n[3] setting up tasker...");
    let tasker = Tasker::new(2, controller.clone(), resource.clone(), Arc::new(NullVisionBackend));
    tasker.callbacks().register_raw(Arc::new(|message, details| {
        println!("[tasker] {message}: {details}");
    }));
    tasker.register_recognizer("greeting_recognizer", Arc::new(GreetingRecognizer));
    tasker.register_action("greeting_action", Arc::new(GreetingAction));

    // 4. Run it.
    println!("\n[4] running 'entry'...");
    let job = tasker.submit("entry", None);
    let status = job.wait();
    println!("    task status: {status:?}");
    match job.get() {
        Some(Ok(run_status)) => {
            println!("    hit_times: {:?}", run_status.hit_times);
            for (node, rect) in &run_status.rec_boxes {
                println!("    {node} last matched at {rect:?}");
            }
        }
        Some(Err(e)) => println!("    task failed: {e}"),
        None => println!("    no result recorded"),
    }

    tasker.unregister_action("greeting_action");
    tasker.stop();
    controller.stop();
    println!("\n[5] demo completed!");
}

//! The controller façade (§4.2): a per-object command queue worker thread
//! wrapping a pluggable [`Transport`].
//!
//! Grounded on the teacher's `controller.rs` (constructors per transport
//! kind, `MaaControllerOption`, `post_*`/`status`/`wait`/`connected`) and
//! `original_source/.../CustomController.cpp` for the capability set a
//! transport must expose. The FFI closure/pointer plumbing is replaced with
//! a real `mpsc` command queue draining on a real worker thread (§2a).

pub mod adb;
pub mod dbg;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use crate::callback::CallbackRegistry;
use crate::common::{Image, Rect};
use crate::error::{Error, Result};
use crate::job::{Job, JobKind, JobRegistry};
use crate::pipeline::FreezeMethod;

pub type ControllerResult = Result<()>;

/// The capability set a device transport must expose (§6's `CustomController`
/// contract, generalized to every transport including the built-in ones).
pub trait Transport: Send {
    fn connect(&mut self) -> Result<String>;
    fn resolution(&mut self) -> Result<(u32, u32)>;
    fn screencap(&mut self) -> Result<Image>;
    fn click(&mut self, x: i32, y: i32) -> Result<()>;
    fn swipe(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: i32) -> Result<()>;
    fn touch_down(&mut self, contact: i32, x: i32, y: i32, pressure: i32) -> Result<()>;
    fn touch_move(&mut self, contact: i32, x: i32, y: i32, pressure: i32) -> Result<()>;
    fn touch_up(&mut self, contact: i32) -> Result<()>;
    fn press_key(&mut self, code: i32) -> Result<()>;
    fn input_text(&mut self, text: &str) -> Result<()>;
    fn start_app(&mut self, package: &str) -> Result<()>;
    fn stop_app(&mut self, package: &str) -> Result<()>;
}

/// Recognized `set_option` keys (§6: "controller: screencap_method,
/// input_method, resolution_scaling, default_app_package").
#[derive(Debug, Clone)]
pub enum ControllerOption {
    ScreencapMethod(String),
    InputMethod(String),
    ResolutionScaling(bool),
    /// The logical size pipeline coordinates are authored against (§4.2:
    /// "the controller's declared logical size"). Set before enabling
    /// `ResolutionScaling`; enabling it without one falls back to the
    /// device's current resolution (i.e. no-op scaling).
    LogicalSize(u32, u32),
    DefaultAppPackage(String),
}

#[derive(Default)]
struct Options {
    screencap_method: Option<String>,
    input_method: Option<String>,
    resolution_scaling: bool,
    default_app_package: String,
    /// The logical size pipeline coordinates are authored against, used for
    /// scaling when `resolution_scaling` is set.
    logical_size: Option<(u32, u32)>,
}

#[derive(Default)]
struct State {
    connected: bool,
    uuid: String,
    resolution: (u32, u32),
    cached_screenshot: Image,
}

enum Command {
    Connect(u64),
    Click(u64, i32, i32),
    Swipe(u64, i32, i32, i32, i32, i32),
    TouchDown(u64, i32, i32, i32, i32),
    TouchMove(u64, i32, i32, i32, i32),
    TouchUp(u64, i32),
    PressKey(u64, i32),
    InputText(u64, String),
    Screencap(u64),
    StartApp(u64, String),
    StopApp(u64, String),
    Stop,
}

/// The controller façade. Cheaply `Clone`-able; every clone shares the same
/// worker thread, job registry, and state.
#[derive(Clone)]
pub struct Controller {
    id: u64,
    sender: Sender<Command>,
    jobs: Arc<JobRegistry<ControllerResult>>,
    state: Arc<Mutex<State>>,
    options: Arc<Mutex<Options>>,
    exit: Arc<AtomicBool>,
    callbacks: CallbackRegistry,
    worker: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Controller {
    pub fn new(id: u64, transport: Box<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::channel::<Command>();
        let jobs = Arc::new(JobRegistry::new());
        let state = Arc::new(Mutex::new(State::default()));
        let exit = Arc::new(AtomicBool::new(false));
        let callbacks = CallbackRegistry::new(id);

        let worker_jobs = jobs.clone();
        let worker_state = state.clone();
        let worker_exit = exit.clone();
        let worker_callbacks = callbacks.clone();
        let handle = thread::spawn(move || {
            run_worker(id, transport, rx, worker_jobs, worker_state, worker_exit, worker_callbacks);
        });

        Self {
            id,
            sender: tx,
            jobs,
            state,
            options: Arc::new(Mutex::new(Options::default())),
            exit,
            callbacks,
            worker: Arc::new(Mutex::new(Some(handle))),
        }
    }

    pub fn callbacks(&self) -> &CallbackRegistry {
        &self.callbacks
    }

    fn submit(&self, make: impl FnOnce(u64) -> Command) -> Job<ControllerResult> {
        let id = self.jobs.submit(JobKind::ControllerCommand);
        let _ = self.sender.send(make(id));
        Job::new(id, self.jobs.clone())
    }

    pub fn connect(&self) -> Job<ControllerResult> {
        self.submit(Command::Connect)
    }

    pub fn click(&self, x: i32, y: i32) -> Job<ControllerResult> {
        let (x, y) = self.scale(x, y);
        self.submit(|id| Command::Click(id, x, y))
    }

    pub fn swipe(&self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: i32) -> Job<ControllerResult> {
        let (x1, y1) = self.scale(x1, y1);
        let (x2, y2) = self.scale(x2, y2);
        self.submit(move |id| Command::Swipe(id, x1, y1, x2, y2, duration_ms))
    }

    pub fn touch_down(&self, contact: i32, x: i32, y: i32, pressure: i32) -> Job<ControllerResult> {
        let (x, y) = self.scale(x, y);
        self.submit(move |id| Command::TouchDown(id, contact, x, y, pressure))
    }

    pub fn touch_move(&self, contact: i32, x: i32, y: i32, pressure: i32) -> Job<ControllerResult> {
        let (x, y) = self.scale(x, y);
        self.submit(move |id| Command::TouchMove(id, contact, x, y, pressure))
    }

    pub fn touch_up(&self, contact: i32) -> Job<ControllerResult> {
        self.submit(move |id| Command::TouchUp(id, contact))
    }

    pub fn press_key(&self, code: i32) -> Job<ControllerResult> {
        self.submit(move |id| Command::PressKey(id, code))
    }

    pub fn input_text(&self, text: impl Into<String>) -> Job<ControllerResult> {
        let text = text.into();
        self.submit(move |id| Command::InputText(id, text))
    }

    pub fn screencap(&self) -> Job<ControllerResult> {
        self.submit(Command::Screencap)
    }

    pub fn start_app(&self, package: impl Into<String>) -> Job<ControllerResult> {
        let package = self.resolve_package(package.into());
        self.submit(move |id| Command::StartApp(id, package))
    }

    pub fn stop_app(&self, package: impl Into<String>) -> Job<ControllerResult> {
        let package = self.resolve_package(package.into());
        self.submit(move |id| Command::StopApp(id, package))
    }

    fn resolve_package(&self, package: String) -> String {
        if !package.is_empty() {
            return package;
        }
        self.options.lock().unwrap().default_app_package.clone()
    }

    fn scale(&self, x: i32, y: i32) -> (i32, i32) {
        let options = self.options.lock().unwrap();
        if !options.resolution_scaling {
            return (x, y);
        }
        let Some((logical_w, logical_h)) = options.logical_size else { return (x, y) };
        let (device_w, device_h) = self.state.lock().unwrap().resolution;
        if logical_w == 0 || logical_h == 0 || device_w == 0 || device_h == 0 {
            return (x, y);
        }
        let scaled_x = (x as i64 * device_w as i64 / logical_w as i64) as i32;
        let scaled_y = (y as i64 * device_h as i64 / logical_h as i64) as i32;
        (scaled_x, scaled_y)
    }

    /// Synchronous accessors (§4.2). Never block on the worker.
    pub fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn get_image(&self) -> Image {
        self.state.lock().unwrap().cached_screenshot.clone()
    }

    pub fn get_uuid(&self) -> String {
        self.state.lock().unwrap().uuid.clone()
    }

    pub fn get_resolution(&self) -> (u32, u32) {
        self.state.lock().unwrap().resolution
    }

    pub fn set_option(&self, option: ControllerOption) {
        let mut options = self.options.lock().unwrap();
        match option {
            ControllerOption::ScreencapMethod(m) => options.screencap_method = Some(m),
            ControllerOption::InputMethod(m) => options.input_method = Some(m),
            ControllerOption::ResolutionScaling(on) => {
                options.resolution_scaling = on;
                if on && options.logical_size.is_none() {
                    options.logical_size = Some(self.state.lock().unwrap().resolution);
                }
            }
            ControllerOption::LogicalSize(w, h) => options.logical_size = Some((w, h)),
            ControllerOption::DefaultAppPackage(pkg) => options.default_app_package = pkg,
        }
    }

    /// Screen-freeze predicate (§4.2): succeed once no change larger than
    /// `threshold` has held for a contiguous window of `time_ms`, or fail
    /// with `Timeout` after `timeout_ms`.
    #[instrument(skip(self, exit))]
    pub fn wait_freezes(
        &self,
        rect: Rect,
        time_ms: i32,
        threshold: f64,
        method: FreezeMethod,
        timeout_ms: i32,
        exit: &AtomicBool,
    ) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(0) as u64);
        let mut stable_since: Option<Instant> = None;
        let mut previous: Option<Vec<u8>> = None;
        loop {
            if self.exit.load(Ordering::SeqCst) || exit.load(Ordering::SeqCst) {
                return Err(Error::Interrupted);
            }
            if Instant::now() > deadline {
                return Err(Error::Timeout(None));
            }
            let job = self.screencap();
            if job.wait() != crate::job::Status::Succeeded {
                return Err(Error::TransportFailure("screencap failed during freeze wait".into()));
            }
            let frame = self.get_image().crop(rect);
            let gray = frame.to_gray();
            let unchanged = previous
                .as_ref()
                .map(|prev| similarity(prev, &gray, method) <= threshold)
                .unwrap_or(false);
            previous = Some(gray);
            if unchanged {
                let since = stable_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= Duration::from_millis(time_ms.max(0) as u64) {
                    return Ok(());
                }
            } else {
                stable_since = None;
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    /// Interruptible sleep, checked at bounded granularity (§5: ≤5s chunks).
    pub fn sleep(&self, ms: u64) {
        interruptible_sleep(ms, &self.exit);
    }

    pub fn stop(&self) {
        self.exit.store(true, Ordering::SeqCst);
        let _ = self.sender.send(Command::Stop);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.jobs.fail_all_outstanding(Err(Error::Interrupted));
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if Arc::strong_count(&self.worker) == 1 {
            self.stop();
        }
    }
}

/// Block in ≤5s chunks so a `stop()` is observed promptly (§5).
pub(crate) fn interruptible_sleep(ms: u64, exit: &AtomicBool) {
    let mut remaining = ms;
    const CHUNK_MS: u64 = 5000;
    while remaining > 0 {
        if exit.load(Ordering::SeqCst) {
            return;
        }
        let chunk = remaining.min(CHUNK_MS);
        thread::sleep(Duration::from_millis(chunk));
        remaining -= chunk;
    }
}

fn similarity(a: &[u8], b: &[u8], method: FreezeMethod) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::MAX;
    }
    match method {
        FreezeMethod::PixelDiff => {
            let sum: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64 - *y as f64).abs()).sum();
            sum / (a.len() as f64 * 255.0)
        }
        FreezeMethod::Histogram => {
            let hist_a = histogram16(a);
            let hist_b = histogram16(b);
            let total = a.len() as f64;
            hist_a.iter().zip(hist_b.iter()).map(|(x, y)| (*x as f64 - *y as f64).abs()).sum::<f64>()
                / (2.0 * total)
        }
        FreezeMethod::TemplateCorrelation => {
            let mean_a = a.iter().map(|&v| v as f64).sum::<f64>() / a.len() as f64;
            let mean_b = b.iter().map(|&v| v as f64).sum::<f64>() / b.len() as f64;
            let mut num = 0.0;
            let mut den_a = 0.0;
            let mut den_b = 0.0;
            for (x, y) in a.iter().zip(b) {
                let da = *x as f64 - mean_a;
                let db = *y as f64 - mean_b;
                num += da * db;
                den_a += da * da;
                den_b += db * db;
            }
            let denom = (den_a * den_b).sqrt();
            let correlation = if denom == 0.0 { 1.0 } else { num / denom };
            1.0 - correlation.clamp(-1.0, 1.0)
        }
    }
}

fn histogram16(data: &[u8]) -> [u32; 16] {
    let mut hist = [0u32; 16];
    for &v in data {
        hist[(v / 16) as usize] += 1;
    }
    hist
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    id: u64,
    mut transport: Box<dyn Transport>,
    rx: mpsc::Receiver<Command>,
    jobs: Arc<JobRegistry<ControllerResult>>,
    state: Arc<Mutex<State>>,
    exit: Arc<AtomicBool>,
    callbacks: CallbackRegistry,
) {
    while let Ok(command) = rx.recv() {
        if exit.load(Ordering::SeqCst) {
            break;
        }
        let action_name = command_name(&command);
        let (job_id, outcome) = match command {
            Command::Stop => break,
            Command::Connect(job_id) => {
                jobs.set_running(job_id);
                if state.lock().unwrap().connected {
                    let uuid = state.lock().unwrap().uuid.clone();
                    callbacks.dispatch("controller.connected", &format!("{{\"uuid\":{uuid:?}}}"));
                    (job_id, Ok(()))
                } else {
                    let connect_result = transport.connect();
                    let uuid = connect_result.clone().unwrap_or_default();
                    let outcome = connect_result.map(|uuid| {
                        let resolution = transport.resolution().unwrap_or((0, 0));
                        let mut state = state.lock().unwrap();
                        state.connected = true;
                        state.uuid = uuid;
                        state.resolution = resolution;
                    });
                    callbacks.dispatch("controller.connected", &format!("{{\"uuid\":{uuid:?}}}"));
                    (job_id, outcome)
                }
            }
            Command::Click(job_id, x, y) => {
                jobs.set_running(job_id);
                debug!(x, y, "controller click");
                (job_id, transport.click(x, y))
            }
            Command::Swipe(job_id, x1, y1, x2, y2, dur) => {
                jobs.set_running(job_id);
                (job_id, transport.swipe(x1, y1, x2, y2, dur))
            }
            Command::TouchDown(job_id, c, x, y, p) => {
                jobs.set_running(job_id);
                (job_id, transport.touch_down(c, x, y, p))
            }
            Command::TouchMove(job_id, c, x, y, p) => {
                jobs.set_running(job_id);
                (job_id, transport.touch_move(c, x, y, p))
            }
            Command::TouchUp(job_id, c) => {
                jobs.set_running(job_id);
                (job_id, transport.touch_up(c))
            }
            Command::PressKey(job_id, code) => {
                jobs.set_running(job_id);
                (job_id, transport.press_key(code))
            }
            Command::InputText(job_id, text) => {
                jobs.set_running(job_id);
                (job_id, transport.input_text(&text))
            }
            Command::Screencap(job_id) => {
                jobs.set_running(job_id);
                let outcome = transport.screencap().map(|image| {
                    state.lock().unwrap().cached_screenshot = image;
                });
                (job_id, outcome)
            }
            Command::StartApp(job_id, pkg) => {
                jobs.set_running(job_id);
                (job_id, transport.start_app(&pkg))
            }
            Command::StopApp(job_id, pkg) => {
                jobs.set_running(job_id);
                (job_id, transport.stop_app(&pkg))
            }
        };
        let ok = outcome.is_ok();
        if !ok {
            warn!(controller_id = id, ?outcome, "controller command failed");
        }
        jobs.complete(job_id, outcome);
        callbacks.dispatch(
            "controller.action",
            &format!("{{\"action\":{action_name:?},\"ok\":{ok}}}"),
        );
    }
    info!(controller_id = id, "controller worker exiting");
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Connect(_) => "connect",
        Command::Click(..) => "click",
        Command::Swipe(..) => "swipe",
        Command::TouchDown(..) => "touch_down",
        Command::TouchMove(..) => "touch_move",
        Command::TouchUp(..) => "touch_up",
        Command::PressKey(..) => "press_key",
        Command::InputText(..) => "input_text",
        Command::Screencap(..) => "screencap",
        Command::StartApp(..) => "start_app",
        Command::StopApp(..) => "stop_app",
        Command::Stop => "stop",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::dbg::DbgTransport;
    use crate::job::Status;

    #[test]
    fn connect_then_click_round_trips_through_the_job_registry() {
        let controller = Controller::new(1, Box::new(DbgTransport::carousel(vec![Image::from_raw(2, 2, crate::common::PixelLayout::Gray8, vec![0; 4]).unwrap()])));
        assert_eq!(controller.connect().wait(), Status::Succeeded);
        assert!(controller.connected());
        assert_eq!(controller.click(1, 1).wait(), Status::Succeeded);
        controller.stop();
    }

    #[test]
    fn resolution_scaling_maps_logical_to_device_coordinates() {
        let controller = Controller::new(2, Box::new(DbgTransport::carousel(vec![Image::from_raw(1, 1, crate::common::PixelLayout::Gray8, vec![0]).unwrap()])));
        controller.connect().wait();
        {
            let mut state = controller.state.lock().unwrap();
            state.resolution = (1000, 2000);
        }
        controller.options.lock().unwrap().logical_size = Some((500, 1000));
        controller.set_option(ControllerOption::ResolutionScaling(true));
        let (x, y) = controller.scale(250, 500);
        assert_eq!((x, y), (500, 1000));
        controller.stop();
    }

    #[test]
    fn stop_fails_outstanding_jobs_as_interrupted() {
        let controller = Controller::new(3, Box::new(DbgTransport::carousel(vec![Image::from_raw(1, 1, crate::common::PixelLayout::Gray8, vec![0]).unwrap()])));
        let job = controller.connect();
        controller.stop();
        job.wait();
        assert!(controller.jobs.all_finished());
    }
}

//! User-injectable plug-in contracts (§6): custom recognizers, actions, and
//! an entire custom controller transport.
//!
//! Grounded on `src/custom/{custom_recognizer,custom_action,custom_controller}.rs`,
//! stripped of their FFI trampolines (`analyze`/`run`/`stop` called directly
//! through a C function pointer there) down to plain Rust trait objects —
//! there is no FFI boundary to trampoline across in this crate.

use serde_json::Value;

use crate::common::{Image, Rect};
use crate::context::SyncContext;
use crate::controller::Transport;
use crate::error::Result;

/// A user-supplied recognizer (§4.3's "custom adapter"). Invoked on the
/// engine thread; `image`/`roi` are already resolved by the dispatcher.
/// `sync_ctx` lets the recognizer reach back into the engine (e.g. take an
/// extra screencap) the same way a [`CustomAction`] does.
pub trait CustomRecognizer: Send + Sync {
    fn analyze(&self, sync_ctx: &SyncContext, image: &Image, roi: Rect, task_name: &str, param: &Value) -> Option<(Rect, Value)>;
}

/// A user-supplied action (§4.5's `Custom` action kind). `run` returns
/// `false` to signal the same explicit termination `StopTask` does.
/// `stop` is called when the engine is asked to stop while this action may
/// be in flight, or when the action is unregistered while unused (§9
/// decision).
pub trait CustomAction: Send + Sync {
    fn run(&self, ctx: &SyncContext, task_name: &str, param: &Value, cur_box: Rect, cur_detail: &Value) -> bool;
    fn stop(&self) {}
}

/// A user-supplied device transport, implementing exactly the same
/// capability set the built-in transports do (§6). Any `CustomController`
/// impl is usable wherever a [`Transport`] is — the trait is the bridge.
pub trait CustomController: Send {
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

impl<T: CustomController> Transport for T {
    fn connect(&mut self) -> Result<String> {
        CustomController::connect(self)
    }
    fn resolution(&mut self) -> Result<(u32, u32)> {
        CustomController::resolution(self)
    }
    fn screencap(&mut self) -> Result<Image> {
        CustomController::screencap(self)
    }
    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        CustomController::click(self, x, y)
    }
    fn swipe(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, duration_ms: i32) -> Result<()> {
        CustomController::swipe(self, x1, y1, x2, y2, duration_ms)
    }
    fn touch_down(&mut self, contact: i32, x: i32, y: i32, pressure: i32) -> Result<()> {
        CustomController::touch_down(self, contact, x, y, pressure)
    }
    fn touch_move(&mut self, contact: i32, x: i32, y: i32, pressure: i32) -> Result<()> {
        CustomController::touch_move(self, contact, x, y, pressure)
    }
    fn touch_up(&mut self, contact: i32) -> Result<()> {
        CustomController::touch_up(self, contact)
    }
    fn press_key(&mut self, code: i32) -> Result<()> {
        CustomController::press_key(self, code)
    }
    fn input_text(&mut self, text: &str) -> Result<()> {
        CustomController::input_text(self, text)
    }
    fn start_app(&mut self, package: &str) -> Result<()> {
        CustomController::start_app(self, package)
    }
    fn stop_app(&mut self, package: &str) -> Result<()> {
        CustomController::stop_app(self, package)
    }
}

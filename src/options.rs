//! Process-wide configuration (§2a, §6): a lazily-initialised `GlobalOptions`
//! plus the per-object option enums embedders set through `set_option`.
//!
//! Grounded on the teacher's `GlobalOptionMgr`/`MaaGlobalSetOption` surface
//! (`maa-framework/src/lib.rs`'s `set_global_option`/`configure_logging`/
//! `set_debug_mode`/`set_save_on_error` functions) and `MaaControllerOption`'s
//! pattern of a typed enum per configurable object kind rather than untyped
//! key/value pairs.

use std::sync::{Mutex, OnceLock};

use tracing::Level;

/// Global runtime knobs (§6: `log_dir`, `save_draw_debug`, `recording`),
/// initialised once and read by every object in the process.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub log_dir: String,
    pub save_draw_debug: bool,
    pub recording: bool,
    pub stdout_level: Level,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self { log_dir: "./debug".to_string(), save_draw_debug: false, recording: false, stdout_level: Level::INFO }
    }
}

fn global() -> &'static Mutex<GlobalOptions> {
    static GLOBAL: OnceLock<Mutex<GlobalOptions>> = OnceLock::new();
    GLOBAL.get_or_init(|| Mutex::new(GlobalOptions::default()))
}

pub fn global_options() -> GlobalOptions {
    global().lock().unwrap().clone()
}

pub fn set_log_dir(dir: impl Into<String>) {
    global().lock().unwrap().log_dir = dir.into();
}

pub fn set_save_draw_debug(on: bool) {
    global().lock().unwrap().save_draw_debug = on;
}

pub fn set_recording(on: bool) {
    global().lock().unwrap().recording = on;
}

pub fn set_stdout_level(level: Level) {
    global().lock().unwrap().stdout_level = level;
}

/// Recognized `Resource::set_option` keys (§6: "resource: inference_device").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOption {
    InferenceDevice(InferenceDevice),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceDevice {
    #[default]
    Cpu,
    Cuda(u32),
    DirectMl(u32),
    CoreMl,
    AutoExecutionProvider,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let options = GlobalOptions::default();
        assert!(!options.save_draw_debug);
        assert!(!options.recording);
    }

    #[test]
    fn setters_are_visible_through_global_options() {
        set_log_dir("/tmp/screenpilot-logs");
        set_save_draw_debug(true);
        let options = global_options();
        assert_eq!(options.log_dir, "/tmp/screenpilot-logs");
        assert!(options.save_draw_debug);
        // Reset so other tests in this process observe defaults again.
        set_save_draw_debug(false);
    }
}

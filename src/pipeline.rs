//! The pipeline resource model: serde types for a resource bundle's node
//! graph (§3 "TaskData") plus the `Recognition`/`Action` tagged unions nodes
//! are built from.
//!
//! Grounded on the teacher's `pipeline.rs`: the `scalar_or_vec` scalar-or-array
//! deserializer, the `#[serde(tag = "type", content = "param")]` shape for
//! `Recognition`/`Action`, and per-field `#[serde(default = "...")]` value
//! functions. Field names and the recognition/action variant sets are
//! narrowed to exactly what §2-§4 name; no teacher variant without a spec
//! counterpart (`FeatureMatch`, `And`/`Or`, `Scroll`, `Command`, `Shell`, …)
//! is carried over.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::common::Rect;

fn scalar_or_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if let Ok(vec) = serde_json::from_value::<Vec<T>>(value.clone()) {
        return Ok(vec);
    }
    if let Ok(single) = serde_json::from_value::<T>(value) {
        return Ok(vec![single]);
    }
    Err(serde::de::Error::custom("expected T or [T]"))
}

/// Where a recognition ROI or an action's coordinates resolve from.
///
/// Serialized the way the teacher's untagged `Target` reads in a pipeline
/// JSON bundle (`true`, a node name, `[x,y]`, or `[x,y,w,h]`), but the
/// variants carry the spec's own Self/PreTask/Region vocabulary rather than
/// the teacher's Bool/Name/Point/Rect one — resolution (in
/// [`crate::actuator`]) needs to know *which* of those three kinds it's
/// looking at, not just what shape the JSON took.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Target {
    /// `true` — use the box the owning node's own recognition step just hit.
    /// `false` — use the whole image (only meaningful as a recognition ROI).
    SelfOrWhole(bool),
    /// A node name — use that node's remembered box from this task run.
    PreTask(String),
    /// An explicit point, widened to a zero-size region.
    Point(i32, i32),
    /// An explicit absolute region.
    Region(i32, i32, i32, i32),
}

impl Default for Target {
    fn default() -> Self {
        Target::SelfOrWhole(true)
    }
}

impl Target {
    /// Resolve to a concrete rect given the box the owning node's own
    /// recognition step just produced (`self_box`, if any) and the run's
    /// memory of every node's last box (`pre_task_boxes`). `whole` is
    /// returned for `SelfOrWhole(false)` — "the whole image" — the meaning
    /// it carries as a recognition ROI.
    pub fn resolve(
        &self,
        self_box: Option<Rect>,
        pre_task_boxes: &HashMap<String, Rect>,
        whole: Rect,
    ) -> Option<Rect> {
        match self {
            Target::SelfOrWhole(true) => self_box,
            Target::SelfOrWhole(false) => Some(whole),
            Target::PreTask(name) => pre_task_boxes.get(name).copied(),
            Target::Point(x, y) => Some(Rect::new(*x, *y, 0, 0)),
            Target::Region(x, y, w, h) => Some(Rect::new(*x, *y, *w, *h)),
        }
    }
}

fn default_threshold() -> f64 {
    0.7
}
fn default_ocr_threshold() -> f64 {
    0.3
}
fn default_order_by() -> String {
    "horizontal".to_string()
}
fn default_pressure() -> i32 {
    1
}
fn default_duration() -> i32 {
    200
}
fn default_wait_time() -> i32 {
    1000
}
fn default_wait_threshold() -> f64 {
    0.95
}
fn default_timeout() -> i32 {
    20_000
}
fn default_times_limit() -> i32 {
    i32::MAX
}
fn default_true() -> bool {
    true
}

/// The method a screen-freeze predicate (§4.2) uses to decide "unchanged".
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FreezeMethod {
    #[default]
    PixelDiff,
    Histogram,
    TemplateCorrelation,
}

/// A pre- or post-action freeze wait: block until the target region stops
/// changing, or until `timeout` elapses.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WaitFreezes {
    #[serde(default = "default_wait_time")]
    pub time: i32,
    #[serde(default = "default_wait_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub method: FreezeMethod,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub target_offset: Rect,
    #[serde(default = "default_timeout")]
    pub timeout: i32,
}

impl Default for WaitFreezes {
    fn default() -> Self {
        Self {
            time: default_wait_time(),
            threshold: default_wait_threshold(),
            method: FreezeMethod::default(),
            target: Target::default(),
            target_offset: Rect::ZERO,
            timeout: default_timeout(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DirectHit {}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TemplateMatch {
    #[serde(deserialize_with = "scalar_or_vec")]
    pub template: Vec<String>,
    #[serde(default)]
    pub roi: Target,
    #[serde(default)]
    pub roi_offset: Rect,
    #[serde(default = "default_threshold", deserialize_with = "scalar_or_vec")]
    pub threshold: Vec<f64>,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub green_mask: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ColorMatch {
    #[serde(deserialize_with = "scalar_or_vec")]
    pub lower: Vec<[i32; 3]>,
    #[serde(deserialize_with = "scalar_or_vec")]
    pub upper: Vec<[i32; 3]>,
    #[serde(default)]
    pub roi: Target,
    #[serde(default)]
    pub roi_offset: Rect,
    #[serde(default = "default_order_by")]
    pub order_by: String,
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub connected: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Ocr {
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub expected: Vec<String>,
    #[serde(default)]
    pub roi: Target,
    #[serde(default)]
    pub roi_offset: Rect,
    #[serde(default = "default_ocr_threshold")]
    pub threshold: f64,
    #[serde(default)]
    pub only_rec: bool,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub index: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Classify {
    #[serde(default)]
    pub model: String,
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub expected: Vec<String>,
    #[serde(default)]
    pub roi: Target,
    #[serde(default)]
    pub roi_offset: Rect,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Detect {
    #[serde(default)]
    pub model: String,
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub expected: Vec<String>,
    #[serde(default)]
    pub roi: Target,
    #[serde(default)]
    pub roi_offset: Rect,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CustomRecognition {
    pub custom_recognition: String,
    #[serde(default)]
    pub roi: Target,
    #[serde(default)]
    pub roi_offset: Rect,
    #[serde(default)]
    pub custom_recognition_param: Value,
}

/// A recognition step: vision-adapter selection plus its parameter block.
///
/// Only the kinds §2/§4.3 name (direct-hit, template-match, colour-match,
/// OCR, classifier, detector, custom) have variants; the teacher's
/// `FeatureMatch`/`And`/`Or` have no counterpart and are not carried over.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", content = "param")]
pub enum Recognition {
    DirectHit(DirectHit),
    TemplateMatch(TemplateMatch),
    ColorMatch(ColorMatch),
    Ocr(Ocr),
    Classify(Classify),
    Detect(Detect),
    Custom(CustomRecognition),
}

impl Recognition {
    /// The `roi`/`roi_offset` every variant carries, used by the dispatcher
    /// to compute a default search region before applying an ROI cache.
    pub fn roi(&self) -> (&Target, Rect) {
        match self {
            Recognition::DirectHit(_) => (&DIRECT_HIT_ROI, Rect::ZERO),
            Recognition::TemplateMatch(r) => (&r.roi, r.roi_offset),
            Recognition::ColorMatch(r) => (&r.roi, r.roi_offset),
            Recognition::Ocr(r) => (&r.roi, r.roi_offset),
            Recognition::Classify(r) => (&r.roi, r.roi_offset),
            Recognition::Detect(r) => (&r.roi, r.roi_offset),
            Recognition::Custom(r) => (&r.roi, r.roi_offset),
        }
    }
}

const DIRECT_HIT_ROI: Target = Target::SelfOrWhole(false);

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DoNothing {}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct StopTask {}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Click {
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub target_offset: Rect,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Swipe {
    #[serde(default)]
    pub begin: Target,
    #[serde(default)]
    pub begin_offset: Rect,
    #[serde(default)]
    pub end: Target,
    #[serde(default)]
    pub end_offset: Rect,
    #[serde(default = "default_duration")]
    pub duration: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Key {
    #[serde(deserialize_with = "scalar_or_vec")]
    pub key: Vec<i32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct App {
    #[serde(default)]
    pub package: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct CustomAction {
    pub custom_action: String,
    #[serde(default)]
    pub custom_action_param: Value,
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub target_offset: Rect,
}

/// An actuation step: action kind plus its parameter block. Matches §4.5's
/// kind list exactly.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", content = "param")]
pub enum Action {
    DoNothing(DoNothing),
    Click(Click),
    Swipe(Swipe),
    Key(Key),
    StartApp(App),
    StopApp(App),
    Custom(CustomAction),
    StopTask(StopTask),
}

impl Default for Action {
    fn default() -> Self {
        Action::DoNothing(DoNothing {})
    }
}

/// One node in the resource bundle's pipeline graph (§3 "TaskData").
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskData {
    #[serde(default)]
    pub name: String,
    pub recognition: Recognition,
    #[serde(default)]
    pub action: Action,
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub next: Vec<String>,
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub timeout_next: Vec<String>,
    #[serde(default, deserialize_with = "scalar_or_vec")]
    pub runout_next: Vec<String>,
    #[serde(default)]
    pub is_sub: bool,
    #[serde(default)]
    pub inverse: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub pre_delay: u64,
    #[serde(default)]
    pub post_delay: u64,
    #[serde(default)]
    pub pre_wait_freezes: Option<WaitFreezes>,
    #[serde(default)]
    pub post_wait_freezes: Option<WaitFreezes>,
    #[serde(default = "default_timeout")]
    pub timeout: i32,
    #[serde(default = "default_times_limit")]
    pub times_limit: i32,
    #[serde(default)]
    pub roi_cache_from: Option<String>,
}

/// The resource bundle's in-memory pipeline graph: node name to `TaskData`,
/// as published by [`crate::resource::Resource`] after validation.
pub type Graph = HashMap<String, TaskData>;

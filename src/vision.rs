//! Vision adapter contract (§4.3): input/output shape only. The concrete
//! matching/OCR/inference algorithms are out of scope (§1) — embedders
//! supply them by implementing [`VisionBackend`].
//!
//! Grounded on `original_source/.../Recognizer.h`'s `{image, roi, param} ->
//! results` contract and the teacher's `src/instance.rs` dispatch-by-kind
//! shape, generalized from "call across FFI into the bound library's
//! detector" to "call a user-supplied backend trait object".

use std::collections::HashMap;

use serde_json::Value;

use crate::common::{Image, Rect};
use crate::context::SyncContext;
use crate::custom::CustomRecognizer;
use crate::pipeline::{ColorMatch, Classify, Detect, Ocr, Recognition, TaskData, TemplateMatch};

/// One candidate produced by a vision adapter.
#[derive(Debug, Clone)]
pub struct RecognitionResult {
    pub rect: Rect,
    pub score: f64,
    pub label: Option<String>,
    pub text: Option<String>,
    pub detail: Value,
}

impl RecognitionResult {
    /// The zero-information "it hit, with no box" result `DirectHit` and
    /// `inverse`-synthesised hits use.
    pub fn empty_box() -> Self {
        Self { rect: Rect::ZERO, score: 1.0, label: None, text: None, detail: Value::Null }
    }
}

/// Implemented by the embedder to supply the concrete vision algorithms
/// (§1: "only their input/output contract is part of the core"). Each method
/// receives the already-resolved search region and must return survivors —
/// already filtered by score/threshold/expected-label — in the adapter's own
/// natural order; the dispatcher takes the first one.
pub trait VisionBackend: Send + Sync {
    fn template_match(&self, image: &Image, roi: Rect, param: &TemplateMatch) -> Vec<RecognitionResult>;
    fn color_match(&self, image: &Image, roi: Rect, param: &ColorMatch) -> Vec<RecognitionResult>;
    fn ocr(&self, image: &Image, roi: Rect, param: &Ocr) -> Vec<RecognitionResult>;
    fn classify(&self, image: &Image, roi: Rect, param: &Classify) -> Vec<RecognitionResult>;
    fn detect(&self, image: &Image, roi: Rect, param: &Detect) -> Vec<RecognitionResult>;
}

/// Resolve `recognition`'s ROI, honoring `roi_cache_from` (§4.4 step 1):
/// a cached box from a sibling node overrides the node's own declared ROI.
pub fn resolve_roi(
    recognition: &Recognition,
    roi_cache_from: Option<&str>,
    pre_task_boxes: &HashMap<String, Rect>,
    image: &Image,
) -> Rect {
    let whole = Rect::new(0, 0, image.width() as i32, image.height() as i32);
    if let Some(cached_from) = roi_cache_from {
        if let Some(cached) = pre_task_boxes.get(cached_from) {
            return *cached;
        }
    }
    let (target, offset) = recognition.roi();
    target.resolve(None, pre_task_boxes, whole).unwrap_or(whole).offset_by(offset)
}

/// The recognizer dispatcher (§4.4): select the adapter for `node`'s
/// recognition kind, invoke it, and apply the `inverse` flag.
pub fn dispatch(
    sync_ctx: &SyncContext,
    image: &Image,
    node: &TaskData,
    pre_task_boxes: &HashMap<String, Rect>,
    backend: &dyn VisionBackend,
    custom: Option<&dyn CustomRecognizer>,
) -> Option<RecognitionResult> {
    let roi = resolve_roi(&node.recognition, node.roi_cache_from.as_deref(), pre_task_boxes, image);
    let hit = match &node.recognition {
        Recognition::DirectHit(_) => Some(RecognitionResult::empty_box()),
        Recognition::TemplateMatch(p) => backend.template_match(image, roi, p).into_iter().next(),
        Recognition::ColorMatch(p) => backend.color_match(image, roi, p).into_iter().next(),
        Recognition::Ocr(p) => backend.ocr(image, roi, p).into_iter().next(),
        Recognition::Classify(p) => backend.classify(image, roi, p).into_iter().next(),
        Recognition::Detect(p) => backend.detect(image, roi, p).into_iter().next(),
        Recognition::Custom(p) => custom.and_then(|c| {
            c.analyze(sync_ctx, image, roi, &node.name, &p.custom_recognition_param)
                .map(|(rect, detail)| RecognitionResult { rect, score: 1.0, label: None, text: None, detail })
        }),
    };
    if node.inverse {
        return match hit {
            Some(_) => None,
            None => Some(RecognitionResult::empty_box()),
        };
    }
    hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PixelLayout;
    use crate::controller::dbg::DbgTransport;
    use crate::controller::Controller;
    use crate::pipeline::DirectHit;
    use crate::resource::Resource;
    use crate::tasker::{RunStatus, Tasker};
    use std::sync::{Arc, Mutex};

    /// A `SyncContext` exists only through a live `Tasker`; these tests don't
    /// touch it (no `Recognition::Custom` node), so a minimal scaffold with a
    /// null backend is enough to construct one.
    fn sync_ctx() -> SyncContext {
        let controller = Controller::new(1, Box::new(DbgTransport::carousel(vec![Image::from_raw(1, 1, PixelLayout::Gray8, vec![0]).unwrap()])));
        let resource = Resource::new(1);
        let tasker = Tasker::new(2, controller, resource, Arc::new(NeverHits));
        tasker.make_sync_context(Arc::new(Mutex::new(RunStatus::default())))
    }

    struct NeverHits;
    impl VisionBackend for NeverHits {
        fn template_match(&self, _: &Image, _: Rect, _: &TemplateMatch) -> Vec<RecognitionResult> { vec![] }
        fn color_match(&self, _: &Image, _: Rect, _: &ColorMatch) -> Vec<RecognitionResult> { vec![] }
        fn ocr(&self, _: &Image, _: Rect, _: &Ocr) -> Vec<RecognitionResult> { vec![] }
        fn classify(&self, _: &Image, _: Rect, _: &Classify) -> Vec<RecognitionResult> { vec![] }
        fn detect(&self, _: &Image, _: Rect, _: &Detect) -> Vec<RecognitionResult> { vec![] }
    }

    fn blank_node(recognition: Recognition, inverse: bool) -> TaskData {
        TaskData {
            name: "n".into(),
            recognition,
            action: Default::default(),
            next: vec![],
            timeout_next: vec![],
            runout_next: vec![],
            is_sub: false,
            inverse,
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

    fn image() -> Image {
        Image::from_raw(4, 4, PixelLayout::Gray8, vec![0; 16]).unwrap()
    }

    #[test]
    fn direct_hit_always_returns_empty_box() {
        let node = blank_node(Recognition::DirectHit(DirectHit {}), false);
        let result = dispatch(&sync_ctx(), &image(), &node, &HashMap::new(), &NeverHits, None);
        assert!(result.is_some());
    }

    #[test]
    fn inverse_on_a_miss_synthesises_a_hit() {
        let node = blank_node(
            Recognition::TemplateMatch(TemplateMatch {
                template: vec!["x.png".into()],
                roi: Target::default(),
                roi_offset: Rect::ZERO,
                threshold: vec![0.7],
                order_by: "horizontal".into(),
                index: 0,
                green_mask: false,
            }),
            true,
        );
        let result = dispatch(&sync_ctx(), &image(), &node, &HashMap::new(), &NeverHits, None);
        assert!(result.is_some());
    }

    #[test]
    fn inverse_on_a_hit_suppresses_it() {
        struct AlwaysHits;
        impl VisionBackend for AlwaysHits {
            fn template_match(&self, _: &Image, roi: Rect, _: &TemplateMatch) -> Vec<RecognitionResult> {
                vec![RecognitionResult { rect: roi, score: 1.0, label: None, text: None, detail: Value::Null }]
            }
            fn color_match(&self, _: &Image, _: Rect, _: &ColorMatch) -> Vec<RecognitionResult> { vec![] }
            fn ocr(&self, _: &Image, _: Rect, _: &Ocr) -> Vec<RecognitionResult> { vec![] }
            fn classify(&self, _: &Image, _: Rect, _: &Classify) -> Vec<RecognitionResult> { vec![] }
            fn detect(&self, _: &Image, _: Rect, _: &Detect) -> Vec<RecognitionResult> { vec![] }
        }
        let node = blank_node(
            Recognition::TemplateMatch(TemplateMatch {
                template: vec!["x.png".into()],
                roi: Target::default(),
                roi_offset: Rect::ZERO,
                threshold: vec![0.7],
                order_by: "horizontal".into(),
                index: 0,
                green_mask: false,
            }),
            true,
        );
        let result = dispatch(&sync_ctx(), &image(), &node, &HashMap::new(), &AlwaysHits, None);
        assert!(result.is_none());
    }
}

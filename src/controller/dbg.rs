//! A deterministic in-memory transport for tests and the bundled demo.
//!
//! Grounded on the teacher's `controller/dbg.rs` (`MaaDbgControllerType`'s
//! `CarouselImage`/`ReplayRecording` variants) — reimplemented as a real,
//! runnable mock instead of an FFI enum tag, per §2a's "deterministic
//! in-memory mock controller... so the end-to-end scenarios in §8 run
//! without a real device."

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::common::Image;
use crate::controller::Transport;
use crate::error::{Error, Result};

/// One step of a recorded interaction, for `DbgTransport::replay`.
#[derive(Debug, Clone)]
pub enum RecordedStep {
    Connect,
    Screencap(Image),
    Click { x: i32, y: i32 },
    Swipe { x1: i32, y1: i32, x2: i32, y2: i32 },
}

enum Mode {
    /// Cycles endlessly through a fixed list of frames on every screencap.
    Carousel { frames: Vec<Image>, cursor: usize },
    /// Replays a recorded command/frame script, asserting nothing about
    /// what's dispatched — frames are returned in order, other commands are
    /// accepted and recorded for later inspection.
    Replay { frames: VecDeque<Image> },
}

/// The bundled debug/record-replay transport (§8's deterministic harness).
pub struct DbgTransport {
    mode: Mode,
    resolution: (u32, u32),
    log: Vec<RecordedStep>,
    shared_log: Option<Arc<Mutex<Vec<RecordedStep>>>>,
}

impl DbgTransport {
    pub fn carousel(frames: Vec<Image>) -> Self {
        let resolution = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((1280, 720));
        Self { mode: Mode::Carousel { frames, cursor: 0 }, resolution, log: Vec::new(), shared_log: None }
    }

    pub fn replay(frames: Vec<Image>) -> Self {
        let resolution = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((1280, 720));
        Self { mode: Mode::Replay { frames: frames.into() }, resolution, log: Vec::new(), shared_log: None }
    }

    /// A carousel transport whose log is also mirrored into a shared handle,
    /// so a caller that has already moved the transport into a `Controller`
    /// (and thus a worker thread) can still inspect what it dispatched —
    /// §8's end-to-end scenarios need this to assert on scaled coordinates.
    pub fn carousel_with_log(frames: Vec<Image>) -> (Self, Arc<Mutex<Vec<RecordedStep>>>) {
        let mut transport = Self::carousel(frames);
        let shared = Arc::new(Mutex::new(Vec::new()));
        transport.shared_log = Some(shared.clone());
        (transport, shared)
    }

    /// Every command this transport has observed, in order. Only reflects
    /// reality for a transport the caller still owns directly; once moved
    /// into a `Controller`, use the handle from `carousel_with_log` instead.
    pub fn log(&self) -> &[RecordedStep] {
        &self.log
    }

    fn record(&mut self, step: RecordedStep) {
        if let Some(shared) = &self.shared_log {
            shared.lock().unwrap().push(step.clone());
        }
        self.log.push(step);
    }
}

impl Transport for DbgTransport {
    fn connect(&mut self) -> Result<String> {
        self.record(RecordedStep::Connect);
        Ok("dbg-0000".to_string())
    }

    fn resolution(&mut self) -> Result<(u32, u32)> {
        Ok(self.resolution)
    }

    fn screencap(&mut self) -> Result<Image> {
        let frame = match &mut self.mode {
            Mode::Carousel { frames, cursor } => {
                if frames.is_empty() {
                    return Err(Error::TransportFailure("no frames loaded".into()));
                }
                let frame = frames[*cursor].clone();
                *cursor = (*cursor + 1) % frames.len();
                frame
            }
            Mode::Replay { frames } => frames
                .pop_front()
                .ok_or_else(|| Error::TransportFailure("replay script exhausted".into()))?,
        };
        self.record(RecordedStep::Screencap(frame.clone()));
        Ok(frame)
    }

    fn click(&mut self, x: i32, y: i32) -> Result<()> {
        self.record(RecordedStep::Click { x, y });
        Ok(())
    }

    fn swipe(&mut self, x1: i32, y1: i32, x2: i32, y2: i32, _duration_ms: i32) -> Result<()> {
        self.record(RecordedStep::Swipe { x1, y1, x2, y2 });
        Ok(())
    }

    fn touch_down(&mut self, _contact: i32, _x: i32, _y: i32, _pressure: i32) -> Result<()> {
        Ok(())
    }

    fn touch_move(&mut self, _contact: i32, _x: i32, _y: i32, _pressure: i32) -> Result<()> {
        Ok(())
    }

    fn touch_up(&mut self, _contact: i32) -> Result<()> {
        Ok(())
    }

    fn press_key(&mut self, _code: i32) -> Result<()> {
        Ok(())
    }

    fn input_text(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn start_app(&mut self, _package: &str) -> Result<()> {
        Ok(())
    }

    fn stop_app(&mut self, _package: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PixelLayout;

    #[test]
    fn carousel_cycles_through_frames() {
        let a = Image::from_raw(1, 1, PixelLayout::Gray8, vec![1]).unwrap();
        let b = Image::from_raw(1, 1, PixelLayout::Gray8, vec![2]).unwrap();
        let mut transport = DbgTransport::carousel(vec![a.clone(), b.clone()]);
        assert_eq!(transport.screencap().unwrap().raw(), a.raw());
        assert_eq!(transport.screencap().unwrap().raw(), b.raw());
        assert_eq!(transport.screencap().unwrap().raw(), a.raw());
    }

    #[test]
    fn replay_exhausts_and_then_fails() {
        let frame = Image::from_raw(1, 1, PixelLayout::Gray8, vec![1]).unwrap();
        let mut transport = DbgTransport::replay(vec![frame]);
        assert!(transport.screencap().is_ok());
        assert!(transport.screencap().is_err());
    }
}

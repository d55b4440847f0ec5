use std::collections::{BTreeMap, BTreeSet};
use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, RawLabel};
use crate::frame::Frame;

/// Deterministic backend that replays detections keyed by absolute frame
/// index. Used for synthetic runs and pipeline tests.
#[derive(Default)]
pub struct ScriptedBackend {
    script: BTreeMap<u64, Vec<Detection>>,
    failing: BTreeSet<u64>,
}

/// One entry of a JSON detection script.
#[derive(Debug, Deserialize)]
struct ScriptEntry {
    /// Inclusive `[first, last]` frame range.
    frames: [u64; 2],
    label: String,
    confidence: f32,
    #[serde(default)]
    fail: bool,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a script file: a JSON array of
    /// `{"frames": [first, last], "label": "...", "confidence": 0.95}`.
    /// Entries with `"fail": true` make detection fail on those frames.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let entries: Vec<ScriptEntry> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))?;
        let mut backend = Self::new();
        for entry in entries {
            let [first, last] = entry.frames;
            if last < first {
                return Err(anyhow!(
                    "detection script range [{}, {}] is inverted",
                    first,
                    last
                ));
            }
            if entry.fail {
                backend = backend.fail_span(first..=last);
            } else {
                backend = backend.span(
                    first..=last,
                    Detection::new(entry.label.as_str(), entry.confidence),
                );
            }
        }
        Ok(backend)
    }

    /// Report `detection` on a single frame.
    pub fn at(mut self, frame: u64, detection: Detection) -> Self {
        self.script.entry(frame).or_default().push(detection);
        self
    }

    /// Report `detection` on every frame of an inclusive range.
    pub fn span(mut self, frames: RangeInclusive<u64>, detection: Detection) -> Self {
        for frame in frames {
            self.script.entry(frame).or_default().push(detection.clone());
        }
        self
    }

    /// Fail detection on every frame of an inclusive range.
    pub fn fail_span(mut self, frames: RangeInclusive<u64>) -> Self {
        self.failing.extend(frames);
        self
    }

    /// Convenience for a single named label.
    pub fn label_at(self, frame: u64, label: &str, confidence: f32) -> Self {
        self.at(frame, Detection::new(RawLabel::Name(label.to_string()), confidence))
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let index = frame.index();
        if self.failing.contains(&index) {
            return Err(anyhow!("scripted detector failure at frame {}", index));
        }
        Ok(self.script.get(&index).cloned().unwrap_or_default())
    }
}

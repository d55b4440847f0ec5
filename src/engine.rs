//! Event lifecycle engine.
//!
//! Per canonical kind there is a two-state machine: Inactive (no entry in
//! the active table) and Active. Each frame's qualifying detections open or
//! extend events; kinds that stay silent for longer than the merge gap end
//! and are handed back to the caller for materialization. Kinds never
//! interact with each other.
//!
//! The engine is pure bookkeeping: it never touches frames or the
//! filesystem, which keeps the state machine testable in isolation.

use crate::frame::seconds_to_frames;
use crate::kind::KindId;

/// Frame-domain parameters for the lifecycle, derived once per source.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LifecycleParams {
    pub confidence_threshold: f32,
    /// Tentative clip length pushed past every qualifying detection.
    pub base_clip_frames: u64,
    /// Silence tolerated before an active event ends.
    pub merge_gap_frames: u64,
}

impl LifecycleParams {
    pub fn from_seconds(
        confidence_threshold: f32,
        base_clip_seconds: f64,
        merge_gap_seconds: f64,
        fps: f64,
    ) -> Self {
        Self {
            confidence_threshold,
            base_clip_frames: seconds_to_frames(base_clip_seconds, fps),
            merge_gap_frames: seconds_to_frames(merge_gap_seconds, fps),
        }
    }

    pub fn qualifies(&self, confidence: f32) -> bool {
        confidence >= self.confidence_threshold
    }
}

/// Bookkeeping for one in-progress event.
///
/// While active: `start_frame <= last_seen_frame <= end_frame`, and neither
/// `end_frame` nor `max_confidence` ever decreases.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveEvent {
    pub start_frame: u64,
    pub end_frame: u64,
    pub last_seen_frame: u64,
    pub max_confidence: f32,
}

/// Why an event left the active table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    /// No qualifying detection for longer than the merge gap.
    MergeGapExpired,
    /// The source was exhausted or stopped while the event was open.
    StreamEnded,
}

/// An event removed from the active table, ready for materialization.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EndedEvent {
    pub kind: KindId,
    pub event: ActiveEvent,
    pub reason: EndReason,
}

// ----------------------------------------------------------------------------
// ActiveEventTable
// ----------------------------------------------------------------------------

/// Fixed-capacity table with one slot per configured kind, so at most one
/// event per kind can ever be active.
#[derive(Clone, Debug)]
pub struct ActiveEventTable {
    slots: Vec<Option<ActiveEvent>>,
}

impl ActiveEventTable {
    pub fn new(kind_count: usize) -> Self {
        Self {
            slots: vec![None; kind_count],
        }
    }

    pub fn get(&self, kind: KindId) -> Option<&ActiveEvent> {
        self.slots.get(kind.index()).and_then(Option::as_ref)
    }

    pub fn is_active(&self, kind: KindId) -> bool {
        self.get(kind).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Active events in kind enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (KindId, &ActiveEvent)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|ev| (KindId::from_index(i), ev)))
    }

    fn slot_mut(&mut self, kind: KindId) -> &mut Option<ActiveEvent> {
        &mut self.slots[kind.index()]
    }

    fn take(&mut self, kind: KindId) -> Option<ActiveEvent> {
        self.slots.get_mut(kind.index()).and_then(Option::take)
    }
}

// ----------------------------------------------------------------------------
// EventEngine
// ----------------------------------------------------------------------------

pub struct EventEngine {
    params: LifecycleParams,
    table: ActiveEventTable,
}

impl EventEngine {
    pub fn new(params: LifecycleParams, kind_count: usize) -> Self {
        Self {
            params,
            table: ActiveEventTable::new(kind_count),
        }
    }

    pub fn params(&self) -> &LifecycleParams {
        &self.params
    }

    pub fn table(&self) -> &ActiveEventTable {
        &self.table
    }

    /// Process one frame's normalized detections.
    ///
    /// `hits` holds `(kind, confidence)` pairs; pairs below the confidence
    /// threshold are ignored. Returns the events that ended on this frame,
    /// already removed from the table, in kind order.
    pub fn observe(&mut self, frame: u64, hits: &[(KindId, f32)]) -> Vec<EndedEvent> {
        let mut detected = vec![false; self.table.slots.len()];

        for &(kind, confidence) in hits {
            if !self.params.qualifies(confidence) || kind.index() >= detected.len() {
                continue;
            }
            detected[kind.index()] = true;
            let tentative_end = frame.saturating_add(self.params.base_clip_frames);

            let slot = self.table.slot_mut(kind);
            match slot {
                Some(ev) => {
                    ev.last_seen_frame = frame;
                    ev.end_frame = ev.end_frame.max(tentative_end);
                    ev.max_confidence = ev.max_confidence.max(confidence);
                    log::trace!(
                        "event kind#{} extended at frame {} (end={}, max_conf={:.2})",
                        kind.index(),
                        frame,
                        ev.end_frame,
                        ev.max_confidence
                    );
                }
                None => {
                    log::debug!(
                        "event kind#{} started at frame {} (conf={:.2})",
                        kind.index(),
                        frame,
                        confidence
                    );
                    *slot = Some(ActiveEvent {
                        start_frame: frame,
                        end_frame: tentative_end,
                        last_seen_frame: frame,
                        max_confidence: confidence,
                    });
                }
            }
        }

        let expired: Vec<KindId> = self
            .table
            .iter()
            .filter(|(kind, ev)| {
                !detected[kind.index()]
                    && frame.saturating_sub(ev.last_seen_frame) > self.params.merge_gap_frames
            })
            .map(|(kind, _)| kind)
            .collect();

        expired
            .into_iter()
            .filter_map(|kind| self.end(kind, EndReason::MergeGapExpired))
            .collect()
    }

    /// End every active event; used when the stream is exhausted or stopped.
    pub fn flush(&mut self) -> Vec<EndedEvent> {
        let open: Vec<KindId> = self.table.iter().map(|(kind, _)| kind).collect();
        open.into_iter()
            .filter_map(|kind| self.end(kind, EndReason::StreamEnded))
            .collect()
    }

    fn end(&mut self, kind: KindId, reason: EndReason) -> Option<EndedEvent> {
        let event = self.table.take(kind)?;
        log::debug!(
            "event kind#{} ended ({:?}): frames {}..{} last_seen={} max_conf={:.2}",
            kind.index(),
            reason,
            event.start_frame,
            event.end_frame,
            event.last_seen_frame,
            event.max_confidence
        );
        Some(EndedEvent {
            kind,
            event,
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEFT: KindId = KindId::from_index(0);
    const FALL: KindId = KindId::from_index(1);

    /// fps=10, base clip 5s, merge gap 3s.
    fn engine() -> EventEngine {
        EventEngine::new(LifecycleParams::from_seconds(0.9, 5.0, 3.0, 10.0), 4)
    }

    #[test]
    fn params_truncate_to_whole_frames() {
        let p = LifecycleParams::from_seconds(0.9, 5.0, 30.0, 29.97);
        assert_eq!(p.base_clip_frames, 149);
        assert_eq!(p.merge_gap_frames, 899);
    }

    #[test]
    fn first_qualifying_detection_opens_event() {
        let mut eng = engine();
        assert!(eng.observe(4, &[(THEFT, 0.95)]).is_empty());
        let ev = eng.table().get(THEFT).copied().unwrap();
        assert_eq!(
            ev,
            ActiveEvent {
                start_frame: 4,
                end_frame: 54,
                last_seen_frame: 4,
                max_confidence: 0.95,
            }
        );
    }

    #[test]
    fn below_threshold_never_opens_or_extends() {
        let mut eng = engine();
        eng.observe(0, &[(THEFT, 0.5)]);
        assert!(!eng.table().is_active(THEFT));

        eng.observe(1, &[(THEFT, 0.95)]);
        eng.observe(20, &[(THEFT, 0.89)]);
        let ev = eng.table().get(THEFT).copied().unwrap();
        assert_eq!(ev.last_seen_frame, 1);
        assert_eq!(ev.end_frame, 51);
    }

    #[test]
    fn redetection_extends_end_and_keeps_max_confidence() {
        let mut eng = engine();
        eng.observe(0, &[(THEFT, 0.97)]);
        eng.observe(10, &[(THEFT, 0.91)]);
        let ev = eng.table().get(THEFT).copied().unwrap();
        assert_eq!(ev.start_frame, 0);
        assert_eq!(ev.last_seen_frame, 10);
        assert_eq!(ev.end_frame, 60);
        assert_eq!(ev.max_confidence, 0.97);
    }

    #[test]
    fn event_ends_after_merge_gap() {
        let mut eng = engine();
        for f in 0..=20 {
            assert!(eng.observe(f, &[(THEFT, 0.95)]).is_empty());
        }
        for f in 21..=50 {
            assert!(eng.observe(f, &[]).is_empty(), "ended early at {}", f);
        }
        let ended = eng.observe(51, &[]);
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].kind, THEFT);
        assert_eq!(ended[0].reason, EndReason::MergeGapExpired);
        assert_eq!(ended[0].event.start_frame, 0);
        assert_eq!(ended[0].event.end_frame, 70);
        assert!(!eng.table().is_active(THEFT));
    }

    #[test]
    fn kinds_are_independent() {
        let mut eng = engine();
        eng.observe(0, &[(THEFT, 0.95), (FALL, 0.93)]);
        for f in 1..=40 {
            let ended = eng.observe(f, &[(FALL, 0.93)]);
            if f == 31 {
                assert_eq!(ended.len(), 1);
                assert_eq!(ended[0].kind, THEFT);
            } else {
                assert!(ended.is_empty());
            }
        }
        assert!(eng.table().is_active(FALL));
        assert_eq!(eng.table().active_count(), 1);
    }

    #[test]
    fn duplicate_hits_in_one_frame_coalesce() {
        let mut eng = engine();
        eng.observe(0, &[(THEFT, 0.91), (THEFT, 0.99)]);
        assert_eq!(eng.table().active_count(), 1);
        assert_eq!(eng.table().get(THEFT).unwrap().max_confidence, 0.99);
    }

    #[test]
    fn flush_ends_everything_once() {
        let mut eng = engine();
        eng.observe(0, &[(FALL, 0.95), (THEFT, 0.95)]);
        let ended = eng.flush();
        assert_eq!(ended.len(), 2);
        assert_eq!(ended[0].kind, THEFT);
        assert_eq!(ended[1].kind, FALL);
        assert!(ended.iter().all(|e| e.reason == EndReason::StreamEnded));
        assert!(eng.flush().is_empty());
    }

    #[test]
    fn unknown_kind_ids_are_ignored() {
        let mut eng = EventEngine::new(LifecycleParams::from_seconds(0.9, 5.0, 3.0, 10.0), 1);
        eng.observe(0, &[(FALL, 0.99)]);
        assert_eq!(eng.table().active_count(), 0);
    }
}

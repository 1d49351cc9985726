// libs/slot-cell/src/services/overlap.rs
use uuid::Uuid;

use crate::models::{Slot, Window};
use crate::time::MinuteSpan;

/// A candidate window that collides with a stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collision {
    pub candidate: MinuteSpan,
    pub existing: MinuteSpan,
    pub existing_slot: Uuid,
}

impl Collision {
    pub fn describe(&self) -> String {
        format!(
            "Window {} overlaps existing window {} of slot {}",
            self.candidate, self.existing, self.existing_slot
        )
    }
}

/// Spans of every well-formed window. Malformed windows never reach storage.
pub fn spans(windows: &[Window]) -> Vec<MinuteSpan> {
    windows.iter().filter_map(Window::span).collect()
}

/// First pair of overlapping spans within one candidate set, in start order.
/// The result does not depend on input order beyond which pair is reported.
pub fn first_self_overlap(spans: &[MinuteSpan]) -> Option<(MinuteSpan, MinuteSpan)> {
    let mut sorted = spans.to_vec();
    sorted.sort_by_key(|span| span.start);

    sorted
        .windows(2)
        .find(|pair| pair[1].start < pair[0].end)
        .map(|pair| (pair[0], pair[1]))
}

/// Checks candidates against the windows of already stored slots. Callers
/// pass only active slots of the same scope, without the slot being updated.
pub fn first_collision(candidates: &[MinuteSpan], existing: &[Slot]) -> Option<Collision> {
    existing.iter().find_map(|slot| {
        spans(slot.windows()).into_iter().find_map(|stored| {
            candidates
                .iter()
                .find(|candidate| candidate.overlaps(&stored))
                .map(|candidate| Collision {
                    candidate: *candidate,
                    existing: stored,
                    existing_slot: slot.id,
                })
        })
    })
}

//! Status transitions and their timestamp side effects.
//!
//! `transition` is a pure function of (old, new) status. The store calls it
//! inside the same transaction that writes the task, so a failed update never
//! leaves a half-applied timestamp behind.

use crate::types::{Status, Task};

/// What happens to one timestamp column on a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stamp {
    Keep,
    Set,
    Clear,
}

/// Timestamp mutations for a single status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub started_at: Stamp,
    pub completed_at: Stamp,
}

impl Transition {
    pub const NONE: Transition = Transition {
        started_at: Stamp::Keep,
        completed_at: Stamp::Keep,
    };

    /// Apply the stamps and the new status to a task.
    pub fn apply(&self, task: &mut Task, to: Status, now: &str) {
        task.status = to;
        apply_stamp(&mut task.started_at, self.started_at, now);
        apply_stamp(&mut task.completed_at, self.completed_at, now);
    }
}

fn apply_stamp(field: &mut Option<String>, stamp: Stamp, now: &str) {
    match stamp {
        Stamp::Keep => {}
        Stamp::Set => *field = Some(now.to_string()),
        Stamp::Clear => *field = None,
    }
}

/// Compute the timestamp effects of moving from `from` to `to`.
///
/// - entering in_progress sets started_at
/// - entering completed sets completed_at, started_at survives
/// - entering pending is a reset and clears both
/// - leaving completed clears completed_at
/// - no-op changes have no effect
pub fn transition(from: Status, to: Status) -> Transition {
    if from == to {
        return Transition::NONE;
    }

    let mut effect = Transition::NONE;

    if from == Status::Completed {
        effect.completed_at = Stamp::Clear;
    }

    match to {
        Status::InProgress => effect.started_at = Stamp::Set,
        Status::Completed => effect.completed_at = Stamp::Set,
        Status::Pending => {
            effect.started_at = Stamp::Clear;
            effect.completed_at = Stamp::Clear;
        }
        Status::Blocked => {}
    }

    effect
}

use ahash::AHashMap;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Throttled side effects. Each kind keeps its own timestamp per label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Log,
    Persist,
}

#[derive(Debug, Default, Clone, Copy)]
struct LedgerEntry {
    last_log: Option<Instant>,
    last_persist: Option<Instant>,
}

impl LedgerEntry {
    #[inline]
    fn slot(&mut self, kind: ActionKind) -> &mut Option<Instant> {
        match kind {
            ActionKind::Log => &mut self.last_log,
            ActionKind::Persist => &mut self.last_persist,
        }
    }
}

/// Per-label rate limiter for persistence and event logging.
///
/// Entries are created on first sight of a label and live until the process
/// exits. The check and the timestamp update happen under one lock, so two
/// racing observations of a label cannot both pass inside a window.
#[derive(Default)]
pub struct ThrottleLedger {
    entries: Mutex<AHashMap<String, LedgerEntry>>,
}

impl ThrottleLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True (and records `now`) iff there is no prior action of this kind for
    /// `label`, or more than `window` has elapsed since it.
    pub fn should_act(&self, label: &str, kind: ActionKind, now: Instant, window: Duration) -> bool {
        let mut entries = self.entries.lock();
        let entry = entries.entry(label.to_string()).or_default();

        let slot = entry.slot(kind);
        let pass = match *slot {
            None => true,
            // A clock reading older than the recorded action never passes.
            Some(last) => now
                .checked_duration_since(last)
                .map_or(false, |elapsed| elapsed > window),
        };
        if pass {
            *slot = Some(now);
        }
        pass
    }

    pub fn last_action(&self, label: &str, kind: ActionKind) -> Option<Instant> {
        self.entries
            .lock()
            .get(label)
            .copied()
            .and_then(|mut entry| *entry.slot(kind))
    }

    /// Number of labels seen so far.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

use std::time::Instant;

/// A deferred callback tagged with the load token that was current when it
/// was scheduled. Handlers compare the tag with the live token before acting.
#[derive(Debug, Clone, PartialEq)]
pub struct Scheduled<T> {
    pub due: Instant,
    pub token: u64,
    pub task: T,
    seq: u64,
}

/// One-shot timers run cooperatively from the UI loop.
#[derive(Debug)]
pub struct Scheduler<T> {
    pending: Vec<Scheduled<T>>,
    next_seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, due: Instant, token: u64, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Scheduled {
            due,
            token,
            task,
            seq,
        });
    }

    /// Removes and returns everything due at `now`, earliest first; ties keep
    /// scheduling order.
    pub fn take_due(&mut self, now: Instant) -> Vec<Scheduled<T>> {
        let (mut due, pending): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|entry| entry.due <= now);
        self.pending = pending;
        due.sort_by(|a, b| a.due.cmp(&b.due).then(a.seq.cmp(&b.seq)));
        due
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.pending.iter().map(|entry| entry.due).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scheduled<T>> {
        self.pending.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn returns_only_due_entries_in_order() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        scheduler.schedule(t0 + Duration::from_millis(30), 1, "late");
        scheduler.schedule(t0 + Duration::from_millis(10), 1, "early");
        scheduler.schedule(t0 + Duration::from_millis(10), 2, "early-second");
        scheduler.schedule(t0 + Duration::from_millis(90), 2, "later");

        let due: Vec<_> = scheduler
            .take_due(t0 + Duration::from_millis(40))
            .into_iter()
            .map(|entry| entry.task)
            .collect();
        assert_eq!(due, vec!["early", "early-second", "late"]);
        assert_eq!(scheduler.len(), 1);
        assert_eq!(scheduler.next_due(), Some(t0 + Duration::from_millis(90)));
    }

    #[test]
    fn keeps_token_tags() {
        let mut scheduler = Scheduler::new();
        let t0 = Instant::now();
        scheduler.schedule(t0, 7, ());
        let due = scheduler.take_due(t0);
        assert_eq!(due[0].token, 7);
        assert!(scheduler.is_empty());
    }
}

//! Scheduled per-player tasks
//!
//! Reconnects and telemetry pushes are queued by deadline. Each task holds a
//! cancellation token; a task whose token was cancelled before it came due
//! is dropped silently.

use std::collections::BTreeMap;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::players::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Reopen the device link after it closed
    Reconnect,
    /// Push counters to the device
    Telemetry,
}

#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub player: PlayerId,
    pub kind: TaskKind,
    pub deadline: Instant,
    pub token: CancellationToken,
}

impl ScheduledTask {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Deadline-ordered task queue
#[derive(Debug, Default)]
pub struct TimerQueue {
    tasks: BTreeMap<(Instant, u64), ScheduledTask>,
    /// Tie-breaker for equal deadlines
    seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task. A reconnect is refused while another live one is pending
    /// for the same player.
    pub fn schedule(
        &mut self,
        player: PlayerId,
        kind: TaskKind,
        deadline: Instant,
        token: CancellationToken,
    ) -> bool {
        if kind == TaskKind::Reconnect && self.has_pending(player, TaskKind::Reconnect) {
            return false;
        }

        self.seq += 1;
        self.tasks.insert(
            (deadline, self.seq),
            ScheduledTask {
                player,
                kind,
                deadline,
                token,
            },
        );
        true
    }

    pub fn has_pending(&self, player: PlayerId, kind: TaskKind) -> bool {
        self.tasks
            .values()
            .any(|t| t.player == player && t.kind == kind && !t.is_cancelled())
    }

    /// Live tasks still queued
    pub fn pending(&self) -> usize {
        self.tasks.values().filter(|t| !t.is_cancelled()).count()
    }

    /// Earliest deadline, cancelled tasks included
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Remove every task due at `now`, in deadline order, discarding
    /// cancelled ones
    pub fn pop_due(&mut self, now: Instant) -> Vec<ScheduledTask> {
        let mut due = Vec::new();
        while let Some(entry) = self.tasks.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let task = entry.remove();
            if !task.is_cancelled() {
                due.push(task);
            }
        }
        due
    }

    /// Drop every task of a removed player
    pub fn purge_player(&mut self, player: PlayerId) {
        self.tasks.retain(|_, t| t.player != player);
    }

    pub fn clear(&mut self) {
        self.tasks.clear();
    }
}

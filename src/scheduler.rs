//! Cooperative scheduler for the periodic maintenance tasks. Tasks never
//! run concurrently with a tick; the runtime asks for due tasks between
//! frames and runs them in priority order.

use chrono::Utc;

use crate::config::Config;

/// Declaration order is priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Task {
    Recovery,
    Cleanup,
    HealthCheck,
    Checkpoint,
}

impl Task {
    pub fn as_str(&self) -> &'static str {
        match self {
            Task::Recovery => "recovery",
            Task::Cleanup => "cleanup",
            Task::HealthCheck => "health_check",
            Task::Checkpoint => "checkpoint",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Periodic {
    pub task: Task,
    pub interval_ms: u64,
    pub next_due_ms: u64,
}

impl Periodic {
    pub fn new(task: Task, interval_ms: u64, now_ms: u64) -> Self {
        let interval_ms = interval_ms.max(1);
        Self { task, interval_ms, next_due_ms: now_ms + interval_ms }
    }

    /// Fires at most once per call; missed periods are coalesced.
    fn poll(&mut self, now_ms: u64) -> bool {
        if now_ms < self.next_due_ms {
            return false;
        }
        let missed = (now_ms - self.next_due_ms) / self.interval_ms;
        self.next_due_ms += (missed + 1) * self.interval_ms;
        true
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    periodic: Vec<Periodic>,
    one_shot: Vec<(Task, u64)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { periodic: Vec::new(), one_shot: Vec::new() }
    }

    pub fn from_config(cfg: &Config, now_ms: u64) -> Self {
        let mut s = Self::new();
        s.every(Task::Cleanup, cfg.cleanup_interval_ms, now_ms);
        s.every(Task::HealthCheck, cfg.health_interval_ms, now_ms);
        s.every(Task::Checkpoint, cfg.checkpoint_interval_ms, now_ms);
        s
    }

    pub fn every(&mut self, task: Task, interval_ms: u64, now_ms: u64) {
        self.periodic.push(Periodic::new(task, interval_ms, now_ms));
    }

    /// Run `task` once at `at_ms`. A pending entry for the same task keeps
    /// the earlier time.
    pub fn schedule_at(&mut self, task: Task, at_ms: u64) {
        match self.one_shot.iter_mut().find(|(t, _)| *t == task) {
            Some((_, at)) => *at = (*at).min(at_ms),
            None => self.one_shot.push((task, at_ms)),
        }
    }

    pub fn is_scheduled(&self, task: Task) -> bool {
        self.one_shot.iter().any(|(t, _)| *t == task)
    }

    /// Due tasks, highest priority first, each at most once.
    pub fn due(&mut self, now_ms: u64) -> Vec<Task> {
        let mut out: Vec<Task> = Vec::new();
        self.one_shot.retain(|(task, at)| {
            if now_ms >= *at {
                out.push(*task);
                false
            } else {
                true
            }
        });
        for p in &mut self.periodic {
            if p.poll(now_ms) {
                out.push(p.task);
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        let mut s = Scheduler::new();
        s.every(Task::Checkpoint, 10, 0);
        s.every(Task::Cleanup, 10, 0);
        s.schedule_at(Task::Recovery, 5);
        assert_eq!(s.due(10), vec![Task::Recovery, Task::Cleanup, Task::Checkpoint]);
        assert!(s.due(11).is_empty());
    }

    #[test]
    fn test_missed_periods_coalesce() {
        let mut p = Periodic::new(Task::Cleanup, 100, 0);
        assert!(!p.poll(99));
        assert!(p.poll(450));
        assert_eq!(p.next_due_ms, 500);
        assert!(!p.poll(499));
    }

    #[test]
    fn test_one_shot_keeps_earliest() {
        let mut s = Scheduler::new();
        s.schedule_at(Task::Recovery, 50);
        s.schedule_at(Task::Recovery, 80);
        assert!(s.due(49).is_empty());
        assert_eq!(s.due(50), vec![Task::Recovery]);
        assert!(!s.is_scheduled(Task::Recovery));
    }
}

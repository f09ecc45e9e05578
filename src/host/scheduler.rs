//! Host-step task scheduler
//!
//! Owner object for callbacks that must run on the simulation step. The host
//! loop calls [`TickScheduler::step`] once per step; the engine schedules
//! one-shot and repeating tasks against it. Long-running work (budgeted
//! regeneration apply) is expressed as a repeating task that does bounded
//! work per step and returns [`TaskControl::Done`] when finished.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// What a repeating task wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    /// Run again on the next step
    Continue,
    /// Remove the task
    Done,
}

enum TaskKind {
    Once(Option<Box<dyn FnOnce(u64) + Send>>),
    Repeating(Box<dyn FnMut(u64) -> TaskControl + Send>),
}

struct Task {
    /// Steps to wait before the task first runs (0 = next step)
    delay: u64,
    kind: TaskKind,
}

/// Cooperative per-step task scheduler
pub struct TickScheduler {
    tasks: Mutex<Vec<Task>>,
    tick: AtomicU64,
}

impl TickScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(Vec::new()),
            tick: AtomicU64::new(0),
        })
    }

    /// Schedule a one-shot task for the next step
    pub fn schedule(&self, f: impl FnOnce(u64) + Send + 'static) {
        self.schedule_delayed(0, f);
    }

    /// Schedule a one-shot task to run after `delay` further steps
    pub fn schedule_delayed(&self, delay: u64, f: impl FnOnce(u64) + Send + 'static) {
        self.tasks.lock().unwrap().push(Task {
            delay,
            kind: TaskKind::Once(Some(Box::new(f))),
        });
    }

    /// Schedule a repeating task, starting on the next step
    pub fn schedule_repeating(&self, f: impl FnMut(u64) -> TaskControl + Send + 'static) {
        self.tasks.lock().unwrap().push(Task {
            delay: 0,
            kind: TaskKind::Repeating(Box::new(f)),
        });
    }

    /// Steps executed so far
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Number of queued tasks
    pub fn pending_count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// Run one host simulation step
    ///
    /// Tasks scheduled from within a running task start on the following
    /// step. The lock is not held while tasks run.
    pub fn step(&self) {
        let tick = self.tick.fetch_add(1, Ordering::Relaxed) + 1;

        let mut due = Vec::new();
        {
            let mut tasks = self.tasks.lock().unwrap();
            let mut waiting = Vec::with_capacity(tasks.len());
            for mut task in tasks.drain(..) {
                if task.delay > 0 {
                    task.delay -= 1;
                    waiting.push(task);
                } else {
                    due.push(task);
                }
            }
            *tasks = waiting;
        }

        let mut keep = Vec::new();
        for mut task in due {
            match &mut task.kind {
                TaskKind::Once(f) => {
                    if let Some(f) = f.take() {
                        f(tick);
                    }
                }
                TaskKind::Repeating(f) => {
                    if f(tick) == TaskControl::Continue {
                        keep.push(task);
                    }
                }
            }
        }

        if !keep.is_empty() {
            self.tasks.lock().unwrap().extend(keep);
        }
    }

    /// Run `n` steps back to back (test/bench convenience)
    pub fn run_steps(&self, n: u64) {
        for _ in 0..n {
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_once_runs_next_step() {
        let sched = TickScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        sched.schedule(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        sched.step();
        sched.step();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn test_delayed() {
        let sched = TickScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        sched.schedule_delayed(2, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        sched.step();
        sched.step();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        sched.step();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_repeating_until_done() {
        let sched = TickScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        sched.schedule_repeating(move |_| {
            let n = h.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= 3 { TaskControl::Done } else { TaskControl::Continue }
        });

        sched.run_steps(10);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn test_schedule_from_task_runs_next_step() {
        let sched = TickScheduler::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let s = sched.clone();
        let h = hits.clone();
        sched.schedule(move |_| {
            let h2 = h.clone();
            s.schedule(move |_| {
                h2.fetch_add(1, Ordering::SeqCst);
            });
        });

        sched.step();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        sched.step();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}

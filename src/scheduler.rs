use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Unique identifier for a wait task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

/// Suspension point of a wait task
pub enum WaitFor<S> {
    /// Resume once this much tick time has elapsed
    Seconds(Duration),
    /// Resume once the predicate holds for the polled state
    Until(fn(&S) -> bool),
}

impl<S> fmt::Debug for WaitFor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitFor::Seconds(remaining) => write!(f, "Seconds({:?})", remaining),
            WaitFor::Until(_) => write!(f, "Until(..)"),
        }
    }
}

/// Outcome of spawning a wait task
#[derive(Debug, PartialEq, Eq)]
pub enum Spawned<C> {
    /// Every suspension point was already satisfied; resume now
    Ready(C),
    /// Suspended; resumes from a later `poll`
    Pending(TaskId),
}

struct Task<C, S> {
    id: TaskId,
    waits: VecDeque<WaitFor<S>>,
    resume: C,
}

/// Cooperative scheduler holding at most one outstanding wait task.
///
/// Time only advances through `poll`, so a task spawned during a tick is
/// first charged on the following tick.
pub struct Scheduler<C, S> {
    active: Option<Task<C, S>>,
    next_id: u64,
}

impl<C, S> Scheduler<C, S> {
    pub fn new() -> Self {
        Self {
            active: None,
            next_id: 0,
        }
    }

    /// Start a wait sequence that yields `resume` once every wait is satisfied.
    ///
    /// Supersedes any task still outstanding.
    pub fn spawn<W>(&mut self, waits: W, resume: C, state: &S) -> Spawned<C>
    where
        W: IntoIterator<Item = WaitFor<S>>,
    {
        if let Some(previous) = self.active.take() {
            debug!(target: "flow", "Wait task {:?} superseded", previous.id);
        }

        let mut waits: VecDeque<WaitFor<S>> = waits.into_iter().collect();
        drain_satisfied(&mut waits, Duration::ZERO, state);
        if waits.is_empty() {
            return Spawned::Ready(resume);
        }

        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.active = Some(Task { id, waits, resume });
        Spawned::Pending(id)
    }

    /// Advance the outstanding task by `delta` and hand back its resume
    /// value if it completed.
    pub fn poll(&mut self, delta: Duration, state: &S) -> Option<C> {
        let task = self.active.as_mut()?;
        drain_satisfied(&mut task.waits, delta, state);
        if !task.waits.is_empty() {
            return None;
        }
        self.active.take().map(|task| task.resume)
    }

    /// Cancel a specific task
    pub fn cancel(&mut self, id: TaskId) -> bool {
        match &self.active {
            Some(task) if task.id == id => {
                self.active = None;
                true
            }
            _ => false,
        }
    }

    /// Cancel whatever task is outstanding
    pub fn cancel_active(&mut self) -> Option<TaskId> {
        self.active.take().map(|task| task.id)
    }

    pub fn active_task(&self) -> Option<TaskId> {
        self.active.as_ref().map(|task| task.id)
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }
}

impl<C, S> Default for Scheduler<C, S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pop satisfied waits from the front, spending `budget` on timed waits.
fn drain_satisfied<S>(waits: &mut VecDeque<WaitFor<S>>, mut budget: Duration, state: &S) {
    while let Some(front) = waits.front_mut() {
        match front {
            WaitFor::Seconds(remaining) => {
                if *remaining > budget {
                    *remaining -= budget;
                    return;
                }
                budget -= *remaining;
            }
            WaitFor::Until(predicate) => {
                if !predicate(state) {
                    return;
                }
            }
        }
        waits.pop_front();
    }
}

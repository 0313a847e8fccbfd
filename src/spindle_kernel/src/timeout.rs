//! Timeouts and the countdown timer
//!
//! There's no periodic tick. The timer is armed on every pass of the
//! scheduler with the number of ticks until the next event the kernel cares
//! about: the end of the running task's time slice or a wake-up that should
//! preempt it. Every pending timeout is then aged by the ticks that actually
//! elapsed when the scheduler runs next.
use crate::{
    state::Kernel,
    task::{TaskId, TaskSt},
    UTicks,
};

/// Calculate the ticks elapsed since the timer was armed with `last_reload`.
///
/// `current` is the live countdown value. If the countdown reached zero
/// (`expired`), it restarted from `last_reload` and the full period must be
/// added.
pub(crate) fn elapsed_ticks(last_reload: UTicks, current: UTicks, expired: bool) -> UTicks {
    let partial = last_reload.saturating_sub(current);
    if expired {
        last_reload.saturating_add(partial)
    } else {
        partial
    }
}

impl Kernel {
    /// Make `task` wake up (or give up waiting) after `ticks` ticks.
    pub(crate) fn add_timeout(&self, task: TaskId, ticks: UTicks) {
        self.tasks[task].sleep_ticks.set(ticks);
        self.sleep_queue().push_back(task);
    }

    pub(crate) fn remove_timeout(&self, task: TaskId) {
        self.sleep_queue().remove(task);
    }

    /// Subtract `elapsed` from every pending timeout and wake up the tasks
    /// whose timeouts reached zero.
    pub(crate) fn age_timeouts(&self, elapsed: UTicks) {
        if elapsed == 0 {
            return;
        }

        let mut cursor = self.sleep_queue().front();
        while let Some(task) = cursor {
            // Advance first because `task` may be unlinked below
            cursor = self.sleep_queue().next(task);

            let cb = &self.tasks[task];
            let left = cb.sleep_ticks.get().saturating_sub(elapsed);
            cb.sleep_ticks.set(left);
            if left == 0 {
                self.remove_timeout(task);
                self.timeout_expired(task);
            }
        }
    }

    fn timeout_expired(&self, task: TaskId) {
        match self.tasks[task].st.get() {
            TaskSt::Sleep => {
                log::trace!("{:?} woke up", task);
                self.make_ready(task);
            }
            TaskSt::Mutex { mutex, timed: true } => self.mutex_wait_timed_out(task, mutex),
            st => unreachable!("timeout expired for a task in state {:?}", st),
        }
    }

    /// Determine the timer reload value for running `next`.
    ///
    /// `next` gets the rest of its time slice if a ready task of the same
    /// priority is waiting for its turn, and runs undisturbed otherwise. A pending wake-up
    /// of a more urgent task cuts the period short. A wake-up of a task of the
    /// same priority can shorten it down to a time slice, because the woken
    /// task would only queue up behind `next` anyway.
    pub(crate) fn next_reload(&self, next: TaskId) -> UTicks {
        let cfg = &self.cfg;
        let priority = self.tasks[next].effective_priority.get();

        let mut reload = match self.ready_priority() {
            Some(p) if p >= priority => self.slice_left.get(),
            _ => cfg.max_reload,
        };

        for (_, cb) in self.sleep_queue().iter() {
            let p = cb.effective_priority.get();
            let left = cb.sleep_ticks.get();
            if p > priority {
                reload = reload.min(left);
            } else if p == priority {
                reload = reload.min(left.max(cfg.time_slice));
            }
        }

        reload.max(cfg.min_quantum).min(cfg.max_reload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{task::TaskAttr, TimerCfg};

    fn body(_: usize) -> usize {
        0
    }

    fn kernel() -> Kernel {
        Kernel::new(TimerCfg {
            time_slice: 10,
            min_quantum: 2,
            max_reload: 1000,
            ticks_per_ms: 1,
        })
    }

    /// Create a task and put it to sleep for `ticks`.
    fn sleeper(k: &mut Kernel, priority: u8, ticks: UTicks) -> TaskId {
        let task = k.create_task(None, TaskAttr::new(body, 0, priority));
        k.ready_queue().remove(task);
        k.tasks[task].st.set(TaskSt::Sleep);
        k.add_timeout(task, ticks);
        task
    }

    fn running(k: &mut Kernel, priority: u8) -> TaskId {
        let task = k.create_task(None, TaskAttr::new(body, 0, priority));
        k.ready_queue().remove(task);
        k.tasks[task].st.set(TaskSt::Running);
        task
    }

    #[test]
    fn elapsed() {
        assert_eq!(elapsed_ticks(100, 40, false), 60);
        assert_eq!(elapsed_ticks(100, 40, true), 160);
        assert_eq!(elapsed_ticks(100, 100, false), 0);
        // The countdown was reloaded right at the expiry
        assert_eq!(elapsed_ticks(100, 100, true), 100);
    }

    #[test]
    fn aging_wakes_in_order() {
        let mut k = kernel();
        let a = sleeper(&mut k, 1, 30);
        let b = sleeper(&mut k, 1, 10);
        let c = sleeper(&mut k, 1, 20);

        k.age_timeouts(15);
        assert!(matches!(k.tasks[b].st.get(), TaskSt::Ready));
        assert_eq!(k.tasks[a].sleep_ticks.get(), 15);
        assert_eq!(k.tasks[c].sleep_ticks.get(), 5);

        // Overshooting saturates
        k.age_timeouts(100);
        let order: Vec<_> = std::iter::from_fn(|| k.ready_queue().pop_front()).collect();
        assert_eq!(order, [b, a, c]);
        assert!(k.sleep_queue.get().is_empty());
    }

    #[test]
    fn reload_alone() {
        let mut k = kernel();
        let t = running(&mut k, 3);
        assert_eq!(k.next_reload(t), 1000);
    }

    #[test]
    fn reload_with_peer() {
        let mut k = kernel();
        let t = running(&mut k, 3);
        k.create_task(None, TaskAttr::new(body, 0, 3));
        assert_eq!(k.next_reload(t), 10);
    }

    #[test]
    fn reload_capped_by_urgent_sleeper() {
        let mut k = kernel();
        let t = running(&mut k, 3);
        sleeper(&mut k, 5, 7);
        sleeper(&mut k, 1, 3);
        assert_eq!(k.next_reload(t), 7);
    }

    #[test]
    fn reload_for_equal_sleeper() {
        let mut k = kernel();
        let t = running(&mut k, 3);
        let s = sleeper(&mut k, 3, 4);
        assert_eq!(k.next_reload(t), 10);
        k.tasks[s].sleep_ticks.set(50);
        assert_eq!(k.next_reload(t), 50);
    }

    #[test]
    fn reload_min_quantum() {
        let mut k = kernel();
        let t = running(&mut k, 3);
        sleeper(&mut k, 9, 1);
        assert_eq!(k.next_reload(t), 2);
    }
}

//! Thread hand-off and the virtual timer
use spindle_kernel::{System, TaskAttr, TaskId, UTicks};
use std::thread;

use crate::{spawn_worker, Exit, PortInstance, State, ThreadRole, MIN_THREAD_STACK_SIZE, THREAD_ROLE};

/// The state guarded by [`State::sched`].
pub(crate) struct SchedState {
    pub(crate) cpu_lock: bool,
    /// The task whose thread holds the baton.
    current: Option<TaskId>,
    /// Indexed by [`TaskId::as_usize`].
    pub(crate) threads: Vec<Tsm>,
    pub(crate) timer: Timer,
}

/// Task state machine
///
/// These don't exactly align with the task states defined in the kernel.
#[derive(Debug)]
pub(crate) enum Tsm {
    /// The task has no context. The kernel has to call
    /// `initialize_task_state` first before choosing this task as
    /// `running_task`.
    Uninit,
    /// The task's context is initialized, but no thread has been spawned yet.
    Dormant(TaskAttr),
    /// The task is backed by the contained thread.
    Running(thread::Thread),
}

/// The virtual countdown timer.
#[derive(Debug)]
pub(crate) struct Timer {
    reload: UTicks,
    pub(crate) countdown: UTicks,
    /// Set when the countdown reaches zero, cleared by `timer_expired`.
    pub(crate) expired: bool,
    /// Ticks elapsed since boot.
    pub(crate) now: u64,
}

impl SchedState {
    pub(crate) const fn new() -> Self {
        Self {
            cpu_lock: false,
            current: None,
            threads: Vec::new(),
            timer: Timer::new(),
        }
    }
}

impl Timer {
    const fn new() -> Self {
        Self {
            reload: 0,
            countdown: 0,
            expired: false,
            now: 0,
        }
    }

    pub(crate) fn arm(&mut self, reload: UTicks) {
        assert_ne!(reload, 0, "the timer can't be armed with zero");
        self.reload = reload;
        self.countdown = reload;
        self.expired = false;
    }

    /// Let at most `ticks` ticks pass, stopping at the next expiry. Returns the
    /// number of ticks that actually passed.
    pub(crate) fn elapse(&mut self, ticks: u64) -> u64 {
        let step = ticks.min(self.countdown.into());
        self.now += step;
        // `step <= countdown`
        self.countdown -= step as UTicks;

        if self.countdown == 0 {
            // Restart from the reload value, like a hardware counter would
            self.expired = true;
            self.countdown = self.reload;
        }
        step
    }
}

impl State {
    /// Get the task whose thread holds the baton.
    pub(crate) fn current_task(&self) -> TaskId {
        match self.sched.lock().current {
            Some(task) => task,
            None => unreachable!("no task has been dispatched"),
        }
    }

    /// Enter the kernel through `handler` and hand the baton to the task it
    /// chose. Returns when the calling task receives the baton again.
    ///
    /// # Safety
    ///
    /// CPU Lock active, task context. `handler` must be safe to call in this
    /// state.
    pub(crate) unsafe fn switch_away<Traits: PortInstance>(&'static self, handler: unsafe fn()) {
        let task = self.current_task();

        // Safety: Upheld by the caller
        unsafe { handler() };

        self.pass_baton::<Traits>();
        self.wait_for_baton(task);
    }

    /// Let the thread of [`spindle_kernel::State::running_task`] run, spawning
    /// the thread if it doesn't exist yet. The caller must stop running after
    /// this.
    ///
    /// Precondition: CPU Lock active
    pub(crate) fn pass_baton<Traits: PortInstance>(&'static self) {
        // Safety: CPU Lock active
        let next = match unsafe { Traits::state().running_task() } {
            Some(task) => task,
            None => unreachable!("the kernel chose no task"),
        };

        let mut sched = self.sched.lock();
        sched.current = Some(next);

        // The lock is held while spawning so that the new thread can't get
        // ahead of its `Tsm`
        let tsm = &mut sched.threads[next.as_usize()];
        match *tsm {
            Tsm::Running(ref thread) => thread.unpark(),
            Tsm::Dormant(attr) => {
                let state: &'static State = self;
                let stack_size = attr.stack_size.max(MIN_THREAD_STACK_SIZE);
                let thread = spawn_worker(format!("{:?}", next), stack_size, move || {
                    THREAD_ROLE.with(|role| role.set(ThreadRole::Task));
                    state.run_worker(|| state.task_main::<Traits>(next, attr));
                });
                log::trace!("spawned {:?} for {:?}", thread.id(), next);
                *tsm = Tsm::Running(thread);
            }
            Tsm::Uninit => unreachable!("{:?} was dispatched before initialization", next),
        }
    }

    /// Block the calling thread until `task` receives the baton.
    fn wait_for_baton(&self, task: TaskId) {
        // `unpark` before `park` makes `park` return immediately, so there's
        // no lost wake-up
        while self.sched.lock().current != Some(task) {
            thread::park();
        }
    }

    /// The body of a task thread.
    fn task_main<Traits: PortInstance>(&'static self, task: TaskId, attr: TaskAttr) {
        self.wait_for_baton(task);

        // The dispatcher leaves CPU Lock active
        // Safety: CPU Lock active
        unsafe { self.leave_cpu_lock::<Traits>() };

        log::debug!("{:?} is now running", task);

        let result = (attr.entry_point)(attr.entry_param);

        // Safety: CPU Lock inactive
        unsafe { self.enter_cpu_lock::<Traits>() };
        // Safety: CPU Lock active
        let is_init = unsafe { Traits::state().init_task() } == Some(task);
        // Safety: CPU Lock active
        unsafe { self.leave_cpu_lock::<Traits>() };

        if is_init {
            // The simulation ends here. This thread keeps the baton, so
            // nothing else runs anymore.
            log::debug!("the init task returned {}", result);
            self.report(Exit::Finished(result));
            loop {
                thread::park();
            }
        }

        // Safety: This is the outermost frame of the task, and nothing on the
        // stack needs dropping
        unsafe { System::<Traits>::exit_task(result) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown() {
        let mut timer = Timer::new();
        timer.arm(100);

        assert_eq!(timer.elapse(30), 30);
        assert_eq!(timer.countdown, 70);
        assert!(!timer.expired);

        // Stops at the expiry and restarts
        assert_eq!(timer.elapse(500), 70);
        assert!(timer.expired);
        assert_eq!(timer.countdown, 100);
        assert_eq!(timer.now, 100);
    }

    #[test]
    fn rearm_clears_expiry() {
        let mut timer = Timer::new();
        timer.arm(10);
        timer.elapse(u64::MAX);
        assert!(timer.expired);

        timer.arm(25);
        assert!(!timer.expired);
        assert_eq!(timer.elapse(u64::MAX), 25);
        assert_eq!(timer.now, 35);
    }
}

//! The scheduler
use core::mem::forget;

use crate::{
    klock::assume_cpu_lock,
    state::Kernel,
    task::{idle_task_body, ScheduleDecision, TaskAttr, TaskId, TaskSt, MIN_PRIORITY},
    timeout::elapsed_ticks,
    KernelTraits, PortToKernel, UTicks,
};

/// The reason the scheduler was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Entry {
    /// The running task trapped, possibly with a request.
    Trap,
    /// The timer expired while the running task was running.
    Timer,
}

impl Kernel {
    /// Create the init task and the idle task.
    pub(crate) fn boot(&mut self, init: TaskAttr, idle: TaskAttr) -> (TaskId, TaskId) {
        // Init goes first so that it runs before the idle task even if it has
        // the lowest priority
        let init_task = self.create_task(None, init);
        let idle_task = self.create_task(None, idle);
        self.init_task.set(Some(init_task));
        (init_task, idle_task)
    }

    /// Run a pass of the scheduler: account for `elapsed` ticks, handle the
    /// event, and choose the task to run next. Returns the value to arm the
    /// timer with.
    pub(crate) fn schedule(&mut self, entry: Entry, elapsed: UTicks) -> UTicks {
        self.age_timeouts(elapsed);

        let prev = self.running_task.get();
        let mut keep = match (prev, entry) {
            (None, _) => false,
            (Some(prev), Entry::Timer) => {
                // The time slice is over
                self.make_ready(prev);
                false
            }
            (Some(prev), Entry::Trap) => match self.tasks[prev].syscall.take() {
                Some(syscall) => self.dispatch(prev, syscall),
                None => true,
            },
        };

        // A task kept through a trap carries on with what's left of its slice
        if let (true, Some(prev)) = (keep, prev) {
            let left = self.slice_left.get().saturating_sub(elapsed);
            if left == 0 {
                self.make_ready(prev);
                keep = false;
            } else {
                self.slice_left.set(left);
            }
        }

        let prev_task_priority = if keep {
            prev.map(|prev| self.tasks[prev].effective_priority.get())
        } else {
            None
        };

        let next = match self.pop_front_task(prev_task_priority) {
            ScheduleDecision::Keep => prev,
            ScheduleDecision::SwitchTo(next) => {
                // A preempted task goes to the back of its band
                if let (true, Some(prev)) = (keep, prev) {
                    self.make_ready(prev);
                }
                keep = false;
                next
            }
        };
        let next = match next {
            Some(next) => next,
            None => unreachable!("the idle task is always ready"),
        };

        self.tasks[next].st.set(TaskSt::Running);
        self.running_task.set(Some(next));
        if !keep {
            self.slice_left.set(self.cfg.time_slice);
        }

        let reload = self.next_reload(next);
        self.last_reload.set(reload);

        if prev != Some(next) {
            log::trace!("switching to {:?} (reload = {})", next, reload);
        }
        reload
    }
}

/// Run a pass of the scheduler and re-arm the timer.
///
/// # Safety
///
/// CPU Lock must be active, and no `CpuLockGuard` may exist.
unsafe fn enter_scheduler<Traits: KernelTraits>(entry: Entry) {
    // Safety: Upheld by the caller
    let mut lock = unsafe { assume_cpu_lock::<Traits>() };
    let kernel = Traits::state().kernel.write(&mut lock);

    // Safety: CPU Lock active
    let elapsed = unsafe {
        let current = Traits::timer_value();
        let expired = Traits::timer_expired();
        elapsed_ticks(kernel.last_reload.get(), current, expired)
    };

    let reload = kernel.schedule(entry, elapsed);

    // Safety: CPU Lock active
    unsafe { Traits::arm_timer(reload) };

    // Leave CPU Lock active for the port
    forget(lock);
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn boot(init: TaskAttr) -> ! {
        // Safety: The port calls this with CPU Lock active
        let mut lock = unsafe { assume_cpu_lock::<Traits>() };
        let kernel = Traits::state().kernel.write(&mut lock);

        let idle = TaskAttr::new(idle_task_body::<Traits>, 0, MIN_PRIORITY);
        let (init_task, idle_task) = kernel.boot(init, idle);
        log::debug!("booting with {:?} (init) and {:?} (idle)", init_task, idle_task);

        // Safety: CPU Lock active
        unsafe {
            Traits::initialize_task_state(init_task, &init);
            Traits::initialize_task_state(idle_task, &idle);
        }

        let reload = kernel.schedule(Entry::Trap, 0);

        // Safety: CPU Lock active
        unsafe { Traits::arm_timer(reload) };

        forget(lock);

        // Safety: CPU Lock active, Startup phase
        unsafe { Traits::dispatch_first_task() }
    }

    unsafe fn handle_trap() {
        // Safety: Upheld by the port
        unsafe { enter_scheduler::<Traits>(Entry::Trap) }
    }

    unsafe fn handle_timer() {
        // Safety: Upheld by the port
        unsafe { enter_scheduler::<Traits>(Entry::Timer) }
    }
}

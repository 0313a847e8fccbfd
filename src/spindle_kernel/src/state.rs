//! Kernel state
use alloc::vec::Vec;
use core::{cell::Cell, fmt, mem::forget};

use crate::{
    cfg::TimerCfg,
    channel::ChannelCb,
    error::BadContextError,
    klock::{assume_cpu_lock, CpuLockCell},
    mutex::MutexCb,
    task::{Priority, TaskCb, TaskId, TaskLinkCell, TaskListHead, TaskPool},
    utils::{
        intrusive_list::{ListAccessorCell, ListHead},
        prio_list::PrioListAccessor,
    },
    KernelTraits, PortThreading, UTicks,
};

type MapLink = for<'a> fn(&'a TaskCb) -> &'a TaskLinkCell;
type MapPrio = fn(&TaskCb) -> Priority;

/// A list of tasks in no particular order.
pub(crate) type TaskList<'a> = ListAccessorCell<'a, &'a TaskListHead, TaskPool, MapLink>;

/// A list of tasks ordered by effective priority.
pub(crate) type TaskPrioList<'a> =
    PrioListAccessor<'a, &'a TaskListHead, TaskPool, MapLink, MapPrio>;

fn wait_link(cb: &TaskCb) -> &TaskLinkCell {
    &cb.wait_link
}

fn sleep_link(cb: &TaskCb) -> &TaskLinkCell {
    &cb.sleep_link
}

fn block_link(cb: &TaskCb) -> &TaskLinkCell {
    &cb.block_link
}

fn sibling_link(cb: &TaskCb) -> &TaskLinkCell {
    &cb.sibling_link
}

fn effective_priority(cb: &TaskCb) -> Priority {
    cb.effective_priority.get()
}

/// The whole kernel state, independent of the system type. Every method
/// assumes the caller holds CPU Lock.
pub(crate) struct Kernel {
    pub(crate) cfg: TimerCfg,
    pub(crate) tasks: TaskPool,
    pub(crate) mutexes: Vec<MutexCb>,
    pub(crate) channels: Vec<ChannelCb>,
    pub(crate) ready_queue: TaskListHead,
    /// The tasks with a pending timeout, in no particular order.
    pub(crate) sleep_queue: TaskListHead,
    pub(crate) running_task: Cell<Option<TaskId>>,
    pub(crate) init_task: Cell<Option<TaskId>>,
    /// The value the timer was last armed with.
    pub(crate) last_reload: Cell<UTicks>,
    /// What's left of the running task's time slice as of the last arming
    /// of the timer.
    pub(crate) slice_left: Cell<UTicks>,
}

impl Kernel {
    pub(crate) const fn new(cfg: TimerCfg) -> Self {
        Self {
            slice_left: Cell::new(cfg.time_slice),
            cfg,
            tasks: TaskPool::new(),
            mutexes: Vec::new(),
            channels: Vec::new(),
            ready_queue: Cell::new(ListHead::new()),
            sleep_queue: Cell::new(ListHead::new()),
            running_task: Cell::new(None),
            init_task: Cell::new(None),
            last_reload: Cell::new(0),
        }
    }

    /// Access a priority-ordered queue linked through `TaskCb::wait_link`.
    pub(crate) fn wait_queue<'a>(&'a self, head: &'a TaskListHead) -> TaskPrioList<'a> {
        PrioListAccessor::new(
            head,
            &self.tasks,
            wait_link as MapLink,
            effective_priority as MapPrio,
        )
    }

    pub(crate) fn ready_queue(&self) -> TaskPrioList<'_> {
        self.wait_queue(&self.ready_queue)
    }

    pub(crate) fn sleep_queue(&self) -> TaskList<'_> {
        ListAccessorCell::new(&self.sleep_queue, &self.tasks, sleep_link as MapLink)
    }

    /// Access the tasks blocked on `owner`.
    pub(crate) fn blockers(&self, owner: TaskId) -> TaskPrioList<'_> {
        PrioListAccessor::new(
            &self.tasks[owner].blockers,
            &self.tasks,
            block_link as MapLink,
            effective_priority as MapPrio,
        )
    }

    pub(crate) fn children(&self, parent: TaskId) -> TaskList<'_> {
        ListAccessorCell::new(
            &self.tasks[parent].children,
            &self.tasks,
            sibling_link as MapLink,
        )
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("cfg", &self.cfg)
            .field("running_task", &self.running_task.get())
            .field("num_tasks", &self.tasks.len())
            .field("num_mutexes", &self.mutexes.len())
            .field("num_channels", &self.channels.len())
            .finish_non_exhaustive()
    }
}

/// The kernel state of a system. A port defines one `static` instance per
/// system type and returns it from [`KernelCfg::state`].
///
/// [`KernelCfg::state`]: crate::KernelCfg::state
pub struct State<Traits> {
    pub(crate) kernel: CpuLockCell<Traits, Kernel>,
}

impl<Traits: KernelTraits> State<Traits> {
    pub const fn new() -> Self {
        Self {
            kernel: CpuLockCell::new(Kernel::new(TimerCfg::of::<Traits>())),
        }
    }

    /// Get the task that owns (or is about to be given) the CPU.
    ///
    /// # Safety
    ///
    /// CPU Lock must be active. Only meant to be called by the port.
    pub unsafe fn running_task(&self) -> Option<TaskId> {
        // Safety: Upheld by the caller
        unsafe { self.peek(|kernel| kernel.running_task.get()) }
    }

    /// Get the init task, i.e., the task the port booted the kernel with.
    ///
    /// # Safety
    ///
    /// CPU Lock must be active. Only meant to be called by the port.
    pub unsafe fn init_task(&self) -> Option<TaskId> {
        // Safety: Upheld by the caller
        unsafe { self.peek(|kernel| kernel.init_task.get()) }
    }

    /// Return `true` if any task is waiting for a timeout to elapse.
    ///
    /// # Safety
    ///
    /// CPU Lock must be active. Only meant to be called by the port.
    pub unsafe fn has_sleeping_tasks(&self) -> bool {
        // Safety: Upheld by the caller
        unsafe { self.peek(|kernel| !kernel.sleep_queue.get().is_empty()) }
    }

    /// # Safety
    ///
    /// CPU Lock must be active, and no `CpuLockGuard` may exist.
    unsafe fn peek<T>(&self, f: impl FnOnce(&Kernel) -> T) -> T {
        // Safety: Upheld by the caller
        let lock = unsafe { assume_cpu_lock::<Traits>() };
        let x = f(self.kernel.read(&lock));
        // The port wants CPU Lock to stay active
        forget(lock);
        x
    }
}

impl<Traits: KernelTraits> Default for State<Traits> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Traits: KernelTraits> fmt::Debug for State<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("State").field("kernel", &self.kernel).finish()
    }
}

/// Return `Err(BadContext)` unless the current context is a task context.
pub(crate) fn expect_task_context<Traits: PortThreading>() -> Result<(), BadContextError> {
    if Traits::is_task_context() {
        Ok(())
    } else {
        Err(BadContextError::BadContext)
    }
}

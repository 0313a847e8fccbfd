//! Tasks
use core::{cell::Cell, fmt, mem::forget, ops};
use slab::Slab;

use crate::{
    channel::{ChannelId, MsgBuf, RecvBuf},
    error::{
        BadContextError, CreateTaskError, GetCurrentTaskError, GetTaskPriorityError,
        NoAccessError, QueryTaskError, SleepError, WaitTaskError,
    },
    klock::{lock_cpu, CpuLockGuard},
    mutex::MutexId,
    state::{expect_task_context, Kernel},
    syscall::{trap, Outcome, Syscall},
    utils::intrusive_list::{Link, ListHead},
    KernelTraits, PortThreading, System, UTicks,
};

mod inherit;
mod lifecycle;
mod readyqueue;

pub(crate) use self::readyqueue::ScheduleDecision;

/// Task priority. Larger values are more urgent.
pub type Priority = u8;

/// The lowest task priority. The idle task runs at this priority.
pub const MIN_PRIORITY: Priority = Priority::MIN;

/// The highest task priority.
pub const MAX_PRIORITY: Priority = Priority::MAX;

/// The stack size ports use when none is specified.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Identifies a task.
///
/// Identifiers are recycled: after a task is reaped, a newly created task may
/// receive the same identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    /// Get the raw index of the task. Ports use it to index their per-task
    /// storage.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// The properties of a task, supplied on creation.
#[derive(Clone, Copy, Debug)]
pub struct TaskAttr {
    /// The function the task runs. Its return value becomes the task's
    /// result, which the parent collects through [`System::task_wait`].
    pub entry_point: fn(usize) -> usize,
    /// The parameter passed to `entry_point`.
    pub entry_param: usize,
    /// The stack size in bytes. Only meaningful to the port.
    pub stack_size: usize,
    /// The base priority.
    pub priority: Priority,
}

impl TaskAttr {
    /// Construct a `TaskAttr` with [`DEFAULT_STACK_SIZE`].
    pub const fn new(entry_point: fn(usize) -> usize, entry_param: usize, priority: Priority) -> Self {
        Self {
            entry_point,
            entry_param,
            stack_size: DEFAULT_STACK_SIZE,
            priority,
        }
    }
}

/// The observable state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// The task is in the ready queue.
    Ready,
    /// The task owns the CPU.
    Running,
    /// The task is sleeping.
    Sleep,
    /// The task is waiting for a mutex.
    Mutex,
    /// The task has sent a message and waits for a receiver.
    ChannelSend,
    /// The task waits for a message.
    ChannelRecv,
    /// The task's message was received and it waits for the reply.
    ChannelReply,
    /// The task waits for a child to return.
    Wait,
    /// The task has returned and waits for its parent to collect the result.
    Zombie,
    /// The task does not exist (anymore).
    Dead,
}

/// The state of a task along with what the state needs. The variant also
/// tells which ordered queue (if any) the task is linked into through
/// `TaskCb::wait_link`.
#[derive(Clone, Copy, Debug)]
pub(crate) enum TaskSt {
    /// Linked into the ready queue.
    Ready,
    Running,
    /// Linked into the sleep set only.
    Sleep,
    /// Linked into the mutex's wait queue, and into the sleep set if `timed`.
    Mutex { mutex: MutexId, timed: bool },
    /// Linked into the channel's send queue.
    ChannelSend {
        channel: ChannelId,
        msg: MsgBuf,
        reply: RecvBuf,
    },
    /// Parked as the channel's receiver.
    ChannelRecv { channel: ChannelId, buf: RecvBuf },
    /// Received by `server`; blocks it until the reply arrives.
    ChannelReply {
        channel: ChannelId,
        server: TaskId,
        reply: RecvBuf,
    },
    /// Waiting for the specified child, or for any child if `None`.
    Wait { target: Option<TaskId> },
    Zombie { result: usize },
    Dead,
}

impl TaskSt {
    pub(crate) fn public(&self) -> TaskState {
        match self {
            Self::Ready => TaskState::Ready,
            Self::Running => TaskState::Running,
            Self::Sleep => TaskState::Sleep,
            Self::Mutex { .. } => TaskState::Mutex,
            Self::ChannelSend { .. } => TaskState::ChannelSend,
            Self::ChannelRecv { .. } => TaskState::ChannelRecv,
            Self::ChannelReply { .. } => TaskState::ChannelReply,
            Self::Wait { .. } => TaskState::Wait,
            Self::Zombie { .. } => TaskState::Zombie,
            Self::Dead => TaskState::Dead,
        }
    }
}

pub(crate) type TaskLinkCell = Cell<Option<Link<TaskId>>>;
pub(crate) type TaskListHead = Cell<ListHead<TaskId>>;

/// *Task control block* - the state data of a task.
pub(crate) struct TaskCb {
    pub(crate) base_priority: Priority,

    /// `max(base_priority, effective priorities of blockers)`
    pub(crate) effective_priority: Cell<Priority>,

    pub(crate) st: Cell<TaskSt>,

    /// The link for the ready queue, a mutex wait queue, or a channel send
    /// queue, whichever `st` indicates.
    pub(crate) wait_link: TaskLinkCell,

    pub(crate) sleep_link: TaskLinkCell,
    /// The remaining ticks until wake-up. Valid while `sleep_link` is linked.
    pub(crate) sleep_ticks: Cell<UTicks>,

    /// The task this task is blocking on, in whose `blockers` it's linked
    /// through `block_link`.
    pub(crate) blocked_on: Cell<Option<TaskId>>,
    pub(crate) block_link: TaskLinkCell,

    /// The tasks blocked on this task, ordered by effective priority.
    pub(crate) blockers: TaskListHead,
    /// The number of mutexes owned by this task.
    pub(crate) held_mutexes: Cell<usize>,

    pub(crate) parent: Cell<Option<TaskId>>,
    pub(crate) children: TaskListHead,
    pub(crate) sibling_link: TaskLinkCell,

    /// The request the task trapped with.
    pub(crate) syscall: Cell<Option<Syscall>>,
    /// What the kernel left for the task when the request completed.
    pub(crate) outcome: Cell<Outcome>,
}

impl TaskCb {
    fn new(attr: TaskAttr, parent: Option<TaskId>) -> Self {
        Self {
            base_priority: attr.priority,
            effective_priority: Cell::new(attr.priority),
            st: Cell::new(TaskSt::Dead),
            wait_link: Cell::new(None),
            sleep_link: Cell::new(None),
            sleep_ticks: Cell::new(0),
            blocked_on: Cell::new(None),
            block_link: Cell::new(None),
            blockers: Cell::new(ListHead::new()),
            held_mutexes: Cell::new(0),
            parent: Cell::new(parent),
            children: Cell::new(ListHead::new()),
            sibling_link: Cell::new(None),
            syscall: Cell::new(None),
            outcome: Cell::new(Outcome::None),
        }
    }
}

impl fmt::Debug for TaskCb {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("base_priority", &self.base_priority)
            .field("effective_priority", &self.effective_priority.get())
            .field("st", &self.st.get())
            .field("blocked_on", &self.blocked_on.get())
            .field("parent", &self.parent.get())
            .finish_non_exhaustive()
    }
}

/// The storage of TCBs, indexed by [`TaskId`].
pub(crate) struct TaskPool {
    slab: Slab<TaskCb>,
}

impl TaskPool {
    pub(crate) const fn new() -> Self {
        Self { slab: Slab::new() }
    }

    pub(crate) fn get(&self, task: TaskId) -> Option<&TaskCb> {
        self.slab.get(task.0)
    }

    fn insert(&mut self, cb: TaskCb) -> TaskId {
        TaskId(self.slab.insert(cb))
    }

    fn remove(&mut self, task: TaskId) -> TaskCb {
        self.slab.remove(task.0)
    }

    pub(crate) fn len(&self) -> usize {
        self.slab.len()
    }
}

impl ops::Index<TaskId> for TaskPool {
    type Output = TaskCb;

    #[inline]
    fn index(&self, task: TaskId) -> &Self::Output {
        &self.slab[task.0]
    }
}

impl Kernel {
    /// Allocate a task and put it in the ready queue.
    pub(crate) fn create_task(&mut self, parent: Option<TaskId>, attr: TaskAttr) -> TaskId {
        let task = self.tasks.insert(TaskCb::new(attr, parent));
        if let Some(parent) = parent {
            self.children(parent).push_back(task);
        }
        self.make_ready(task);
        log::debug!(
            "created {:?} (priority {}, parent {:?})",
            task,
            attr.priority,
            parent
        );
        task
    }

    pub(crate) fn task_cb(&self, task: TaskId) -> Result<&TaskCb, NoAccessError> {
        self.tasks.get(task).ok_or(NoAccessError::NoAccess)
    }

    /// Get the task owning the CPU. Only meaningful in a task context.
    pub(crate) fn running(&self) -> TaskId {
        match self.running_task.get() {
            Some(task) => task,
            None => unreachable!("no running task"),
        }
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Get the current task.
    pub fn current_task() -> Result<TaskId, GetCurrentTaskError> {
        expect_task_context::<Traits>()?;
        let lock = lock_cpu::<Traits>()?;
        Ok(Traits::state().kernel.read(&lock).running())
    }

    /// Create a child task of the current task and make it ready.
    ///
    /// If the new task is more urgent than the current task, it preempts the
    /// current task before this method returns.
    pub fn task_create(attr: &TaskAttr) -> Result<TaskId, CreateTaskError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        let kernel = Traits::state().kernel.write(&mut lock);
        let parent = kernel.running();
        let task = kernel.create_task(Some(parent), *attr);

        // Safety: CPU Lock active
        unsafe { Traits::initialize_task_state(task, attr) };

        let preempt = attr.priority > kernel.tasks[parent].effective_priority.get();
        if preempt {
            trap(&mut lock, None);
        }
        Ok(task)
    }

    /// Wait for a child task to return and collect its result. Returns the
    /// child's identifier along with the result.
    ///
    /// With `Some(child)`, waits for that child, and the current task's
    /// priority is lent to it while waiting. With `None`, waits for any child;
    /// if several children have already returned, the one that returned
    /// first is collected.
    ///
    /// # Panics
    ///
    /// The kernel panics if `Some(child)` is not a child of the current task,
    /// or if the current task has no children at all.
    pub fn task_wait(target: Option<TaskId>) -> Result<(TaskId, usize), WaitTaskError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        if let Some(target) = target {
            Traits::state().kernel.read(&lock).task_cb(target)?;
        }

        match trap(&mut lock, Some(Syscall::TaskWait { target })) {
            Outcome::Reaped(child, result) => Ok((child, result)),
            outcome => unreachable!("unexpected outcome {:?}", outcome),
        }
    }

    /// Get the effective priority of the specified task, or of the current
    /// task if `None`.
    pub fn task_get_priority(task: Option<TaskId>) -> Result<Priority, GetTaskPriorityError> {
        Self::read_task(task, |cb| cb.effective_priority.get())
    }

    /// Get the base priority of the specified task, or of the current task if
    /// `None`.
    pub fn task_base_priority(task: Option<TaskId>) -> Result<Priority, GetTaskPriorityError> {
        Self::read_task(task, |cb| cb.base_priority)
    }

    fn read_task<T>(
        task: Option<TaskId>,
        f: impl FnOnce(&TaskCb) -> T,
    ) -> Result<T, GetTaskPriorityError> {
        if task.is_none() {
            expect_task_context::<Traits>()?;
        }
        let lock = lock_cpu::<Traits>()?;
        let kernel = Traits::state().kernel.read(&lock);
        let task = task.unwrap_or_else(|| kernel.running());
        Ok(f(kernel.task_cb(task)?))
    }

    /// Get the state of the specified task. Reports [`TaskState::Dead`] for
    /// an identifier that doesn't refer to a live task.
    pub fn task_state(task: TaskId) -> Result<TaskState, QueryTaskError> {
        let lock = lock_cpu::<Traits>()?;
        let kernel = Traits::state().kernel.read(&lock);
        Ok(kernel
            .tasks
            .get(task)
            .map_or(TaskState::Dead, |cb| cb.st.get().public()))
    }

    /// Block the current task for `seconds` seconds.
    pub fn task_sleep(seconds: u32) -> Result<(), SleepError> {
        Self::task_delay(seconds.saturating_mul(1000))
    }

    /// Block the current task for `ms` milliseconds. A zero delay yields the
    /// CPU.
    pub fn task_delay(ms: u32) -> Result<(), SleepError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        let ticks = Traits::state().kernel.read(&lock).cfg.ms_to_ticks(ms);
        trap(&mut lock, Some(Syscall::Sleep { ticks }));
        Ok(())
    }

    /// Give up the rest of the current time slice to the other ready tasks of
    /// the same priority.
    pub fn task_yield() -> Result<(), SleepError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        trap(&mut lock, Some(Syscall::Yield));
        Ok(())
    }

    /// Terminate the current task with `result`.
    ///
    /// # Safety
    ///
    /// Only meant to be called by the port, from the outermost frame of a task
    /// whose entry point has returned. The task's context is discarded.
    pub unsafe fn exit_task(result: usize) -> ! {
        let lock: CpuLockGuard<Traits> = match lock_cpu::<Traits>() {
            Ok(lock) => lock,
            Err(BadContextError::BadContext) => panic!("a task returned with CPU Lock active"),
        };
        let kernel = Traits::state().kernel.read(&lock);
        let task = kernel.running();
        kernel.tasks[task]
            .syscall
            .set(Some(Syscall::TaskReturn { result }));

        // The dispatcher expects CPU Lock to be active
        forget(lock);

        // Safety: CPU Lock active, task context
        unsafe { Traits::exit_and_dispatch() }
    }
}

/// The entry point of the idle task.
pub(crate) fn idle_task_body<Traits: PortThreading>(_: usize) -> usize {
    Traits::idle()
}

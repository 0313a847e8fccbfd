//! System calls
//!
//! A blocking API call stores a [`Syscall`] in the caller's TCB and traps.
//! The trap handler carries out the request with the rest of the kernel state
//! at hand and, once the request completes, leaves an [`Outcome`] in the TCB
//! for the caller to pick up when it resumes.
use crate::{
    channel::{ChannelId, MsgBuf, RecvBuf},
    klock::CpuLockGuard,
    mutex::MutexId,
    state::Kernel,
    task::{TaskId, TaskSt},
    KernelTraits, UTicks,
};

/// A request from a task to the kernel.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Syscall {
    Yield,
    Sleep {
        ticks: UTicks,
    },
    MutexLock {
        mutex: MutexId,
        /// `None` waits forever
        timeout: Option<UTicks>,
    },
    MutexUnlock {
        mutex: MutexId,
    },
    ChannelSend {
        channel: ChannelId,
        msg: MsgBuf,
        reply: RecvBuf,
    },
    ChannelRecv {
        channel: ChannelId,
        buf: RecvBuf,
    },
    ChannelReply {
        channel: ChannelId,
        msg: MsgBuf,
    },
    TaskReturn {
        result: usize,
    },
    TaskWait {
        target: Option<TaskId>,
    },
}

/// The result of a completed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Outcome {
    #[default]
    None,
    /// `true` if the mutex was acquired, `false` on timeout.
    Acquired(bool),
    /// The length of the received message.
    Received(usize),
    /// The length of the reply.
    Replied(usize),
    /// A child was collected along with its result.
    Reaped(TaskId, usize),
}

/// Trap into the kernel with `syscall` pending on the current task, and return
/// the outcome when the task resumes.
///
/// `None` asks the kernel to reconsider the scheduling decision without any
/// request, e.g., after making a more urgent task ready.
pub(crate) fn trap<Traits: KernelTraits>(
    lock: &mut CpuLockGuard<Traits>,
    syscall: Option<Syscall>,
) -> Outcome {
    let task = {
        let kernel = Traits::state().kernel.read(lock);
        let task = kernel.running();
        let cb = &kernel.tasks[task];
        cb.outcome.set(Outcome::None);
        cb.syscall.set(syscall);
        task
    };

    // The kernel state may change arbitrarily during this call, so no
    // reference into it may be held across it.
    // Safety: CPU Lock active, task context
    unsafe { Traits::yield_cpu() };

    let kernel = Traits::state().kernel.read(lock);
    kernel.tasks[task].outcome.take()
}

impl Kernel {
    /// Carry out `syscall` on behalf of `task`, the running task. Returns
    /// `true` if `task` can keep running.
    pub(crate) fn dispatch(&mut self, task: TaskId, syscall: Syscall) -> bool {
        log::trace!("{:?}: {:?}", task, syscall);
        match syscall {
            Syscall::Yield | Syscall::Sleep { ticks: 0 } => {
                self.make_ready(task);
                false
            }
            Syscall::Sleep { ticks } => {
                self.tasks[task].st.set(TaskSt::Sleep);
                self.add_timeout(task, ticks);
                false
            }
            Syscall::MutexLock { mutex, timeout } => self.lock_mutex(task, mutex, timeout),
            Syscall::MutexUnlock { mutex } => {
                self.unlock_mutex(task, mutex);
                true
            }
            Syscall::ChannelSend {
                channel,
                msg,
                reply,
            } => self.channel_send(task, channel, msg, reply),
            Syscall::ChannelRecv { channel, buf } => self.channel_recv(task, channel, buf),
            Syscall::ChannelReply { channel, msg } => {
                self.channel_reply(task, channel, msg);
                true
            }
            Syscall::TaskReturn { result } => {
                self.task_return(task, result);
                false
            }
            Syscall::TaskWait { target } => self.task_wait(task, target),
        }
    }
}

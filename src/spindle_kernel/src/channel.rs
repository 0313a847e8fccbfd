//! Synchronous message channels
//!
//! A channel connects clients with a server through a rendezvous: a client's
//! [`send`](crate::System::channel_send) blocks until the server has
//! [received](crate::System::channel_recv) the message and
//! [replied](crate::System::channel_reply) to it. Messages are copied directly
//! between the participants' buffers. While the server works on a request, the
//! client is blocked on it and lends it its priority.
use core::{cell::Cell, fmt, ptr};

use crate::{
    error::{ChannelError, CreateObjectError, NoAccessError},
    klock::lock_cpu,
    state::{expect_task_context, Kernel},
    syscall::{trap, Outcome, Syscall},
    task::{TaskId, TaskListHead, TaskSt},
    utils::intrusive_list::ListHead,
    KernelTraits, System,
};

/// Identifies a channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub(crate) usize);

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Channel({})", self.0)
    }
}

/// A message lent to the kernel by a blocked task.
#[derive(Clone, Copy)]
pub(crate) struct MsgBuf {
    ptr: *const u8,
    len: usize,
}

/// A buffer lent to the kernel by a blocked task for a message to be copied
/// into.
#[derive(Clone, Copy)]
pub(crate) struct RecvBuf {
    ptr: *mut u8,
    len: usize,
}

// Safety: The pointers are only dereferenced by `copy_message`, whose caller
// guarantees the buffers are still lent
unsafe impl Send for MsgBuf {}
unsafe impl Send for RecvBuf {}

impl MsgBuf {
    pub(crate) fn new(msg: &[u8]) -> Self {
        Self {
            ptr: msg.as_ptr(),
            len: msg.len(),
        }
    }
}

impl RecvBuf {
    pub(crate) fn new(buf: &mut [u8]) -> Self {
        Self {
            ptr: buf.as_mut_ptr(),
            len: buf.len(),
        }
    }
}

impl fmt::Debug for MsgBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MsgBuf({} bytes)", self.len)
    }
}

impl fmt::Debug for RecvBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RecvBuf({} bytes)", self.len)
    }
}

/// Copy `src` into `dst` and return the message length.
///
/// # Panics
///
/// Panics if `dst` is shorter than `src`.
///
/// # Safety
///
/// Both buffers must still be valid, i.e., the tasks that lent them must be
/// blocked in the calls that created them.
unsafe fn copy_message(src: MsgBuf, dst: RecvBuf) -> usize {
    assert!(
        dst.len >= src.len,
        "a {}-byte message doesn't fit in a {}-byte buffer",
        src.len,
        dst.len
    );
    // Safety: Upheld by the caller. The buffers belong to different tasks, so
    // they don't overlap.
    unsafe { ptr::copy_nonoverlapping(src.ptr, dst.ptr, src.len) };
    src.len
}

/// *Channel control block*
pub(crate) struct ChannelCb {
    /// The clients waiting for the server to receive, linked through
    /// `TaskCb::wait_link`.
    pub(crate) send_queue: TaskListHead,
    /// The server waiting for a message.
    pub(crate) receiver: Cell<Option<TaskId>>,
    /// The client whose message was received and is awaiting the reply.
    pub(crate) client: Cell<Option<TaskId>>,
}

impl ChannelCb {
    fn new() -> Self {
        Self {
            send_queue: Cell::new(ListHead::new()),
            receiver: Cell::new(None),
            client: Cell::new(None),
        }
    }
}

impl Kernel {
    pub(crate) fn create_channel(&mut self) -> ChannelId {
        self.channels.push(ChannelCb::new());
        ChannelId(self.channels.len() - 1)
    }

    fn channel_cb(&self, channel: ChannelId) -> Result<&ChannelCb, NoAccessError> {
        self.channels.get(channel.0).ok_or(NoAccessError::NoAccess)
    }

    /// Handle [`Syscall::ChannelSend`]. The sender always blocks.
    pub(crate) fn channel_send(
        &self,
        task: TaskId,
        channel: ChannelId,
        msg: MsgBuf,
        reply: RecvBuf,
    ) -> bool {
        let cb = &self.channels[channel.0];
        let tcb = &self.tasks[task];

        let server = match cb.receiver.take() {
            Some(server) => server,
            None => {
                tcb.st.set(TaskSt::ChannelSend {
                    channel,
                    msg,
                    reply,
                });
                self.wait_queue(&cb.send_queue).push(task);
                log::trace!("{:?} queued a message on {:?}", task, channel);
                return false;
            }
        };

        let server_cb = &self.tasks[server];
        let buf = match server_cb.st.get() {
            TaskSt::ChannelRecv { buf, .. } => buf,
            st => unreachable!("receiver in state {:?}", st),
        };
        // Safety: The server is blocked in `channel_recv`, and the sender is
        // in the middle of `channel_send`
        let len = unsafe { copy_message(msg, buf) };
        server_cb.outcome.set(Outcome::Received(len));
        self.make_ready(server);

        self.await_reply(task, channel, server, reply);
        false
    }

    /// Handle [`Syscall::ChannelRecv`]. Returns `true` if a message was
    /// already waiting.
    pub(crate) fn channel_recv(&self, task: TaskId, channel: ChannelId, buf: RecvBuf) -> bool {
        let cb = &self.channels[channel.0];
        assert!(
            cb.client.get().is_none(),
            "receiving on a channel with a request awaiting reply"
        );
        assert!(
            cb.receiver.get().is_none(),
            "receiving on a channel that already has a receiver"
        );

        let client = match self.wait_queue(&cb.send_queue).pop_front() {
            Some(client) => client,
            None => {
                self.tasks[task]
                    .st
                    .set(TaskSt::ChannelRecv { channel, buf });
                cb.receiver.set(Some(task));
                log::trace!("{:?} waits for a message on {:?}", task, channel);
                return false;
            }
        };

        let (msg, reply) = match self.tasks[client].st.get() {
            TaskSt::ChannelSend { msg, reply, .. } => (msg, reply),
            st => unreachable!("sender in state {:?}", st),
        };
        // Safety: The client is blocked in `channel_send`, and the server is in
        // the middle of `channel_recv`
        let len = unsafe { copy_message(msg, buf) };
        self.tasks[task].outcome.set(Outcome::Received(len));

        self.await_reply(client, channel, task, reply);
        true
    }

    /// Make `client` wait for `server`'s reply.
    fn await_reply(&self, client: TaskId, channel: ChannelId, server: TaskId, reply: RecvBuf) {
        self.tasks[client].st.set(TaskSt::ChannelReply {
            channel,
            server,
            reply,
        });
        self.channels[channel.0].client.set(Some(client));
        self.add_blocked(server, client);
        log::trace!("{:?} is serving {:?} on {:?}", server, client, channel);
    }

    /// Handle [`Syscall::ChannelReply`]. The replier keeps running unless the
    /// client is more urgent.
    pub(crate) fn channel_reply(&self, task: TaskId, channel: ChannelId, msg: MsgBuf) {
        let cb = &self.channels[channel.0];
        let client = match cb.client.take() {
            Some(client) => client,
            None => panic!("replying on a channel with no request to reply to"),
        };

        let client_cb = &self.tasks[client];
        let reply = match client_cb.st.get() {
            TaskSt::ChannelReply { server, reply, .. } => {
                assert_eq!(server, task, "replying to a request received by another task");
                reply
            }
            st => unreachable!("client in state {:?}", st),
        };
        // Safety: The client is blocked in `channel_send`, and the server is in
        // the middle of `channel_reply`
        let len = unsafe { copy_message(msg, reply) };
        client_cb.outcome.set(Outcome::Replied(len));

        self.remove_blocked(task, client);
        self.make_ready(client);
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Create a channel.
    pub fn channel_create() -> Result<ChannelId, CreateObjectError> {
        let mut lock = lock_cpu::<Traits>()?;
        Ok(Traits::state().kernel.write(&mut lock).create_channel())
    }

    /// Send `msg` over the channel and wait for the reply, which is copied
    /// into `reply`. Returns the length of the reply.
    ///
    /// # Panics
    ///
    /// The kernel panics if the receiver's buffer is shorter than `msg`, or if
    /// `reply` is shorter than the reply.
    pub fn channel_send(channel: ChannelId, msg: &[u8], reply: &mut [u8]) -> Result<usize, ChannelError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        Traits::state().kernel.read(&lock).channel_cb(channel)?;

        let syscall = Syscall::ChannelSend {
            channel,
            msg: MsgBuf::new(msg),
            reply: RecvBuf::new(reply),
        };
        match trap(&mut lock, Some(syscall)) {
            Outcome::Replied(len) => Ok(len),
            outcome => unreachable!("unexpected outcome {:?}", outcome),
        }
    }

    /// Wait for a message on the channel and copy it into `buf`. Returns the
    /// length of the message. The sender stays blocked until
    /// [`channel_reply`](Self::channel_reply) is called.
    ///
    /// # Panics
    ///
    /// The kernel panics if the previous request on the channel hasn't been
    /// replied to, or if another task is already receiving on it.
    pub fn channel_recv(channel: ChannelId, buf: &mut [u8]) -> Result<usize, ChannelError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        Traits::state().kernel.read(&lock).channel_cb(channel)?;

        let syscall = Syscall::ChannelRecv {
            channel,
            buf: RecvBuf::new(buf),
        };
        match trap(&mut lock, Some(syscall)) {
            Outcome::Received(len) => Ok(len),
            outcome => unreachable!("unexpected outcome {:?}", outcome),
        }
    }

    /// Reply to the request received last on the channel and release its
    /// sender.
    ///
    /// # Panics
    ///
    /// The kernel panics if there's no request to reply to, or if it was
    /// received by another task.
    pub fn channel_reply(channel: ChannelId, msg: &[u8]) -> Result<(), ChannelError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        Traits::state().kernel.read(&lock).channel_cb(channel)?;

        trap(
            &mut lock,
            Some(Syscall::ChannelReply {
                channel,
                msg: MsgBuf::new(msg),
            }),
        );
        Ok(())
    }
}

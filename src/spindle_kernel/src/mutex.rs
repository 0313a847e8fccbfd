//! Mutexes
//!
//! A mutex is owned by at most one task at a time. The tasks waiting for it
//! are queued by effective priority and lend their priority to the owner, so
//! a low-priority owner can't be starved by medium-priority tasks while a
//! high-priority task waits (priority inversion).
//!
//! Uncontended operations complete in the calling task under CPU Lock.
//! Contended ones trap into the kernel.
use core::{cell::Cell, fmt};

use crate::{
    error::{CreateObjectError, LockMutexError, NoAccessError, QueryMutexError, UnlockMutexError},
    klock::{lock_cpu, CpuLockGuard},
    state::{expect_task_context, Kernel},
    syscall::{trap, Outcome, Syscall},
    task::{TaskId, TaskListHead, TaskSt},
    utils::intrusive_list::ListHead,
    KernelTraits, System, UTicks,
};

/// Identifies a mutex.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexId(pub(crate) usize);

impl fmt::Debug for MutexId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mutex({})", self.0)
    }
}

/// *Mutex control block*
pub(crate) struct MutexCb {
    /// A recursive mutex can be relocked by its owner; the owner must unlock
    /// it as many times.
    pub(crate) recursive: bool,
    pub(crate) owner: Cell<Option<TaskId>>,
    /// The lock depth. Nonzero iff `owner` is `Some(_)`.
    pub(crate) count: Cell<usize>,
    /// The waiting tasks, linked through `TaskCb::wait_link`.
    pub(crate) queue: TaskListHead,
}

impl MutexCb {
    fn new(recursive: bool) -> Self {
        Self {
            recursive,
            owner: Cell::new(None),
            count: Cell::new(0),
            queue: Cell::new(ListHead::new()),
        }
    }
}

impl Kernel {
    pub(crate) fn create_mutex(&mut self, recursive: bool) -> MutexId {
        self.mutexes.push(MutexCb::new(recursive));
        MutexId(self.mutexes.len() - 1)
    }

    fn mutex_cb(&self, mutex: MutexId) -> Result<&MutexCb, NoAccessError> {
        self.mutexes.get(mutex.0).ok_or(NoAccessError::NoAccess)
    }

    /// Acquire `mutex` for `task` if that's possible without waiting.
    pub(crate) fn try_acquire_mutex(&self, task: TaskId, mutex: MutexId) -> bool {
        let cb = &self.mutexes[mutex.0];
        match cb.owner.get() {
            None => {
                cb.owner.set(Some(task));
                cb.count.set(1);
                let held = &self.tasks[task].held_mutexes;
                held.set(held.get() + 1);
                true
            }
            Some(owner) if owner == task && cb.recursive => {
                cb.count.set(cb.count.get() + 1);
                true
            }
            Some(_) => false,
        }
    }

    /// Handle [`Syscall::MutexLock`]. Returns `true` if `task` keeps running.
    ///
    /// A task relocking a non-recursive mutex it owns waits for itself, and
    /// only a timeout can end the wait.
    pub(crate) fn lock_mutex(
        &self,
        task: TaskId,
        mutex: MutexId,
        timeout: Option<UTicks>,
    ) -> bool {
        let tcb = &self.tasks[task];
        if self.try_acquire_mutex(task, mutex) {
            tcb.outcome.set(Outcome::Acquired(true));
            return true;
        }
        if timeout == Some(0) {
            tcb.outcome.set(Outcome::Acquired(false));
            return true;
        }

        let cb = &self.mutexes[mutex.0];
        let owner = match cb.owner.get() {
            Some(owner) => owner,
            None => unreachable!(),
        };

        tcb.st.set(TaskSt::Mutex {
            mutex,
            timed: timeout.is_some(),
        });
        self.wait_queue(&cb.queue).push(task);
        if let Some(ticks) = timeout {
            self.add_timeout(task, ticks);
        }
        self.add_blocked(owner, task);

        log::trace!("{:?} waits for {:?} owned by {:?}", task, mutex, owner);
        false
    }

    /// Give up on waiting for a mutex after the timeout elapsed. `task` has
    /// already been removed from the sleep set.
    pub(crate) fn mutex_wait_timed_out(&self, task: TaskId, mutex: MutexId) {
        let cb = &self.mutexes[mutex.0];
        self.wait_queue(&cb.queue).remove(task);
        if let Some(owner) = cb.owner.get() {
            self.remove_blocked(owner, task);
        }
        self.tasks[task].outcome.set(Outcome::Acquired(false));
        self.make_ready(task);

        log::trace!("{:?} timed out waiting for {:?}", task, mutex);
    }

    /// Release one level of `mutex` held by `task`. When the mutex becomes
    /// free, it's handed over to the most urgent waiter, which also becomes
    /// the owner the remaining waiters are blocked on.
    pub(crate) fn unlock_mutex(&self, task: TaskId, mutex: MutexId) {
        let cb = &self.mutexes[mutex.0];
        assert_eq!(cb.owner.get(), Some(task), "unlocking a mutex not owned");

        let count = cb.count.get();
        if count > 1 {
            cb.count.set(count - 1);
            return;
        }

        let held = &self.tasks[task].held_mutexes;
        held.set(held.get() - 1);

        let next = match self.wait_queue(&cb.queue).pop_front() {
            Some(next) => next,
            None => {
                cb.owner.set(None);
                cb.count.set(0);
                return;
            }
        };

        let next_cb = &self.tasks[next];
        if let TaskSt::Mutex { timed: true, .. } = next_cb.st.get() {
            self.remove_timeout(next);
        }

        cb.owner.set(Some(next));
        cb.count.set(1);
        next_cb.held_mutexes.set(next_cb.held_mutexes.get() + 1);
        next_cb.outcome.set(Outcome::Acquired(true));
        self.unlink_blocker(task, next);
        self.make_ready(next);

        for (waiter, _) in self.wait_queue(&cb.queue).iter() {
            self.unlink_blocker(task, waiter);
            self.link_blocker(next, waiter);
        }

        log::trace!("{:?} hands {:?} over to {:?}", task, mutex, next);

        self.propagate_priority(next);
        self.propagate_priority(task);
    }

    /// Return `true` if the unlock can complete without trapping: the lock
    /// isn't released, or nobody is waiting for it.
    fn can_unlock_in_place(&self, mutex: MutexId) -> bool {
        let cb = &self.mutexes[mutex.0];
        cb.count.get() > 1 || cb.queue.get().is_empty()
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Create a mutex.
    pub fn mutex_create(recursive: bool) -> Result<MutexId, CreateObjectError> {
        let mut lock = lock_cpu::<Traits>()?;
        Ok(Traits::state().kernel.write(&mut lock).create_mutex(recursive))
    }

    /// Acquire the mutex, waiting as long as it takes.
    pub fn mutex_lock(mutex: MutexId) -> Result<(), LockMutexError> {
        let mut lock = Self::lock_mutex_context(mutex)?;
        if Self::try_acquire(&lock, mutex) {
            return Ok(());
        }

        match trap(
            &mut lock,
            Some(Syscall::MutexLock {
                mutex,
                timeout: None,
            }),
        ) {
            Outcome::Acquired(true) => Ok(()),
            outcome => unreachable!("unexpected outcome {:?}", outcome),
        }
    }

    /// Acquire the mutex if it's available right now. Returns `false` if it
    /// isn't.
    pub fn mutex_try_lock(mutex: MutexId) -> Result<bool, LockMutexError> {
        let lock = Self::lock_mutex_context(mutex)?;
        Ok(Self::try_acquire(&lock, mutex))
    }

    /// Acquire the mutex, waiting for at most `ms` milliseconds. Returns
    /// `false` on timeout.
    pub fn mutex_timed_lock(mutex: MutexId, ms: u32) -> Result<bool, LockMutexError> {
        let mut lock = Self::lock_mutex_context(mutex)?;
        if Self::try_acquire(&lock, mutex) {
            return Ok(true);
        }

        let ticks = Traits::state().kernel.read(&lock).cfg.ms_to_ticks(ms);
        if ticks == 0 {
            return Ok(false);
        }

        match trap(
            &mut lock,
            Some(Syscall::MutexLock {
                mutex,
                timeout: Some(ticks),
            }),
        ) {
            Outcome::Acquired(acquired) => Ok(acquired),
            outcome => unreachable!("unexpected outcome {:?}", outcome),
        }
    }

    /// Release the mutex. A recursive mutex is released when it has been
    /// unlocked as many times as it was locked.
    pub fn mutex_unlock(mutex: MutexId) -> Result<(), UnlockMutexError> {
        expect_task_context::<Traits>()?;
        let mut lock = lock_cpu::<Traits>()?;
        let kernel = Traits::state().kernel.read(&lock);
        let cb = kernel.mutex_cb(mutex)?;
        let task = kernel.running();
        if cb.owner.get() != Some(task) {
            return Err(UnlockMutexError::NotOwner);
        }

        if kernel.can_unlock_in_place(mutex) {
            kernel.unlock_mutex(task, mutex);
        } else {
            trap(&mut lock, Some(Syscall::MutexUnlock { mutex }));
        }
        Ok(())
    }

    /// Return `true` if the mutex is currently owned by some task.
    pub fn mutex_is_locked(mutex: MutexId) -> Result<bool, QueryMutexError> {
        let lock = lock_cpu::<Traits>()?;
        let kernel = Traits::state().kernel.read(&lock);
        Ok(kernel.mutex_cb(mutex)?.owner.get().is_some())
    }

    fn lock_mutex_context(mutex: MutexId) -> Result<CpuLockGuard<Traits>, LockMutexError> {
        expect_task_context::<Traits>()?;
        let lock = lock_cpu::<Traits>()?;
        Traits::state().kernel.read(&lock).mutex_cb(mutex)?;
        Ok(lock)
    }

    fn try_acquire(lock: &CpuLockGuard<Traits>, mutex: MutexId) -> bool {
        let kernel = Traits::state().kernel.read(lock);
        kernel.try_acquire_mutex(kernel.running(), mutex)
    }
}

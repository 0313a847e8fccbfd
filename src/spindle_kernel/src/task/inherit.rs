//! Priority inheritance
//!
//! Each task keeps the tasks blocked on it (mutex waiters, a client awaiting
//! a reply, a parent waiting for it) in its blocker list, and its effective
//! priority is the maximum of its base priority and the effective priority of
//! the front blocker. A change is carried up the chain of `blocked_on` links
//! iteratively, stopping at the first task whose effective priority doesn't
//! change. The chain can therefore be arbitrarily long, and a cycle (a task
//! blocked on itself) terminates because nothing changes along it.
use super::{TaskId, TaskSt};
use crate::state::Kernel;

impl Kernel {
    /// Record that `blocker` is blocked on `owner`, and let `owner` (and the
    /// tasks it's blocked on) inherit its priority.
    pub(crate) fn add_blocked(&self, owner: TaskId, blocker: TaskId) {
        self.link_blocker(owner, blocker);
        self.propagate_priority(owner);
    }

    /// Undo [`Self::add_blocked`].
    pub(crate) fn remove_blocked(&self, owner: TaskId, blocker: TaskId) {
        self.unlink_blocker(owner, blocker);
        self.propagate_priority(owner);
    }

    /// Reposition `blocker` in `owner`'s blocker list after a change in
    /// `blocker`'s effective priority, and carry the change up the chain.
    pub(crate) fn update_blocked(&self, mut owner: TaskId, mut blocker: TaskId) {
        loop {
            self.blockers(owner).reposition(blocker);

            if !self.recompute_priority(owner) {
                return;
            }

            match self.tasks[owner].blocked_on.get() {
                Some(next) => {
                    blocker = owner;
                    owner = next;
                }
                None => return,
            }
        }
    }

    /// Recompute the effective priority of `task` from scratch and carry a
    /// change up the chain.
    pub(crate) fn propagate_priority(&self, task: TaskId) {
        if self.recompute_priority(task) {
            if let Some(owner) = self.tasks[task].blocked_on.get() {
                self.update_blocked(owner, task);
            }
        }
    }

    /// Link `blocker` into `owner`'s blocker list without updating any
    /// priority.
    pub(crate) fn link_blocker(&self, owner: TaskId, blocker: TaskId) {
        let cb = &self.tasks[blocker];
        debug_assert_eq!(cb.blocked_on.get(), None);
        cb.blocked_on.set(Some(owner));
        self.blockers(owner).push(blocker);
    }

    /// Unlink `blocker` from `owner`'s blocker list without updating any
    /// priority.
    pub(crate) fn unlink_blocker(&self, owner: TaskId, blocker: TaskId) {
        let cb = &self.tasks[blocker];
        debug_assert_eq!(cb.blocked_on.get(), Some(owner));
        cb.blocked_on.set(None);
        self.blockers(owner).remove(blocker);
    }

    /// Update the effective priority of `task` and reposition it in the
    /// queue it's waiting in. Returns `true` if the priority changed.
    fn recompute_priority(&self, task: TaskId) -> bool {
        let cb = &self.tasks[task];
        let inherited = self
            .blockers(task)
            .front_data()
            .map_or(0, |blocker| blocker.effective_priority.get());
        let new = cb.base_priority.max(inherited);
        let old = cb.effective_priority.replace(new);
        if new == old {
            return false;
        }

        log::trace!("{:?}: effective priority {} -> {}", task, old, new);

        // The queues are ordered by effective priority
        let raised = new > old;
        match cb.st.get() {
            TaskSt::Ready => {
                let mut queue = self.ready_queue();
                if raised {
                    queue.increase(task);
                } else {
                    queue.decrease(task);
                }
            }
            TaskSt::Mutex { mutex, .. } => {
                let mut queue = self.wait_queue(&self.mutexes[mutex.0].queue);
                if raised {
                    queue.increase(task);
                } else {
                    queue.decrease(task);
                }
            }
            TaskSt::ChannelSend { channel, .. } => {
                let mut queue = self.wait_queue(&self.channels[channel.0].send_queue);
                if raised {
                    queue.increase(task);
                } else {
                    queue.decrease(task);
                }
            }
            _ => {}
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        state::Kernel,
        task::{TaskAttr, TaskId, TaskSt},
        TimerCfg,
    };

    fn kernel() -> Kernel {
        Kernel::new(TimerCfg {
            time_slice: 10,
            min_quantum: 1,
            max_reload: 1000,
            ticks_per_ms: 1,
        })
    }

    fn body(_: usize) -> usize {
        0
    }

    fn spawn(kernel: &mut Kernel, priority: u8) -> TaskId {
        let task = kernel.create_task(None, TaskAttr::new(body, 0, priority));
        // Take it out of the ready queue so that only the inheritance links
        // matter
        kernel.ready_queue().remove(task);
        kernel.tasks[task].st.set(TaskSt::Sleep);
        task
    }

    fn prio(kernel: &Kernel, task: TaskId) -> u8 {
        kernel.tasks[task].effective_priority.get()
    }

    #[test]
    fn chain() {
        let mut k = kernel();
        let a = spawn(&mut k, 1);
        let b = spawn(&mut k, 2);
        let c = spawn(&mut k, 3);
        let d = spawn(&mut k, 9);

        // a <- b <- c
        k.add_blocked(a, b);
        k.add_blocked(b, c);
        assert_eq!([prio(&k, a), prio(&k, b), prio(&k, c)], [3, 3, 3]);

        // d joins at the end of the chain
        k.add_blocked(c, d);
        assert_eq!([prio(&k, a), prio(&k, b), prio(&k, c)], [9, 9, 9]);

        k.remove_blocked(c, d);
        assert_eq!([prio(&k, a), prio(&k, b), prio(&k, c)], [3, 3, 3]);

        k.remove_blocked(a, b);
        assert_eq!([prio(&k, a), prio(&k, b), prio(&k, c)], [1, 3, 3]);
    }

    #[test]
    fn max_of_several_blockers() {
        let mut k = kernel();
        let owner = spawn(&mut k, 1);
        let x = spawn(&mut k, 5);
        let y = spawn(&mut k, 7);
        let z = spawn(&mut k, 6);
        for t in [x, y, z] {
            k.add_blocked(owner, t);
        }
        assert_eq!(prio(&k, owner), 7);
        let order: Vec<_> = k.blockers(owner).iter().map(|(t, _)| t).collect();
        assert_eq!(order, [y, z, x]);

        k.remove_blocked(owner, y);
        assert_eq!(prio(&k, owner), 6);
    }

    #[test]
    fn update_reorders_blocker_list() {
        let mut k = kernel();
        let owner = spawn(&mut k, 1);
        let x = spawn(&mut k, 5);
        let y = spawn(&mut k, 4);
        let boost = spawn(&mut k, 8);
        k.add_blocked(owner, x);
        k.add_blocked(owner, y);
        assert_eq!(prio(&k, owner), 5);

        // `y` inherits from a new blocker of its own
        k.add_blocked(y, boost);
        assert_eq!(prio(&k, y), 8);
        assert_eq!(prio(&k, owner), 8);
        assert_eq!(k.blockers(owner).front(), Some(y));
    }

    #[test]
    fn self_block_terminates() {
        let mut k = kernel();
        let a = spawn(&mut k, 4);
        k.add_blocked(a, a);
        assert_eq!(prio(&k, a), 4);
        k.remove_blocked(a, a);
        assert_eq!(prio(&k, a), 4);
    }

    #[test]
    fn ready_queue_follows_inheritance() {
        let mut k = kernel();
        let low = k.create_task(None, TaskAttr::new(body, 0, 1));
        let mid = k.create_task(None, TaskAttr::new(body, 0, 5));
        let high = spawn(&mut k, 9);
        assert_eq!(k.ready_queue().front(), Some(mid));

        k.add_blocked(low, high);
        assert_eq!(k.ready_queue().front(), Some(low));

        k.remove_blocked(low, high);
        assert_eq!(k.ready_queue().front(), Some(mid));
    }
}

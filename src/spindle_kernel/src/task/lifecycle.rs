//! Task termination and collection
//!
//! A task that returns stays around as a zombie until its parent collects the
//! result with `task_wait`, unless the parent is already waiting for it, in
//! which case the result is handed over and the task is destroyed right away.
//! A task whose parent is gone has nobody to collect its result and is
//! destroyed as soon as it returns.
use alloc::vec::Vec;

use super::{TaskId, TaskSt};
use crate::{state::Kernel, syscall::Outcome};

impl Kernel {
    /// Handle [`Syscall::TaskReturn`](crate::syscall::Syscall::TaskReturn).
    pub(crate) fn task_return(&mut self, task: TaskId, result: usize) {
        assert_eq!(
            self.tasks[task].held_mutexes.get(),
            0,
            "{:?} returned while it still owns a mutex",
            task
        );
        {
            let blockers = self.blockers(task);
            let mut blockers = blockers.iter();
            if let Some((_, waiter)) = blockers.next() {
                assert!(
                    matches!(waiter.st.get(), TaskSt::Wait { .. }),
                    "a returning task is blocking a task in state {:?}",
                    waiter.st.get()
                );
            }
            assert!(
                blockers.next().is_none(),
                "a returning task is blocking more than one task"
            );
        }

        log::debug!("{:?} returned {}", task, result);

        let cb = &self.tasks[task];
        let parent = match cb.parent.get() {
            Some(parent) => parent,
            None if self.init_task.get() == Some(task) => {
                cb.st.set(TaskSt::Zombie { result });
                return;
            }
            None => {
                log::debug!("{:?} is an orphan; discarding its result", task);
                self.destroy_task(task);
                return;
            }
        };

        let parent_cb = &self.tasks[parent];
        match parent_cb.st.get() {
            TaskSt::Wait { target } if target.is_none() || target == Some(task) => {
                if target.is_some() {
                    self.remove_blocked(task, parent);
                }
                parent_cb.outcome.set(Outcome::Reaped(task, result));
                self.make_ready(parent);
                self.destroy_task(task);
            }
            _ => {
                cb.st.set(TaskSt::Zombie { result });
                // Keep the zombies in the order they returned
                let mut siblings = self.children(parent);
                siblings.remove(task);
                siblings.push_back(task);
            }
        }
    }

    /// Handle [`Syscall::TaskWait`](crate::syscall::Syscall::TaskWait).
    /// Returns `true` if a child was collected without waiting.
    pub(crate) fn task_wait(&mut self, task: TaskId, target: Option<TaskId>) -> bool {
        let cb = &self.tasks[task];
        match target {
            Some(child) => {
                assert_eq!(
                    self.tasks.get(child).and_then(|c| c.parent.get()),
                    Some(task),
                    "waiting for a task that is not a child"
                );
                if let TaskSt::Zombie { result } = self.tasks[child].st.get() {
                    self.reap(task, child, result);
                    return true;
                }
                cb.st.set(TaskSt::Wait { target });
                self.add_blocked(child, task);
            }
            None => {
                assert!(
                    !cb.children.get().is_empty(),
                    "waiting for children without any"
                );
                let zombie = self
                    .children(task)
                    .iter()
                    .find_map(|(child, child_cb)| match child_cb.st.get() {
                        TaskSt::Zombie { result } => Some((child, result)),
                        _ => None,
                    });
                if let Some((child, result)) = zombie {
                    self.reap(task, child, result);
                    return true;
                }
                cb.st.set(TaskSt::Wait { target });
            }
        }

        log::trace!("{:?} waits for {:?}", task, target);
        false
    }

    fn reap(&mut self, parent: TaskId, child: TaskId, result: usize) {
        self.tasks[parent]
            .outcome
            .set(Outcome::Reaped(child, result));
        self.destroy_task(child);
    }

    /// Release a task that has finished. Its children lose their parent, and
    /// those of them that have already returned are released as well.
    pub(crate) fn destroy_task(&mut self, task: TaskId) {
        let mut doomed = Vec::new();
        doomed.push(task);

        while let Some(task) = doomed.pop() {
            let cb = &self.tasks[task];
            assert!(
                cb.blockers.get().is_empty(),
                "destroying a task that other tasks are blocked on"
            );

            if let Some(parent) = cb.parent.get() {
                self.children(parent).remove(task);
            }

            let mut children = self.children(task);
            while let Some(child) = children.pop_front() {
                let child_cb = &self.tasks[child];
                child_cb.parent.set(None);
                if let TaskSt::Zombie { .. } = child_cb.st.get() {
                    doomed.push(child);
                }
            }

            cb.st.set(TaskSt::Dead);
            self.tasks.remove(task);
            log::debug!("{:?} destroyed", task);
        }
    }
}

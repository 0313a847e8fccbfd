//! The ready queue
use super::{Priority, TaskId, TaskSt};
use crate::state::Kernel;

/// The result type of [`Kernel::pop_front_task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScheduleDecision<T> {
    /// The kernel should not perform context switch and should continue to
    /// schedule the current task.
    Keep,
    /// The kernel should perform context switch to the specified task.
    SwitchTo(T),
}

impl Kernel {
    /// Put `task` in the ready queue behind the ready tasks of the same
    /// effective priority.
    pub(crate) fn make_ready(&self, task: TaskId) {
        self.tasks[task].st.set(TaskSt::Ready);
        self.ready_queue().push(task);
    }

    /// Get the effective priority of the most urgent ready task.
    pub(crate) fn ready_priority(&self) -> Option<Priority> {
        self.ready_queue()
            .front_data()
            .map(|cb| cb.effective_priority.get())
    }

    /// Pop the most urgent task from the ready queue if it should take over
    /// the CPU.
    ///
    /// `prev_task_priority` is the effective priority of the task that can
    /// keep running, if any. The current task is kept unless a ready task is
    /// strictly more urgent.
    pub(crate) fn pop_front_task(
        &self,
        prev_task_priority: Option<Priority>,
    ) -> ScheduleDecision<Option<TaskId>> {
        match (self.ready_priority(), prev_task_priority) {
            (Some(next), Some(prev)) if next <= prev => ScheduleDecision::Keep,
            (None, Some(_)) => ScheduleDecision::Keep,
            _ => ScheduleDecision::SwitchTo(self.ready_queue().pop_front()),
        }
    }
}

//! A task observes the priority it was created with.
use spindle_kernel::{Priority, System, TaskAttr, TaskState};
use spindle_port_std::{PortInstance, INIT_PRIORITY};

fn report_priority<Traits: PortInstance>(expected: usize) -> usize {
    let priority = System::<Traits>::task_get_priority(None).unwrap();
    assert_eq!(usize::from(priority), expected);
    assert_eq!(System::<Traits>::task_base_priority(None).unwrap(), priority);
    expected
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    assert_eq!(System::<Traits>::task_get_priority(None).unwrap(), INIT_PRIORITY);

    for priority in 1..100 as Priority {
        let param = usize::from(priority);
        let task =
            System::<Traits>::task_create(&TaskAttr::new(report_priority::<Traits>, param, priority))
                .unwrap();

        if priority > INIT_PRIORITY {
            // A more urgent child runs to completion before `task_create`
            // returns
            assert_eq!(System::<Traits>::task_state(task).unwrap(), TaskState::Zombie);
        } else {
            assert_eq!(System::<Traits>::task_get_priority(Some(task)).unwrap(), priority);
        }

        assert_eq!(System::<Traits>::task_wait(Some(task)).unwrap(), (task, param));
        assert_eq!(System::<Traits>::task_state(task).unwrap(), TaskState::Dead);
    }

    crate::SUCCESS
}

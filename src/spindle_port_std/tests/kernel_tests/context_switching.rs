//! Tasks of the same priority take turns whenever one of them yields.
use spindle_kernel::{System, TaskAttr, TaskState};
use spindle_port_std::{PortInstance, INIT_PRIORITY};
use std::sync::atomic::{AtomicUsize, Ordering};

const ROUNDS: usize = 100;

/// The parameter of the task that ran last
static LAST: AtomicUsize = AtomicUsize::new(0);

fn busy_yield<Traits: PortInstance>(me: usize) -> usize {
    for i in 0..ROUNDS {
        let prev = LAST.swap(me, Ordering::Relaxed);
        if i > 0 {
            assert_ne!(prev, me, "task {} ran twice in a row", me);
        }
        System::<Traits>::task_yield().unwrap();
    }
    me
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let t1 = System::<Traits>::task_create(&TaskAttr::new(busy_yield::<Traits>, 1, INIT_PRIORITY))
        .unwrap();
    let t2 = System::<Traits>::task_create(&TaskAttr::new(busy_yield::<Traits>, 2, INIT_PRIORITY))
        .unwrap();

    // Neither of them has run yet
    assert_eq!(System::<Traits>::task_state(t1).unwrap(), TaskState::Ready);
    assert_eq!(System::<Traits>::task_state(t2).unwrap(), TaskState::Ready);
    assert_eq!(LAST.load(Ordering::Relaxed), 0);

    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t1, 1));
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t2, 2));

    crate::SUCCESS
}

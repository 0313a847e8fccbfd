//! Two tasks flip a shared flag and yield to each other. Each of them must
//! find the flag flipped back when it resumes.
use spindle_kernel::{System, TaskAttr};
use spindle_port_std::{PortInstance, INIT_PRIORITY};
use std::sync::atomic::{AtomicBool, Ordering};

static VALUE: AtomicBool = AtomicBool::new(true);

fn flipper<Traits: PortInstance>(_: usize) -> usize {
    for _ in 0..1000 {
        let prev = VALUE.load(Ordering::Relaxed);
        VALUE.store(!prev, Ordering::Relaxed);
        System::<Traits>::task_yield().unwrap();
        assert_eq!(VALUE.load(Ordering::Relaxed), prev);
    }
    VALUE.store(!VALUE.load(Ordering::Relaxed), Ordering::Relaxed);
    0
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    System::<Traits>::task_create(&TaskAttr::new(flipper::<Traits>, 0, INIT_PRIORITY)).unwrap();
    System::<Traits>::task_create(&TaskAttr::new(flipper::<Traits>, 0, INIT_PRIORITY)).unwrap();
    System::<Traits>::task_wait(None).unwrap();
    System::<Traits>::task_wait(None).unwrap();

    assert!(VALUE.load(Ordering::Relaxed));
    crate::SUCCESS
}

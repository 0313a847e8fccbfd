//! Sleeping tasks wake up in the order of their deadlines.
use spindle_kernel::{System, TaskAttr};
use spindle_port_std::{PortInstance, TICKS_PER_MS};

/// Sleep for `seconds` and return the time of the wake-up.
fn sleeper<Traits: PortInstance>(seconds: usize) -> usize {
    System::<Traits>::task_sleep(seconds as u32).unwrap();
    spindle_port_std::now::<Traits>() as usize
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let t1 = System::<Traits>::task_create(&TaskAttr::new(sleeper::<Traits>, 1, 10)).unwrap();
    let t2 = System::<Traits>::task_create(&TaskAttr::new(sleeper::<Traits>, 2, 10)).unwrap();

    let second = 1000 * TICKS_PER_MS as usize;
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t1, second));
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t2, 2 * second));

    crate::SUCCESS
}

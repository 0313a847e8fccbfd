//! Delayed tasks wake up in the order of their deadlines, regardless of the
//! order they went to sleep in.
use spindle_kernel::{System, TaskAttr};
use spindle_port_std::{PortInstance, TICKS_PER_MS};

/// Delay for `ms` and return the time of the wake-up.
fn delayer<Traits: PortInstance>(ms: usize) -> usize {
    System::<Traits>::task_delay(ms as u32).unwrap();
    spindle_port_std::now::<Traits>() as usize
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let ms = TICKS_PER_MS as usize;

    let t1 = System::<Traits>::task_create(&TaskAttr::new(delayer::<Traits>, 10, 10)).unwrap();
    let t2 = System::<Traits>::task_create(&TaskAttr::new(delayer::<Traits>, 20, 10)).unwrap();
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t1, 10 * ms));
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t2, 20 * ms));

    // The longer delay goes to sleep first this time
    let t3 = System::<Traits>::task_create(&TaskAttr::new(delayer::<Traits>, 30, 10)).unwrap();
    let t4 = System::<Traits>::task_create(&TaskAttr::new(delayer::<Traits>, 5, 10)).unwrap();
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t4, 25 * ms));
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (t3, 50 * ms));

    // A zero delay doesn't block
    System::<Traits>::task_delay(0).unwrap();
    assert_eq!(spindle_port_std::now::<Traits>(), 50 * ms as u64);

    crate::SUCCESS
}

//! CPU-bound tasks of the same priority are preempted when their time slice
//! runs out.
use spin::Mutex as SpinMutex;
use spindle_kernel::{System, TaskAttr};
use spindle_port_std::{PortInstance, INIT_PRIORITY, TICKS_PER_MS, TIME_SLICE};

/// Each task works for this many milliseconds, i.e., three time slices.
const WORK_MS: u64 = 30;

/// The tasks in the order they got the CPU
static SWITCHES: SpinMutex<Vec<usize>> = SpinMutex::new(Vec::new());

fn cruncher<Traits: PortInstance>(me: usize) -> usize {
    for _ in 0..WORK_MS {
        {
            let mut switches = SWITCHES.lock();
            if switches.last() != Some(&me) {
                switches.push(me);
            }
        }
        spindle_port_std::advance_time::<Traits>(u64::from(TICKS_PER_MS));
    }
    me
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    assert_eq!(TIME_SLICE, 10 * TICKS_PER_MS);

    let a = System::<Traits>::task_create(&TaskAttr::new(cruncher::<Traits>, 1, INIT_PRIORITY))
        .unwrap();
    let b = System::<Traits>::task_create(&TaskAttr::new(cruncher::<Traits>, 2, INIT_PRIORITY))
        .unwrap();
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (a, 1));
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (b, 2));

    assert_eq!(*SWITCHES.lock(), [1, 2, 1, 2, 1, 2]);
    assert_eq!(
        spindle_port_std::now::<Traits>(),
        2 * WORK_MS * u64::from(TICKS_PER_MS)
    );

    // Running alone, a task isn't interrupted
    SWITCHES.lock().clear();
    let c = System::<Traits>::task_create(&TaskAttr::new(cruncher::<Traits>, 3, 2)).unwrap();
    assert_eq!(System::<Traits>::task_wait(Some(c)).unwrap(), (c, 3));
    assert_eq!(*SWITCHES.lock(), [3]);

    crate::SUCCESS
}

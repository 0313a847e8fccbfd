//! `mutex_timed_lock` gives up when the timeout elapses, and wins when the
//! mutex is released before that.
use once_cell::sync::OnceCell;
use spindle_kernel::{MutexId, System, TaskAttr, TaskState};
use spindle_port_std::{PortInstance, TICKS_PER_MS};

static MUTEX: OnceCell<MutexId> = OnceCell::new();

/// Hold the mutex for 50 milliseconds.
fn holder<Traits: PortInstance>(_: usize) -> usize {
    let m = *MUTEX.get().unwrap();
    System::<Traits>::mutex_lock(m).unwrap();
    System::<Traits>::task_delay(50).unwrap();
    System::<Traits>::mutex_unlock(m).unwrap();
    0
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let ms = u64::from(TICKS_PER_MS);
    let m = System::<Traits>::mutex_create(false).unwrap();
    MUTEX.set(m).unwrap();

    let holder = System::<Traits>::task_create(&TaskAttr::new(holder::<Traits>, 0, 2)).unwrap();
    assert_eq!(System::<Traits>::task_state(holder).unwrap(), TaskState::Sleep);
    assert!(System::<Traits>::mutex_is_locked(m).unwrap());

    assert!(!System::<Traits>::mutex_try_lock(m).unwrap());
    assert!(!System::<Traits>::mutex_timed_lock(m, 0).unwrap());
    assert_eq!(spindle_port_std::now::<Traits>(), 0);

    assert!(!System::<Traits>::mutex_timed_lock(m, 10).unwrap());
    assert_eq!(spindle_port_std::now::<Traits>(), 10 * ms);

    assert!(System::<Traits>::mutex_timed_lock(m, 100).unwrap());
    assert_eq!(spindle_port_std::now::<Traits>(), 50 * ms);

    // No timeout is left behind
    System::<Traits>::mutex_unlock(m).unwrap();
    assert_eq!(System::<Traits>::task_wait(Some(holder)).unwrap(), (holder, 0));
    System::<Traits>::task_delay(1).unwrap();
    assert_eq!(spindle_port_std::now::<Traits>(), 51 * ms);

    crate::SUCCESS
}

//! A task holding a mutex inherits the priority of the task waiting for it,
//! so a task of intermediate priority can't get in between.
use once_cell::sync::OnceCell;
use spindle_kernel::{MutexId, System, TaskAttr, TaskState};
use spindle_port_std::PortInstance;
use std::sync::atomic::{AtomicBool, Ordering};

const LOW: u8 = 2;
const MID: u8 = 3;
const HIGH: u8 = 5;

static MUTEX: OnceCell<MutexId> = OnceCell::new();
static MID_RAN: AtomicBool = AtomicBool::new(false);

fn mutex() -> MutexId {
    *MUTEX.get().unwrap()
}

fn low<Traits: PortInstance>(_: usize) -> usize {
    let m = mutex();
    System::<Traits>::mutex_lock(m).unwrap();

    // `high` preempts us and blocks on the mutex
    let high = System::<Traits>::task_create(&TaskAttr::new(high::<Traits>, 0, HIGH)).unwrap();
    assert_eq!(System::<Traits>::task_state(high).unwrap(), TaskState::Mutex);
    assert_eq!(System::<Traits>::task_get_priority(None).unwrap(), HIGH);
    assert_eq!(System::<Traits>::task_base_priority(None).unwrap(), LOW);

    // `mid` can't preempt us while we're working on behalf of `high`
    let mid = System::<Traits>::task_create(&TaskAttr::new(mid::<Traits>, 0, MID)).unwrap();
    assert_eq!(System::<Traits>::task_state(mid).unwrap(), TaskState::Ready);
    assert!(!MID_RAN.load(Ordering::Relaxed));

    // The mutex goes to `high`, which finishes first. Then `mid` runs before
    // we get the CPU back.
    System::<Traits>::mutex_unlock(m).unwrap();
    assert_eq!(System::<Traits>::task_get_priority(None).unwrap(), LOW);
    assert!(MID_RAN.load(Ordering::Relaxed));

    assert_eq!(System::<Traits>::task_wait(Some(high)).unwrap(), (high, 1));
    assert_eq!(System::<Traits>::task_wait(Some(mid)).unwrap(), (mid, 2));
    0
}

fn mid<Traits: PortInstance>(_: usize) -> usize {
    MID_RAN.store(true, Ordering::Relaxed);
    2
}

fn high<Traits: PortInstance>(_: usize) -> usize {
    let m = mutex();
    System::<Traits>::mutex_lock(m).unwrap();
    assert!(!MID_RAN.load(Ordering::Relaxed));
    System::<Traits>::mutex_unlock(m).unwrap();
    1
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let m = System::<Traits>::mutex_create(false).unwrap();
    MUTEX.set(m).unwrap();

    let low = System::<Traits>::task_create(&TaskAttr::new(low::<Traits>, 0, LOW)).unwrap();
    assert_eq!(System::<Traits>::task_wait(Some(low)).unwrap(), (low, 0));
    assert!(!System::<Traits>::mutex_is_locked(m).unwrap());

    crate::SUCCESS
}

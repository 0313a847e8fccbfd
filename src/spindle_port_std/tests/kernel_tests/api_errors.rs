//! Misuses of the kernel API that are reported as errors, and mutex
//! ownership rules.
use once_cell::sync::OnceCell;
use spindle_kernel::{
    GetTaskPriorityError, MutexId, ResultCode, System, TaskAttr, TaskState, UnlockMutexError,
    WaitTaskError,
};
use spindle_port_std::{PortInstance, TICKS_PER_MS};

static MUTEX: OnceCell<MutexId> = OnceCell::new();

fn intruder<Traits: PortInstance>(_: usize) -> usize {
    let m = *MUTEX.get().unwrap();
    let error = System::<Traits>::mutex_unlock(m).unwrap_err();
    assert_eq!(error, UnlockMutexError::NotOwner);
    assert!(!System::<Traits>::mutex_try_lock(m).unwrap());
    ResultCode::from(error) as i8 as usize
}

fn nop<Traits: PortInstance>(_: usize) -> usize {
    0
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let m = System::<Traits>::mutex_create(false).unwrap();
    MUTEX.set(m).unwrap();
    System::<Traits>::mutex_lock(m).unwrap();

    // Only the owner can unlock a mutex
    let intruder =
        System::<Traits>::task_create(&TaskAttr::new(intruder::<Traits>, 0, 2)).unwrap();
    let (_, code) = System::<Traits>::task_wait(Some(intruder)).unwrap();
    assert_eq!(code, ResultCode::NotOwner as i8 as usize);
    assert!(ResultCode::NotOwner.is_err());

    // Relocking a non-recursive mutex fails, or waits for a timeout to pass
    assert!(!System::<Traits>::mutex_try_lock(m).unwrap());
    assert!(!System::<Traits>::mutex_timed_lock(m, 5).unwrap());
    assert_eq!(spindle_port_std::now::<Traits>(), 5 * u64::from(TICKS_PER_MS));
    System::<Traits>::mutex_unlock(m).unwrap();
    assert!(!System::<Traits>::mutex_is_locked(m).unwrap());

    // A recursive mutex is released by the last unlock
    let r = System::<Traits>::mutex_create(true).unwrap();
    System::<Traits>::mutex_lock(r).unwrap();
    assert!(System::<Traits>::mutex_try_lock(r).unwrap());
    System::<Traits>::mutex_unlock(r).unwrap();
    assert!(System::<Traits>::mutex_is_locked(r).unwrap());
    System::<Traits>::mutex_unlock(r).unwrap();
    assert!(!System::<Traits>::mutex_is_locked(r).unwrap());
    assert_eq!(
        System::<Traits>::mutex_unlock(r),
        Err(UnlockMutexError::NotOwner)
    );

    // A task that no longer exists
    let gone = System::<Traits>::task_create(&TaskAttr::new(nop::<Traits>, 0, 1)).unwrap();
    System::<Traits>::task_wait(Some(gone)).unwrap();
    assert_eq!(System::<Traits>::task_state(gone).unwrap(), TaskState::Dead);
    assert_eq!(
        System::<Traits>::task_get_priority(Some(gone)),
        Err(GetTaskPriorityError::NoAccess)
    );
    assert_eq!(
        System::<Traits>::task_wait(Some(gone)),
        Err(WaitTaskError::NoAccess)
    );

    let me = System::<Traits>::current_task().unwrap();
    assert_eq!(System::<Traits>::task_state(me).unwrap(), TaskState::Running);

    crate::SUCCESS
}

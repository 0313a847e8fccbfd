//! Parents collect their children's results. Waiting for a specific child
//! lends it the parent's priority, and a task whose parent is gone is
//! reclaimed when it returns.
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use spindle_kernel::{System, TaskAttr, TaskId, TaskState};
use spindle_port_std::PortInstance;

static ORDER: SpinMutex<Vec<&'static str>> = SpinMutex::new(Vec::new());
static ORPHAN: OnceCell<TaskId> = OnceCell::new();

fn record(what: &'static str) {
    ORDER.lock().push(what);
}

fn worker<Traits: PortInstance>(_: usize) -> usize {
    record("worker");
    7
}

fn bystander<Traits: PortInstance>(_: usize) -> usize {
    record("bystander");
    3
}

fn boss<Traits: PortInstance>(_: usize) -> usize {
    let worker = System::<Traits>::task_create(&TaskAttr::new(worker::<Traits>, 0, 1)).unwrap();
    let bystander =
        System::<Traits>::task_create(&TaskAttr::new(bystander::<Traits>, 0, 3)).unwrap();

    // `worker` runs on our behalf before `bystander` does
    assert_eq!(System::<Traits>::task_wait(Some(worker)).unwrap(), (worker, 7));
    record("boss");
    assert_eq!(System::<Traits>::task_wait(Some(bystander)).unwrap(), (bystander, 3));
    0
}

fn absent_parent<Traits: PortInstance>(_: usize) -> usize {
    let orphan = System::<Traits>::task_create(&TaskAttr::new(orphan::<Traits>, 0, 1)).unwrap();
    ORPHAN.set(orphan).unwrap();
    0
}

fn orphan<Traits: PortInstance>(_: usize) -> usize {
    record("orphan");
    0
}

fn quick<Traits: PortInstance>(param: usize) -> usize {
    param
}

pub fn init<Traits: PortInstance>(_: usize) -> usize {
    let boss = System::<Traits>::task_create(&TaskAttr::new(boss::<Traits>, 0, 5)).unwrap();
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (boss, 0));
    assert_eq!(*ORDER.lock(), ["worker", "boss", "bystander"]);

    // Zombies are collected in the order they returned
    let a = System::<Traits>::task_create(&TaskAttr::new(quick::<Traits>, 10, 2)).unwrap();
    let b = System::<Traits>::task_create(&TaskAttr::new(quick::<Traits>, 20, 2)).unwrap();
    assert_eq!(System::<Traits>::task_state(a).unwrap(), TaskState::Zombie);
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (a, 10));
    assert_eq!(System::<Traits>::task_wait(None).unwrap(), (b, 20));

    let parent =
        System::<Traits>::task_create(&TaskAttr::new(absent_parent::<Traits>, 0, 2)).unwrap();
    assert_eq!(System::<Traits>::task_wait(Some(parent)).unwrap(), (parent, 0));

    // Nobody will collect the result
    let orphan = *ORPHAN.get().unwrap();
    assert_eq!(System::<Traits>::task_state(orphan).unwrap(), TaskState::Ready);
    System::<Traits>::task_delay(1).unwrap();
    assert_eq!(System::<Traits>::task_state(orphan).unwrap(), TaskState::Dead);
    assert_eq!(ORDER.lock().last(), Some(&"orphan"));

    crate::SUCCESS
}

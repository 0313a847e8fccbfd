//! Simulation environment for running the spindle kernel on a hosted
//! environment.
//!
//! Every kernel task is backed by an OS thread, but only the thread of the
//! task the kernel has chosen may execute. The others stay parked until they
//! are handed the *baton* again.
//!
//! The countdown timer is virtual. Time passes only when a task simulates
//! CPU-bound work with [`advance_time`], or when the idle task skips ahead to
//! the next timer expiry. Consequently, the scheduling is fully deterministic
//! and doesn't depend on the host's load.
//!
//! ```rust,ignore
//! spindle_port_std::use_port!(unsafe struct SystemTraits);
//!
//! fn init<Traits: spindle_port_std::PortInstance>(param: usize) -> usize {
//!     param + 1
//! }
//!
//! assert_eq!(spindle_port_std::boot::<SystemTraits>(init::<SystemTraits>, 41), 42);
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use once_cell::sync::OnceCell;
use spin::Mutex as SpinMutex;
use spindle_kernel::{KernelTraits, PortToKernel, Priority, TaskAttr, TaskId, UTicks};
use std::{
    any::Any,
    cell::Cell,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::mpsc,
    thread,
};

mod sched;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate spindle_kernel;

/// The largest reload value of the virtual timer. It's modeled after a 24-bit
/// SysTick counter.
pub const MAX_RELOAD: UTicks = 0xff_ffff;

/// The number of timer ticks in a millisecond. A tick is a microsecond.
pub const TICKS_PER_MS: UTicks = 1_000;

/// The round-robin time slice (10 milliseconds).
pub const TIME_SLICE: UTicks = 10 * TICKS_PER_MS;

/// The shortest period the timer is armed with (1 millisecond).
pub const MIN_QUANTUM: UTicks = TICKS_PER_MS;

/// The priority of the init task started by [`boot`].
pub const INIT_PRIORITY: Priority = 1;

/// Task threads get at least this much stack regardless of
/// [`TaskAttr::stack_size`], which is sized for a microcontroller.
const MIN_THREAD_STACK_SIZE: usize = 256 * 1024;

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: KernelTraits + PortToKernel {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation of
/// the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    sched: SpinMutex<sched::SchedState>,
    exit_send: OnceCell<SpinMutex<mpsc::Sender<Exit>>>,
}

/// How a simulation ended.
enum Exit {
    /// The init task returned with the contained value.
    Finished(usize),
    /// A thread panicked.
    Panicked(Box<dyn Any + Send>),
}

/// The unwinding payload used to discard the context of a thread.
struct ExitThread;

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    Boot,
    /// The backing thread for a task.
    Task,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = Cell::new(ThreadRole::Unknown);
}

#[allow(clippy::missing_safety_doc)]
impl State {
    pub const fn new() -> Self {
        Self {
            sched: SpinMutex::new(sched::SchedState::new()),
            exit_send: OnceCell::new(),
        }
    }

    pub unsafe fn dispatch_first_task<Traits: PortInstance>(&'static self) -> ! {
        log::trace!("dispatch_first_task");
        assert_eq!(expect_worker_thread(), ThreadRole::Boot);
        assert!(self.is_cpu_lock_active::<Traits>());

        self.pass_baton::<Traits>();

        // The requirement of `dispatch_first_task` explicitly allows
        // discarding the context
        resume_unwind(Box::new(ExitThread))
    }

    pub unsafe fn yield_cpu<Traits: PortInstance>(&'static self) {
        log::trace!("yield_cpu");
        assert_eq!(expect_worker_thread(), ThreadRole::Task);
        assert!(self.is_cpu_lock_active::<Traits>());

        // Safety: CPU Lock active, task context
        unsafe { self.switch_away::<Traits>(<Traits as PortToKernel>::handle_trap) };
    }

    pub unsafe fn exit_and_dispatch<Traits: PortInstance>(&'static self) -> ! {
        log::trace!("exit_and_dispatch");
        assert_eq!(expect_worker_thread(), ThreadRole::Task);
        assert!(self.is_cpu_lock_active::<Traits>());

        // Dissociate this thread from the task. The kernel might recycle the
        // task's identifier as soon as it's been dispatched.
        let task = self.current_task();
        self.sched.lock().threads[task.as_usize()] = sched::Tsm::Uninit;

        // Safety: CPU Lock active
        unsafe { <Traits as PortToKernel>::handle_trap() };
        self.pass_baton::<Traits>();

        log::trace!("discarding the thread of {:?}", task);
        resume_unwind(Box::new(ExitThread))
    }

    pub unsafe fn enter_cpu_lock<Traits: PortInstance>(&self) {
        log::trace!("enter_cpu_lock");
        expect_worker_thread();

        let mut sched = self.sched.lock();
        assert!(!sched.cpu_lock);
        sched.cpu_lock = true;
    }

    pub unsafe fn leave_cpu_lock<Traits: PortInstance>(&self) {
        log::trace!("leave_cpu_lock");
        expect_worker_thread();

        let mut sched = self.sched.lock();
        // Unwinding from a panic in the kernel drops every `CpuLockGuard` on
        // the stack, each of which leaves CPU Lock
        assert!(sched.cpu_lock || thread::panicking());
        sched.cpu_lock = false;
    }

    pub unsafe fn initialize_task_state<Traits: PortInstance>(&self, task: TaskId, attr: &TaskAttr) {
        log::trace!("initialize_task_state({:?})", task);
        expect_worker_thread();

        let mut sched = self.sched.lock();
        assert!(sched.cpu_lock);

        let i = task.as_usize();
        if sched.threads.len() <= i {
            sched.threads.resize_with(i + 1, || sched::Tsm::Uninit);
        }
        assert!(
            matches!(sched.threads[i], sched::Tsm::Uninit),
            "{:?} is still backed by a thread",
            task
        );
        sched.threads[i] = sched::Tsm::Dormant(*attr);
    }

    /// The body of the idle task. There's nothing to do until the timer
    /// expires, so skip ahead to that point.
    pub fn idle<Traits: PortInstance>(&'static self) -> ! {
        assert_eq!(expect_worker_thread(), ThreadRole::Task);

        loop {
            // Safety: CPU Lock inactive
            unsafe { self.enter_cpu_lock::<Traits>() };

            // Safety: CPU Lock active
            if !unsafe { Traits::state().has_sleeping_tasks() } {
                panic!("deadlock: every task is blocked, and no timeout is pending");
            }

            let skipped = self.sched.lock().timer.elapse(u64::MAX);
            log::trace!("idle: skipped {} ticks", skipped);

            // Safety: CPU Lock active, task context
            unsafe { self.switch_away::<Traits>(<Traits as PortToKernel>::handle_timer) };

            // Safety: CPU Lock active
            unsafe { self.leave_cpu_lock::<Traits>() };
        }
    }

    pub fn is_cpu_lock_active<Traits: PortInstance>(&self) -> bool {
        expect_worker_thread();

        self.sched.lock().cpu_lock
    }

    pub fn is_task_context<Traits: PortInstance>(&self) -> bool {
        expect_worker_thread();

        THREAD_ROLE.with(|role| match role.get() {
            ThreadRole::Boot => false,
            ThreadRole::Task => true,
            _ => panic!("`is_task_context` was called from an unknown thread"),
        })
    }

    pub unsafe fn timer_value(&self) -> UTicks {
        self.sched.lock().timer.countdown
    }

    pub unsafe fn timer_expired(&self) -> bool {
        std::mem::replace(&mut self.sched.lock().timer.expired, false)
    }

    pub unsafe fn arm_timer(&self, reload: UTicks) {
        log::trace!("arm_timer({})", reload);
        self.sched.lock().timer.arm(reload);
    }

    /// Tell the caller of [`boot`] how the simulation ended.
    fn report(&self, exit: Exit) {
        if let Some(exit_send) = self.exit_send.get() {
            // Nobody listens anymore if the simulation has already ended
            let _ = exit_send.lock().send(exit);
        }
    }

    /// Run the body of a port-managed thread, reporting a panic to the caller
    /// of [`boot`].
    fn run_worker(&self, f: impl FnOnce()) {
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => {}
            Err(payload) if payload.is::<ExitThread>() => {}
            Err(payload) => {
                log::debug!("a worker thread panicked");
                self.report(Exit::Panicked(payload));
            }
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert that the current thread is a worker thread.
fn expect_worker_thread() -> ThreadRole {
    let role = THREAD_ROLE.with(|r| r.get());
    assert_ne!(role, ThreadRole::Unknown);
    role
}

fn spawn_worker(name: String, stack_size: usize, f: impl FnOnce() + Send + 'static) -> thread::Thread {
    match thread::Builder::new().name(name).stack_size(stack_size).spawn(f) {
        Ok(join_handle) => join_handle.thread().clone(),
        Err(e) => panic!("failed to spawn a worker thread: {}", e),
    }
}

/// Boot the kernel with an init task running `entry_point(entry_param)` at
/// [`INIT_PRIORITY`], and run the system until the init task returns. Returns
/// the init task's result.
///
/// A panic in any task is propagated to the caller.
///
/// # Panics
///
/// Panics if `Traits` has already been booted. There is no way to restart a
/// simulated system.
pub fn boot<Traits: PortInstance>(entry_point: fn(usize) -> usize, entry_param: usize) -> usize {
    let _ = env_logger::builder().is_test(true).try_init();

    let state = Traits::port_state();
    let (exit_send, exit_recv) = mpsc::channel();
    if state.exit_send.set(SpinMutex::new(exit_send)).is_err() {
        panic!("the system has already been booted");
    }

    let init = TaskAttr::new(entry_point, entry_param, INIT_PRIORITY);

    // Create the thread where the boot phase of the kernel runs
    log::trace!("starting the boot thread");
    spawn_worker("boot".to_owned(), MIN_THREAD_STACK_SIZE, move || {
        THREAD_ROLE.with(|role| role.set(ThreadRole::Boot));
        state.run_worker(|| {
            // Safety: CPU Lock inactive
            unsafe { state.enter_cpu_lock::<Traits>() };

            // Safety: We are a port, so it's okay to call this
            unsafe { <Traits as PortToKernel>::boot(init) };
        });
    });

    match exit_recv.recv() {
        Ok(Exit::Finished(result)) => result,
        // Propagate any panic that occured in a worker thread
        Ok(Exit::Panicked(payload)) => resume_unwind(payload),
        Err(mpsc::RecvError) => unreachable!("the sender lives in a `static`"),
    }
}

/// Simulate CPU-bound work by letting `ticks` ticks of virtual time pass. The
/// calling task is preempted if the timer expires in the meantime, in which
/// case the remaining ticks pass after it's resumed.
///
/// Must be called by a task with CPU Lock inactive.
pub fn advance_time<Traits: PortInstance>(mut ticks: u64) {
    assert_eq!(
        expect_worker_thread(),
        ThreadRole::Task,
        "`advance_time` can only be called by a task"
    );
    let state = Traits::port_state();

    while ticks > 0 {
        // Safety: CPU Lock inactive
        unsafe { state.enter_cpu_lock::<Traits>() };

        let expired = {
            let mut sched = state.sched.lock();
            ticks -= sched.timer.elapse(ticks);
            sched.timer.expired
        };

        if expired {
            // Safety: CPU Lock active, task context
            unsafe { state.switch_away::<Traits>(<Traits as PortToKernel>::handle_timer) };
        }

        // Safety: CPU Lock active
        unsafe { state.leave_cpu_lock::<Traits>() };
    }
}

/// Get the number of ticks elapsed since the system was booted.
pub fn now<Traits: PortInstance>() -> u64 {
    Traits::port_state().sched.lock().timer.now
}

/// Define a kernel trait type implementing the port traits and the kernel
/// configuration.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::spindle_kernel::{
                KernelCfg, PortThreading, PortTimer, State as KernelState, TaskAttr, TaskId,
                UTicks,
            };
            use $crate::{PortInstance, State};

            pub(super) static PORT_STATE: State = State::new();
            pub(super) static KERNEL_STATE: KernelState<$SystemTraits> = KernelState::new();

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            impl KernelCfg for $SystemTraits {
                const TIME_SLICE: UTicks = $crate::TIME_SLICE;
                const MIN_QUANTUM: UTicks = $crate::MIN_QUANTUM;
                const TICKS_PER_MS: UTicks = $crate::TICKS_PER_MS;

                #[inline]
                fn state() -> &'static KernelState<Self> {
                    &KERNEL_STATE
                }
            }

            // Assume `$SystemTraits: KernelTraits`
            unsafe impl PortThreading for $SystemTraits {
                unsafe fn dispatch_first_task() -> ! {
                    unsafe { PORT_STATE.dispatch_first_task::<Self>() }
                }

                unsafe fn yield_cpu() {
                    unsafe { PORT_STATE.yield_cpu::<Self>() }
                }

                unsafe fn exit_and_dispatch() -> ! {
                    unsafe { PORT_STATE.exit_and_dispatch::<Self>() }
                }

                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock::<Self>() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock::<Self>() }
                }

                unsafe fn initialize_task_state(task: TaskId, attr: &TaskAttr) {
                    unsafe { PORT_STATE.initialize_task_state::<Self>(task, attr) }
                }

                fn idle() -> ! {
                    PORT_STATE.idle::<Self>()
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active::<Self>()
                }

                fn is_task_context() -> bool {
                    PORT_STATE.is_task_context::<Self>()
                }
            }

            impl PortTimer for $SystemTraits {
                const MAX_RELOAD: UTicks = $crate::MAX_RELOAD;

                unsafe fn timer_value() -> UTicks {
                    unsafe { PORT_STATE.timer_value() }
                }

                unsafe fn timer_expired() -> bool {
                    unsafe { PORT_STATE.timer_expired() }
                }

                unsafe fn arm_timer(reload: UTicks) {
                    unsafe { PORT_STATE.arm_timer(reload) }
                }
            }
        }
    };
}

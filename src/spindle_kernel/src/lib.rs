//! A preemptive, priority-based real-time kernel for single-core
//! microcontrollers.
//!
//! The kernel schedules tasks by *effective priority* (0 = lowest, 255 =
//! highest), round-robins tasks of equal priority with a fixed time slice, and
//! provides priority-inheriting mutexes, synchronous rendezvous channels,
//! sleeps, and a parent/child task lifecycle.
//!
//! Everything hardware-specific lives behind the [`PortThreading`] and
//! [`PortTimer`] traits. A port implements them, provides a static [`State`]
//! through [`KernelCfg`], and calls into the kernel through [`PortToKernel`].
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
extern crate alloc;

use core::marker::PhantomData;

mod cfg;
mod channel;
mod error;
mod klock;
mod mutex;
mod sched;
mod state;
mod syscall;
mod task;
mod timeout;
mod utils;

pub use self::{
    cfg::{KernelCfg, TimerCfg},
    channel::ChannelId,
    error::*,
    mutex::MutexId,
    state::State,
    task::{Priority, TaskAttr, TaskId, TaskState, DEFAULT_STACK_SIZE, MAX_PRIORITY, MIN_PRIORITY},
};

/// Unsigned integer type representing a tick count used by a port timer
/// driver.
pub type UTicks = u32;

/// Represents "system" types having sufficient trait `impl`s to instantiate the
/// kernel.
pub trait KernelTraits: PortThreading + PortTimer + KernelCfg + 'static {}
impl<T: PortThreading + PortTimer + KernelCfg + 'static> KernelTraits for T {}

/// Provides access to the kernel API for the system type `Traits`.
///
/// The methods are spread across the modules implementing them.
pub struct System<Traits>(PhantomData<Traits>);

/// Implemented by a port. This trait contains items related to low-level
/// operations for controlling CPU states and context switching.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
pub unsafe trait PortThreading: Sized + 'static {
    /// Transfer the control to [`State::running_task`], discarding the current
    /// (startup) context.
    ///
    /// Precondition: CPU Lock active, Startup phase
    unsafe fn dispatch_first_task() -> !;

    /// Trap into the kernel. The port calls [`PortToKernel::handle_trap`] and
    /// then transfers the control to [`State::running_task`]. Returns when the
    /// calling task is chosen to run again.
    ///
    /// Precondition: CPU Lock active, task context
    ///
    /// Postcondition: CPU Lock active
    unsafe fn yield_cpu();

    /// Like [`yield_cpu`](Self::yield_cpu), but the calling task never resumes;
    /// its context can be discarded.
    ///
    /// Precondition: CPU Lock active, task context
    unsafe fn exit_and_dispatch() -> !;

    /// Disable the timer interrupt and the syscall trap (this state is called
    /// *CPU Lock*).
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn enter_cpu_lock();

    /// Re-enable what `enter_cpu_lock` disabled, thus deactivating the CPU Lock
    /// state.
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    /// Activate CPU Lock. Return `true` iff CPU Lock was inactive before the
    /// call.
    unsafe fn try_enter_cpu_lock() -> bool {
        if Self::is_cpu_lock_active() {
            false
        } else {
            // Safety: CPU Lock inactive
            unsafe { Self::enter_cpu_lock() };
            true
        }
    }

    /// Prepare the task for its first dispatch. The task will start execution
    /// from [`TaskAttr::entry_point`] next time it receives the control, and
    /// when the entry point returns, the port must call
    /// [`System::exit_task`] with the returned value.
    ///
    /// Precondition: CPU Lock active
    unsafe fn initialize_task_state(task: TaskId, attr: &TaskAttr);

    /// The body of the idle task, which runs whenever no other task is ready.
    fn idle() -> !;

    /// Return a flag indicating whether a CPU Lock state is active.
    fn is_cpu_lock_active() -> bool;

    /// Return a flag indicating whether the current context is a task
    /// context.
    fn is_task_context() -> bool;
}

/// Implemented by a port. This trait contains items related to controlling
/// the countdown timer that drives time slicing and timeouts.
pub trait PortTimer {
    /// The maximum value the reload register can hold.
    const MAX_RELOAD: UTicks;

    /// Read the live countdown value.
    ///
    /// Precondition: CPU Lock active
    unsafe fn timer_value() -> UTicks;

    /// Read and clear the flag indicating the countdown has reached zero (and
    /// restarted from the reload value) since the timer was last armed.
    ///
    /// Precondition: CPU Lock active
    unsafe fn timer_expired() -> bool;

    /// Load `reload` into the reload register, restart the countdown from it,
    /// and clear the expiry flag.
    ///
    /// Precondition: CPU Lock active
    unsafe fn arm_timer(reload: UTicks);
}

/// Methods intended to be called by a port.
///
/// # Safety
///
/// These are only meant to be called by the port.
pub trait PortToKernel {
    /// Create the init task (described by `init`) and the idle task, then
    /// dispatch the first task.
    ///
    /// Should be called for exactly once by the port.
    ///
    /// Precondition: CPU Lock active
    unsafe fn boot(init: TaskAttr) -> !;

    /// Process the syscall the running task has trapped with and determine the
    /// next task to run.
    ///
    /// Precondition: CPU Lock active / Postcondition: CPU Lock active
    unsafe fn handle_trap();

    /// Handle the expiry of the countdown timer: preempt the running task and
    /// determine the next task to run.
    ///
    /// Precondition: CPU Lock active / Postcondition: CPU Lock active
    unsafe fn handle_timer();
}

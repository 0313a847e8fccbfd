//! Static configuration
use crate::{state::State, PortTimer, UTicks};

/// Implemented by a system type to provide the kernel with its configuration
/// and its state storage.
///
/// A port's `use_port!`-style macro usually implements this trait along with
/// the port traits.
pub trait KernelCfg: Sized + 'static {
    /// The length of a round-robin time slice, in timer ticks.
    const TIME_SLICE: UTicks;

    /// The shortest reload value the kernel arms the timer with. Prevents the
    /// timer interrupt from starving the tasks when a wake-up is imminent.
    const MIN_QUANTUM: UTicks;

    /// The number of timer ticks in a millisecond.
    const TICKS_PER_MS: UTicks;

    /// Get the kernel state of this system.
    fn state() -> &'static State<Self>;
}

/// The timing parameters of a system, gathered from [`KernelCfg`] and
/// [`PortTimer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerCfg {
    pub time_slice: UTicks,
    pub min_quantum: UTicks,
    pub max_reload: UTicks,
    pub ticks_per_ms: UTicks,
}

impl TimerCfg {
    /// Collect the timing parameters of `Traits`.
    pub const fn of<Traits: KernelCfg + PortTimer>() -> Self {
        Self {
            time_slice: Traits::TIME_SLICE,
            min_quantum: Traits::MIN_QUANTUM,
            max_reload: Traits::MAX_RELOAD,
            ticks_per_ms: Traits::TICKS_PER_MS,
        }
    }

    /// Convert a duration in milliseconds to timer ticks. Saturates at the
    /// largest representable tick count.
    ///
    /// # Examples
    ///
    /// ```
    /// use spindle_kernel::TimerCfg;
    /// let cfg = TimerCfg { time_slice: 10_000, min_quantum: 1_000, max_reload: 0xff_ffff, ticks_per_ms: 1_000 };
    /// assert_eq!(cfg.ms_to_ticks(3), 3_000);
    /// assert_eq!(cfg.ms_to_ticks(u32::MAX), u32::MAX);
    /// ```
    pub fn ms_to_ticks(&self, ms: u32) -> UTicks {
        ms.saturating_mul(self.ticks_per_ms)
    }
}

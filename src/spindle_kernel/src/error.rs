//! Result codes and error types
//!
//! Every operation has its own error type listing only the result codes it can
//! produce. All of them share discriminants with [`ResultCode`], so converting
//! one into a `ResultCode` is free.
use core::{fmt, mem::transmute};

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use spindle_kernel::ResultCode;
            /// assert_eq!(ResultCode::NotOwner.as_str(), "NotOwner");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the kernel API can return.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// The specified object identifier does not refer to a live object.
        NoAccess = -18,
        /// The current context disallows the operation: it was not called
        /// from a task, or CPU Lock is active.
        BadContext = -25,
        /// The caller does not own the resource.
        NotOwner = -29,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode` for cost-free
                // conversion
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                // Safety: `ResultCode` and `$name` has the same representation
                //         type, and the representation of `ResultCode` is a
                //         superset of `x`.
                unsafe { transmute(x) }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }
    };
}

/// Define an internal error type that is a subset of several public error
/// types, with a `From` impl for each of them so that `?` composes.
macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:ident )] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ResultCode::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        define_suberror! {
            @into
            #[into(ResultCode)]
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:ident )]
        $( #[into( $Supererror:ident )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

define_error! {
    mod get_current_task_error {}
    /// Error type for [`System::current_task`].
    ///
    /// [`System::current_task`]: crate::System::current_task
    pub enum GetCurrentTaskError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod create_task_error {}
    /// Error type for [`System::task_create`].
    ///
    /// [`System::task_create`]: crate::System::task_create
    pub enum CreateTaskError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod wait_task_error {}
    /// Error type for [`System::task_wait`].
    ///
    /// [`System::task_wait`]: crate::System::task_wait
    pub enum WaitTaskError {
        /// The specified task does not exist.
        NoAccess,
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod get_task_priority_error {}
    /// Error type for [`System::task_get_priority`] and
    /// [`System::task_base_priority`].
    ///
    /// [`System::task_get_priority`]: crate::System::task_get_priority
    /// [`System::task_base_priority`]: crate::System::task_base_priority
    pub enum GetTaskPriorityError {
        /// The specified task does not exist.
        NoAccess,
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod query_task_error {}
    /// Error type for [`System::task_state`].
    ///
    /// [`System::task_state`]: crate::System::task_state
    pub enum QueryTaskError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod sleep_error {}
    /// Error type for [`System::task_sleep`], [`System::task_delay`], and
    /// [`System::task_yield`].
    ///
    /// [`System::task_sleep`]: crate::System::task_sleep
    /// [`System::task_delay`]: crate::System::task_delay
    /// [`System::task_yield`]: crate::System::task_yield
    pub enum SleepError {
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod create_object_error {}
    /// Error type for [`System::mutex_create`] and [`System::channel_create`].
    ///
    /// [`System::mutex_create`]: crate::System::mutex_create
    /// [`System::channel_create`]: crate::System::channel_create
    pub enum CreateObjectError {
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod lock_mutex_error {}
    /// Error type for [`System::mutex_lock`], [`System::mutex_try_lock`], and
    /// [`System::mutex_timed_lock`].
    ///
    /// [`System::mutex_lock`]: crate::System::mutex_lock
    /// [`System::mutex_try_lock`]: crate::System::mutex_try_lock
    /// [`System::mutex_timed_lock`]: crate::System::mutex_timed_lock
    pub enum LockMutexError {
        /// The specified mutex does not exist.
        NoAccess,
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_error! {
    mod unlock_mutex_error {}
    /// Error type for [`System::mutex_unlock`].
    ///
    /// [`System::mutex_unlock`]: crate::System::mutex_unlock
    pub enum UnlockMutexError {
        /// The specified mutex does not exist.
        NoAccess,
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
        /// The mutex is not currently owned by the calling task.
        NotOwner,
    }
}

define_error! {
    mod query_mutex_error {}
    /// Error type for [`System::mutex_is_locked`].
    ///
    /// [`System::mutex_is_locked`]: crate::System::mutex_is_locked
    pub enum QueryMutexError {
        /// The specified mutex does not exist.
        NoAccess,
        /// CPU Lock is active.
        BadContext,
    }
}

define_error! {
    mod channel_error {}
    /// Error type for [`System::channel_send`], [`System::channel_recv`], and
    /// [`System::channel_reply`].
    ///
    /// [`System::channel_send`]: crate::System::channel_send
    /// [`System::channel_recv`]: crate::System::channel_recv
    /// [`System::channel_reply`]: crate::System::channel_reply
    pub enum ChannelError {
        /// The specified channel does not exist.
        NoAccess,
        /// CPU Lock is active, or the current context is not a task context.
        BadContext,
    }
}

define_suberror! {
    /// `BadContext`
    #[into(GetCurrentTaskError)]
    #[into(CreateTaskError)]
    #[into(WaitTaskError)]
    #[into(GetTaskPriorityError)]
    #[into(QueryTaskError)]
    #[into(SleepError)]
    #[into(CreateObjectError)]
    #[into(LockMutexError)]
    #[into(UnlockMutexError)]
    #[into(QueryMutexError)]
    #[into(ChannelError)]
    pub(super) enum BadContextError {
        BadContext,
    }
}

define_suberror! {
    /// `NoAccess`
    #[into(WaitTaskError)]
    #[into(GetTaskPriorityError)]
    #[into(LockMutexError)]
    #[into(UnlockMutexError)]
    #[into(QueryMutexError)]
    #[into(ChannelError)]
    pub(super) enum NoAccessError {
        NoAccess,
    }
}

//! Utility
pub(crate) mod intrusive_list;
pub(crate) mod prio_list;

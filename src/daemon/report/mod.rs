//! Report side of the daemon: when to send ([scheduler]), what to send ([summary]) and where it
//! goes ([sink]).

pub mod scheduler;
pub mod sink;
pub mod summary;

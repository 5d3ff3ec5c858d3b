//! Session history. Markers (login, logout, startup, shutdown) are collected into the activity log
//! and turned back into sessions on demand by [reconstruct::SessionReconstructor].

pub mod marker;
pub mod reconstruct;
pub mod summary;

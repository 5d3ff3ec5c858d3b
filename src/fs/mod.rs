//! File primitives shared by the stores.

pub mod operations;

//! Domain model module declarations.

pub mod crash;
pub mod task;

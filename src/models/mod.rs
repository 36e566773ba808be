//! Domain model module declarations.

pub mod state;
pub mod task;

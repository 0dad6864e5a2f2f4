//! Tasks Module
//!
//! Background maintenance tasks for the data layer.

mod sweep;

pub use sweep::spawn_sweep_task;

//! Data structures shared between the engine and its users.

pub mod ca;
pub mod publishers;

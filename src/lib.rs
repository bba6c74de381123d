//! The _RPKI Issuer_ library crate.
//!
//! Maintains a tree of resource certificate authorities and keeps the
//! certificates issued within the tree in line with a resource registry.

pub mod api;
pub mod ca;
pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod server;

#[cfg(test)]
pub mod test;

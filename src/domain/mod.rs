//! Domain layer - Core port definitions
//!
//! This module defines the traits (ports) that node backends implement
//! and the request/result types shared by the scheduler and the client.

pub mod ports;

pub use ports::*;

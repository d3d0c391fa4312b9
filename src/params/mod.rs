//! Parameter strategies and the per-element parameter controller.

pub mod controller;
pub mod strategy;

pub use controller::*;
pub use strategy::*;

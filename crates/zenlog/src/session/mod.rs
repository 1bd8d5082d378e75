//! Session controller and its pty plumbing.

pub mod controller;
pub mod events;
pub mod master;
pub mod pty;

pub use controller::run;

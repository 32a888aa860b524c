//! Minimal platform plumbing for legacy PC devices: a port-I/O bus and interrupt lines.

#![forbid(unsafe_code)]

pub mod io;
pub mod irq;

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Codec, validation, and calibration logic for the torque-interceptor link.
//
// This crate stays portable across MCU diagnostics and host tooling by avoiding
// the Rust standard library; transports and presentation live in the callers.

pub mod calibration;
pub mod checksum;
pub mod debug;
pub mod fault;
pub mod frames;
pub mod link;
pub mod sequence;

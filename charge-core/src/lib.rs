//! Control core of a 2-4S balance charger: battery topology detection,
//! cell balancing, safety checks, charge-regulator setpoint math, and the
//! charger decision state machines.
//!
//! Everything in this crate is target-independent. The firmware crate owns
//! the I2C transport, the ADC sampling, and all delays; this crate only
//! decides. That split keeps every threshold and every register bit
//! pattern testable on the host.

#![no_std]

pub mod battery;
pub mod bus;
pub mod charger;
pub mod config;
pub mod fault;
pub mod regulator;

//! Integration tests for the Troubadour engine
//!
//! These suites exercise the pieces together: the mixer graph end to end,
//! the lock-free transport with the resampler, and the control surface over
//! a mock device backend.

#[cfg(test)]
mod control_integration;
#[cfg(test)]
mod mixer_integration;
#[cfg(test)]
mod transport_integration;

//! Troubadour infrastructure: everything that touches the platform.
//!
//! Lock-free sample transport, sample-rate reconciliation, CPAL device
//! enumeration and streams, the realtime engine thread and the control
//! surface the UI talks to.

pub mod audio;

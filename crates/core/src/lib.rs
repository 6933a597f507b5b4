//! Troubadour core: domain entities and business rules for the virtual mixer.
//!
//! This crate is backend-agnostic. Everything that touches an audio API or a
//! thread lives in `troubadour-infra`; everything here is plain data and
//! arithmetic so it can be tested without devices.

pub mod domain;

//! Envelope payload handlers.

pub mod events;

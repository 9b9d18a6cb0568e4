//! Cross-module test suites for the protocol engine.

mod connection_behaviour;
pub(crate) mod support;

//! Integration tests for the threshold engine.
//!
//! These tests drive the public API end to end with in-memory and `SQLite`
//! stores, fake metric sources, and a manual clock.

mod adjustment_workflow;
mod common;
mod failure_modes;
mod service_workflow;

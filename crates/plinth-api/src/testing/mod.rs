//! Testing utilities for plugin developers
//!
//! This module provides mock host collaborators and a harness to make plugin
//! testing easier.

pub mod helpers;
pub mod mocks;

pub use helpers::PluginTestHarness;
pub use mocks::{MockContainer, MockPlugin, RecordingDispatcher, RecordingRouteTable};

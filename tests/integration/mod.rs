//! Integration test suite for arena.
//!
//! These tests run whole debates through the engine: scheduling, Director
//! control, failure handling and the transcript. They verify that all
//! components work together correctly.
//!
//! # Test Categories
//!
//! - `debate_flow`: Turn order, context, stop conditions, transcript
//! - `director`: Pause, resume, quit and interventions
//! - `failures`: Gateway retries and timeouts, sink failures
//! - `config_roles`: Config file and role library to a finished debate
//!
//! # CI Compatibility
//!
//! A scripted gateway stands in for the completion service, so no network
//! access or API key is needed.

mod fixtures;

mod config_roles;
mod debate_flow;
mod director;

//! Integration test binary: the whole pipeline driven by deterministic fakes.

// Allow unwrap/expect in test code
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

mod pause_resume;
mod pipeline_flow;

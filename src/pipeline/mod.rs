//! Stage wiring, queues, shared run state and pause/resume control.

pub mod controller;
pub mod coordinator;
pub mod messages;
pub mod queue;
pub mod state;

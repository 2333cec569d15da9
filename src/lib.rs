//! Formstash - draft recovery for long, interruptible forms
//!
//! The core is a keyed, expiring, debounced persisted value
//! ([`persisted::PersistentValue`]) and a multi-step workflow built from two
//! of them ([`workflow::MultiStepWorkflow`]). Storage, time, and timers are
//! injected ports, so the same code runs against a JSON file on a tokio
//! runtime or against memory on virtual time.

pub mod app;
pub mod clock;
pub mod config;
pub mod drafts;
pub mod logging;
pub mod persisted;
pub mod scheduler;
pub mod storage;
pub mod ui;
pub mod workflow;

mod sync;

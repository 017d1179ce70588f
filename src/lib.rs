//! plate-console library crate.
//!
//! Core of the license-plate operator console: capture sources, the frame
//! sampler, the websocket detection channel, the detection buffer and
//! selection, and the session controller that ties them together.

pub mod buffer;
pub mod capture;
pub mod channel;
pub mod cli;
pub mod config;
pub mod console;
pub mod event;
pub mod sampler;
pub mod selection;
pub mod session;
pub mod store;

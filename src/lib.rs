//! Registration bot — signs LINE users up through a short chat dialogue.

pub mod channels;
pub mod config;
pub mod error;
pub mod registration;
pub mod store;
pub mod webhook;

pub mod config;
pub mod error;
pub mod listener;
pub mod platform;
pub mod session;
pub mod webhook;

//! medscan library crate.
//!
//! Camera capture, remote analysis and screen navigation for a medical
//! screening kiosk. The binary in `main.rs` is a thin front-end over these
//! modules.

pub mod analysis;
pub mod camera;
pub mod cli;
pub mod config;
pub mod events;
pub mod imaging;
pub mod kiosk;
pub mod navigation;
pub mod session;

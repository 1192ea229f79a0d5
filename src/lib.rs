//! Venue TV player engine: looping video playback, weekly TV power schedule
//! and HDMI-CEC input control, served over a small JSON API.

pub mod api;
pub mod bus;
pub mod config;
pub mod error;
pub mod playback;
pub mod preview;
pub mod schedule;
pub mod store;
pub mod system;

pub use error::{ControlError, Result};

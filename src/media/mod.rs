//! Local audio capture and inbound audio analysis.
//!
//! Codec work (Opus) and transport belong to the WebRTC stack; this module
//! only moves PCM in and out of it: a cpal capture thread with a mute gate
//! on the way out, and a level meter plus optional playback on the way in.

pub mod capture;
pub mod level;
pub mod playback;
mod resample;

pub use capture::{list_input_devices, CaptureStream};
pub use level::{EnergySource, LevelMeter};
pub use playback::Playback;

//! Full-mesh WebRTC call client: one negotiated peer connection per remote
//! participant, local media toggles and screen sharing pushed to all of them.

pub mod capture;
pub mod config;
pub mod connection;
pub mod control;
pub mod dispatch;
pub mod error;
pub mod media;
pub mod media_sync;
pub mod negotiation;
pub mod peer;
pub mod rtc;
pub mod signal;
pub mod state;
pub mod utils;

#[cfg(test)]
mod testing;

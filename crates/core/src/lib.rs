//! Face-detection overlay kept in step with video playback.
//!
//! `video` plays a file, `detection` finds faces on the playing frame,
//! `overlay` maps them into display space and draws them, and `pipeline`
//! ties those together on a fixed cadence behind a [`PlayerShell`].
//!
//! [`PlayerShell`]: pipeline::player_shell::PlayerShell

pub mod detection;
pub mod overlay;
pub mod pipeline;
pub mod shared;
pub mod video;

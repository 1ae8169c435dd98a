//! SoundHarvest: paste a video URL, pick a codec and quality, download the audio track.
//!
//! The HTTP layer in [`handlers`] is a thin shell over [`controller::SessionController`],
//! which drives the per-session state machine in [`session`] and calls out to a
//! [`media::MediaCollaborator`] (yt-dlp in production, see [`ytdlp`]).

pub mod config;
pub mod controller;
pub mod handlers;
pub mod media;
pub mod options;
pub mod session;
pub mod state;
pub mod store;
pub mod util;
pub mod ytdlp;

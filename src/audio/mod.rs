//! # Audio Module
//!
//! Per-guild playback orchestration for Open Jukebox.
//!
//! ## Architecture
//!
//! ### [`player`] - Player Loop
//! - One loop task per active guild, started by the first play request
//! - Waits for the transport's completion signal and applies loop/history policy
//! - Seek, skip, previous and stop serialize with the loop per guild
//!
//! ### [`queue`] - Guild Queue
//! - FIFO pending tracks, current track, loop mode and bounded history
//! - Pure data structure; the owning [`player::GuildPlayback`] provides locking
//!
//! ### [`acquire`] - Source Acquisition
//! - Opens a decoder source, refreshing an expired stream locator once
//!
//! ### [`inactivity`] - Inactivity Monitor
//! - Disconnects an idle guild after the configured window
//!
//! ### [`transport`] / [`voice`] - Audio Transport
//! - Contract with the voice connection and its Songbird implementation
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use crate::audio::PlaybackTarget;
//!
//! let outcome = manager.start_or_enqueue(guild_id, track, PlaybackTarget::new(transport, channel_id))?;
//! manager.seek(guild_id, Duration::from_secs(90)).await?;
//! manager.clear(guild_id).await;
//! ```

pub mod acquire;
pub mod inactivity;
pub mod player;
pub mod queue;
pub mod source;
pub mod track;
pub mod transport;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serenity::model::id::ChannelId;

pub use player::{PlaybackManager, PlaybackServices, PlaybackTarget, StartOutcome};
pub use queue::LoopMode;
pub use track::TrackRecord;

/// Avisos al canal de texto asociado a la reproducción
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Una pista empezó a sonar
    async fn now_playing(&self, channel: ChannelId, track: &TrackRecord, upcoming: usize, loop_mode: LoopMode);

    /// Mensaje informativo (desconexión por inactividad, resúmenes)
    async fn notice(&self, channel: ChannelId, message: &str);
}

//! Buffered playback of remote audio.
//!
//! [`AudioPlayer`] streams chunks from an [`AudioSource`](crate::streaming::AudioSource),
//! reassembles them into one-second segments and keeps an [`AudioOutput`] fed ahead of its
//! clock. Outputs are created per session by an [`OutputFactory`]:
//!
//! - [`VirtualOutputs`] keep time on the tokio clock without making a sound, for headless
//!   hosts and tests
//! - `DeviceOutputs` play through a cpal device (requires the `device` feature)
//!
//! # Example
//!
//! ```rust,no_run
//! use audio_link::playback::{AudioPlayer, PlayerConfig, VirtualOutputs};
//! use audio_link::streaming::AudioSource;
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<AudioSource>) -> audio_link::playback::PlaybackResult<()> {
//! let player = AudioPlayer::with_config(
//!     source,
//!     VirtualOutputs::new(),
//!     PlayerConfig::network_streaming(),
//! )?;
//! player.open().await?;
//! player.play(0).await?;
//! # Ok(())
//! # }
//! ```

pub(crate) mod clock;
pub mod config;
pub mod error;
pub mod player;
pub mod traits;
pub mod virtual_output;

#[cfg(feature = "device")]
pub mod devices;

#[cfg(test)]
mod tests;

pub use config::PlayerConfig;
pub use error::{PlaybackError, PlaybackResult};
pub use player::{AudioPlayer, PlaybackState, PlayerState, PlayerTick};
pub use traits::{AudioOutput, OutputFactory};
pub use virtual_output::{ScheduledSegment, VirtualOutput, VirtualOutputs};

#[cfg(feature = "device")]
pub use devices::{DeviceOutput, DeviceOutputs};

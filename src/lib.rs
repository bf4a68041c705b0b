// Correctness and logic
#![warn(clippy::unit_cmp)] // Detects comparing unit types
#![warn(clippy::match_same_arms)]
// Duplicate match arms

// Performance-focused
#![warn(clippy::inefficient_to_string)] // `format!("{}", x)` vs `x.to_string()`
#![warn(clippy::map_clone)] // Cloning inside `map()` unnecessarily
#![warn(clippy::unnecessary_to_owned)] // Detects redundant `.to_owned()` or `.clone()`
#![warn(clippy::large_stack_arrays)] // Helps avoid stack overflows
#![warn(clippy::box_collection)] // Warns on boxed `Vec`, `String`, etc.
#![warn(clippy::vec_box)] // Avoids using `Vec<Box<T>>` when unnecessary
#![warn(clippy::needless_collect)] // Avoids `.collect().iter()` chains

// Style and idiomatic Rust
#![warn(clippy::redundant_clone)] // Detects unnecessary `.clone()`
#![warn(clippy::identity_op)] // e.g., `x + 0`, `x * 1`
#![warn(clippy::needless_return)] // Avoids `return` at the end of functions
#![warn(clippy::let_unit_value)] // Avoids binding `()` to variables
#![warn(clippy::manual_map)] // Use `.map()` instead of manual `match`
#![warn(clippy::unwrap_used)] // Avoids using `unwrap()`

// Maintainability
#![warn(clippy::missing_panics_doc)] // Docs for functions that might panic
#![warn(clippy::missing_safety_doc)] // Docs for `unsafe` functions
#![warn(missing_docs)]

//! # audio_link
//!
//! Streams audio from a remote backend into a local output, over any duplex message channel.
//!
//! ## Overview
//!
//! The crate is split in three layers:
//!
//! - [`rpc`]: request/response correlation over a [`Channel`](rpc::Channel). Clients tag each
//!   request with a unique id and resolve replies, failures, timeouts and closure; servers
//!   dispatch requests to named handlers and isolate their failures.
//! - [`streaming`]: an [`AudioSource`](streaming::AudioSource) reading track metadata and
//!   fixed-size chunks through the backend's `meta` and `render` methods, plus the arithmetic
//!   that reassembles chunks into one-second segments.
//! - [`playback`]: an [`AudioPlayer`](playback::AudioPlayer) that keeps an output fed ahead of
//!   its clock, with play, pause, resume and seek.
//!
//! ## Features
//!
//! - `device`: play through the system's audio devices with cpal
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use audio_link::playback::{AudioPlayer, VirtualOutputs};
//! use audio_link::rpc::{MemoryChannel, RpcClient};
//! use audio_link::streaming::AudioSource;
//! use std::sync::Arc;
//!
//! # async fn run(channel: MemoryChannel) -> audio_link::playback::PlaybackResult<()> {
//! let client = RpcClient::new(Arc::new(channel));
//! let player = AudioPlayer::new(Arc::new(AudioSource::new(client)), VirtualOutputs::new());
//!
//! let metadata = player.open().await?;
//! println!("{} channels, {:?}", metadata.channels, metadata.duration());
//! player.play(0).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Each layer has its own error type and wraps the one below it: [`RpcError`] inside
//! [`StreamError`], inside [`PlaybackError`]. All three report whether an operation may
//! succeed when retried through `is_recoverable`.

pub mod playback;
pub mod rpc;
pub mod streaming;

pub use playback::{AudioPlayer, PlaybackError, PlaybackResult, PlayerConfig, PlayerTick};
pub use rpc::{Channel, MemoryChannel, RpcClient, RpcError, RpcResult, RpcServer};
pub use streaming::{AudioSource, AudioSourceMetadata, StreamError, StreamResult};

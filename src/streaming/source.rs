//! Remote audio source: metadata and chunk fetches over the correlation layer.

use super::chunk::{CHUNK_SIZE, Chunk};
use super::error::{StreamError, StreamResult};
use crate::remote_methods;
use crate::rpc::{CancelPolicy, RpcClient, RpcError, Value};
use crate::stream_error;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

remote_methods! {
    /// Remote methods served by an audio backend.
    pub struct AudioRemote {
        /// Track metadata, see [`MetaReply`].
        meta,
        /// One chunk of samples, see [`RenderRequest`] and [`RenderReply`].
        render,
    }
}

/// Payload of a `meta` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaReply {
    /// Number of chunks in the track.
    pub frames: u64,
    /// Number of channels.
    pub channel_count: usize,
    /// Sample rate in Hz.
    pub samples_per_second: u32,
    /// Samples per channel in the track.
    pub sample_count: u64,
}

/// Payload of a `render` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderRequest {
    /// Chunk index.
    pub frame: u64,
}

/// Payload of a `render` reply. The samples travel as one buffer per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderReply {
    /// Amount of audio in the reply as counted by the backend.
    pub size: u64,
}

/// Track metadata, immutable once loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSourceMetadata {
    /// Number of channels.
    pub channels: usize,
    /// Number of chunks.
    pub frames: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per channel.
    pub total_samples: u64,
}

impl AudioSourceMetadata {
    /// Track length.
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.total_samples as f64 / f64::from(self.sample_rate))
    }
}

impl TryFrom<MetaReply> for AudioSourceMetadata {
    type Error = StreamError;

    fn try_from(reply: MetaReply) -> StreamResult<Self> {
        // A backend with nothing to play yet may report zeros across the board.
        if reply.frames > 0 {
            if reply.channel_count == 0 {
                return Err(stream_error!(InvalidMetadata, "track has no channels"));
            }
            let rate = reply.samples_per_second as usize;
            if rate == 0 || rate > CHUNK_SIZE {
                return Err(stream_error!(
                    InvalidMetadata,
                    "sample rate {rate} must be in 1..={CHUNK_SIZE}"
                ));
            }
        }

        Ok(Self {
            channels: reply.channel_count,
            frames: reply.frames,
            sample_rate: reply.samples_per_second,
            total_samples: reply.sample_count,
        })
    }
}

/// A remote track fetched chunk by chunk.
///
/// Metadata is loaded lazily and cached; every call of [`load_metadata`](Self::load_metadata)
/// bumps the revision published by [`subscribe_data_changed`](Self::subscribe_data_changed).
#[derive(Debug)]
pub struct AudioSource {
    remote: AudioRemote,
    open: AtomicBool,
    metadata: RwLock<Option<AudioSourceMetadata>>,
    loading: Mutex<()>,
    loaded: AtomicU64,
    data_changed: watch::Sender<u64>,
}

impl AudioSource {
    /// Cancel policy applied to every request unless overridden.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Create a source with the default request timeout.
    pub fn new(client: RpcClient) -> Self {
        Self::with_timeout(client, Self::DEFAULT_TIMEOUT)
    }

    /// Create a source whose requests time out after `timeout`.
    pub fn with_timeout(client: RpcClient, timeout: Duration) -> Self {
        let (data_changed, _) = watch::channel(0);
        Self {
            remote: AudioRemote::new(client, Some(CancelPolicy::timeout(timeout))),
            open: AtomicBool::new(false),
            metadata: RwLock::new(None),
            loading: Mutex::new(()),
            loaded: AtomicU64::new(0),
            data_changed,
        }
    }

    /// Subscribe the underlying client.
    pub fn open(&self) {
        self.remote.open();
        self.open.store(true, Ordering::Release);
    }

    /// Stop in-flight render loops and close the underlying client.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.remote.close();
    }

    /// Whether the source is open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Cached metadata, if loaded.
    pub fn metadata(&self) -> Option<AudioSourceMetadata> {
        *self.metadata.read()
    }

    /// Channel count, zero until metadata is loaded.
    pub fn channels(&self) -> usize {
        self.metadata().map_or(0, |m| m.channels)
    }

    /// Chunk count, zero until metadata is loaded.
    pub fn frames(&self) -> u64 {
        self.metadata().map_or(0, |m| m.frames)
    }

    /// Sample rate in Hz, zero until metadata is loaded.
    pub fn sample_rate(&self) -> u32 {
        self.metadata().map_or(0, |m| m.sample_rate)
    }

    /// Samples per channel, zero until metadata is loaded.
    pub fn samples(&self) -> u64 {
        self.metadata().map_or(0, |m| m.total_samples)
    }

    /// Track length, zero until metadata is loaded.
    pub fn duration(&self) -> Duration {
        self.metadata().map_or(Duration::ZERO, |m| m.duration())
    }

    /// Sum of the sizes of all chunks fetched so far.
    pub fn loaded(&self) -> u64 {
        self.loaded.load(Ordering::Relaxed)
    }

    /// Revision counter bumped whenever metadata is (re)announced.
    pub fn subscribe_data_changed(&self) -> watch::Receiver<u64> {
        self.data_changed.subscribe()
    }

    /// Load metadata unless cached. Concurrent callers share one `meta` request.
    pub async fn load_metadata(&self) -> StreamResult<AudioSourceMetadata> {
        let metadata = match self.metadata() {
            Some(metadata) => metadata,
            None => {
                let _loading = self.loading.lock().await;
                match self.metadata() {
                    Some(metadata) => metadata,
                    None => self.fetch_metadata().await?,
                }
            }
        };
        self.data_changed.send_modify(|revision| *revision += 1);
        Ok(metadata)
    }

    async fn fetch_metadata(&self) -> StreamResult<AudioSourceMetadata> {
        let reply: MetaReply = self.remote.meta(Value::Null, Vec::new()).await?.decode()?;
        let metadata = AudioSourceMetadata::try_from(reply)?;

        // An empty track is asked again next time.
        if metadata.frames > 0 {
            *self.metadata.write() = Some(metadata);
        }
        info!(
            frames = metadata.frames,
            channels = metadata.channels,
            sample_rate = metadata.sample_rate,
            "loaded audio metadata"
        );
        Ok(metadata)
    }

    /// Fetch a single chunk. Returns the reported size and the decoded chunk.
    pub async fn fetch_chunk(&self, frame: u64) -> StreamResult<(u64, Chunk)> {
        if !self.is_open() {
            return Err(StreamError::Closed);
        }
        let metadata = match self.metadata() {
            Some(metadata) => metadata,
            None => self.load_metadata().await?,
        };
        if frame >= metadata.frames {
            return Err(StreamError::FrameOutOfRange {
                frame,
                frames: metadata.frames,
            });
        }
        self.request_chunk(&metadata, frame).await
    }

    async fn request_chunk(
        &self,
        metadata: &AudioSourceMetadata,
        frame: u64,
    ) -> StreamResult<(u64, Chunk)> {
        let payload = serde_json::to_value(RenderRequest { frame })
            .map_err(|e| RpcError::decode("render request", e))?;
        let response = self.remote.render(payload, Vec::new()).await?;
        let RenderReply { size } = response.decode()?;
        let chunk = Chunk::from_buffers(frame, &response.buffers, metadata.channels)?;

        self.loaded.fetch_add(size, Ordering::Relaxed);
        debug!(frame, size, "received chunk");
        Ok((size, chunk))
    }

    /// Fetch chunks from `start` to the end of the track, one request at a time.
    ///
    /// `received(frame, size, chunk)` is called for every chunk; returning `false` stops the
    /// loop without issuing another request. Closing the source stops it as well.
    pub async fn render<F>(&self, start: u64, mut received: F) -> StreamResult<()>
    where
        F: FnMut(u64, u64, Chunk) -> bool,
    {
        let metadata = match self.metadata() {
            Some(metadata) => metadata,
            None => self.load_metadata().await?,
        };

        for frame in start..metadata.frames {
            if !self.is_open() {
                debug!(frame, "source closed, stopping render");
                break;
            }
            let (size, chunk) = self.request_chunk(&metadata, frame).await?;
            if !received(frame, size, chunk) {
                break;
            }
        }
        Ok(())
    }
}

//! Tests for the audio source.
//!
//! Also home of the mock backend the playback tests drive: an [`RpcServer`] serving `meta`
//! and `render` over a [`MemoryChannel`], where every sample encodes its own position.

use crate::rpc::{MemoryChannel, Response, RpcClient, RpcServer};
use crate::streaming::{CHUNK_SIZE, Chunk, MetaReply, RenderRequest, chunk_start};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

mod source_tests;

/// Shape and behaviour of a mock track.
#[derive(Debug, Clone)]
pub(crate) struct Track {
    pub frames: u64,
    pub channels: usize,
    pub sample_rate: u32,
    pub latency: Duration,
    pub fail_at: Option<u64>,
}

impl Track {
    pub fn new(frames: u64, channels: usize, sample_rate: u32) -> Self {
        Self {
            frames,
            channels,
            sample_rate,
            latency: Duration::ZERO,
            fail_at: None,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn failing_at(mut self, frame: u64) -> Self {
        self.fail_at = Some(frame);
        self
    }

    pub fn total_samples(&self) -> u64 {
        chunk_start(self.frames)
    }
}

/// Value of sample `index` on `channel` in every mock track.
pub(crate) fn sample_value(index: u64, channel: usize) -> f32 {
    index as f32 + channel as f32 * 0.25
}

fn render_chunk(track: &Track, frame: u64) -> Result<Response, String> {
    let start = chunk_start(frame);
    let channels = (0..track.channels)
        .map(|c| {
            (0..CHUNK_SIZE)
                .map(|i| sample_value(start + i as u64, c))
                .collect()
        })
        .collect();
    let chunk = Chunk::from_channels(frame, channels).map_err(|e| e.to_string())?;
    Ok(Response::new(serde_json::json!({ "size": CHUNK_SIZE })).with_buffers(chunk.to_buffers()))
}

/// A running mock backend. Dropping it closes the server.
pub(crate) struct MockBackend {
    _server: RpcServer,
    renders: Arc<Mutex<Vec<u64>>>,
    metas: Arc<AtomicUsize>,
}

impl MockBackend {
    /// Start serving `track`; returns the backend and an unopened client connected to it.
    pub fn start(track: Track) -> (Self, RpcClient) {
        let (client_end, server_end) = MemoryChannel::pair();
        let renders = Arc::new(Mutex::new(Vec::new()));
        let metas = Arc::new(AtomicUsize::new(0));

        let meta_track = track.clone();
        let meta_calls = Arc::clone(&metas);
        let render_log = Arc::clone(&renders);
        let server = RpcServer::builder()
            .method("meta", move |_, _| {
                meta_calls.fetch_add(1, Ordering::SeqCst);
                let reply = MetaReply {
                    frames: meta_track.frames,
                    channel_count: meta_track.channels,
                    samples_per_second: meta_track.sample_rate,
                    sample_count: meta_track.total_samples(),
                };
                serde_json::to_value(reply)
                    .map(Response::new)
                    .map_err(|e| e.to_string())
            })
            .async_method("render", move |payload, _| {
                let track = track.clone();
                let render_log = Arc::clone(&render_log);
                async move {
                    let RenderRequest { frame } =
                        serde_json::from_value(payload).map_err(|e| e.to_string())?;
                    render_log.lock().push(frame);
                    if !track.latency.is_zero() {
                        tokio::time::sleep(track.latency).await;
                    }
                    if track.fail_at == Some(frame) {
                        return Err(format!("frame {frame} unavailable"));
                    }
                    render_chunk(&track, frame)
                }
            })
            .build(Arc::new(server_end));
        server.open().unwrap();

        (
            Self {
                _server: server,
                renders,
                metas,
            },
            RpcClient::new(Arc::new(client_end)),
        )
    }

    /// Frames requested so far, in request order.
    pub fn renders(&self) -> Vec<u64> {
        self.renders.lock().clone()
    }

    /// Number of `meta` calls served.
    pub fn metas(&self) -> usize {
        self.metas.load(Ordering::SeqCst)
    }
}

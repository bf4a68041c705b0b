//! Tests for metadata caching and chunk iteration.

use super::*;
use crate::rpc::RpcError;
use crate::streaming::{AudioSource, StreamError};

fn open_source(track: Track) -> (MockBackend, AudioSource) {
    let (backend, client) = MockBackend::start(track);
    let source = AudioSource::new(client);
    source.open();
    (backend, source)
}

#[tokio::test]
async fn test_metadata_is_cached_but_announced_every_time() {
    let (backend, source) = open_source(Track::new(3, 2, 3072));
    let mut changes = source.subscribe_data_changed();
    assert_eq!(source.frames(), 0);

    let metadata = source.load_metadata().await.unwrap();
    assert_eq!(metadata.frames, 3);
    assert_eq!(metadata.channels, 2);
    assert_eq!(source.sample_rate(), 3072);
    assert_eq!(source.samples(), 3 * CHUNK_SIZE as u64);
    assert_eq!(source.duration(), Duration::from_secs(72));

    source.load_metadata().await.unwrap();
    assert_eq!(backend.metas(), 1);
    assert!(changes.has_changed().unwrap());
    assert_eq!(*changes.borrow_and_update(), 2);
}

#[tokio::test]
async fn test_concurrent_loads_share_one_request() {
    let (backend, source) = open_source(Track::new(2, 1, 3072));
    let (a, b) = tokio::join!(source.load_metadata(), source.load_metadata());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(backend.metas(), 1);
}

#[tokio::test]
async fn test_empty_track_is_not_cached() {
    let (backend, source) = open_source(Track::new(0, 1, 3072));
    source.load_metadata().await.unwrap();
    source.load_metadata().await.unwrap();
    assert_eq!(backend.metas(), 2);
    assert!(source.metadata().is_none());
}

#[tokio::test]
async fn test_render_walks_to_the_end() {
    let (backend, source) = open_source(Track::new(4, 2, 3072));
    let mut seen = Vec::new();

    source
        .render(1, |frame, size, chunk| {
            assert_eq!(chunk.frame(), frame);
            assert_eq!(size, CHUNK_SIZE as u64);
            let first = chunk.channel(1).unwrap()[0];
            assert_eq!(first, sample_value(chunk_start(frame), 1));
            seen.push(frame);
            true
        })
        .await
        .unwrap();

    assert_eq!(seen, vec![1, 2, 3]);
    assert_eq!(backend.renders(), vec![1, 2, 3]);
    assert_eq!(source.loaded(), 3 * CHUNK_SIZE as u64);
    // Metadata was loaded on demand.
    assert_eq!(backend.metas(), 1);
}

#[tokio::test]
async fn test_render_stops_when_consumer_declines() {
    let (backend, source) = open_source(Track::new(10, 1, 3072));
    let mut count = 0;
    source
        .render(0, |_, _, _| {
            count += 1;
            count < 2
        })
        .await
        .unwrap();

    assert_eq!(backend.renders(), vec![0, 1]);
}

#[tokio::test]
async fn test_render_stops_once_closed() {
    let (backend, source) = open_source(Track::new(10, 1, 3072));
    source.load_metadata().await.unwrap();

    source
        .render(0, |_, _, _| {
            source.close();
            true
        })
        .await
        .unwrap();

    assert_eq!(backend.renders(), vec![0]);
    assert!(!source.is_open());
}

#[tokio::test]
async fn test_render_propagates_backend_failure() {
    let (_backend, source) = open_source(Track::new(5, 1, 3072).failing_at(2));
    let mut seen = Vec::new();
    let result = source
        .render(0, |frame, _, _| {
            seen.push(frame);
            true
        })
        .await;

    assert_eq!(seen, vec![0, 1]);
    assert_eq!(
        result,
        Err(StreamError::Rpc(RpcError::Remote(
            "frame 2 unavailable".to_string()
        )))
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_times_out() {
    let (backend, client) =
        MockBackend::start(Track::new(2, 1, 3072).with_latency(Duration::from_secs(30)));
    let source = AudioSource::with_timeout(client, Duration::from_secs(1));
    source.open();
    source.load_metadata().await.unwrap();

    let result = source.fetch_chunk(0).await;
    assert_eq!(
        result.map(|(size, _)| size),
        Err(StreamError::Rpc(RpcError::timed_out("render")))
    );
    assert_eq!(backend.renders(), vec![0]);
}

#[tokio::test]
async fn test_fetch_chunk_guards() {
    let (_backend, source) = open_source(Track::new(2, 1, 3072));
    assert_eq!(
        source.fetch_chunk(2).await.map(|(size, _)| size),
        Err(StreamError::FrameOutOfRange {
            frame: 2,
            frames: 2
        })
    );

    let (size, chunk) = source.fetch_chunk(1).await.unwrap();
    assert_eq!(size, CHUNK_SIZE as u64);
    assert_eq!(chunk.start_sample(), chunk_start(1));

    source.close();
    assert_eq!(
        source.fetch_chunk(0).await.map(|(size, _)| size),
        Err(StreamError::Closed)
    );
}

//! Player tests against the mock backend and virtual outputs, on a paused tokio clock.

use crate::playback::{AudioPlayer, PlaybackResult, PlayerConfig, VirtualOutput, VirtualOutputs};
use crate::streaming::AudioSource;
use crate::streaming::tests::{MockBackend, Track, sample_value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;


pub(crate) struct Rig {
    pub backend: MockBackend,
    pub player: AudioPlayer,
    pub outputs: VirtualOutputs,
}

impl Rig {
    /// A player over `track` whose source has not been opened.
    pub fn unopened(track: Track, config: PlayerConfig) -> Self {
        let (backend, client) = MockBackend::start(track);
        let outputs = VirtualOutputs::new();
        let player =
            AudioPlayer::with_config(Arc::new(AudioSource::new(client)), outputs.clone(), config)
                .unwrap();
        Self {
            backend,
            player,
            outputs,
        }
    }

    pub async fn open(track: Track) -> Self {
        Self::open_with(track, PlayerConfig::default()).await
    }

    pub async fn open_with(track: Track, config: PlayerConfig) -> Self {
        let rig = Self::unopened(track, config);
        rig.player.open().await.unwrap();
        rig
    }

    /// Run `play(start_at)` in the background.
    pub fn spawn_play(&self, start_at: u64) -> JoinHandle<PlaybackResult<()>> {
        let player = self.player.clone();
        tokio::spawn(async move { player.play(start_at).await })
    }

    pub fn output(&self) -> Arc<VirtualOutput> {
        self.outputs.last().unwrap()
    }
}

pub(crate) async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Assert that the output's segments are back to back from `start_sample` and carry the
/// track's samples, padded with zeros past `total_samples`.
pub(crate) fn assert_contiguous(
    output: &VirtualOutput,
    start_sample: u64,
    total_samples: u64,
    sample_rate: u64,
) {
    for (n, scheduled) in output.scheduled().iter().enumerate() {
        let expected_start = start_sample + n as u64 * sample_rate;
        assert_eq!(scheduled.at, n as f64);
        assert_eq!(scheduled.segment.start_sample(), expected_start);
        for channel in 0..scheduled.segment.channel_count() {
            let samples = scheduled.segment.channel(channel).unwrap();
            for (i, &sample) in samples.iter().enumerate() {
                let index = expected_start + i as u64;
                let expected = if index < total_samples {
                    sample_value(index, channel)
                } else {
                    0.0
                };
                assert_eq!(sample, expected, "segment {n} channel {channel} sample {i}");
            }
        }
    }
}

//! Streaming audio player with transport controls.
//!
//! A playback session fetches chunks from an [`AudioSource`] on a fixed tick, slices them into
//! one-second segments and schedules those back to back on an [`AudioOutput`]. How much audio
//! is queued ahead of the output clock (the lookahead) drives fetching:
//!
//! - a tick stops fetching once the lookahead reaches `prefetch_seconds`
//! - whole ticks skip fetching while the next chunk would take the lookahead past
//!   `high_mark_seconds`
//! - the output is suspended while the lookahead is below `low_mark_seconds`, and resumed at
//!   the end of the tick

use super::clock::Clock;
use super::config::PlayerConfig;
use super::error::{PlaybackError, PlaybackResult};
use super::traits::{AudioOutput, OutputFactory};
use crate::rpc::RpcError;
use crate::streaming::{
    AudioSource, AudioSourceMetadata, Carry, Chunk, Segment, StreamError, build_segments,
    calculate_position, flush_tail,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TICK_CAPACITY: usize = 16;

/// Transport state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayerState {
    /// Nothing played yet, the last session reached the end of the track, or the player was closed
    Idle,
    /// A session is running
    Playing,
    /// Paused by the caller or stopped by an error
    Paused,
}

impl PlayerState {
    /// Check if a new session may start from this state
    pub fn can_play(&self) -> bool {
        !matches!(self, Self::Playing)
    }

    /// Check if this state can be paused
    pub fn can_pause(&self) -> bool {
        matches!(self, Self::Playing)
    }
}

/// Playback position bookkeeping, in samples per channel from the track start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    /// Whether the player is paused
    pub paused: bool,
    /// Start of the segment being heard; advances in whole seconds
    pub position_samples: u64,
    /// End of the audio scheduled so far
    pub buffered_samples: u64,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            paused: true,
            position_samples: 0,
            buffered_samples: 0,
        }
    }
}

/// Progress report broadcast by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerTick {
    /// Playback position in seconds from the track start
    pub current_time: f64,
    /// End of the scheduled audio in seconds from the track start
    pub buffer_second: f64,
    /// Whether the session is still playing
    pub playing: bool,
}

/// Where a session started and how much of it has been scheduled.
#[derive(Debug)]
struct Timeline {
    start_at: u64,
    sample_rate: u32,
    total_samples: u64,
    scheduled: AtomicU64,
}

impl Timeline {
    fn new(start_at: u64, metadata: &AudioSourceMetadata) -> Self {
        Self {
            start_at,
            sample_rate: metadata.sample_rate,
            total_samples: metadata.total_samples,
            scheduled: AtomicU64::new(0),
        }
    }

    /// Seconds scheduled on the output; segment `n` plays at output time `n`.
    fn scheduled(&self) -> u64 {
        self.scheduled.load(Ordering::Acquire)
    }

    fn lookahead(&self, now: f64) -> f64 {
        self.scheduled() as f64 - now
    }

    fn tick(&self, now: f64, playing: bool) -> PlayerTick {
        let rate = f64::from(self.sample_rate);
        let start = self.start_at as f64 / rate;
        let max_length = self.total_samples.saturating_sub(self.start_at) as f64 / rate;
        PlayerTick {
            current_time: now.min(max_length) + start,
            buffer_second: (self.scheduled() as f64).min(max_length) + start,
            playing,
        }
    }

    fn state(&self, now: f64, paused: bool) -> PlaybackState {
        let rate = u64::from(self.sample_rate);
        let scheduled = self.scheduled();
        let heard = (now.max(0.0).floor() as u64).min(scheduled);
        PlaybackState {
            paused,
            position_samples: (self.start_at + heard * rate).min(self.total_samples),
            buffered_samples: (self.start_at + scheduled * rate).min(self.total_samples),
        }
    }
}

/// Output and timeline of a session, once it has them.
struct Live {
    output: Arc<dyn AudioOutput>,
    timeline: Arc<Timeline>,
}

struct SessionHandle {
    generation: u64,
    pause: CancellationToken,
    finished: CancellationToken,
    live: Option<Live>,
    closing: bool,
}

struct Control {
    state: PlayerState,
    generation: u64,
    session: Option<SessionHandle>,
    last_error: Option<PlaybackError>,
}

struct PlayerInner {
    source: Arc<AudioSource>,
    outputs: Arc<dyn OutputFactory>,
    config: PlayerConfig,
    // Lock order: control, then playback.
    control: Mutex<Control>,
    playback: Mutex<PlaybackState>,
    playable: watch::Sender<bool>,
    ticks: broadcast::Sender<PlayerTick>,
}

impl PlayerInner {
    /// Store `state` unless the session that computed it has already ended.
    fn refresh(&self, generation: u64, state: PlaybackState) {
        let control = self.control.lock();
        let current = control
            .session
            .as_ref()
            .is_some_and(|session| session.generation == generation);
        if current {
            *self.playback.lock() = state;
        }
    }
}

/// Tears a session down however `play` exits, including when its future is dropped.
struct SessionGuard<'a> {
    inner: &'a PlayerInner,
    end: PlayerState,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        {
            let mut control = self.inner.control.lock();
            let mut end = self.end;
            if let Some(session) = control.session.take() {
                if session.closing {
                    end = PlayerState::Idle;
                }
                session.finished.cancel();
                let mut playback = self.inner.playback.lock();
                match session.live {
                    Some(Live { output, timeline }) => {
                        *playback = timeline.state(output.current_time(), true);
                        output.close();
                    }
                    None => playback.paused = true,
                }
            }
            control.state = end;
        }
        self.inner.playable.send_replace(true);
    }
}

enum SessionEnd {
    Finished,
    Paused,
}

/// Streaming audio player.
///
/// Clones share the same player. Transport calls are cheap; [`play`](Self::play) runs the
/// whole session and resolves when it ends, so hosts usually spawn it.
///
/// ```rust,no_run
/// use audio_link::playback::{AudioPlayer, VirtualOutputs};
/// use audio_link::rpc::{MemoryChannel, RpcClient};
/// use audio_link::streaming::AudioSource;
/// use std::sync::Arc;
///
/// # async fn run(channel: MemoryChannel) -> audio_link::playback::PlaybackResult<()> {
/// let source = Arc::new(AudioSource::new(RpcClient::new(Arc::new(channel))));
/// let player = AudioPlayer::new(source, VirtualOutputs::new());
/// player.open().await?;
///
/// let session = tokio::spawn({
///     let player = player.clone();
///     async move { player.play(0).await }
/// });
///
/// let mut ticks = player.subscribe_ticks();
/// while let Ok(tick) = ticks.recv().await {
///     println!("{:.1}s / buffered {:.1}s", tick.current_time, tick.buffer_second);
///     if !tick.playing {
///         break;
///     }
/// }
/// # let _ = session.await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AudioPlayer {
    inner: Arc<PlayerInner>,
}

impl AudioPlayer {
    /// Create a player with the default configuration.
    pub fn new(source: Arc<AudioSource>, outputs: impl OutputFactory + 'static) -> Self {
        Self::build(source, Arc::new(outputs), PlayerConfig::default())
    }

    /// Create a player with a custom configuration.
    pub fn with_config(
        source: Arc<AudioSource>,
        outputs: impl OutputFactory + 'static,
        config: PlayerConfig,
    ) -> PlaybackResult<Self> {
        config.validate()?;
        Ok(Self::build(source, Arc::new(outputs), config))
    }

    fn build(
        source: Arc<AudioSource>,
        outputs: Arc<dyn OutputFactory>,
        config: PlayerConfig,
    ) -> Self {
        let (playable, _) = watch::channel(true);
        let (ticks, _) = broadcast::channel(TICK_CAPACITY);
        Self {
            inner: Arc::new(PlayerInner {
                source,
                outputs,
                config,
                control: Mutex::new(Control {
                    state: PlayerState::Idle,
                    generation: 0,
                    session: None,
                    last_error: None,
                }),
                playback: Mutex::new(PlaybackState::default()),
                playable,
                ticks,
            }),
        }
    }

    /// The source this player streams from.
    pub fn source(&self) -> &Arc<AudioSource> {
        &self.inner.source
    }

    /// Configuration the player was built with.
    pub fn config(&self) -> &PlayerConfig {
        &self.inner.config
    }

    /// Current transport state.
    pub fn state(&self) -> PlayerState {
        self.inner.control.lock().state
    }

    /// Current position bookkeeping.
    pub fn playback_state(&self) -> PlaybackState {
        *self.inner.playback.lock()
    }

    /// Whether no session is running or tearing down, so [`play`](Self::play) will start one.
    pub fn is_playable(&self) -> bool {
        self.inner.control.lock().session.is_none()
    }

    /// Wait until [`is_playable`](Self::is_playable) holds.
    pub async fn wait_playable(&self) {
        let mut playable = self.inner.playable.subscribe();
        // The sender lives as long as the player.
        let _ = playable.wait_for(|playable| *playable).await;
    }

    /// Error that ended the last session, if any.
    pub fn last_error(&self) -> Option<PlaybackError> {
        self.inner.control.lock().last_error.clone()
    }

    /// Receive progress ticks of every future session.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<PlayerTick> {
        self.inner.ticks.subscribe()
    }

    /// Open the source and load its metadata.
    pub async fn open(&self) -> PlaybackResult<AudioSourceMetadata> {
        self.inner.source.open();
        Ok(self.inner.source.load_metadata().await?)
    }

    /// Stop playback and close the source. The player ends up [`PlayerState::Idle`].
    pub fn close(&self) {
        {
            let mut control = self.inner.control.lock();
            match control.session.as_mut() {
                Some(session) => session.closing = true,
                None => control.state = PlayerState::Idle,
            }
        }
        self.pause();
        self.inner.source.close();
    }

    /// Suspend the output and ask the running session to stop at its next checkpoint.
    pub fn pause(&self) {
        let mut control = self.inner.control.lock();
        let mut playback = self.inner.playback.lock();
        if let Some(session) = &control.session {
            session.pause.cancel();
            if let Some(live) = &session.live {
                live.output.suspend();
                *playback = live.timeline.state(live.output.current_time(), true);
            }
        }
        playback.paused = true;
        if control.state.can_pause() {
            control.state = PlayerState::Paused;
        }
    }

    /// Play from the position the last session stopped at.
    pub async fn resume(&self) -> PlaybackResult<()> {
        let position = self.playback_state().position_samples;
        self.play(position).await
    }

    /// Pause, wait for the running session to wind down, then play from `position`.
    pub async fn seek(&self, position: u64) -> PlaybackResult<()> {
        self.pause();
        self.wait_playable().await;
        self.play(position).await
    }

    /// Play from sample `start_at` until the end of the track, a pause, or an error.
    ///
    /// Does nothing while another session is running or tearing down. A failed fetch ends the
    /// session in [`PlayerState::Paused`] with the error kept in
    /// [`last_error`](Self::last_error).
    pub async fn play(&self, start_at: u64) -> PlaybackResult<()> {
        let pause = CancellationToken::new();
        let finished = CancellationToken::new();
        let generation = {
            let mut control = self.inner.control.lock();
            if !control.state.can_play() || control.session.is_some() {
                debug!(state = ?control.state, "play ignored, session still active");
                return Ok(());
            }
            control.generation += 1;
            control.state = PlayerState::Playing;
            control.last_error = None;
            control.session = Some(SessionHandle {
                generation: control.generation,
                pause: pause.clone(),
                finished: finished.clone(),
                live: None,
                closing: false,
            });
            self.inner.playback.lock().paused = false;
            control.generation
        };
        self.inner.playable.send_replace(false);

        let mut guard = SessionGuard {
            inner: &self.inner,
            end: PlayerState::Paused,
        };
        info!(start_at, "playback starting");
        let outcome = self
            .run_session(start_at, generation, &pause, &finished)
            .await;

        match outcome {
            Ok(SessionEnd::Finished) => {
                info!("playback finished");
                guard.end = PlayerState::Idle;
                Ok(())
            }
            Ok(SessionEnd::Paused) => {
                info!("playback paused");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "playback stopped by error");
                self.inner.control.lock().last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn run_session(
        &self,
        start_at: u64,
        generation: u64,
        pause: &CancellationToken,
        finished: &CancellationToken,
    ) -> PlaybackResult<SessionEnd> {
        let source = &self.inner.source;
        if !source.is_open() {
            return Err(StreamError::Closed.into());
        }
        let metadata = match source.load_metadata().await {
            Ok(metadata) => metadata,
            Err(err) if interrupted(&err, pause, source) => return Ok(SessionEnd::Paused),
            Err(err) => return Err(err.into()),
        };
        if metadata.frames == 0 {
            debug!("track is empty");
            return Ok(SessionEnd::Finished);
        }
        if pause.is_cancelled() {
            return Ok(SessionEnd::Paused);
        }

        let start_at = start_at.min(metadata.total_samples);
        let output = self
            .inner
            .outputs
            .create(metadata.sample_rate, metadata.channels)?;
        let timeline = Arc::new(Timeline::new(start_at, &metadata));
        {
            let mut control = self.inner.control.lock();
            let Some(session) = control.session.as_mut() else {
                output.close();
                return Ok(SessionEnd::Paused);
            };
            session.live = Some(Live {
                output: Arc::clone(&output),
                timeline: Arc::clone(&timeline),
            });
        }

        tokio::spawn(progress_loop(
            Arc::clone(&self.inner),
            generation,
            Arc::clone(&output),
            Arc::clone(&timeline),
            pause.clone(),
            finished.clone(),
        ));

        let (frame, offset) = calculate_position(start_at);
        let mut session = Session {
            source: Arc::clone(source),
            config: self.inner.config.clone(),
            output,
            timeline,
            pause: pause.clone(),
            frames: metadata.frames,
            sample_rate: metadata.sample_rate as usize,
            next_frame: frame,
            carry: Carry::starting_at(offset, metadata.sample_rate as usize),
            previous: None,
            flushed: false,
            failure: None,
        };
        session.run().await
    }
}

impl std::fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPlayer")
            .field("state", &self.state())
            .field("playback", &self.playback_state())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Broadcast progress every `progress_tick` until the session ends, then once more.
async fn progress_loop(
    inner: Arc<PlayerInner>,
    generation: u64,
    output: Arc<dyn AudioOutput>,
    timeline: Arc<Timeline>,
    pause: CancellationToken,
    finished: CancellationToken,
) {
    let mut clock = Clock::new(inner.config.progress_tick, inner.config.stability_window);
    loop {
        let started = Instant::now();
        let running = !finished.is_cancelled();
        let playing = running && !pause.is_cancelled();
        let now = output.current_time();

        if running {
            inner.refresh(generation, timeline.state(now, !playing));
        }
        // No subscribers is fine.
        let _ = inner.ticks.send(timeline.tick(now, playing));
        if !running {
            break;
        }
        clock.pace(started, &finished).await;
    }
}

/// A closed-channel failure caused by the caller stopping playback rather than by the backend.
fn interrupted(err: &StreamError, pause: &CancellationToken, source: &AudioSource) -> bool {
    matches!(err, StreamError::Closed | StreamError::Rpc(RpcError::Closed))
        && (pause.is_cancelled() || !source.is_open())
}

/// The fetch loop of one playback session.
struct Session {
    source: Arc<AudioSource>,
    config: PlayerConfig,
    output: Arc<dyn AudioOutput>,
    timeline: Arc<Timeline>,
    pause: CancellationToken,
    frames: u64,
    sample_rate: usize,
    next_frame: u64,
    carry: Carry,
    previous: Option<Chunk>,
    flushed: bool,
    failure: Option<PlaybackError>,
}

impl Session {
    async fn run(&mut self) -> PlaybackResult<SessionEnd> {
        // Less than a second left in the first chunk: its tail opens the first segment.
        if self.carry.needs_previous() && self.next_frame < self.frames {
            match self.source.fetch_chunk(self.next_frame).await {
                Ok((_, chunk)) => {
                    self.previous = Some(chunk);
                    self.next_frame += 1;
                }
                Err(err) if interrupted(&err, &self.pause, &self.source) => {
                    return Ok(SessionEnd::Paused);
                }
                Err(err) => return Err(err.into()),
            }
        }

        let mut clock = Clock::new(self.config.fetch_tick, self.config.stability_window);
        loop {
            let started = Instant::now();
            if !self.tick(clock.skipped()).await? {
                break;
            }
            if !clock.pace(started, &self.pause).await {
                break;
            }
        }

        Ok(if self.pause.is_cancelled() {
            SessionEnd::Paused
        } else {
            SessionEnd::Finished
        })
    }

    /// One fetch tick. Returns whether the loop should keep going.
    async fn tick(&mut self, skipped: u32) -> PlaybackResult<bool> {
        if self.pause.is_cancelled() {
            return Ok(false);
        }

        if self.next_frame >= self.frames {
            self.flush()?;
            self.resume_output();
            return Ok(self.timeline.lookahead(self.output.current_time()) >= 0.0);
        }

        // Below the prefetch mark a chunk is always fetched; above it, only one that fits
        // under the high mark. A tick after an overrun catches up regardless.
        let lookahead = self.timeline.lookahead(self.output.current_time());
        let incoming = self.carry.segment_count(self.sample_rate) as f64;
        if skipped == 0
            && lookahead >= self.config.prefetch_seconds
            && lookahead + incoming > self.config.high_mark_seconds
        {
            debug!(lookahead, incoming, "next chunk would pass the high mark, not fetching");
            return Ok(true);
        }

        let source = Arc::clone(&self.source);
        let rendered = source
            .render(self.next_frame, |frame, _, chunk| self.accept(frame, chunk))
            .await;
        if let Err(err) = rendered {
            if interrupted(&err, &self.pause, &source) {
                debug!(frame = self.next_frame, "fetch cut short by pause or close");
                return Ok(false);
            }
            return Err(err.into());
        }
        if let Some(err) = self.failure.take() {
            return Err(err);
        }
        if !source.is_open() {
            debug!("source closed, stopping session");
            return Ok(false);
        }

        self.resume_output();
        Ok(!self.pause.is_cancelled())
    }

    /// Turn an arrived chunk into scheduled segments. Returns whether to fetch another.
    fn accept(&mut self, frame: u64, chunk: Chunk) -> bool {
        if self.pause.is_cancelled() {
            return false;
        }

        let lookahead = self.timeline.lookahead(self.output.current_time());
        if lookahead < self.config.low_mark_seconds && !self.output.is_suspended() {
            debug!(frame, lookahead, "below low mark, suspending output");
            self.output.suspend();
        }
        self.next_frame = frame + 1;

        let segments =
            match build_segments(self.previous.as_ref(), &chunk, self.carry, self.sample_rate) {
                Ok((segments, leftover)) => {
                    self.carry = Carry::Tail(leftover);
                    self.previous = Some(chunk);
                    segments
                }
                Err(err) => {
                    self.failure = Some(err.into());
                    return false;
                }
            };
        for segment in segments {
            if let Err(err) = self.schedule(segment) {
                self.failure = Some(err);
                return false;
            }
        }

        self.timeline.lookahead(self.output.current_time()) < self.config.prefetch_seconds
    }

    fn schedule(&self, segment: Segment) -> PlaybackResult<()> {
        let at = self.timeline.scheduled() as f64;
        self.output.schedule(segment, at)?;
        self.timeline.scheduled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Schedule what is left of the last chunk, once.
    fn flush(&mut self) -> PlaybackResult<()> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        if let (Some(previous), Carry::Tail(tail)) = (self.previous.take(), self.carry) {
            if let Some(segment) = flush_tail(&previous, tail, self.sample_rate)? {
                self.schedule(segment)?;
            }
        }
        Ok(())
    }

    fn resume_output(&self) {
        if self.output.is_suspended() && !self.pause.is_cancelled() {
            self.output.resume();
        }
    }
}

//! Audio device output using CPAL.
//!
//! A cpal stream is not `Send`, so each [`DeviceOutput`] owns a thread that builds the stream
//! and then serves transport commands over a crossbeam channel. The audio callback reads
//! scheduled segments from shared state and counts the frames it has played, which is the
//! output clock.

use super::error::{PlaybackError, PlaybackResult};
use super::traits::{AudioOutput, OutputFactory};
use crate::streaming::Segment;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, StreamConfig};
use crossbeam::channel::{Sender, bounded, unbounded};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
enum Command {
    Play,
    Pause,
    Close,
}

struct Queued {
    start_frame: u64,
    segment: Segment,
}

struct Shared {
    queue: VecDeque<Queued>,
    frames_played: u64,
    running: bool,
    closed: bool,
}

impl Shared {
    /// Fill an interleaved callback buffer and advance the clock.
    fn render(&mut self, data: &mut [f32], channels: usize) {
        if !self.running {
            data.fill(0.0);
            return;
        }
        for frame in data.chunks_mut(channels) {
            let now = self.frames_played;
            while self
                .queue
                .front()
                .is_some_and(|queued| queued.start_frame + queued.segment.len() as u64 <= now)
            {
                self.queue.pop_front();
            }
            match self.queue.front() {
                Some(queued) if queued.start_frame <= now => {
                    let index = (now - queued.start_frame) as usize;
                    for (channel, sample) in frame.iter_mut().enumerate() {
                        *sample = queued
                            .segment
                            .channel(channel)
                            .and_then(|samples| samples.get(index))
                            .copied()
                            .unwrap_or(0.0);
                    }
                }
                _ => frame.fill(0.0),
            }
            self.frames_played += 1;
        }
    }
}

/// An [`AudioOutput`] playing through a cpal device.
pub struct DeviceOutput {
    sample_rate: u32,
    channels: usize,
    shared: Arc<Mutex<Shared>>,
    commands: Sender<Command>,
}

impl DeviceOutput {
    /// Open a suspended stream on `device`.
    pub fn open(device: Device, sample_rate: u32, channels: usize) -> PlaybackResult<Self> {
        let stream_channels = u16::try_from(channels)
            .map_err(|_| PlaybackError::output(format!("{channels} channels not supported")))?;
        let config = StreamConfig {
            channels: stream_channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let shared = Arc::new(Mutex::new(Shared {
            queue: VecDeque::new(),
            frames_played: 0,
            running: false,
            closed: false,
        }));
        let (commands, received) = unbounded::<Command>();
        let (ready_tx, ready_rx) = bounded::<PlaybackResult<()>>(1);

        let callback_shared = Arc::clone(&shared);
        thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let built = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        callback_shared.lock().render(data, channels);
                    },
                    |err| warn!(error = %err, "output stream error"),
                    None,
                );
                let stream = match built {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.into()));
                        return;
                    }
                };
                // Some hosts start streams on creation.
                if let Err(err) = stream.pause() {
                    debug!(error = %PlaybackError::from(err), "initial pause unsupported");
                }
                let _ = ready_tx.send(Ok(()));

                for command in received.iter() {
                    let result = match command {
                        Command::Play => stream.play().map_err(PlaybackError::from),
                        Command::Pause => stream.pause().map_err(PlaybackError::from),
                        Command::Close => break,
                    };
                    if let Err(err) = result {
                        warn!(error = %err, ?command, "output transport failed");
                    }
                }
            })
            .map_err(|err| PlaybackError::backend("cpal", err.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| PlaybackError::backend("cpal", "output thread exited"))??;

        Ok(Self {
            sample_rate,
            channels,
            shared,
            commands,
        })
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(?command, "output thread already gone");
        }
    }
}

impl AudioOutput for DeviceOutput {
    fn current_time(&self) -> f64 {
        self.shared.lock().frames_played as f64 / f64::from(self.sample_rate)
    }

    fn schedule(&self, segment: Segment, at: f64) -> PlaybackResult<()> {
        if segment.channel_count() != self.channels {
            return Err(PlaybackError::output(format!(
                "segment has {} channels, output has {}",
                segment.channel_count(),
                self.channels
            )));
        }
        let mut shared = self.shared.lock();
        if shared.closed {
            return Err(PlaybackError::output("output closed"));
        }
        let start_frame = (at.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        shared.queue.push_back(Queued {
            start_frame,
            segment,
        });
        Ok(())
    }

    fn suspend(&self) {
        self.shared.lock().running = false;
        self.send(Command::Pause);
    }

    fn resume(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.closed || shared.running {
                return;
            }
            shared.running = true;
        }
        self.send(Command::Play);
    }

    fn is_suspended(&self) -> bool {
        !self.shared.lock().running
    }

    fn close(&self) {
        {
            let mut shared = self.shared.lock();
            shared.running = false;
            shared.closed = true;
            shared.queue.clear();
        }
        self.send(Command::Close);
    }

    fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.send(Command::Close);
    }
}

/// [`OutputFactory`] opening a [`DeviceOutput`] per session.
#[derive(Debug, Clone, Default)]
pub struct DeviceOutputs {
    device_name: Option<String>,
}

impl DeviceOutputs {
    /// Use the host's default output device.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the output device with this name.
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    fn device(&self) -> PlaybackResult<Device> {
        let host = cpal::default_host();
        match &self.device_name {
            None => host
                .default_output_device()
                .ok_or_else(|| PlaybackError::backend("cpal", "no default output device")),
            Some(name) => host
                .output_devices()
                .map_err(|err| PlaybackError::backend("cpal", err.to_string()))?
                .find(|device| device.name().is_ok_and(|found| &found == name))
                .ok_or_else(|| {
                    PlaybackError::backend("cpal", format!("output device {name:?} not found"))
                }),
        }
    }
}

impl OutputFactory for DeviceOutputs {
    fn create(&self, sample_rate: u32, channels: usize) -> PlaybackResult<Arc<dyn AudioOutput>> {
        let device = self.device()?;
        debug!(
            device = %device.name().unwrap_or_default(),
            sample_rate, channels, "opening output device"
        );
        Ok(Arc::new(DeviceOutput::open(device, sample_rate, channels)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{Carry, Chunk, build_segments};

    fn shared() -> Shared {
        Shared {
            queue: VecDeque::new(),
            frames_played: 0,
            running: true,
            closed: false,
        }
    }

    fn ramp(rate: usize) -> Segment {
        let samples: Vec<f32> = (0..crate::streaming::CHUNK_SIZE).map(|i| i as f32).collect();
        let chunk = Chunk::from_channels(0, vec![samples.clone(), samples]).unwrap();
        let (segments, _) = build_segments(None, &chunk, Carry::Skip(0), rate).unwrap();
        segments.into_iter().next().unwrap()
    }

    #[test]
    fn test_render_interleaves_and_advances() {
        let mut shared = shared();
        shared.queue.push_back(Queued {
            start_frame: 2,
            segment: ramp(4),
        });

        let mut data = [1.0f32; 12];
        shared.render(&mut data, 2);
        assert_eq!(data, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(shared.frames_played, 6);

        let mut data = [1.0f32; 6];
        shared.render(&mut data, 2);
        assert_eq!(data, [0.0; 6]);
        assert!(shared.queue.is_empty());
    }

    #[test]
    fn test_suspended_render_is_silent() {
        let mut shared = shared();
        shared.running = false;
        shared.queue.push_back(Queued {
            start_frame: 0,
            segment: ramp(4),
        });

        let mut data = [1.0f32; 4];
        shared.render(&mut data, 2);
        assert_eq!(data, [0.0; 4]);
        assert_eq!(shared.frames_played, 0);
    }
}

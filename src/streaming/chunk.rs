//! Fixed-size audio chunks and their reassembly into one-second segments.
//!
//! The backend serves audio in chunks of [`CHUNK_SIZE`] samples per channel. Playback works in
//! segments of exactly one second, so a segment may straddle two chunks. [`build_segments`]
//! slices the two most recent chunks into segments and reports how many samples of the newer
//! chunk are left over for the next call.

use super::error::{StreamError, StreamResult};
use crate::rpc::RawBuffer;
use crate::stream_error;

/// Number of backend frames combined into one chunk.
pub const COMBINED_FRAMES: usize = 24;
/// Samples per backend frame.
pub const SAMPLES_PER_UNIT: usize = 3072;
/// Samples per channel in one chunk.
pub const CHUNK_SIZE: usize = COMBINED_FRAMES * SAMPLES_PER_UNIT;
/// Wire size of one sample (little-endian `f32`).
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<f32>();

/// Split an absolute sample index into `(chunk index, offset inside the chunk)`.
pub fn calculate_position(sample: u64) -> (u64, usize) {
    let chunk = CHUNK_SIZE as u64;
    (sample / chunk, (sample % chunk) as usize)
}

/// Absolute index of the first sample of chunk `frame`.
pub fn chunk_start(frame: u64) -> u64 {
    frame * CHUNK_SIZE as u64
}

/// One chunk of decoded samples, one buffer per channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    frame: u64,
    channels: Vec<Vec<f32>>,
}

impl Chunk {
    /// Wrap decoded channel buffers. Every channel must hold exactly [`CHUNK_SIZE`] samples.
    pub fn from_channels(frame: u64, channels: Vec<Vec<f32>>) -> StreamResult<Self> {
        if channels.is_empty() {
            return Err(StreamError::malformed_chunk(frame, "no channels"));
        }
        if let Some((index, channel)) = channels
            .iter()
            .enumerate()
            .find(|(_, channel)| channel.len() != CHUNK_SIZE)
        {
            return Err(StreamError::malformed_chunk(
                frame,
                format!(
                    "channel {index} holds {} samples, expected {CHUNK_SIZE}",
                    channel.len()
                ),
            ));
        }
        Ok(Self { frame, channels })
    }

    /// Decode the raw buffers of a `render` reply.
    pub fn from_buffers(frame: u64, buffers: &[RawBuffer], channels: usize) -> StreamResult<Self> {
        if buffers.len() != channels {
            return Err(StreamError::malformed_chunk(
                frame,
                format!("expected {channels} buffers, got {}", buffers.len()),
            ));
        }

        let decoded = buffers
            .iter()
            .enumerate()
            .map(|(index, bytes)| decode_channel(frame, index, bytes))
            .collect::<StreamResult<Vec<_>>>()?;
        Self::from_channels(frame, decoded)
    }

    /// A chunk of silence.
    pub fn silent(frame: u64, channels: usize) -> Self {
        Self {
            frame,
            channels: vec![vec![0.0; CHUNK_SIZE]; channels.max(1)],
        }
    }

    /// Encode back into wire buffers.
    pub fn to_buffers(&self) -> Vec<RawBuffer> {
        self.channels
            .iter()
            .map(|channel| channel.iter().flat_map(|s| s.to_le_bytes()).collect())
            .collect()
    }

    /// Chunk index.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Absolute index of the first sample.
    pub fn start_sample(&self) -> u64 {
        chunk_start(self.frame)
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    fn slice(&self, from: usize, len: usize) -> Segment {
        Segment {
            start_sample: self.start_sample() + from as u64,
            channels: self
                .channels
                .iter()
                .map(|channel| channel[from..from + len].to_vec())
                .collect(),
        }
    }
}

fn decode_channel(frame: u64, index: usize, bytes: &[u8]) -> StreamResult<Vec<f32>> {
    let expected = CHUNK_SIZE * BYTES_PER_SAMPLE;
    if bytes.len() != expected {
        return Err(StreamError::malformed_chunk(
            frame,
            format!(
                "buffer {index} is {} bytes, expected {expected}",
                bytes.len()
            ),
        ));
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Exactly one second of reconstructed audio.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    start_sample: u64,
    channels: Vec<Vec<f32>>,
}

impl Segment {
    /// Absolute index of the first sample. Zero padding before the track start is not counted.
    pub fn start_sample(&self) -> u64 {
        self.start_sample
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// Whether the segment holds no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples of one channel.
    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }
}

/// What is left to play from the previous chunk when the next one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Carry {
    /// The last `n` samples of the previous chunk open the next segment.
    Tail(usize),
    /// The first `n` samples of the next chunk lie before the playback start.
    Skip(usize),
}

impl Carry {
    /// Carry for starting playback `offset` samples into a chunk.
    ///
    /// With more than one second left in that chunk, the chunk is consumed from `offset`.
    /// Otherwise the chunk has to be fetched up front and its tail opens the first segment.
    pub fn starting_at(offset: usize, sample_rate: usize) -> Self {
        if CHUNK_SIZE - offset.min(CHUNK_SIZE) > sample_rate {
            Self::Skip(offset)
        } else {
            Self::Tail(CHUNK_SIZE - offset.min(CHUNK_SIZE))
        }
    }

    /// Whether the chunk at the start position must be fetched before the first one.
    pub const fn needs_previous(&self) -> bool {
        matches!(self, Self::Tail(_))
    }

    /// Number of segments [`build_segments`] emits for the next chunk under this carry.
    pub fn segment_count(&self, sample_rate: usize) -> usize {
        let sample_rate = sample_rate.clamp(1, CHUNK_SIZE);
        let (opening, cursor) = match *self {
            Self::Tail(tail) => (1, sample_rate - tail.min(sample_rate)),
            Self::Skip(skip) => (0, skip.min(CHUNK_SIZE)),
        };
        opening + (CHUNK_SIZE - cursor).div_ceil(sample_rate).saturating_sub(1)
    }
}

fn check_sample_rate(sample_rate: usize) -> StreamResult<()> {
    if sample_rate == 0 || sample_rate > CHUNK_SIZE {
        return Err(stream_error!(
            InvalidMetadata,
            "sample rate {sample_rate} must be in 1..={CHUNK_SIZE}"
        ));
    }
    Ok(())
}

/// Slice `current` into one-second segments, opening with the carry from `previous`.
///
/// A missing `previous` reads as silence. Returns the segments and the number of samples at
/// the end of `current` not yet consumed; pass them on as [`Carry::Tail`] with `current` as the
/// next `previous`.
pub fn build_segments(
    previous: Option<&Chunk>,
    current: &Chunk,
    carry: Carry,
    sample_rate: usize,
) -> StreamResult<(Vec<Segment>, usize)> {
    check_sample_rate(sample_rate)?;
    if let Some(previous) = previous {
        if previous.channel_count() != current.channel_count() {
            return Err(StreamError::malformed_chunk(
                current.frame,
                format!(
                    "{} channels after a chunk with {}",
                    current.channel_count(),
                    previous.channel_count()
                ),
            ));
        }
    }

    let mut segments = Vec::new();
    let mut cursor = match carry {
        Carry::Tail(tail) => {
            debug_assert!(tail <= sample_rate, "tail longer than one second");
            let tail = tail.min(sample_rate);
            let head = sample_rate - tail;

            let channels = (0..current.channel_count())
                .map(|c| {
                    let mut samples = Vec::with_capacity(sample_rate);
                    match previous {
                        Some(previous) => {
                            samples.extend_from_slice(&previous.channels[c][CHUNK_SIZE - tail..])
                        }
                        None => samples.resize(tail, 0.0),
                    }
                    samples.extend_from_slice(&current.channels[c][..head]);
                    samples
                })
                .collect();
            segments.push(Segment {
                start_sample: current.start_sample().saturating_sub(tail as u64),
                channels,
            });
            head
        }
        Carry::Skip(skip) => skip.min(CHUNK_SIZE),
    };

    while CHUNK_SIZE - cursor > sample_rate {
        segments.push(current.slice(cursor, sample_rate));
        cursor += sample_rate;
    }
    Ok((segments, CHUNK_SIZE - cursor))
}

/// Final segment after the last chunk: its unconsumed tail padded with silence.
pub fn flush_tail(last: &Chunk, tail: usize, sample_rate: usize) -> StreamResult<Option<Segment>> {
    check_sample_rate(sample_rate)?;
    if tail == 0 {
        return Ok(None);
    }
    let tail = tail.min(sample_rate);
    let channels = last
        .channels
        .iter()
        .map(|channel| {
            let mut samples = channel[CHUNK_SIZE - tail..].to_vec();
            samples.resize(sample_rate, 0.0);
            samples
        })
        .collect();
    Ok(Some(Segment {
        start_sample: last.start_sample() + (CHUNK_SIZE - tail) as u64,
        channels,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 48_000;
    const FRAMES: u64 = 8;

    /// Chunk whose samples equal their absolute index (plus a per-channel bias).
    fn indexed(frame: u64, channels: usize) -> Chunk {
        let start = chunk_start(frame);
        let data = (0..channels)
            .map(|c| {
                (0..CHUNK_SIZE)
                    .map(|i| (start + i as u64) as f32 + c as f32 * 0.5)
                    .collect()
            })
            .collect();
        Chunk::from_channels(frame, data).unwrap()
    }

    fn wire(frame: u64) -> Chunk {
        let chunk = indexed(frame, 2);
        Chunk::from_buffers(frame, &chunk.to_buffers(), 2).unwrap()
    }

    fn expected_window(start: u64, channel: usize) -> Vec<u32> {
        (start..start + RATE as u64)
            .map(|i| (i as f32 + channel as f32 * 0.5).to_bits())
            .collect()
    }

    fn bits(samples: &[f32]) -> Vec<u32> {
        samples.iter().map(|s| s.to_bits()).collect()
    }

    /// First second reconstructed from a start position, the way playback primes itself.
    fn first_second(start: u64) -> Segment {
        let (frame, offset) = calculate_position(start);
        let carry = Carry::starting_at(offset, RATE);
        let (segments, _) = if carry.needs_previous() {
            let previous = wire(frame);
            if frame + 1 < FRAMES {
                build_segments(Some(&previous), &wire(frame + 1), carry, RATE).unwrap()
            } else {
                let Carry::Tail(tail) = carry else {
                    unreachable!()
                };
                (flush_tail(&previous, tail, RATE).unwrap().into_iter().collect(), 0)
            }
        } else {
            build_segments(None, &wire(frame), carry, RATE).unwrap()
        };
        segments.into_iter().next().unwrap()
    }

    #[test]
    fn test_calculate_position() {
        assert_eq!(CHUNK_SIZE, 73_728);
        assert_eq!(calculate_position(0), (0, 0));
        assert_eq!(calculate_position(73_727), (0, 73_727));
        assert_eq!(calculate_position(73_728), (1, 0));
        assert_eq!(calculate_position(3 * 73_728 + 5), (3, 5));
    }

    #[test]
    fn test_starting_carry() {
        assert_eq!(Carry::starting_at(0, RATE), Carry::Skip(0));
        assert_eq!(
            Carry::starting_at(CHUNK_SIZE - RATE - 1, RATE),
            Carry::Skip(CHUNK_SIZE - RATE - 1)
        );
        assert_eq!(Carry::starting_at(CHUNK_SIZE - RATE, RATE), Carry::Tail(RATE));
        assert_eq!(Carry::starting_at(CHUNK_SIZE - 1, RATE), Carry::Tail(1));
        assert!(Carry::Tail(1).needs_previous());
        assert!(!Carry::Skip(0).needs_previous());
    }

    #[test]
    fn test_first_second_matches_source_window() {
        let total = chunk_start(FRAMES);
        let mut starts: Vec<u64> = (0..total - RATE as u64).step_by(7_919).collect();
        for frame in 0..FRAMES {
            let base = chunk_start(frame);
            starts.extend([
                base,
                base + 1,
                base + (CHUNK_SIZE - RATE - 1) as u64,
                base + (CHUNK_SIZE - RATE) as u64,
                base + (CHUNK_SIZE - 1) as u64,
            ]);
        }
        starts.retain(|start| start + RATE as u64 <= total);

        for start in starts {
            let segment = first_second(start);
            assert_eq!(segment.start_sample(), start, "start {start}");
            assert_eq!(segment.len(), RATE);
            for channel in 0..2 {
                assert_eq!(
                    bits(segment.channel(channel).unwrap()),
                    expected_window(start, channel),
                    "start {start}, channel {channel}"
                );
            }
        }
    }

    #[test]
    fn test_consecutive_chunks_stitch_without_gaps() {
        let start = 12_345u64;
        let (frame, offset) = calculate_position(start);
        let mut carry = Carry::starting_at(offset, RATE);
        let mut previous: Option<Chunk> = None;
        let mut next = start;

        for frame in frame..FRAMES {
            let chunk = wire(frame);
            let (segments, leftover) =
                build_segments(previous.as_ref(), &chunk, carry, RATE).unwrap();
            for segment in segments {
                assert_eq!(segment.start_sample(), next);
                assert_eq!(bits(segment.channel(1).unwrap()), expected_window(next, 1));
                next += RATE as u64;
            }
            assert!(leftover > 0 && leftover <= RATE);
            carry = Carry::Tail(leftover);
            previous = Some(chunk);
        }

        let Carry::Tail(tail) = carry else {
            unreachable!()
        };
        let last = flush_tail(previous.as_ref().unwrap(), tail, RATE)
            .unwrap()
            .unwrap();
        assert_eq!(last.start_sample(), next);
        assert_eq!(next + tail as u64, chunk_start(FRAMES));
        assert_eq!(last.channel(0).unwrap()[tail..], vec![0.0; RATE - tail][..]);
    }

    #[test]
    fn test_missing_previous_reads_as_silence() {
        let current = indexed(1, 1);
        let (segments, leftover) = build_segments(None, &current, Carry::Tail(100), RATE).unwrap();
        let first = &segments[0];
        assert_eq!(first.start_sample(), chunk_start(1) - 100);
        assert!(first.channel(0).unwrap()[..100].iter().all(|&s| s == 0.0));
        assert_eq!(first.channel(0).unwrap()[100], chunk_start(1) as f32);
        assert_eq!(segments.len(), 1);
        assert_eq!(leftover, CHUNK_SIZE - (RATE - 100));
    }

    #[test]
    fn test_exact_fit_leaves_a_full_second() {
        // 3072 Hz divides the chunk evenly: 23 segments and one second carried over.
        let (segments, leftover) = build_segments(None, &indexed(0, 1), Carry::Skip(0), 3072).unwrap();
        assert_eq!(segments.len(), 23);
        assert_eq!(leftover, 3072);

        let (segments, leftover) =
            build_segments(Some(&indexed(0, 1)), &indexed(1, 1), Carry::Tail(3072), 3072).unwrap();
        assert_eq!(segments.len(), 24);
        assert_eq!(segments[0].start_sample(), (CHUNK_SIZE - 3072) as u64);
        assert_eq!(leftover, 3072);
    }

    #[test]
    fn test_segment_count_predicts_build() {
        let cases = [
            (Carry::Skip(0), RATE),
            (Carry::Skip(12_345), RATE),
            (Carry::Tail(25_728), RATE),
            (Carry::Tail(RATE), RATE),
            (Carry::Skip(0), 3072),
            (Carry::Tail(3072), 3072),
            (Carry::Tail(100), 3072),
        ];
        for (carry, rate) in cases {
            let (segments, _) = build_segments(None, &indexed(1, 1), carry, rate).unwrap();
            assert_eq!(carry.segment_count(rate), segments.len(), "{carry:?} at {rate}");
        }
    }

    #[test]
    fn test_decode_rejects_bad_buffers() {
        let good = indexed(0, 1).to_buffers();
        assert!(matches!(
            Chunk::from_buffers(0, &good, 2),
            Err(StreamError::MalformedChunk { frame: 0, .. })
        ));

        let short = vec![good[0][..8].to_vec()];
        assert!(matches!(
            Chunk::from_buffers(4, &short, 1),
            Err(StreamError::MalformedChunk { frame: 4, .. })
        ));
    }

    #[test]
    fn test_rejects_unplayable_sample_rate() {
        let chunk = Chunk::silent(0, 1);
        assert!(matches!(
            build_segments(None, &chunk, Carry::Skip(0), 0),
            Err(StreamError::InvalidMetadata(_))
        ));
        assert!(matches!(
            build_segments(None, &chunk, Carry::Skip(0), CHUNK_SIZE + 1),
            Err(StreamError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_channel_count_must_not_change() {
        let result = build_segments(
            Some(&Chunk::silent(0, 2)),
            &Chunk::silent(1, 1),
            Carry::Tail(10),
            RATE,
        );
        assert!(matches!(result, Err(StreamError::MalformedChunk { frame: 1, .. })));
    }
}

//! Chunked PCM accumulation buffer.
//!
//! An [`AudioTrack`] collects mono PCM16 in fixed-capacity chunks. Every
//! chunk except the one currently being written is completely full, so the
//! total sample count is always the sum of chunk fills. A recording track
//! is sized once (`storage_secs × sample_rate`) and cleared between
//! sessions without reallocating; a synthesis track may grow instead.

use crate::PcmBlock;

/// One fixed-capacity slice of a track.
#[derive(Debug)]
struct Chunk {
    buf: Vec<i16>,
    fill: usize,
}

impl Chunk {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            fill: 0,
        }
    }

    fn free(&self) -> usize {
        self.buf.len() - self.fill
    }
}

/// Ordered sequence of PCM chunks with a target sample rate.
#[derive(Debug)]
pub struct AudioTrack {
    chunks: Vec<Chunk>,
    chunk_samples: usize,
    sample_rate_hz: u32,
    allow_growth: bool,
    /// Index of the chunk currently being filled.
    write_index: usize,
}

impl AudioTrack {
    /// Create a track holding `storage_secs` seconds of audio at
    /// `sample_rate_hz`, in chunks of `chunk_samples`.
    ///
    /// With `allow_growth` set, pushing past the initial capacity appends
    /// chunks; without it, overflowing samples are dropped (newest first)
    /// and a warning is logged; a recording session survives a full
    /// buffer, it just stops taking audio.
    pub fn new(
        sample_rate_hz: u32,
        chunk_samples: usize,
        storage_secs: u32,
        allow_growth: bool,
    ) -> Self {
        let chunk_samples = chunk_samples.max(1);
        let total = (storage_secs as usize).saturating_mul(sample_rate_hz as usize);
        let chunk_count = total.div_ceil(chunk_samples).max(1);

        Self {
            chunks: (0..chunk_count).map(|_| Chunk::new(chunk_samples)).collect(),
            chunk_samples,
            sample_rate_hz,
            allow_growth,
            write_index: 0,
        }
    }

    /// The track's target sample rate.
    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Total samples currently stored.
    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(|c| c.fill).sum()
    }

    /// Total samples the track can hold right now.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_samples
    }

    /// True when no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.write_index == 0 && self.chunks[0].fill == 0
    }

    /// Zero the written regions and rewind. Chunk allocations are kept.
    pub fn clear(&mut self) {
        for chunk in &mut self.chunks {
            chunk.buf[..chunk.fill].fill(0);
            chunk.fill = 0;
        }
        self.write_index = 0;
    }

    /// Append samples, returning how many were stored.
    ///
    /// A non-growing track that runs out of space drops the remainder and
    /// logs a warning; the session continues.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let mut written = 0;

        while written < samples.len() {
            if self.write_index >= self.chunks.len() {
                if !self.allow_growth {
                    tracing::warn!(
                        dropped = samples.len() - written,
                        capacity = self.capacity(),
                        "audio track full, dropping newest samples"
                    );
                    break;
                }
                self.chunks.push(Chunk::new(self.chunk_samples));
            }

            let chunk = &mut self.chunks[self.write_index];
            let take = chunk.free().min(samples.len() - written);
            chunk.buf[chunk.fill..chunk.fill + take]
                .copy_from_slice(&samples[written..written + take]);
            chunk.fill += take;
            written += take;

            if chunk.free() == 0 {
                self.write_index += 1;
            }
        }

        written
    }

    /// Iterate over the filled portion of each chunk, in order.
    pub fn chunks(&self) -> impl Iterator<Item = &[i16]> {
        self.chunks
            .iter()
            .filter(|c| c.fill > 0)
            .map(|c| &c.buf[..c.fill])
    }

    /// Copy the stored samples into one contiguous block.
    pub fn to_block(&self) -> PcmBlock {
        let mut samples = Vec::with_capacity(self.sample_count());
        for chunk in self.chunks() {
            samples.extend_from_slice(chunk);
        }
        PcmBlock::new(samples, self.sample_rate_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizing() {
        // 2 seconds at 16 kHz in 2048-sample chunks: ceil(32000/2048) = 16.
        let track = AudioTrack::new(16000, 2048, 2, false);
        assert_eq!(track.capacity(), 16 * 2048);
        assert!(track.is_empty());
        assert_eq!(track.sample_count(), 0);
    }

    #[test]
    fn test_push_across_chunks() {
        let track_samples: Vec<i16> = (0..5000).map(|i| i as i16).collect();
        let mut track = AudioTrack::new(1000, 1024, 8, false);

        assert_eq!(track.push(&track_samples), 5000);
        assert_eq!(track.sample_count(), 5000);
        assert_eq!(track.to_block().samples, track_samples);

        // All chunks except the last are full.
        let fills: Vec<usize> = track.chunks().map(|c| c.len()).collect();
        assert_eq!(fills, vec![1024, 1024, 1024, 1024, 904]);
    }

    #[test]
    fn test_overflow_drops_newest() {
        let mut track = AudioTrack::new(100, 50, 1, false);
        assert_eq!(track.capacity(), 100);

        let first: Vec<i16> = vec![1; 80];
        let second: Vec<i16> = vec![2; 80];
        assert_eq!(track.push(&first), 80);
        // Only 20 samples fit; the newest 60 are dropped.
        assert_eq!(track.push(&second), 20);
        assert_eq!(track.sample_count(), 100);

        let block = track.to_block();
        assert!(block.samples[..80].iter().all(|&s| s == 1));
        assert!(block.samples[80..].iter().all(|&s| s == 2));
    }

    #[test]
    fn test_growth() {
        let mut track = AudioTrack::new(100, 50, 1, true);
        let samples: Vec<i16> = vec![3; 500];
        assert_eq!(track.push(&samples), 500);
        assert_eq!(track.sample_count(), 500);
        assert!(track.capacity() >= 500);
    }

    #[test]
    fn test_clear_keeps_allocation() {
        let mut track = AudioTrack::new(1000, 256, 4, false);
        track.push(&vec![9; 3000]);
        let capacity = track.capacity();

        track.clear();
        assert!(track.is_empty());
        assert_eq!(track.sample_count(), 0);
        assert_eq!(track.capacity(), capacity);

        // Reuse after clear starts at the beginning.
        track.push(&[1, 2, 3]);
        assert_eq!(track.to_block().samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_block_duration() {
        let mut track = AudioTrack::new(16000, 2048, 4, false);
        track.push(&vec![0; 16000]);
        assert_eq!(track.to_block().duration().as_secs(), 1);
    }
}

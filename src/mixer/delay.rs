//! Per-source delay line
//!
//! A fixed-capacity circular buffer. The write cursor always advances by the
//! length of the pushed block; the delay only moves the read offset, so a
//! delay change never reallocates or shifts the write timeline.

/// Fixed-size sample delay
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
    delay: usize,
    max_delay: usize,
}

impl DelayLine {
    /// Create a delay line for delays up to `max_delay` samples and blocks of
    /// up to `max_block` samples.
    ///
    /// The buffer holds one extra block so a full block can always be read
    /// `max_delay` samples behind the block just written.
    pub fn new(max_delay: usize, max_block: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay.saturating_add(max_block.max(1))],
            write_pos: 0,
            delay: 0,
            max_delay,
        }
    }

    /// Set the delay in samples, clamped to the maximum delay.
    /// Returns the delay actually applied.
    pub fn configure(&mut self, delay_samples: usize) -> usize {
        self.delay = delay_samples.min(self.max_delay);
        self.delay
    }

    /// Current delay in samples
    pub fn delay(&self) -> usize {
        self.delay
    }

    /// Largest delay this line can apply
    pub fn max_delay(&self) -> usize {
        self.max_delay
    }

    /// Total ring capacity in samples
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Write `input` and fill `output` with the block starting `delay`
    /// samples behind it.
    ///
    /// Blocks longer than the ring's block allowance are processed in
    /// pieces so the read window never overlaps fresh writes.
    pub fn push(&mut self, input: &[f32], output: &mut [f32]) {
        debug_assert_eq!(input.len(), output.len());
        let chunk = self.buffer.len() - self.max_delay;

        for (inp, out) in input.chunks(chunk).zip(output.chunks_mut(chunk)) {
            self.push_chunk(inp, out);
        }
    }

    fn push_chunk(&mut self, input: &[f32], output: &mut [f32]) {
        let cap = self.buffer.len();
        let start = self.write_pos;

        for (i, &sample) in input.iter().enumerate() {
            self.buffer[(start + i) % cap] = sample;
        }

        let read_start = (start + cap - self.delay) % cap;
        for (i, out) in output.iter_mut().enumerate() {
            *out = self.buffer[(read_start + i) % cap];
        }

        self.write_pos = (start + input.len()) % cap;
    }

    /// Zero the buffer. Not for use inside the audio callback.
    pub fn reset(&mut self) {
        self.buffer.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }
}

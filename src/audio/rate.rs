//! Streaming sample rate conversion and gain for interleaved 16-bit PCM.
//!
//! The converter plays input written at a variable rate through an output
//! device running at a fixed rate. Raising the input rate above the device
//! rate plays faster and higher, lowering it plays slower and deeper.

/// Linear-interpolation rate converter that keeps its phase across calls,
/// so the input rate can change between blocks without clicks from a reset.
#[derive(Debug, Clone)]
pub struct RateConverter {
    channels: usize,
    from: u32,
    to: u32,
    /// Read position in input frames, relative to the first frame of `carry`.
    position: f64,
    /// Last input frame of the previous block, not yet emitted.
    carry: Vec<i16>,
}

impl RateConverter {
    /// # Panics
    /// Panics if `channels`, `from` or `to` is 0.
    pub fn new(channels: usize, from: u32, to: u32) -> Self {
        assert!(channels >= 1);
        assert!(from >= 1);
        assert!(to >= 1);
        Self {
            channels,
            from,
            to,
            position: 0.0,
            carry: Vec::with_capacity(channels),
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.from
    }

    pub fn output_rate(&self) -> u32 {
        self.to
    }

    /// Changes the rate the next input block is interpreted at. Ignores 0.
    pub fn set_input_rate(&mut self, from: u32) {
        if from > 0 {
            self.from = from;
        }
    }

    /// Drops buffered state, e.g. after the device discarded its queue.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.carry.clear();
    }

    /// Converts `input` and appends the result to `output`.
    ///
    /// A trailing partial frame in `input` is ignored.
    pub fn process(&mut self, input: &[i16], output: &mut Vec<i16>) {
        let ch = self.channels;
        let input_frames = input.len() / ch;
        if input_frames == 0 {
            return;
        }

        let carried = self.carry.len() / ch;
        let total = carried + input_frames;
        let frame = |i: usize| {
            if i < carried {
                &self.carry[i * ch..(i + 1) * ch]
            } else {
                let j = i - carried;
                &input[j * ch..(j + 1) * ch]
            }
        };

        let step = self.from as f64 / self.to as f64;
        let mut position = self.position;
        output.reserve(((total as f64 / step) as usize + 1) * ch);

        while position + 1.0 < total as f64 {
            let index = position as usize;
            let frac = (position - index as f64) as f32;
            let current = frame(index);
            let next = frame(index + 1);
            for c in 0..ch {
                let a = current[c] as f32;
                let b = next[c] as f32;
                let value = a + (b - a) * frac;
                output.push(value.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            }
            position += step;
        }

        let last = frame(total - 1).to_vec();
        self.position = position - (total - 1) as f64;
        self.carry = last;
    }
}

/// Scales interleaved samples: channel 0 by `left`, channel 1 by `right`,
/// any further channel by `left`.
pub fn apply_gain(samples: &mut [i16], channels: usize, left: f32, right: f32) {
    if channels == 0 || (left == 1.0 && right == 1.0) {
        return;
    }
    for frame in samples.chunks_mut(channels) {
        for (c, sample) in frame.iter_mut().enumerate() {
            let gain = if c == 1 { right } else { left };
            *sample = (*sample as f32 * gain)
                .round()
                .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }
}

/// Reinterprets little-endian bytes as samples. A trailing odd byte is ignored.
pub fn s16le_to_samples(bytes: &[u8], samples: &mut Vec<i16>) {
    samples.clear();
    samples.extend(
        bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    );
}

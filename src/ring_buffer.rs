/// Fixed-capacity circular store of the most recent audio samples.
///
/// Storage is allocated once in [`RingBuffer::new`]; `write`, `push` and
/// `read` only copy. Before the first full cycle the unwritten slots read
/// as zero.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f32>,
    /// Next slot to overwrite.
    write_index: usize,
}

impl RingBuffer {
    /// `capacity` of zero is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            write_index: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.data[self.write_index] = sample;
        self.write_index += 1;
        if self.write_index == self.data.len() {
            self.write_index = 0;
        }
    }

    /// Append a block, overwriting the oldest samples once full.
    pub fn write(&mut self, block: &[f32]) {
        let cap = self.data.len();
        // Only the newest `cap` samples of an oversized block can survive.
        let block = &block[block.len().saturating_sub(cap)..];

        let first = block.len().min(cap - self.write_index);
        self.data[self.write_index..self.write_index + first].copy_from_slice(&block[..first]);
        let rest = block.len() - first;
        self.data[..rest].copy_from_slice(&block[first..]);

        self.write_index = (self.write_index + block.len()) % cap;
    }

    /// Fill `out` with the most recent samples, oldest first.
    ///
    /// Callers should keep `out.len() <= capacity()`. A longer target gets
    /// the whole buffer in its tail and zeros in the leading excess.
    pub fn read(&self, out: &mut [f32]) {
        let cap = self.data.len();
        let n = out.len().min(cap);
        let (pad, out) = out.split_at_mut(out.len() - n);
        pad.fill(0.0);

        let start = (self.write_index + cap - n) % cap;
        let first = n.min(cap - start);
        out[..first].copy_from_slice(&self.data[start..start + first]);
        out[first..].copy_from_slice(&self.data[..n - first]);
    }
}

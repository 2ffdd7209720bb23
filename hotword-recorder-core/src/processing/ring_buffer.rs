/// Circular byte buffer for raw PCM audio.
///
/// Not synchronized by itself; the capture buffers in
/// [`capture_buffers`](super::capture_buffers) wrap it in a
/// `parking_lot::Mutex` for cross-thread access.
///
/// Overflow behavior: drops oldest bytes. `total_length` counts every byte
/// ever appended and is never reset.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<u8>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
    total_length: u64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
            total_length: 0,
        }
    }

    /// Append bytes at the tail.
    ///
    /// If the buffer overflows, the oldest bytes are dropped.
    /// If `data` is larger than capacity, only its last `capacity` bytes are kept.
    pub fn append(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.total_length += data.len() as u64;
        if self.capacity == 0 {
            return;
        }

        let data = if data.len() > self.capacity {
            &data[data.len() - self.capacity..]
        } else {
            data
        };

        let overflow = (self.available + data.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
        }

        // At most two contiguous copies: up to the end, then from the start.
        let first = data.len().min(self.capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&data[..first]);
        let rest = data.len() - first;
        if rest > 0 {
            self.buffer[..rest].copy_from_slice(&data[first..]);
        }
        self.write_index = (self.write_index + data.len()) % self.capacity;
        self.available += data.len();
    }

    /// Copy of the held bytes in FIFO order, leaving the buffer untouched.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.available);
        if self.available == 0 {
            return result;
        }
        let first = self.available.min(self.capacity - self.read_index);
        result.extend_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        result.extend_from_slice(&self.buffer[..self.available - first]);
        result
    }

    /// Copy of the newest `count` held bytes (fewer if fewer are held).
    pub fn tail(&self, count: usize) -> Vec<u8> {
        let to_copy = count.min(self.available);
        let mut result = Vec::with_capacity(to_copy);
        if to_copy == 0 {
            return result;
        }
        let start = (self.read_index + self.available - to_copy) % self.capacity;
        let first = to_copy.min(self.capacity - start);
        result.extend_from_slice(&self.buffer[start..start + first]);
        result.extend_from_slice(&self.buffer[..to_copy - first]);
        result
    }

    /// Remove and return every held byte in FIFO order.
    pub fn drain(&mut self) -> Vec<u8> {
        let result = self.snapshot();
        self.clear();
        result
    }

    /// Read and remove up to `count` bytes from the head.
    ///
    /// Returns fewer bytes if fewer are available.
    pub fn read(&mut self, count: usize) -> Vec<u8> {
        let to_read = count.min(self.available);
        if to_read == 0 {
            return Vec::new();
        }

        let mut result = Vec::with_capacity(to_read);
        let first = to_read.min(self.capacity - self.read_index);
        result.extend_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        result.extend_from_slice(&self.buffer[..to_read - first]);
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        result
    }

    /// Discard up to `count` of the newest bytes. `total_length` is kept.
    pub fn truncate_back(&mut self, count: usize) {
        let count = count.min(self.available);
        if count == 0 {
            return;
        }
        self.write_index = (self.write_index + self.capacity - count) % self.capacity;
        self.available -= count;
    }

    /// Empty the buffer. `total_length` is kept.
    pub fn clear(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    /// Bytes currently held.
    pub fn length(&self) -> usize {
        self.available
    }

    /// Bytes ever appended, including ones since overwritten or drained.
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

use std::io::{self, Read};

const LINE_FEED: u8 = b'\n';
const CARRIAGE_RETURN: u8 = b'\r';

/// Outcome of a single attempt to pull bytes from the upstream stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    /// This many bytes were appended to the buffer.
    Read(usize),
    /// The stream had nothing to offer before its own timeout expired.
    NoData,
    /// The stream reported end of file.
    EndOfStream,
}

/// A byte buffer that accumulates stream data and hands it out line by line.
///
/// Bytes are appended at the tail and consumed from the head. Consumed space is
/// reclaimed lazily, once the head has moved past half of the capacity.
///
/// # Example
///
/// ```rust
/// # use hokuyo::base::LineBuffer;
/// let mut buffer = LineBuffer::with_capacity(64);
/// buffer.read_from(&mut &b"RS\n00P\n"[..]).unwrap();
/// assert_eq!(buffer.take_line().unwrap(), Some(b"RS".to_vec()));
/// assert_eq!(buffer.take_line().unwrap(), Some(b"00P".to_vec()));
/// assert_eq!(buffer.take_line().unwrap(), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LineBuffer {
    buf: Vec<u8>,
    head: usize,
    capacity: usize,
}

impl LineBuffer {
    /// Creates a new `LineBuffer` that holds at most `capacity` unconsumed bytes.
    pub fn with_capacity(capacity: usize) -> LineBuffer {
        LineBuffer {
            buf: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    /// Returns the number of unconsumed bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Returns `true` if the buffer holds no unconsumed bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of unconsumed bytes the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the amount of free space available in the buffer in bytes.
    pub fn free_space(&self) -> usize {
        self.capacity - self.len()
    }

    /// Discards everything that has not been consumed yet.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }

    fn compact(&mut self) {
        if self.head > 0 && (self.head >= self.capacity / 2 || self.head == self.buf.len()) {
            self.buf.drain(..self.head);
            self.head = 0;
        }
    }

    /// Removes and returns the next complete line, without its terminator.
    ///
    /// A trailing carriage return is stripped as well. Returns `Ok(None)` when no
    /// line feed has arrived yet, and an error if a line has filled the whole
    /// buffer without being terminated.
    pub fn take_line(&mut self) -> Result<Option<Vec<u8>>, LineTooLong> {
        let pending = &self.buf[self.head..];
        match pending.iter().position(|&b| b == LINE_FEED) {
            Some(pos) => {
                let mut line = pending[..pos].to_vec();
                if line.last() == Some(&CARRIAGE_RETURN) {
                    line.pop();
                }
                self.head += pos + 1;
                self.compact();
                Ok(Some(line))
            }
            None if self.free_space() == 0 => Err(LineTooLong {
                capacity: self.capacity,
            }),
            None => Ok(None),
        }
    }

    /// Reads whatever the upstream source has available into the free space.
    ///
    /// Timeouts, `WouldBlock` and `Interrupted` are reported as [`Fill::NoData`]
    /// so that the caller can decide whether its own deadline has expired.
    pub fn read_from(&mut self, upstream: &mut (impl Read + ?Sized)) -> io::Result<Fill> {
        self.compact();
        let free = self.free_space();
        if free == 0 {
            return Ok(Fill::Read(0));
        }

        let start = self.buf.len();
        self.buf.resize(start + free, 0);
        let result = upstream.read(&mut self.buf[start..]);
        let read = *result.as_ref().unwrap_or(&0);
        self.buf.truncate(start + read);

        match result {
            Ok(0) => Ok(Fill::EndOfStream),
            Ok(read) => Ok(Fill::Read(read)),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(Fill::NoData)
            }
            Err(err) => Err(err),
        }
    }
}

/// A line grew past the buffer capacity without a line feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTooLong {
    pub capacity: usize,
}

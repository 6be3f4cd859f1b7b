use crate::base::error::{Error, Result};
use crate::base::line_buffer::{Fill, LineBuffer};
use crate::checksum;
use log::{error, trace, warn};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_CHANNEL_READ_BUFFER_SIZE: usize = 8192;
const DEFAULT_CHANNEL_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Line-oriented channel over a duplex byte stream.
///
/// Every SCIP 2.0 exchange is "write a command, read its echo, read status and
/// data lines, read an empty terminator", so the framing lives here once.
///
/// # Examples
/// ```ignore
/// let mut channel = LineChannel::new(serial_port);
///
/// channel.write_command("RS")?;
/// let status = channel.read_checksummed_line()?;
/// ```
#[derive(Debug)]
pub struct LineChannel<T: ?Sized> {
    stream: Option<Box<T>>,
    read_buffer: LineBuffer,
    read_timeout: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl<T: ?Sized> LineChannel<T>
where
    T: io::Read + io::Write,
{
    /// Create a new `LineChannel` with the default buffer size and read timeout.
    pub fn new(stream: Box<T>) -> LineChannel<T> {
        trace!(
            "Creating new LineChannel with default buffer size {}",
            DEFAULT_CHANNEL_READ_BUFFER_SIZE
        );
        LineChannel::with_options(
            stream,
            DEFAULT_CHANNEL_READ_BUFFER_SIZE,
            DEFAULT_CHANNEL_READ_TIMEOUT,
        )
    }

    /// Create a new `LineChannel` with a non-default buffer capacity and read timeout.
    ///
    /// # Example
    /// ```ignore
    /// let channel = LineChannel::with_options(serial_port, 8192, Duration::from_millis(500));
    /// ```
    pub fn with_options(
        stream: Box<T>,
        read_buffer_size: usize,
        read_timeout: Duration,
    ) -> LineChannel<T> {
        trace!(
            "Creating new LineChannel with buffer size {} and read timeout {:?}",
            read_buffer_size,
            read_timeout
        );
        LineChannel {
            stream: Some(stream),
            read_buffer: LineBuffer::with_capacity(read_buffer_size),
            read_timeout,
            cancel: None,
        }
    }

    /// Installs a flag that aborts blocking reads with [`Error::Cancelled`] once set.
    pub fn set_cancel_token(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = Some(cancel);
    }

    /// The maximum time [`read_line`](Self::read_line) waits for a complete line.
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream_mut(&mut self) -> Result<&mut Box<T>> {
        self.stream.as_mut().ok_or(Error::ChannelClosed)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Writes `command` followed by a line feed and flushes, without waiting for the echo.
    pub fn write_line(&mut self, command: &str) -> Result<()> {
        if command.contains('\n') {
            return Err(Error::protocol(format!(
                "command {:?} must not contain a line feed",
                command
            )));
        }
        trace!("Writing line: {:?}", command);
        let stream = self.stream_mut()?;
        let mut bytes = Vec::with_capacity(command.len() + 1);
        bytes.extend_from_slice(command.as_bytes());
        bytes.push(b'\n');
        if let Err(e) = stream.write_all(&bytes) {
            error!("IO error writing {:?}: {}", command, e);
            return Err(e.into());
        }
        trace!("Flushing stream...");
        stream.flush()?;
        Ok(())
    }

    /// Writes a command and verifies that the device echoes it back verbatim.
    ///
    /// A mismatching echo means the channel is out of step with the device.
    pub fn write_command(&mut self, command: &str) -> Result<()> {
        self.write_line(command)?;
        let echo = self.read_line()?;
        if echo != command {
            error!("Echo does not match command: {:?} != {:?}", echo, command);
            return Err(Error::EchoMismatch {
                expected: command.to_owned(),
                actual: echo,
            });
        }
        trace!("Echo OK for {:?}", command);
        Ok(())
    }

    /// Blocks until a complete line is available and returns it without its terminator.
    ///
    /// An empty string is the terminator line that ends every response.
    pub fn read_line(&mut self) -> Result<String> {
        let deadline = Instant::now() + self.read_timeout;
        loop {
            match self.read_buffer.take_line() {
                Ok(Some(line)) => {
                    // Noise bytes survive as U+FFFD and fail checksum verification.
                    let line = String::from_utf8_lossy(&line).into_owned();
                    trace!("Read line: {:?}", line);
                    return Ok(line);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("No line feed within {} bytes, dropping buffer", e.capacity);
                    self.read_buffer.clear();
                    return Err(Error::protocol(format!(
                        "line exceeds {} bytes",
                        e.capacity
                    )));
                }
            }

            if self.is_cancelled() {
                trace!("Read cancelled");
                return Err(Error::Cancelled);
            }
            if Instant::now() >= deadline {
                warn!(
                    "No complete line within {:?} ({} bytes pending)",
                    self.read_timeout,
                    self.read_buffer.len()
                );
                return Err(Error::DeviceTimeout);
            }

            let stream = self.stream.as_mut().ok_or(Error::ChannelClosed)?;
            match self.read_buffer.read_from(stream.as_mut()) {
                Ok(Fill::Read(bytes_read)) => {
                    trace!(
                        "Read {} bytes from stream (buffer len: {})",
                        bytes_read,
                        self.read_buffer.len()
                    )
                }
                Ok(Fill::NoData) => thread::yield_now(),
                Ok(Fill::EndOfStream) => {
                    warn!("Stream reached end of file");
                    return Err(Error::ChannelClosed);
                }
                Err(e) => {
                    error!("IO error reading from stream: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Reads a line and strips its verified checksum character.
    pub fn read_checksummed_line(&mut self) -> Result<String> {
        let line = self.read_line()?;
        Self::verify_checksum(&line).map(str::to_owned)
    }

    /// Verifies the trailing checksum character of `line` and returns the payload.
    pub fn verify_checksum(line: &str) -> Result<&str> {
        let payload = checksum::verify_checksum(line.as_bytes())?;
        Ok(&line[..payload.len()])
    }

    /// Flushes and releases the stream. Errors are logged and swallowed.
    ///
    /// Calling `close` more than once is harmless.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            trace!("Closing channel");
            if let Err(e) = stream.flush() {
                warn!("Ignoring error while closing channel: {}", e);
            }
            self.read_buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Echoes every written line back, then plays the scripted replies.
    struct Scripted {
        replies: VecDeque<u8>,
        written: Vec<u8>,
        echo: bool,
    }

    impl Scripted {
        fn new(replies: &str, echo: bool) -> Box<Scripted> {
            Box::new(Scripted {
                replies: replies.bytes().collect(),
                written: Vec::new(),
                echo,
            })
        }
    }

    impl io::Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.replies.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "idle"));
            }
            let n = buf.len().min(self.replies.len());
            for (slot, byte) in buf.iter_mut().zip(self.replies.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl io::Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            if self.echo {
                let mut echoed: VecDeque<u8> = buf.iter().copied().collect();
                echoed.extend(self.replies.drain(..));
                self.replies = echoed;
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn channel(replies: &str, echo: bool) -> LineChannel<Scripted> {
        LineChannel::with_options(
            Scripted::new(replies, echo),
            256,
            Duration::from_millis(20),
        )
    }

    #[test]
    fn command_with_echo_and_status() {
        let mut channel = channel("00P\n\n", true);
        channel.write_command("RS").unwrap();
        assert_eq!(channel.read_checksummed_line().unwrap(), "00");
        assert_eq!(channel.read_line().unwrap(), "");
        assert_eq!(channel.stream.as_ref().unwrap().written, b"RS\n".to_vec());
    }

    #[test]
    fn wrong_echo_is_fatal() {
        let mut channel = channel("QT\n00P\n\n", false);
        match channel.write_command("RS") {
            Err(Error::EchoMismatch { expected, actual }) => {
                assert_eq!(expected, "RS");
                assert_eq!(actual, "QT");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn silent_device_times_out() {
        let mut channel = channel("", false);
        assert!(matches!(channel.read_line(), Err(Error::DeviceTimeout)));
    }

    #[test]
    fn cancelled_read_returns_promptly() {
        let mut channel = channel("", false);
        let cancel = Arc::new(AtomicBool::new(true));
        channel.set_cancel_token(cancel);
        assert!(matches!(channel.read_line(), Err(Error::Cancelled)));
    }

    #[test]
    fn noise_bytes_fail_the_checksum() {
        let mut channel = channel("", false);
        channel
            .stream
            .as_mut()
            .unwrap()
            .replies
            .extend(b"00\xb0P\n00P\n".iter().copied());
        assert!(matches!(
            channel.read_checksummed_line(),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert_eq!(channel.read_checksummed_line().unwrap(), "00");
    }

    #[test]
    fn checksum_failure_is_reported() {
        let mut channel = channel("00Q\n", false);
        assert!(matches!(
            channel.read_checksummed_line(),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn line_feed_in_command_is_rejected() {
        let mut channel = channel("", true);
        assert!(channel.write_command("RS\n").is_err());
    }

    #[test]
    fn closed_channel_refuses_io() {
        let mut channel = channel("00P\n", true);
        channel.close();
        channel.close();
        assert!(channel.is_closed());
        assert!(matches!(channel.write_line("RS"), Err(Error::ChannelClosed)));
        assert!(matches!(channel.read_line(), Err(Error::ChannelClosed)));
    }
}

use anyhow::Context;
use log::{info, warn};
use serde_derive::Deserialize;
use serialport::SerialPort;
use std::io::{self, BufRead, BufReader};
use std::time::Duration;

static READ_TIMEOUT: Duration = Duration::from_secs(1);

/// VE.Direct text lines are short; anything longer is line noise.
const MAX_LINE_LEN: usize = 512;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyHS2".to_string(),
            baud_rate: 19200,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PortState {
    Unknown,
    Open,
    Closed,
}

/// Bytes of the line currently being read. `discarding` is set while the
/// remainder of an overlong line is skipped up to its newline.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    discarding: bool,
}

impl LineBuffer {
    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && !self.discarding
    }
}

pub struct VeDirect {
    config: SerialConfig,
    reader: Option<BufReader<Box<dyn SerialPort>>>,
    buffer: LineBuffer,
    state: PortState,
}

impl VeDirect {
    pub fn new(config: &SerialConfig) -> Self {
        Self {
            config: config.clone(),
            reader: None,
            buffer: LineBuffer::default(),
            state: PortState::Unknown,
        }
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    fn set_state(&mut self, new_state: PortState) {
        if self.state != new_state {
            self.state = new_state;
            info!("serial port {} is {new_state:?}", self.config.port);
        }
    }

    pub fn open(&mut self) -> anyhow::Result<()> {
        self.close();
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()
            .with_context(|| format!("cannot open {}", self.config.port))?;

        info!(
            "Serial opened on {} @ {}",
            self.config.port, self.config.baud_rate
        );
        self.reader = Some(BufReader::new(port));
        self.set_state(PortState::Open);
        Ok(())
    }

    pub fn close(&mut self) {
        self.reader = None;
        self.buffer.clear();
        if self.state == PortState::Open {
            self.set_state(PortState::Closed);
        }
    }

    /// Read one complete line. `Ok(None)` means the read timed out first.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("{} is not open", self.config.port),
            ));
        };
        read_line_from(reader, &mut self.buffer)
    }
}

/// Pull the next `\n`-terminated line out of `reader`.
///
/// Bytes read before a timeout stay in `buffer` so that a line split across
/// two reads is handed out whole. At end of input a trailing partial line is
/// returned as is. A line longer than `MAX_LINE_LEN` is dropped up to and
/// including its newline, however many reads that takes.
pub fn read_line_from<R: BufRead>(
    reader: &mut R,
    buffer: &mut LineBuffer,
) -> io::Result<Option<Vec<u8>>> {
    let result = reader.read_until(b'\n', &mut buffer.pending);
    let complete = buffer.pending.ends_with(b"\n");

    if buffer.discarding {
        buffer.pending.clear();
        buffer.discarding = !complete;
        return result.map(|_| None).or_else(ignore_timeout);
    }

    if buffer.pending.len() > MAX_LINE_LEN {
        warn!(
            "discarding line of more than {MAX_LINE_LEN} bytes without line break"
        );
        buffer.pending.clear();
        buffer.discarding = !complete;
        return result.map(|_| None).or_else(ignore_timeout);
    }

    // without a trailing newline read_until only returns Ok at end of input
    match result {
        Ok(0) if buffer.pending.is_empty() => Ok(None),
        Ok(_) => Ok(Some(std::mem::take(&mut buffer.pending))),
        Err(e) => ignore_timeout(e),
    }
}

fn ignore_timeout(e: io::Error) -> io::Result<Option<Vec<u8>>> {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Ok(None),
        _ => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    /// Yields its chunks one by one, with a timeout between each.
    struct Chunked {
        chunks: Vec<Vec<u8>>,
        timeout_next: bool,
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.timeout_next {
                self.timeout_next = false;
                return Err(io::Error::new(io::ErrorKind::TimedOut, "timed out"));
            }
            if self.chunks.is_empty() {
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            self.timeout_next = true;
            Ok(chunk.len())
        }
    }

    #[test]
    fn reads_lines_in_order() {
        let mut reader = Cursor::new(b"\r\nPID\t0xA053\r\nV\t12800\r\n".to_vec());
        let mut buffer = LineBuffer::default();

        let lines: Vec<_> =
            std::iter::from_fn(|| read_line_from(&mut reader, &mut buffer).unwrap()).collect();
        assert_eq!(
            lines,
            [
                b"\r\n".to_vec(),
                b"PID\t0xA053\r\n".to_vec(),
                b"V\t12800\r\n".to_vec()
            ]
        );
    }

    #[test]
    fn line_split_by_timeout_is_reassembled() {
        let mut reader = BufReader::new(Chunked {
            chunks: vec![b"VP".to_vec(), b"V\t176".to_vec(), b"50\r\n".to_vec()],
            timeout_next: false,
        });
        let mut buffer = LineBuffer::default();

        assert_eq!(read_line_from(&mut reader, &mut buffer).unwrap(), None);
        assert_eq!(read_line_from(&mut reader, &mut buffer).unwrap(), None);
        assert_eq!(
            read_line_from(&mut reader, &mut buffer).unwrap(),
            Some(b"VPV\t17650\r\n".to_vec())
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn trailing_partial_line_is_returned_at_eof() {
        let mut reader = Cursor::new(b"Checksum\t\x42".to_vec());
        let mut buffer = LineBuffer::default();
        assert_eq!(
            read_line_from(&mut reader, &mut buffer).unwrap(),
            Some(b"Checksum\t\x42".to_vec())
        );
        assert_eq!(read_line_from(&mut reader, &mut buffer).unwrap(), None);
    }

    #[test]
    fn overlong_line_is_discarded() {
        let mut data = vec![b'x'; MAX_LINE_LEN + 10];
        data.extend_from_slice(b"\nV\t1\n");
        let mut reader = Cursor::new(data);
        let mut buffer = LineBuffer::default();

        assert_eq!(read_line_from(&mut reader, &mut buffer).unwrap(), None);
        assert_eq!(
            read_line_from(&mut reader, &mut buffer).unwrap(),
            Some(b"V\t1\n".to_vec())
        );
    }

    #[test]
    fn overlong_line_split_by_timeouts_is_dropped_whole() {
        let mut data = vec![b'x'; 700];
        data.extend_from_slice(b"junk\tGARBAGE\r\nV\t1\r\n");
        let mut reader = BufReader::new(Chunked {
            chunks: data.chunks(100).map(<[u8]>::to_vec).collect(),
            timeout_next: false,
        });
        let mut buffer = LineBuffer::default();

        let lines: Vec<_> = (0..40)
            .filter_map(|_| read_line_from(&mut reader, &mut buffer).unwrap())
            .collect();
        assert_eq!(lines, [b"V\t1\r\n".to_vec()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn reading_unopened_port_fails() {
        let mut device = VeDirect::new(&SerialConfig::default());
        let err = device.read_line().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(device.state(), PortState::Unknown);
    }

    #[test]
    fn opening_missing_port_fails() {
        let mut device = VeDirect::new(&SerialConfig {
            port: "/dev/does-not-exist-vedirect".to_string(),
            baud_rate: 19200,
        });
        assert!(device.open().is_err());
        assert_eq!(device.state(), PortState::Unknown);
    }
}

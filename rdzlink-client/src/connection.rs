use std::time::Duration;

use rdzlink_rs_protocol::ServiceAddress;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, trace, warn};

use crate::error::{ClientError, Result};
use crate::state::StationConfig;

pub struct Connection {
    reader: LineReader,
    writer: LineWriter,
}

impl Connection {
    pub async fn connect(address: &ServiceAddress, config: &StationConfig) -> Result<Self> {
        debug!(%address, "TCP connecting");
        let limit = config.connect_timeout;
        let stream = tokio::time::timeout(limit, TcpStream::connect(address.as_pair()))
            .await
            .map_err(|_| ClientError::Timeout(limit))?
            .map_err(ClientError::Io)?;

        stream.set_nodelay(true).ok();

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: LineReader {
                inner: BufReader::new(read_half),
                read_timeout: config.read_timeout,
                max_line_length: config.max_line_length,
            },
            writer: LineWriter {
                inner: BufWriter::new(write_half),
                write_timeout: config.write_timeout,
            },
        })
    }

    pub fn into_split(self) -> (LineReader, LineWriter) {
        (self.reader, self.writer)
    }
}

/// Receiving half: yields raw newline-terminated frames.
pub struct LineReader {
    inner: BufReader<OwnedReadHalf>,
    read_timeout: Option<Duration>,
    max_line_length: usize,
}

impl LineReader {
    /// Read up to and including the next `\n`.
    ///
    /// Returns [`ClientError::Disconnected`] on EOF. A final unterminated
    /// line before EOF is still returned. A line longer than the configured
    /// maximum is skipped up to its terminator and reported as
    /// [`ClientError::LineTooLong`]; the reader stays usable.
    pub async fn read_line(&mut self) -> Result<Vec<u8>> {
        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.read_frame())
                .await
                .map_err(|_| {
                    warn!(timeout = ?limit, "read timeout");
                    ClientError::Timeout(limit)
                })?,
            None => self.read_frame().await,
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let limit = self.max_line_length;
        let mut line = Vec::new();
        let n = (&mut self.inner)
            .take(limit as u64 + 1)
            .read_until(b'\n', &mut line)
            .await
            .map_err(ClientError::Io)?;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }
        if line.len() > limit && !line.ends_with(b"\n") {
            self.skip_line().await?;
            return Err(ClientError::LineTooLong(limit));
        }
        Ok(line)
    }

    /// Discard input through the next `\n` (or EOF).
    async fn skip_line(&mut self) -> Result<()> {
        loop {
            let buf = self.inner.fill_buf().await.map_err(ClientError::Io)?;
            if buf.is_empty() {
                return Ok(());
            }
            let (used, done) = match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            };
            self.inner.consume(used);
            if done {
                return Ok(());
            }
        }
    }
}

/// Sending half: writes whole lines and flushes each one.
pub struct LineWriter {
    inner: BufWriter<OwnedWriteHalf>,
    write_timeout: Duration,
}

impl LineWriter {
    pub async fn send_line(&mut self, line: &str) -> Result<()> {
        trace!(len = line.len(), "sending");
        let limit = self.write_timeout;
        tokio::time::timeout(limit, async {
            self.inner.write_all(line.as_bytes()).await?;
            self.inner.flush().await
        })
        .await
        .map_err(|_| ClientError::Timeout(limit))?
        .map_err(ClientError::Io)
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await.map_err(ClientError::Io)?;
        Ok(())
    }
}

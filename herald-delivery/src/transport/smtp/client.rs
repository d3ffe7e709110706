//! One session with the relay over plain TCP

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use super::{
    error::{RelayError, Result},
    reply::{Reply, ReplyBuilder},
};

#[derive(Debug)]
pub struct RelaySession {
    stream: BufReader<TcpStream>,
    line: String,
}

impl RelaySession {
    /// Connect to `addr` (`host:port`).
    ///
    /// # Errors
    /// Returns an error if the connection cannot be made.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            stream: BufReader::new(stream),
            line: String::new(),
        })
    }

    /// Read the banner the relay sends on connect.
    ///
    /// # Errors
    /// Returns an error if the banner cannot be read or parsed.
    pub async fn greeting(&mut self) -> Result<Reply> {
        self.read_reply().await
    }

    /// Send one command line and read its reply.
    ///
    /// # Errors
    /// Returns an error if writing or reading fails.
    pub async fn command(&mut self, line: &str) -> Result<Reply> {
        let stream = self.stream.get_mut();
        stream.write_all(line.as_bytes()).await?;
        stream.write_all(b"\r\n").await?;
        self.read_reply().await
    }

    /// Send an already dot-stuffed message followed by the end-of-data
    /// marker, and read the relay's verdict.
    ///
    /// # Errors
    /// Returns an error if writing or reading fails.
    pub async fn message(&mut self, payload: &str) -> Result<Reply> {
        let stream = self.stream.get_mut();
        stream.write_all(payload.as_bytes()).await?;
        if !payload.ends_with("\r\n") {
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b".\r\n").await?;
        stream.flush().await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut builder = ReplyBuilder::default();

        loop {
            self.line.clear();
            if self.stream.read_line(&mut self.line).await? == 0 {
                return Err(RelayError::Closed);
            }
            if self.line.trim_end().is_empty() {
                continue;
            }
            if let Some(reply) = builder.push(&self.line)? {
                return Ok(reply);
            }
        }
    }
}

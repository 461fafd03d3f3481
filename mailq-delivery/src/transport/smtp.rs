//! Plain SMTP over TCP.
//!
//! Speaks just enough RFC 5321 to hand a message to a relay: greeting,
//! EHLO (falling back to HELO), MAIL FROM, RCPT TO, DATA, RSET and QUIT.
//! Every exchange is bounded by the configured timeout.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use mailq_common::{Message, outgoing};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
};

use super::Transport;
use crate::error::TransportError;

/// Longest multi-line reply we are willing to buffer.
const MAX_RESPONSE_LINES: usize = 128;

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Response {
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }

    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    /// Parse one reply line into `(code, is_last, text)`.
    ///
    /// # Errors
    /// If the line is too short, the code is not numeric, or the separator
    /// is neither a space nor a dash
    pub fn parse_line(line: &str) -> Result<(u16, bool, String), TransportError> {
        let code = line
            .get(..3)
            .ok_or_else(|| TransportError::Protocol(format!("Response line too short: '{line}'")))?;
        let code = code
            .parse::<u16>()
            .map_err(|_| TransportError::Protocol(format!("Invalid status code: '{code}'")))?;

        let is_last = match line.chars().nth(3) {
            None | Some(' ') => true,
            Some('-') => false,
            Some(c) => {
                return Err(TransportError::Protocol(format!(
                    "Invalid separator character: '{c}'"
                )));
            }
        };

        Ok((code, is_last, line.get(4..).unwrap_or_default().to_string()))
    }

    /// Require a reply in the given class (2 for 2xx, 3 for 3xx).
    fn expect_class(self, class: u16) -> Result<Self, TransportError> {
        if self.code / 100 == class {
            Ok(self)
        } else {
            Err(TransportError::Smtp {
                code: self.code,
                message: self.message(),
            })
        }
    }
}

/// Normalise line endings to CRLF, dot-stuff, and append the terminator.
fn encode_body(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    let mut at_line_start = true;
    let mut previous = 0u8;

    for &byte in body {
        if byte == b'\n' && previous != b'\r' {
            out.push(b'\r');
        }
        if at_line_start && byte == b'.' {
            out.push(b'.');
        }
        out.push(byte);
        at_line_start = byte == b'\n';
        previous = byte;
    }

    if !out.is_empty() && !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

/// Read one complete reply, following continuation lines.
async fn read_reply(stream: &mut BufReader<TcpStream>) -> Result<Response, TransportError> {
    let mut lines = Vec::new();
    let mut first_code = None;
    let mut buffer = String::new();

    loop {
        buffer.clear();
        if stream.read_line(&mut buffer).await? == 0 {
            return Err(TransportError::ConnectionClosed);
        }

        let (code, is_last, text) = Response::parse_line(buffer.trim_end_matches(['\r', '\n']))?;

        match first_code {
            Some(first) if first != code => {
                return Err(TransportError::Protocol(format!(
                    "Status code mismatch in multi-line response: expected {first}, got {code}"
                )));
            }
            Some(_) => {}
            None => first_code = Some(code),
        }

        lines.push(text);

        if is_last {
            return Ok(Response { code, lines });
        }

        if lines.len() >= MAX_RESPONSE_LINES {
            return Err(TransportError::Protocol(format!(
                "Response longer than {MAX_RESPONSE_LINES} lines"
            )));
        }
    }
}

async fn write_all(stream: &mut BufReader<TcpStream>, data: &[u8]) -> Result<(), TransportError> {
    stream.get_mut().write_all(data).await?;
    stream.get_mut().flush().await?;
    Ok(())
}

/// Outbound SMTP connection to a single relay
#[derive(Debug)]
pub struct SmtpTransport {
    host: String,
    port: u16,
    helo: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl SmtpTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            helo: String::from("localhost"),
            timeout: Duration::from_secs(30),
            stream: None,
        }
    }

    /// Name announced in EHLO/HELO
    #[must_use]
    pub fn with_helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = helo.into();
        self
    }

    /// Bound on the connect and on every command/reply exchange
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn timed<T>(
        &self,
        stage: &str,
        future: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        tokio::time::timeout(self.timeout, future)
            .await
            .map_err(|_| TransportError::Timeout(stage.to_string()))?
    }

    async fn read_response(&mut self, stage: &str) -> Result<Response, TransportError> {
        let timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        tokio::time::timeout(timeout, read_reply(stream))
            .await
            .map_err(|_| TransportError::Timeout(stage.to_string()))?
    }

    async fn write(&mut self, stage: &str, data: &[u8]) -> Result<(), TransportError> {
        let timeout = self.timeout;
        let stream = self
            .stream
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        tokio::time::timeout(timeout, write_all(stream, data))
            .await
            .map_err(|_| TransportError::Timeout(stage.to_string()))?
    }

    async fn command(&mut self, command: &str) -> Result<Response, TransportError> {
        let stage = command.split(':').next().unwrap_or(command).to_string();
        self.write(&stage, format!("{command}\r\n").as_bytes())
            .await?;
        self.read_response(&stage).await
    }

    async fn handshake(&mut self) -> Result<(), TransportError> {
        self.read_response("greeting").await?.expect_class(2)?;

        let ehlo = self.command(&format!("EHLO {}", self.helo)).await?;
        if !ehlo.is_success() {
            self.command(&format!("HELO {}", self.helo))
                .await?
                .expect_class(2)?;
        }

        Ok(())
    }

    async fn transaction(&mut self, message: &Message) -> Result<(), TransportError> {
        self.command(&format!("MAIL FROM:<{}>", message.from))
            .await?
            .expect_class(2)?;

        for recipient in &message.to {
            self.command(&format!("RCPT TO:<{recipient}>"))
                .await?
                .expect_class(2)?;
        }

        self.command("DATA").await?.expect_class(3)?;
        self.write("DATA", &encode_body(&message.body)).await?;
        self.read_response("end of DATA").await?.expect_class(2)?;

        Ok(())
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    async fn open(&mut self) -> Result<(), TransportError> {
        self.stream = None;

        let address = format!("{}:{}", self.host, self.port);
        let stream = self
            .timed("connect", async {
                TcpStream::connect(&address)
                    .await
                    .map_err(TransportError::from)
            })
            .await?;
        self.stream = Some(BufReader::new(stream));

        if let Err(err) = self.handshake().await {
            self.stream = None;
            return Err(err);
        }

        outgoing!(level = DEBUG, "Connected to {address}");
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Err(TransportError::ConnectionClosed);
        }

        match self.transaction(message).await {
            Ok(()) => Ok(()),
            Err(err @ TransportError::Smtp { .. }) => {
                // The connection is still usable; reset the transaction.
                if self.command("RSET").await.is_err() {
                    self.stream = None;
                }
                Err(err)
            }
            Err(err) => {
                self.stream = None;
                Err(err)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            let _ = self.command("QUIT").await;
        }
        self.stream = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

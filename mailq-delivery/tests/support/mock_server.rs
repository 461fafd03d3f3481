//! A scripted SMTP relay listening on localhost

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
    task::JoinHandle,
};

#[derive(Debug, Clone)]
pub struct Replies {
    pub greeting: Option<&'static str>,
    pub ehlo: &'static str,
    pub rcpt: &'static str,
    pub end_of_data: &'static str,
}

impl Default for Replies {
    fn default() -> Self {
        Self {
            greeting: Some("220 mock.test ESMTP\r\n"),
            ehlo: "250-mock.test\r\n250 SIZE 1000000\r\n",
            rcpt: "250 OK\r\n",
            end_of_data: "250 Queued\r\n",
        }
    }
}

pub struct MockSmtpServer {
    pub addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl MockSmtpServer {
    pub async fn start(replies: Replies) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let commands = Arc::new(Mutex::new(Vec::new()));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let commands = commands.clone();
            let bodies = bodies.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let replies = replies.clone();
                    let commands = commands.clone();
                    let bodies = bodies.clone();
                    tokio::spawn(async move {
                        let _ = session(stream, &replies, &commands, &bodies).await;
                    });
                }
            })
        };

        Self {
            addr,
            commands,
            bodies,
            handle,
        }
    }

    /// Every command line received, without the trailing CRLF
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Message bodies exactly as they arrived, terminator excluded
    pub fn bodies(&self) -> Vec<String> {
        self.bodies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for MockSmtpServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn session(
    stream: tokio::net::TcpStream,
    replies: &Replies,
    commands: &Mutex<Vec<String>>,
    bodies: &Mutex<Vec<String>>,
) -> std::io::Result<()> {
    let mut stream = BufReader::new(stream);

    let Some(greeting) = replies.greeting else {
        // Accept and then say nothing at all
        std::future::pending::<()>().await;
        return Ok(());
    };
    stream.get_mut().write_all(greeting.as_bytes()).await?;

    let mut line = String::new();
    loop {
        line.clear();
        if stream.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let command = line.trim_end().to_string();
        commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command.clone());

        let verb = command
            .split([' ', ':'])
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();

        let reply = match verb.as_str() {
            "EHLO" => replies.ehlo,
            "HELO" | "MAIL" | "RSET" | "NOOP" => "250 OK\r\n",
            "RCPT" => replies.rcpt,
            "DATA" => {
                stream
                    .get_mut()
                    .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                    .await?;

                let mut body = String::new();
                loop {
                    let mut data = String::new();
                    if stream.read_line(&mut data).await? == 0 {
                        return Ok(());
                    }
                    if data == ".\r\n" {
                        break;
                    }
                    body.push_str(&data);
                }
                bodies
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(body);

                replies.end_of_data
            }
            "QUIT" => {
                stream.get_mut().write_all(b"221 Bye\r\n").await?;
                return Ok(());
            }
            _ => "500 Unrecognised command\r\n",
        };

        stream.get_mut().write_all(reply.as_bytes()).await?;
    }
}

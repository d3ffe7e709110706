//! A scripted SMTP relay on a random local port
//!
//! Replies come from a per-verb script, every command is recorded, and the
//! relay can be told to stop reading before the Nth command so per-phase
//! timeouts fire.
#![allow(dead_code)]

use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};

/// What the relay saw, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Seen {
    Ehlo(String),
    Helo(String),
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Everything between DATA and the terminating dot, still dot-stuffed
    Content(String),
    Quit,
    Unknown(String),
}

/// Points in a session whose reply can be scripted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Greeting,
    Ehlo,
    Helo,
    Mail,
    Rcpt,
    Data,
    EndOfData,
    Quit,
}

#[derive(Debug, Clone)]
struct Script {
    replies: HashMap<Verb, (u16, String)>,
    hang_before: Option<usize>,
}

impl Script {
    fn reply(&self, verb: Verb) -> String {
        let (code, text) = self
            .replies
            .get(&verb)
            .cloned()
            .unwrap_or_else(|| default_reply(verb));

        if verb == Verb::Ehlo && code == 250 {
            format!("250-mock.relay\r\n250-SIZE 10000\r\n250 {text}\r\n")
        } else {
            format!("{code} {text}\r\n")
        }
    }
}

fn default_reply(verb: Verb) -> (u16, String) {
    let (code, text) = match verb {
        Verb::Greeting => (220, "mock.relay ESMTP"),
        Verb::Ehlo => (250, "HELP"),
        Verb::Helo => (250, "mock.relay"),
        Verb::Mail | Verb::Rcpt => (250, "OK"),
        Verb::Data => (354, "End data with <CR><LF>.<CR><LF>"),
        Verb::EndOfData => (250, "OK: queued"),
        Verb::Quit => (221, "Bye"),
    };
    (code, text.to_string())
}

pub struct MockRelayBuilder {
    script: Script,
}

impl MockRelayBuilder {
    #[must_use]
    pub fn reply(mut self, verb: Verb, code: u16, text: impl Into<String>) -> Self {
        self.script.replies.insert(verb, (code, text.into()));
        self
    }

    /// Stop reading before the Nth command (0-indexed) and hold the
    /// connection open
    #[must_use]
    pub const fn hang_before(mut self, command: usize) -> Self {
        self.script.hang_before = Some(command);
        self
    }

    pub async fn start(self) -> std::io::Result<MockRelay> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let script = Arc::new(self.script);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let task = tokio::spawn({
            let seen = Arc::clone(&seen);
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let script = Arc::clone(&script);
                    let seen = Arc::clone(&seen);
                    tokio::spawn(async move {
                        if let Err(e) = serve(stream, &script, &seen).await {
                            tracing::debug!("Mock relay session ended: {e}");
                        }
                    });
                }
            }
        });

        Ok(MockRelay { addr, seen, task })
    }
}

pub struct MockRelay {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<Seen>>>,
    task: JoinHandle<()>,
}

impl MockRelay {
    #[must_use]
    pub fn builder() -> MockRelayBuilder {
        MockRelayBuilder {
            script: Script {
                replies: HashMap::new(),
                hang_before: None,
            },
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    script: &Script,
    seen: &Mutex<Vec<Seen>>,
) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    writer.write_all(script.reply(Verb::Greeting).as_bytes()).await?;

    for index in 0.. {
        if script.hang_before == Some(index) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            return Ok(());
        }

        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let command = line.trim_end().to_string();
        let (verb, argument) = command.split_once(' ').unwrap_or((command.as_str(), ""));
        let argument = argument.to_string();

        let (entry, verb) = match verb.to_ascii_uppercase().as_str() {
            "EHLO" => (Seen::Ehlo(argument), Some(Verb::Ehlo)),
            "HELO" => (Seen::Helo(argument), Some(Verb::Helo)),
            "MAIL" => (Seen::MailFrom(argument), Some(Verb::Mail)),
            "RCPT" => (Seen::RcptTo(argument), Some(Verb::Rcpt)),
            "DATA" => (Seen::Data, Some(Verb::Data)),
            "QUIT" => (Seen::Quit, Some(Verb::Quit)),
            _ => (Seen::Unknown(command.clone()), None),
        };
        seen.lock().push(entry);

        let Some(verb) = verb else {
            writer.write_all(b"500 Unrecognised command\r\n").await?;
            continue;
        };
        let reply = script.reply(verb);
        writer.write_all(reply.as_bytes()).await?;

        match verb {
            Verb::Quit => return Ok(()),
            Verb::Data if reply.starts_with("354") => {
                let mut content = String::new();
                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line == ".\r\n" {
                        break;
                    }
                    content.push_str(&line);
                }
                seen.lock().push(Seen::Content(content));
                writer
                    .write_all(script.reply(Verb::EndOfData).as_bytes())
                    .await?;
            }
            _ => {}
        }
    }

    Ok(())
}

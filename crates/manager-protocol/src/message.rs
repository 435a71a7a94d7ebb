//! Wire format
//!
//! Every message is a block of CRLF-terminated `Key: Value` lines closed
//! by an empty line. Responses carry `Response:`, events carry `Event:`;
//! the two interleave freely on one socket and are told apart only by
//! these fields.
//!
//! Legacy `Response: Follows` replies to `Command` put free-text output
//! after the headers, ending with `--END COMMAND--`. That text is kept in
//! [`Message::body`].

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::constants::wire::{CRLF, END_COMMAND};
use crate::error::{ManagerError, Result};

/// An outgoing action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    name: String,
    headers: Vec<(String, String)>,
    action_id: Option<String>,
}

impl Action {
    /// Start an action of the given name (`Login`, `Command`, ...)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            headers: Vec::new(),
            action_id: None,
        }
    }

    /// `Action: Command` running a console command
    pub fn command(command: impl Into<String>) -> Self {
        Self::new("Command").header("Command", command)
    }

    /// Append a header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Set the correlation ID
    pub fn with_action_id(mut self, id: impl Into<String>) -> Self {
        self.action_id = Some(id.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action_id(&self) -> Option<&str> {
        self.action_id.as_deref()
    }

    /// Serialise to the exact wire framing
    ///
    /// CR and LF inside values are replaced with spaces so a value can never
    /// terminate the message early.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        push_line(&mut out, "Action", &self.name);
        if let Some(id) = &self.action_id {
            push_line(&mut out, "ActionID", id);
        }
        for (key, value) in &self.headers {
            push_line(&mut out, key, value);
        }
        out.push_str(CRLF);
        out
    }
}

fn push_line(out: &mut String, key: &str, value: &str) {
    out.push_str(&scrub(key));
    out.push_str(": ");
    out.push_str(&scrub(value));
    out.push_str(CRLF);
}

fn scrub(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// What an incoming message is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Response,
    Event,
    Unknown,
}

/// An incoming message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Headers in wire order
    pub headers: Vec<(String, String)>,
    /// Free-text lines (command output)
    pub body: Vec<String>,
}

impl Message {
    /// First value of a header, matched case-insensitively
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn kind(&self) -> MessageKind {
        if self.get("Event").is_some() {
            MessageKind::Event
        } else if self.get("Response").is_some() {
            MessageKind::Response
        } else {
            MessageKind::Unknown
        }
    }

    pub fn response(&self) -> Option<&str> {
        self.get("Response")
    }

    pub fn event(&self) -> Option<&str> {
        self.get("Event")
    }

    pub fn action_id(&self) -> Option<&str> {
        self.get("ActionID")
    }

    /// `Message:` header, used by the switch for human-readable status
    pub fn text(&self) -> Option<&str> {
        self.get("Message")
    }

    /// Response is `Error`
    pub fn is_error(&self) -> bool {
        self.response()
            .is_some_and(|r| r.eq_ignore_ascii_case("Error"))
    }

    /// Command output, from `Output:` headers or a `Follows` body
    pub fn output(&self) -> Vec<&str> {
        let headers = self
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("Output"))
            .map(|(_, v)| v.as_str());
        headers.chain(self.body.iter().map(String::as_str)).collect()
    }

    fn is_follows(&self) -> bool {
        self.response()
            .is_some_and(|r| r.eq_ignore_ascii_case("Follows"))
    }
}

/// Split a line into a header if its key is a protocol token
fn parse_header(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let token = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    token.then(|| (key.to_string(), value.trim_start().to_string()))
}

/// Read one line without its terminator. `None` at end of stream.
async fn read_line<R>(reader: &mut R) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Some(line))
}

/// Read the one-line greeting the switch sends on connect
pub async fn read_banner<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    match read_line(reader).await? {
        Some(line) if !line.trim().is_empty() => Ok(line),
        Some(_) => Err(ManagerError::Protocol("empty banner line".to_string())),
        None => Err(ManagerError::ConnectionClosed),
    }
}

/// Read the next message.
///
/// Returns `None` on a clean end of stream between messages.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>>
where
    R: AsyncBufRead + Unpin,
{
    let mut message = Message::default();
    let mut in_body = false;
    loop {
        let Some(line) = read_line(reader).await? else {
            if message.headers.is_empty() && message.body.is_empty() {
                return Ok(None);
            }
            return Err(ManagerError::Protocol(
                "stream ended in the middle of a message".to_string(),
            ));
        };

        if line.is_empty() {
            if message.headers.is_empty() && message.body.is_empty() {
                // Stray separator between messages.
                continue;
            }
            return Ok(Some(message));
        }

        if in_body {
            if line.trim_end() != END_COMMAND {
                message.body.push(line);
            }
            continue;
        }

        match parse_header(&line) {
            Some(header) => message.headers.push(header),
            None if message.is_follows() => {
                in_body = true;
                if line.trim_end() != END_COMMAND {
                    message.body.push(line);
                }
            }
            None => {
                log::debug!("Ignoring malformed manager line: {:?}", line);
            }
        }
    }
}

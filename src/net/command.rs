//! Implementations for a small set of commands as supported by Redis
//!
//! Every command is served by a [`Handler`] registered under its name in a [`Dispatcher`].
//! Handlers always answer with a single line of text, which the connection sends back as a
//! simple string frame. Invalid arguments are reported the same way, so a handler never tears
//! down the connection.

mod constant;
mod del;
mod exists;
mod get;
mod incr;
mod push;
mod save;
mod set;

use std::{collections::HashMap, convert::TryFrom, sync::Arc};

use bytes::Bytes;
use thiserror::Error;

pub use self::{
    constant::Constant, del::Del, exists::Exists, get::Get, incr::Step, push::Push, save::Save,
    set::Set,
};
use super::frame::Frame;
use crate::storage::{KeyValueStorage, SnapshotStore};

const OK: &str = "OK";
const UNKNOWN_COMMAND: &str = "Unknown command";
const ECHO_GREETING: &str = "Hello World!";

/// Reply for a key that has no value.
pub const NIL: &str = "null";

const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";
const SYNTAX_ERROR: &str = "ERR syntax error";
const LINE_BREAK_IN_VALUE: &str = "ERR value must not contain CR or LF";

fn wrong_arity(name: &str) -> String {
    format!("ERR wrong number of arguments for '{}' command", name)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Error from parsing command from frame
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Encountered an unexpected frame
    #[error("Invalid frame (got {0:?})")]
    BadFrame(Frame),

    /// Could not parse utf8 string
    #[error("Could not parse bytes as an UTF-8 string - {0}")]
    NotUtf8(#[from] std::string::FromUtf8Error),
}

/// A command sent by a client, the first argument names the operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    args: Vec<String>,
}

impl Command {
    /// Creates a command out of its arguments
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Get the name of the command. Returns `None` for an empty command.
    pub fn name(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Get all arguments, including the name.
    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl TryFrom<Frame> for Command {
    type Error = Error;

    fn try_from(frame: Frame) -> Result<Self, Self::Error> {
        let frames = match frame {
            Frame::Array(frames) => frames,
            frame => return Err(Error::BadFrame(frame)),
        };
        let args = frames
            .into_iter()
            .map(|frame| match frame {
                Frame::BulkString(b) => Ok(String::from_utf8(b.to_vec())?),
                Frame::SimpleString(s) => Ok(s),
                frame => Err(Error::BadFrame(frame)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { args })
    }
}

impl From<Command> for Frame {
    fn from(cmd: Command) -> Self {
        Self::Array(
            cmd.args
                .into_iter()
                .map(|arg| Self::BulkString(Bytes::from(arg)))
                .collect(),
        )
    }
}

/// Executes one kind of command against the storage.
pub trait Handler<KV>: Send + Sync {
    /// Run the command with all of its arguments, the name included, and return the text
    /// that is sent back to the client.
    fn execute(&self, storage: &KV, args: &[String]) -> String;
}

/// Maps command names to their handlers. Names are matched verbatim.
pub struct Dispatcher<KV> {
    handlers: HashMap<&'static str, Box<dyn Handler<KV>>>,
}

impl<KV> Dispatcher<KV>
where
    KV: KeyValueStorage,
{
    /// Build the table of every supported command. `SAVE` hands snapshots to the given store.
    pub fn new(snapshots: Arc<dyn SnapshotStore>) -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler<KV>>> = HashMap::new();
        handlers.insert("COMMAND", Box::new(Constant(OK)));
        handlers.insert("PING", Box::new(Constant("PONG")));
        handlers.insert("ECHO", Box::new(Constant(ECHO_GREETING)));
        handlers.insert("SET", Box::new(Set));
        handlers.insert("GET", Box::new(Get));
        handlers.insert("EXISTS", Box::new(Exists));
        handlers.insert("DEL", Box::new(Del));
        handlers.insert("INCR", Box::new(Step::INCR));
        handlers.insert("DECR", Box::new(Step::DECR));
        handlers.insert("LPUSH", Box::new(Push::Front));
        handlers.insert("RPUSH", Box::new(Push::Back));
        handlers.insert("SAVE", Box::new(Save::new(snapshots)));
        Self { handlers }
    }

    /// Run the command and return its reply. Unknown and empty commands get a fixed reply.
    pub fn dispatch(&self, storage: &KV, cmd: &Command) -> String {
        match cmd.name().and_then(|name| self.handlers.get(name)) {
            Some(handler) => handler.execute(storage, cmd.args()),
            None => UNKNOWN_COMMAND.to_string(),
        }
    }
}

//! This module contains the implementation for Redis serialization protocol (RESP),
//! along with a client and a server that supports a minimal set of commands from Redis

mod client;
pub mod command;
mod config;
pub mod connection;
pub mod frame;
mod server;

use std::io;

use thiserror::Error;

pub use self::{
    client::Client, command::Dispatcher, config::Config, connection::Connection, frame::Frame,
    server::Server,
};

/// Error returned by the network layer
#[derive(Error, Debug)]
pub enum Error {
    /// Error from reading a frame.
    #[error("Frame error - {0}")]
    Frame(#[from] frame::Error),

    /// Error from turning a frame into a command.
    #[error("Command error - {0}")]
    Command(#[from] command::Error),

    /// The server replied with an error frame.
    #[error("Server error - {0}")]
    Server(String),

    /// Received a frame that can not be handled at this point.
    #[error("Unexpected frame (got {0:?})")]
    UnexpectedFrame(Frame),

    /// Error from running asynchronous tasks.
    #[error("Asynchronous task error - {0}")]
    AsyncTask(#[from] tokio::task::JoinError),

    /// Error from I/O operations.
    #[error("I/O error - {0}")]
    Io(#[from] io::Error),
}

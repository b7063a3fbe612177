use std::io;

use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

use super::{command::Command, Connection, Error, Frame};

/// Provide methods and hold states for managing a connection to the server.
///
/// A connection can be established using the [`Client::connect`] function. Once connected,
/// requests are sent one at a time and every reply is the text of a simple string frame.
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Attempt to connect to the server located at the given address.
    pub async fn connect<A>(addr: A) -> Result<Self, io::Error>
    where
        A: ToSocketAddrs,
    {
        let tcp = TcpStream::connect(addr).await?;
        let conn = Connection::new(tcp);
        Ok(Self { conn })
    }

    /// Send a command made of the given arguments and wait for its reply.
    #[tracing::instrument(skip(self, args))]
    pub async fn send<S>(&mut self, args: &[S]) -> Result<String, Error>
    where
        S: AsRef<str>,
    {
        let frame: Frame = Command::new(args.iter().map(|arg| arg.as_ref())).into();
        debug!(request = ?frame);
        self.conn.write_frame(&frame).await?;

        let frame = self.conn.read_frame().await?;
        debug!(response = ?frame);
        match frame {
            Some(Frame::SimpleString(s)) => Ok(s),
            Some(Frame::Error(err)) => Err(Error::Server(err)),
            Some(frame) => Err(Error::UnexpectedFrame(frame)),
            // Server closes socket without sending data
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by server",
            )
            .into()),
        }
    }

    /// Check that the server is alive, the reply is `PONG`.
    pub async fn ping(&mut self) -> Result<String, Error> {
        self.send(&["PING"]).await
    }

    /// Get the value of the key. A missing or expired key replies `null`.
    pub async fn get(&mut self, key: &str) -> Result<String, Error> {
        self.send(&["GET", key]).await
    }

    /// Set the value of the key.
    pub async fn set(&mut self, key: &str, value: &str) -> Result<String, Error> {
        self.send(&["SET", key, value]).await
    }

    /// Set the value of the key, which expires after the given number of seconds.
    pub async fn set_ex(&mut self, key: &str, value: &str, seconds: u64) -> Result<String, Error> {
        let seconds = seconds.to_string();
        self.send(&["SET", key, value, "EX", &seconds]).await
    }

    /// Remove the keys.
    pub async fn del<S>(&mut self, keys: &[S]) -> Result<String, Error>
    where
        S: AsRef<str>,
    {
        let mut args = vec!["DEL"];
        args.extend(keys.iter().map(|key| key.as_ref()));
        self.send(&args).await
    }

    /// Ask the server to persist a snapshot of its storage.
    pub async fn save(&mut self) -> Result<String, Error> {
        self.send(&["SAVE"]).await
    }
}

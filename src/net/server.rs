//! Asynchronous server that serves the command dispatcher over the RESP protocol.

use std::{convert::TryFrom, future::Future, sync::Arc, time::Duration};

use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast, mpsc, Semaphore},
    task, time,
};
use tracing::{debug, error, info, warn};

use super::{
    command::{Command, Dispatcher},
    connection::Connection,
    frame::Frame,
};
use crate::{shutdown::Shutdown, storage::KeyValueStorage};

/// Provide methods and hold states for a Redis server. The server will exist when `shutdown`
/// finishes, or when there's an error.
pub struct Server<KV, S> {
    listener: Listener<KV>,
    shutdown: S,
}

/// The server's runtime state that is shared across all connections.
/// This is also in charge of listening for new inbound connections.
struct Listener<KV> {
    // Database handle
    storage: KV,

    // Command table shared by every connection
    dispatcher: Arc<Dispatcher<KV>>,

    // The TCP socket for listening for inbound connection
    listener: TcpListener,

    min_backoff_ms: u64,
    max_backoff_ms: u64,

    // Caps the number of connections that are served at once. A handler gives its permit back
    // when it is dropped.
    limit_connections: Arc<Semaphore>,

    // Every connection subscribes to this channel. Dropping the sender tells all of them to
    // stop once they reach a safe point.
    notify_shutdown: broadcast::Sender<()>,

    // Each handler holds a clone of the sender. The receiver yields `None` once every handler
    // is gone, which is when the server can exit.
    shutdown_complete_rx: mpsc::Receiver<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
}

/// Reads client requests and applies those to the storage.
struct Handler<KV> {
    // Database handle.
    storage: KV,

    dispatcher: Arc<Dispatcher<KV>>,

    // Writes and reads frame.
    connection: Connection,

    // The semaphore that granted the permit for this handler.
    // The handler is in charge of releasing its permit.
    limit_connections: Arc<Semaphore>,

    // Receives shut down signal.
    shutdown: Shutdown,

    // Signals that the handler finishes executing.
    _shutdown_complete: mpsc::Sender<()>,
}

impl<KV, S> Server<KV, S> {
    /// Create a server that accepts connections on `listener` until `shutdown` completes.
    /// Connection limits and accept back-off take their default values, see [`Server::limits`].
    pub fn new(listener: TcpListener, storage: KV, dispatcher: Dispatcher<KV>, shutdown: S) -> Self {
        let conf = super::Config::default();
        // Ignoring the broadcast received because one can be created by
        // calling `subscribe()` on the `Sender`
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);

        let listener = Listener {
            storage,
            dispatcher: Arc::new(dispatcher),
            listener,
            min_backoff_ms: conf.min_backoff_ms,
            max_backoff_ms: conf.max_backoff_ms,
            limit_connections: Arc::new(Semaphore::new(conf.max_connections)),
            notify_shutdown,
            shutdown_complete_rx,
            shutdown_complete_tx,
        };

        Self { listener, shutdown }
    }

    /// Take the connection limit and accept back-off from the network configuration.
    pub fn limits(mut self, conf: &super::Config) -> Self {
        self.listener.min_backoff_ms = conf.min_backoff_ms;
        self.listener.max_backoff_ms = conf.max_backoff_ms;
        self.listener.limit_connections = Arc::new(Semaphore::new(conf.max_connections));
        self
    }
}

impl<KV, S> Server<KV, S>
where
    KV: KeyValueStorage,
    S: Future,
{
    /// Runs the server that exits when `shutdown` finishes, or when there's
    /// an error.
    pub async fn run(mut self) {
        tokio::select! {
            result = self.listener.listen() => {
                // Accepting kept failing past the maximum back-off. Errors from individual
                // connections never get here.
                if let Err(err) = result {
                    error!(cause = %err, "failed to accept");
                }
            }
            _ = self.shutdown => {
                info!("shutting down");
            }
        }

        // Connections that called `subscribe()` see the channel close and exit
        drop(self.listener.notify_shutdown);

        // Drop our own sender so `recv` doesn't wait on it forever
        drop(self.listener.shutdown_complete_tx);

        // Wait for all active connections to finish processing.
        self.listener.shutdown_complete_rx.recv().await;
    }
}

impl<KV> Listener<KV> {
    /// Accepts a new connection.
    ///
    /// Returns the a [`TcpStream`] on success. Retries with an exponential
    /// backoff strategy when there's an error. If the backoff time passes
    /// to maximum allowed time, returns an error.
    async fn accept(&mut self) -> Result<TcpStream, super::Error> {
        let mut delays = backoff_ms(self.min_backoff_ms, self.max_backoff_ms);
        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => match delays.next() {
                    Some(ms) => {
                        warn!(cause = %err, retry_in_ms = ms, "could not accept connection");
                        time::sleep(Duration::from_millis(ms)).await;
                    }
                    None => return Err(err.into()),
                },
            }
        }
    }
}

/// Delays between attempts to accept, doubling from `min_ms` (at least 1) while they stay
/// within `max_ms`.
fn backoff_ms(min_ms: u64, max_ms: u64) -> impl Iterator<Item = u64> {
    std::iter::successors(Some(min_ms.max(1)), |ms| ms.checked_mul(2))
        .take_while(move |ms| *ms <= max_ms)
}

impl<KV> Listener<KV>
where
    KV: KeyValueStorage,
{
    async fn listen(&mut self) -> Result<(), super::Error> {
        info!(addr = ?self.listener.local_addr().ok(), "listening for new connections");

        loop {
            // The permit is handed back by `Handler::drop`, which runs in another task, so it
            // is forgotten here instead of being released at the end of this scope.
            self.limit_connections
                .acquire()
                .await
                .map_err(|err| super::Error::Server(err.to_string()))?
                .forget();

            let socket = self.accept().await?;
            let peer = socket.peer_addr().ok();

            let handler = Handler {
                storage: self.storage.clone(),
                dispatcher: Arc::clone(&self.dispatcher),
                connection: Connection::new(socket),
                limit_connections: Arc::clone(&self.limit_connections),
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _shutdown_complete: self.shutdown_complete_tx.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.run().await {
                    error!(cause = %err, ?peer, "connection error");
                }
            });
        }
    }
}

impl<KV> Handler<KV>
where
    KV: KeyValueStorage,
{
    /// Process a single connection, one request at a time.
    ///
    /// When the shutdown signal is received, the connection is processed until
    /// it reaches a safe state, at which point it is terminated.
    #[tracing::instrument(skip(self))]
    async fn run(mut self) -> Result<(), super::Error> {
        while !self.shutdown.is_shutdown() {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = self.shutdown.recv() => {
                    return Ok(());
                }
            };

            // The client closed the connection
            let frame = match maybe_frame {
                Some(frame) => frame,
                None => return Ok(()),
            };

            if !matches!(frame, Frame::Array(_)) {
                debug!(?frame, "skipping non-array frame");
                continue;
            }

            let cmd = Command::try_from(frame)?;
            debug!(?cmd);

            // Storage operations are synchronous, so they run on the blocking pool
            let storage = self.storage.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let reply = task::spawn_blocking(move || dispatcher.dispatch(&storage, &cmd)).await?;

            self.connection
                .write_frame(&Frame::SimpleString(reply))
                .await?;
        }
        Ok(())
    }
}

impl<KV> Drop for Handler<KV> {
    fn drop(&mut self) {
        self.limit_connections.add_permits(1);
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, sync::Arc};

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
        sync::oneshot,
        task::JoinHandle,
    };

    use super::*;
    use crate::{
        net::{Client, Config},
        storage::{DashMapStorage, FileSnapshotStore, KeyValueStorage},
    };

    struct Running {
        addr: SocketAddr,
        storage: DashMapStorage,
        stop: oneshot::Sender<()>,
        handle: JoinHandle<()>,
        _dir: tempfile::TempDir,
    }

    async fn start(conf: Config) -> Running {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = Arc::new(FileSnapshotStore::new(dir.path().join("dump.dat")));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let storage = DashMapStorage::default();
        let (stop, stopped) = oneshot::channel::<()>();
        let server = Server::new(listener, storage.clone(), Dispatcher::new(snapshots), stopped)
            .limits(&conf);
        let handle = tokio::spawn(server.run());

        Running {
            addr,
            storage,
            stop,
            handle,
            _dir: dir,
        }
    }

    async fn read_reply(stream: &mut TcpStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        assert_eq!(backoff_ms(1, 16).collect::<Vec<_>>(), vec![1, 2, 4, 8, 16]);
        assert_eq!(backoff_ms(3, 20).collect::<Vec<_>>(), vec![3, 6, 12]);
        assert_eq!(backoff_ms(5, 1).count(), 0);
        assert_eq!(backoff_ms(1, u64::MAX).count(), 64);
    }

    #[test]
    fn backoff_from_zero_still_waits() {
        assert_eq!(backoff_ms(0, 8).collect::<Vec<_>>(), vec![1, 2, 4, 8]);
    }

    #[tokio::test]
    async fn replies_to_raw_requests() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream, 7).await, b"+PONG\r\n");

        stream
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut stream, 5).await, b"+OK\r\n");

        stream
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut stream, 6).await, b"+bar\r\n");

        stream
            .write_all(b"*2\r\n$3\r\nGET\r\n$7\r\nmissing\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut stream, 7).await, b"+null\r\n");

        server.stop.send(()).unwrap();
        drop(stream);
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn replies_to_array_cut_short_by_client() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        stream.write_all(b"*2\r\n$4\r\nPING\r\n").await.unwrap();
        stream.shutdown().await.unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"+PONG\r\n");

        server.stop.send(()).unwrap();
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn stored_line_break_cannot_shift_replies() {
        let server = start(Config::default()).await;
        let mut client = Client::connect(server.addr).await.unwrap();

        assert_eq!(
            client.set("k", "a\r\n+PONG").await.unwrap(),
            "ERR value must not contain CR or LF"
        );
        assert_eq!(client.get("k").await.unwrap(), "null");
        assert_eq!(client.get("other").await.unwrap(), "null");
        assert_eq!(client.ping().await.unwrap(), "PONG");

        server.stop.send(()).unwrap();
        drop(client);
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn closes_connection_on_deeply_nested_array() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        let mut data = b"*1\r\n".repeat(100_000);
        data.extend_from_slice(b"+x\r\n");
        // The server may close before everything is written
        let _ = stream.write_all(&data).await;
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf).await;
        assert!(buf.is_empty());

        // Other clients are still served
        let mut client = Client::connect(server.addr).await.unwrap();
        assert_eq!(client.ping().await.unwrap(), "PONG");

        server.stop.send(()).unwrap();
        drop(client);
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn request_split_across_writes() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        stream.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(b"NG\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream, 7).await, b"+PONG\r\n");

        server.stop.send(()).unwrap();
        drop(stream);
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn skips_non_array_frames() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        stream
            .write_all(b"+PING\r\n:1\r\n*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        assert_eq!(read_reply(&mut stream, 7).await, b"+PONG\r\n");

        server.stop.send(()).unwrap();
        drop(stream);
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn closes_connection_on_non_string_argument() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();

        stream.write_all(b"*2\r\n$3\r\nGET\r\n:1\r\n").await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());

        server.stop.send(()).unwrap();
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn client_round_trip() {
        let server = start(Config::default()).await;
        let mut client = Client::connect(server.addr).await.unwrap();

        assert_eq!(client.ping().await.unwrap(), "PONG");
        assert_eq!(client.set("foo", "bar").await.unwrap(), "OK");
        assert_eq!(client.get("foo").await.unwrap(), "bar");
        assert_eq!(client.send(&["INCR", "n"]).await.unwrap(), "1");
        assert_eq!(client.send(&["RPUSH", "l", "a", "b"]).await.unwrap(), "2");
        assert_eq!(client.del(&["foo"]).await.unwrap(), "2");
        assert_eq!(client.get("foo").await.unwrap(), "null");
        assert_eq!(client.send(&["NOPE"]).await.unwrap(), "Unknown command");
        assert_eq!(client.save().await.unwrap(), "OK");

        assert_eq!(server.storage.get("n"), Some("1".into()));

        server.stop.send(()).unwrap();
        drop(client);
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn connections_share_storage() {
        let server = start(Config::default()).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let addr = server.addr;
            tasks.push(tokio::spawn(async move {
                let mut client = Client::connect(addr).await.unwrap();
                for _ in 0..50 {
                    client.send(&["INCR", "counter"]).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(server.storage.get("counter"), Some("400".into()));

        server.stop.send(()).unwrap();
        server.handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_idle_connections() {
        let server = start(Config::default()).await;
        let mut stream = TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_reply(&mut stream, 7).await, b"+PONG\r\n");

        server.stop.send(()).unwrap();
        server.handle.await.unwrap();

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn connection_limit_queues_extra_clients() {
        let conf = Config {
            max_connections: 1,
            ..Config::default()
        };
        let server = start(conf).await;

        let mut first = Client::connect(server.addr).await.unwrap();
        assert_eq!(first.ping().await.unwrap(), "PONG");

        // Accepted by the kernel but not served until the first client leaves
        let second = tokio::spawn({
            let addr = server.addr;
            async move {
                let mut client = Client::connect(addr).await.unwrap();
                client.ping().await.unwrap()
            }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());

        drop(first);
        assert_eq!(second.await.unwrap(), "PONG");

        server.stop.send(()).unwrap();
        server.handle.await.unwrap();
    }
}

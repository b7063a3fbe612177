//! Buffered reading and writing of frames over a byte stream.

use std::io::{self, Cursor, Write};

use bytes::{Buf, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::TcpStream,
};

use super::{
    frame::{self, Frame},
    Error,
};

/// Sends and receives [`Frame`] values from the remote peer.
///
/// [`Frame`]: crate::net::frame::Frame
pub struct Connection<S = TcpStream> {
    // wraps a stream inside a BufWriter to reduce the number of write syscalls
    stream: BufWriter<S>,
    // buffered data from read operation
    buffer: BytesMut,
}

impl<S> Connection<S>
where
    S: AsyncReadExt + AsyncWriteExt + Unpin,
{
    /// Creates a new connection over the given readable and writable stream, then
    /// initializes the inner read/write buffers
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufWriter::new(stream),
            buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Reads the available frame from the underlying buffer
    ///
    /// Returns the received frame if succeeded. When the underlying stream is
    /// closed and there's no data left to be read, returns `None`. Otherwise,
    /// an error is returned.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, Error> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(Some(frame));
            }

            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                if self.buffer.is_empty() {
                    // Peer closed when all data is parsed
                    return Ok(None);
                }
                // The peer closed the socket while sending a frame. A command array is still
                // served with the arguments that made it.
                return match self.parse_truncated_frame() {
                    Some(frame) => Ok(Some(frame)),
                    None => Err(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "connection reset by peer",
                    )
                    .into()),
                };
            }
        }
    }

    /// Write a frame to the underlying stream, then flush it so the peer sees the
    /// frame before anything else is read from this connection.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        if let Frame::Array(items) = frame {
            self.write_array(items).await?;
        } else {
            self.write_single_value(frame).await?;
        }

        self.stream.flush().await?;
        Ok(())
    }

    fn parse_frame(&mut self) -> Result<Option<Frame>, Error> {
        let mut buf = Cursor::new(&self.buffer[..]);
        match Frame::check(&mut buf) {
            Ok(()) => {
                // Get the byte length of the frame
                let len = buf.position() as usize;

                // Parse the frame
                buf.set_position(0);
                let frame = Frame::parse(&mut buf)?;

                // Discard the frame from the buffer
                self.buffer.advance(len);

                Ok(Some(frame))
            }
            // Not enough data has been buffered
            Err(frame::Error::Incomplete) => Ok(None),
            // An error was encountered
            Err(e) => Err(e.into()),
        }
    }

    fn parse_truncated_frame(&mut self) -> Option<Frame> {
        let mut buf = Cursor::new(&self.buffer[..]);
        match Frame::parse_truncated(&mut buf) {
            Ok(frame @ Frame::Array(_)) => {
                self.buffer.clear();
                Some(frame)
            }
            _ => None,
        }
    }

    async fn write_array(&mut self, items: &[Frame]) -> Result<(), Error> {
        self.stream.write_u8(b'*').await?;
        self.write_decimal(items.len() as i64).await?;
        self.stream.write_all(b"\r\n").await?;

        for item in items {
            self.write_single_value(item).await?;
        }
        Ok(())
    }

    async fn write_single_value(&mut self, frame: &Frame) -> Result<(), Error> {
        match frame {
            Frame::SimpleString(s) => {
                self.stream.write_all(&frame::serialize(s)).await?;
            }
            Frame::Error(e) => {
                self.stream.write_u8(b'-').await?;
                self.stream.write_all(e.as_bytes()).await?;
                self.stream.write_all(b"\r\n").await?;
            }
            Frame::Integer(i) => {
                self.stream.write_u8(b':').await?;
                self.write_decimal(*i).await?;
                self.stream.write_all(b"\r\n").await?;
            }
            Frame::Null => {
                self.stream.write_all(b"$-1\r\n").await?;
            }
            Frame::BulkString(bs) => {
                self.stream.write_u8(b'$').await?;
                self.write_decimal(bs.len() as i64).await?;
                self.stream.write_all(b"\r\n").await?;
                self.stream.write_all(bs).await?;
                self.stream.write_all(b"\r\n").await?;
            }
            // Commands are flat, nested arrays are never written
            Frame::Array(_) => return Err(Error::UnexpectedFrame(frame.clone())),
        }
        Ok(())
    }

    async fn write_decimal(&mut self, value: i64) -> Result<(), Error> {
        // i64 has about 20 digits
        let mut buf = [0u8; 20];
        let mut buf = Cursor::new(&mut buf[..]);
        write!(&mut buf, "{}", value)?;
        let pos = buf.position() as usize;
        self.stream.write_all(&buf.get_ref()[..pos]).await?;
        Ok(())
    }
}

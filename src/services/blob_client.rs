//! src/services/blob_client.rs
//!
//! Client for the blob backend's framed socket protocol. Every call opens
//! its own TCP connection and drops it when done:
//!
//! - PUT    `[u64 BE length][payload]`              -> `[8-byte object id]`
//! - GET    `[object id]`                           -> chunks of <= 1500 bytes until EOF
//! - DELETE `["0DEL0DEL"][object id][secret]`       -> `[8-byte echoed id]`
//!
//! PUT goes to the putter endpoint, GET and DELETE to the object server.
//! Both may be the same address.

use crate::models::object::{InvalidObjectId, OBJECT_ID_LEN, ObjectId};
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::{fmt, future::Future, io, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::debug;

/// Width of the PUT length prefix: a big-endian `u64`.
pub const LENGTH_PREFIX_LEN: usize = size_of::<u64>();

/// Largest chunk read from a GET connection at a time.
pub const GET_CHUNK_SIZE: usize = 1500;

/// Command token that opens a DELETE message.
pub const DELETE_COMMAND: &[u8; 8] = b"0DEL0DEL";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not connect to blob backend at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("blob backend {op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("blob backend i/o failed during {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("blob backend returned {got} of {expected} object id bytes")]
    ShortRead { expected: usize, got: usize },
    #[error("blob backend returned a malformed object id: {0}")]
    MalformedId(#[from] InvalidObjectId),
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Lazy, finite, non-restartable sequence of object chunks.
pub type BlobStream = BoxStream<'static, io::Result<Bytes>>;

/// Connection settings shared by every call.
#[derive(Clone)]
pub struct BlobClient {
    object_addr: String,
    put_addr: String,
    delete_secret: Arc<str>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl fmt::Debug for BlobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobClient")
            .field("object_addr", &self.object_addr)
            .field("put_addr", &self.put_addr)
            .field("delete_secret", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl BlobClient {
    pub fn new(
        object_addr: impl Into<String>,
        put_addr: impl Into<String>,
        delete_secret: impl Into<Arc<str>>,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> Self {
        Self {
            object_addr: object_addr.into(),
            put_addr: put_addr.into(),
            delete_secret: delete_secret.into(),
            connect_timeout,
            io_timeout,
        }
    }

    /// Store `payload` and return the identifier the backend assigned.
    pub async fn put(&self, payload: Bytes) -> TransportResult<ObjectId> {
        let mut conn = self.connect(&self.put_addr).await?;
        let len = payload.len() as u64;
        self.io("put", conn.write_all(&length_prefix(len))).await?;
        self.io("put", conn.write_all(&payload)).await?;
        self.io("put", conn.flush()).await?;

        let object_id = self.read_object_id(&mut conn, "put").await?;
        debug!(object_id = %object_id, size = len, "blob stored");
        Ok(object_id)
    }

    /// Open a read of `object_id`.
    ///
    /// The connection is made and the request sent before this returns; the
    /// chunks are pulled from the socket only as the stream is polled, so a
    /// slow consumer slows down the backend read.
    pub async fn get(&self, object_id: &ObjectId) -> TransportResult<BlobStream> {
        let mut conn = self.connect(&self.object_addr).await?;
        self.io("get", conn.write_all(object_id.as_bytes())).await?;
        self.io("get", conn.flush()).await?;

        let io_timeout = self.io_timeout;
        let chunks = stream::try_unfold(conn, move |mut conn| async move {
            read_chunk(&mut conn, io_timeout)
                .await
                .map(|chunk| chunk.map(|chunk| (chunk, conn)))
        });
        Ok(chunks.boxed())
    }

    /// Ask the backend to drop `object_id`. Returns the identifier it echoed;
    /// the caller must compare it with the one it sent.
    pub async fn delete(&self, object_id: &ObjectId) -> TransportResult<ObjectId> {
        let mut message =
            Vec::with_capacity(DELETE_COMMAND.len() + OBJECT_ID_LEN + self.delete_secret.len());
        message.extend_from_slice(DELETE_COMMAND);
        message.extend_from_slice(object_id.as_bytes());
        message.extend_from_slice(self.delete_secret.as_bytes());

        let mut conn = self.connect(&self.object_addr).await?;
        self.io("delete", conn.write_all(&message)).await?;
        self.io("delete", conn.flush()).await?;
        self.read_object_id(&mut conn, "delete").await
    }

    /// Open and drop one connection to each endpoint.
    pub async fn probe(&self) -> TransportResult<()> {
        self.connect(&self.object_addr).await?;
        if self.put_addr != self.object_addr {
            self.connect(&self.put_addr).await?;
        }
        Ok(())
    }

    async fn connect(&self, addr: &str) -> TransportResult<TcpStream> {
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(source)) => Err(TransportError::Connect {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(TransportError::Timeout {
                op: "connect",
                after: self.connect_timeout,
            }),
        }
    }

    async fn io<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = io::Result<T>>,
    ) -> TransportResult<T> {
        match timeout(self.io_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(TransportError::Io { op, source }),
            Err(_) => Err(TransportError::Timeout {
                op,
                after: self.io_timeout,
            }),
        }
    }

    /// Read exactly one identifier; EOF before the 8th byte is a short read.
    async fn read_object_id(
        &self,
        conn: &mut TcpStream,
        op: &'static str,
    ) -> TransportResult<ObjectId> {
        let mut buf = [0u8; OBJECT_ID_LEN];
        let mut filled = 0;
        while filled < OBJECT_ID_LEN {
            let n = self.io(op, conn.read(&mut buf[filled..])).await?;
            if n == 0 {
                return Err(TransportError::ShortRead {
                    expected: OBJECT_ID_LEN,
                    got: filled,
                });
            }
            filled += n;
        }
        Ok(ObjectId::from_bytes(&buf)?)
    }
}

/// One read of at most [`GET_CHUNK_SIZE`] bytes; `None` once the backend
/// closes the stream.
async fn read_chunk(conn: &mut TcpStream, io_timeout: Duration) -> io::Result<Option<Bytes>> {
    let mut buf = vec![0u8; GET_CHUNK_SIZE];
    let n = match timeout(io_timeout, conn.read(&mut buf)).await {
        Ok(read) => read?,
        Err(_) => {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "blob read timed out",
            ));
        }
    };
    if n == 0 {
        return Ok(None);
    }
    buf.truncate(n);
    Ok(Some(Bytes::from(buf)))
}

/// The PUT frame header announcing `len` payload bytes.
fn length_prefix(len: u64) -> [u8; LENGTH_PREFIX_LEN] {
    len.to_be_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use futures::TryStreamExt;
    use tokio::net::TcpListener;

    async fn collect(stream: BlobStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn put_then_get_round_trips_bytes() {
        let backend = FakeBackend::start().await;
        let client = backend.client();

        let payload = Bytes::from_static(b"object data");
        let id = client.put(payload.clone()).await.unwrap();
        assert_eq!(backend.stored(&id).await.as_deref(), Some(&payload[..]));

        let read = collect(client.get(&id).await.unwrap()).await;
        assert_eq!(read, payload);
    }

    #[tokio::test]
    async fn large_object_arrives_in_bounded_chunks() {
        let backend = FakeBackend::start().await;
        let client = backend.client();

        let payload: Bytes = (0..10_000u32).map(|i| (i % 251) as u8).collect::<Vec<_>>().into();
        let id = client.put(payload.clone()).await.unwrap();

        let chunks: Vec<Bytes> = client.get(&id).await.unwrap().try_collect().await.unwrap();
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= GET_CHUNK_SIZE));
        assert_eq!(chunks.concat(), payload);
    }

    #[tokio::test]
    async fn empty_payload_sends_zero_length_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut prefix = [0xffu8; LENGTH_PREFIX_LEN];
            conn.read_exact(&mut prefix).await.unwrap();
            conn.write_all(b"EMPTY001").await.unwrap();
            prefix
        });

        let client = BlobClient::new(
            addr.clone(),
            addr,
            "secret",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let id = client.put(Bytes::new()).await.unwrap();
        assert_eq!(id.as_str(), "EMPTY001");
        assert_eq!(server.await.unwrap(), [0u8; LENGTH_PREFIX_LEN]);
    }

    #[tokio::test]
    async fn short_identifier_is_a_transport_error() {
        let backend = FakeBackend::start().await;
        backend.truncate_put_replies(true);

        let err = backend
            .client()
            .put(Bytes::from_static(b"data"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TransportError::ShortRead {
                expected: OBJECT_ID_LEN,
                got: 4
            }
        ));
    }

    #[tokio::test]
    async fn delete_frames_command_id_and_secret() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut message = vec![0u8; 8 + 8 + 6];
            conn.read_exact(&mut message).await.unwrap();
            conn.write_all(&message[8..16]).await.unwrap();
            message
        });

        let client = BlobClient::new(
            addr.clone(),
            addr,
            "s3cr3t",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let id = ObjectId::from_bytes(b"ABCDEFGH").unwrap();
        assert_eq!(client.delete(&id).await.unwrap(), id);
        assert_eq!(server.await.unwrap(), b"0DEL0DELABCDEFGHs3cr3t");
    }

    #[tokio::test]
    async fn delete_reports_what_backend_echoed() {
        let backend = FakeBackend::start().await;
        let client = backend.client();
        let id = client.put(Bytes::from_static(b"x")).await.unwrap();

        backend.refuse_deletes(true);
        let echoed = client.delete(&id).await.unwrap();
        assert_ne!(echoed, id);
        assert!(backend.stored(&id).await.is_some());

        backend.refuse_deletes(false);
        assert_eq!(client.delete(&id).await.unwrap(), id);
        assert!(backend.stored(&id).await.is_none());
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = BlobClient::new(
            addr.clone(),
            addr,
            "secret",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(
            client.put(Bytes::from_static(b"data")).await,
            Err(TransportError::Connect { .. })
        ));
        assert!(client.probe().await.is_err());
    }

    #[tokio::test]
    async fn silent_backend_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (conn, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(conn);
        });

        let client = BlobClient::new(
            addr.clone(),
            addr,
            "secret",
            Duration::from_secs(1),
            Duration::from_millis(100),
        );
        assert!(matches!(
            client.put(Bytes::from_static(b"data")).await,
            Err(TransportError::Timeout { op: "put", .. })
        ));
    }

    #[test]
    fn debug_output_hides_secret() {
        let client = BlobClient::new(
            "127.0.0.1:1",
            "127.0.0.1:1",
            "top-secret",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("top-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn length_prefix_is_big_endian_u64() {
        assert_eq!(length_prefix(1500), [0, 0, 0, 0, 0, 0, 0x05, 0xdc]);
        assert_eq!(length_prefix(u64::MAX), [0xff; LENGTH_PREFIX_LEN]);
    }
}

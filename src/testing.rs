//! In-process blob backend for tests.
//!
//! Listens on two loopback ports the way a real deployment exposes a putter
//! and an object server, and speaks the same framing as the production
//! backend. Switches let tests make it misbehave.

use crate::models::object::ObjectId;
use crate::services::{
    blob_client::{BlobClient, DELETE_COMMAND},
    metadata_store::{MemoryStore, MetadataStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};

pub const TEST_SECRET: &str = "test-delete-secret";

#[derive(Default)]
struct BackendState {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    delete_log: Mutex<Vec<String>>,
    next_id: AtomicU64,
    truncate_put_replies: AtomicBool,
    refuse_deletes: AtomicBool,
}

pub struct FakeBackend {
    put_addr: String,
    object_addr: String,
    state: Arc<BackendState>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());

        let putter = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let object_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let put_addr = putter.local_addr().unwrap().to_string();
        let object_addr = object_server.local_addr().unwrap().to_string();

        tokio::spawn(accept_loop(putter, state.clone(), Role::Putter));
        tokio::spawn(accept_loop(object_server, state.clone(), Role::ObjectServer));

        Self {
            put_addr,
            object_addr,
            state,
        }
    }

    pub fn client(&self) -> BlobClient {
        BlobClient::new(
            self.object_addr.clone(),
            self.put_addr.clone(),
            TEST_SECRET,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    }

    /// Reply to PUTs with only half an identifier.
    pub fn truncate_put_replies(&self, on: bool) {
        self.state.truncate_put_replies.store(on, Ordering::SeqCst);
    }

    /// Answer DELETEs with an identifier that does not match the request.
    pub fn refuse_deletes(&self, on: bool) {
        self.state.refuse_deletes.store(on, Ordering::SeqCst);
    }

    pub async fn stored(&self, id: &ObjectId) -> Option<Vec<u8>> {
        self.state.objects.lock().await.get(id.as_str()).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.state.objects.lock().await.len()
    }

    /// Identifiers the backend has been asked to delete, in order.
    pub async fn delete_log(&self) -> Vec<String> {
        self.state.delete_log.lock().await.clone()
    }
}

#[derive(Clone, Copy)]
enum Role {
    Putter,
    ObjectServer,
}

async fn accept_loop(listener: TcpListener, state: Arc<BackendState>, role: Role) {
    while let Ok((conn, _)) = listener.accept().await {
        let state = state.clone();
        tokio::spawn(async move {
            let _ = match role {
                Role::Putter => serve_put(conn, &state).await,
                Role::ObjectServer => serve_object(conn, &state).await,
            };
        });
    }
}

async fn serve_put(mut conn: TcpStream, state: &BackendState) -> std::io::Result<()> {
    let len = conn.read_u64().await?;
    let mut payload = vec![0u8; len as usize];
    conn.read_exact(&mut payload).await?;

    let id = format!("{:08}", state.next_id.fetch_add(1, Ordering::SeqCst) + 1);
    state.objects.lock().await.insert(id.clone(), payload);

    if state.truncate_put_replies.load(Ordering::SeqCst) {
        conn.write_all(&id.as_bytes()[..4]).await?;
    } else {
        conn.write_all(id.as_bytes()).await?;
    }
    conn.shutdown().await
}

async fn serve_object(mut conn: TcpStream, state: &BackendState) -> std::io::Result<()> {
    let mut head = [0u8; 8];
    conn.read_exact(&mut head).await?;

    if &head == DELETE_COMMAND {
        let mut id = [0u8; 8];
        conn.read_exact(&mut id).await?;
        let mut secret = vec![0u8; TEST_SECRET.len()];
        conn.read_exact(&mut secret).await?;
        let id = String::from_utf8_lossy(&id).into_owned();
        state.delete_log.lock().await.push(id.clone());

        if secret != TEST_SECRET.as_bytes() || state.refuse_deletes.load(Ordering::SeqCst) {
            conn.write_all(b"NOTFOUND").await?;
        } else {
            // Deleting an id that is already gone still counts as success.
            state.objects.lock().await.remove(&id);
            conn.write_all(id.as_bytes()).await?;
        }
        return conn.shutdown().await;
    }

    let id = String::from_utf8_lossy(&head).into_owned();
    let payload = state.objects.lock().await.get(&id).cloned();
    if let Some(payload) = payload {
        conn.write_all(&payload).await?;
    }
    conn.shutdown().await
}

/// Memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    fail_scalar_writes: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, on: bool) {
        self.fail_writes.store(on, Ordering::SeqCst);
    }

    /// Fail only `set`; set membership writes keep working.
    pub fn fail_scalar_writes(&self, on: bool) {
        self.fail_scalar_writes.store(on, Ordering::SeqCst);
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FlakyStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_write()?;
        if self.fail_scalar_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected scalar write failure".into()));
        }
        self.inner.set(key, value).await
    }

    async fn set_add(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_write()?;
        self.inner.set_add(key, member).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_write()?;
        self.inner.set_remove(key, member).await
    }

    async fn set_members(&self, key: &str) -> StoreResult<BTreeSet<String>> {
        self.inner.set_members(key).await
    }

    async fn set_is_member(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.inner.set_is_member(key, member).await
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_write()?;
        self.inner.delete(key).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

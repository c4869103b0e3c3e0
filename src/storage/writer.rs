//! Dedicated writer thread.
//!
//! A single OS thread owns the [`Storage`] and executes commands in arrival
//! order. Callers hold a cloneable [`StorageHandle`] whose async methods
//! send a command over a bounded channel and await the reply, so the
//! blocking SQLite calls never run on the async runtime.

use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

use super::error::StorageError;
use super::model::{Batch, Message, MessagePatch, NewMessage};
use super::store::Storage;
use crate::config::StorageConfig;

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

/// Commands executed by the writer thread.
#[derive(Debug)]
enum Command {
    CreateBatch {
        id: String,
        status: String,
        reply: Reply<bool>,
    },
    UpdateBatch {
        id: String,
        status: String,
        reply: Reply<bool>,
    },
    TransitionBatch {
        id: String,
        from: String,
        to: String,
        reply: Reply<bool>,
    },
    RandomBatches {
        limit: usize,
        status: String,
        reply: Reply<Vec<String>>,
    },
    GetBatch {
        id: String,
        reply: Reply<Option<Batch>>,
    },
    CountBatches {
        status: String,
        reply: Reply<u64>,
    },
    CreateMessage {
        message: NewMessage,
        reply: Reply<bool>,
    },
    UpdateMessage {
        id: String,
        status: String,
        patch: MessagePatch,
        reply: Reply<bool>,
    },
    GetMessage {
        id: String,
        reply: Reply<Option<Message>>,
    },
    BatchMessages {
        batch_id: String,
        reply: Reply<Vec<Message>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Owner of the writer thread.
pub struct Writer {
    handle: StorageHandle,
    thread: JoinHandle<()>,
}

impl Writer {
    /// Move `storage` onto a new writer thread.
    ///
    /// # Arguments
    ///
    /// * `storage` - Bootstrapped storage; its connection moves to the thread
    /// * `channel_size` - Commands buffered before callers wait
    pub fn spawn(storage: Storage, channel_size: usize) -> Result<Self, StorageError> {
        let (tx, rx) = mpsc::channel(channel_size.max(1));

        let thread = std::thread::Builder::new()
            .name("batchlog-writer".into())
            .spawn(move || run(storage, rx))
            .map_err(StorageError::Spawn)?;

        tracing::info!(channel_size, "Writer thread started");

        Ok(Self {
            handle: StorageHandle { tx },
            thread,
        })
    }

    /// Open the database named by `config` and spawn a writer for it.
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let storage = Storage::open(config)?;
        Self::spawn(storage, config.write_channel_size)
    }

    /// A new handle for submitting operations.
    pub fn handle(&self) -> StorageHandle {
        self.handle.clone()
    }

    /// Wait for the writer thread to exit.
    ///
    /// The thread exits after [`StorageHandle::shutdown`] or once every
    /// handle has been dropped.
    pub fn join(self) -> Result<(), StorageError> {
        let Self { handle, thread } = self;
        drop(handle);
        thread.join().map_err(|_| StorageError::ThreadPanic)
    }
}

fn run(storage: Storage, mut rx: mpsc::Receiver<Command>) {
    while let Some(command) = rx.blocking_recv() {
        // A dropped reply receiver means the caller went away; the write
        // itself has already happened.
        match command {
            Command::CreateBatch { id, status, reply } => {
                let _ = reply.send(storage.create_batch(&id, &status));
            }
            Command::UpdateBatch { id, status, reply } => {
                let _ = reply.send(storage.update_batch(&id, &status));
            }
            Command::TransitionBatch {
                id,
                from,
                to,
                reply,
            } => {
                let _ = reply.send(storage.transition_batch(&id, &from, &to));
            }
            Command::RandomBatches {
                limit,
                status,
                reply,
            } => {
                let _ = reply.send(storage.random_batches(limit, &status));
            }
            Command::GetBatch { id, reply } => {
                let _ = reply.send(storage.get_batch(&id));
            }
            Command::CountBatches { status, reply } => {
                let _ = reply.send(storage.count_batches(&status));
            }
            Command::CreateMessage { message, reply } => {
                let _ = reply.send(storage.create_message(&message));
            }
            Command::UpdateMessage {
                id,
                status,
                patch,
                reply,
            } => {
                let _ = reply.send(storage.update_message(&id, &status, &patch));
            }
            Command::GetMessage { id, reply } => {
                let _ = reply.send(storage.get_message(&id));
            }
            Command::BatchMessages { batch_id, reply } => {
                let _ = reply.send(storage.batch_messages(&batch_id));
            }
            Command::Shutdown { reply } => {
                rx.close();
                let _ = reply.send(());
                break;
            }
        }
    }
    tracing::info!("Writer thread stopped");
}

/// Cloneable async handle to the writer thread.
///
/// Every method is one atomic statement at the store. Concurrent calls are
/// applied in the order the writer receives them.
#[derive(Debug, Clone)]
pub struct StorageHandle {
    tx: mpsc::Sender<Command>,
}

impl StorageHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| StorageError::ChannelClosed)?;
        rx.await.map_err(|_| StorageError::ChannelClosed)?
    }

    /// See [`Storage::create_batch`].
    pub async fn create_batch(
        &self,
        id: impl Into<String>,
        status: impl Into<String>,
    ) -> Result<bool, StorageError> {
        let (id, status) = (id.into(), status.into());
        self.request(|reply| Command::CreateBatch { id, status, reply })
            .await
    }

    /// See [`Storage::update_batch`].
    pub async fn update_batch(
        &self,
        id: impl Into<String>,
        status: impl Into<String>,
    ) -> Result<bool, StorageError> {
        let (id, status) = (id.into(), status.into());
        self.request(|reply| Command::UpdateBatch { id, status, reply })
            .await
    }

    /// See [`Storage::transition_batch`].
    pub async fn transition_batch(
        &self,
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<bool, StorageError> {
        let (id, from, to) = (id.into(), from.into(), to.into());
        self.request(|reply| Command::TransitionBatch {
            id,
            from,
            to,
            reply,
        })
        .await
    }

    /// See [`Storage::random_batches`].
    pub async fn random_batches(
        &self,
        limit: usize,
        status: impl Into<String>,
    ) -> Result<Vec<String>, StorageError> {
        let status = status.into();
        self.request(|reply| Command::RandomBatches {
            limit,
            status,
            reply,
        })
        .await
    }

    pub async fn get_batch(&self, id: impl Into<String>) -> Result<Option<Batch>, StorageError> {
        let id = id.into();
        self.request(|reply| Command::GetBatch { id, reply }).await
    }

    pub async fn count_batches(&self, status: impl Into<String>) -> Result<u64, StorageError> {
        let status = status.into();
        self.request(|reply| Command::CountBatches { status, reply })
            .await
    }

    /// See [`Storage::create_message`].
    pub async fn create_message(&self, message: NewMessage) -> Result<bool, StorageError> {
        self.request(|reply| Command::CreateMessage { message, reply })
            .await
    }

    /// See [`Storage::update_message`].
    pub async fn update_message(
        &self,
        id: impl Into<String>,
        status: impl Into<String>,
        patch: MessagePatch,
    ) -> Result<bool, StorageError> {
        let (id, status) = (id.into(), status.into());
        self.request(|reply| Command::UpdateMessage {
            id,
            status,
            patch,
            reply,
        })
        .await
    }

    pub async fn get_message(
        &self,
        id: impl Into<String>,
    ) -> Result<Option<Message>, StorageError> {
        let id = id.into();
        self.request(|reply| Command::GetMessage { id, reply }).await
    }

    pub async fn batch_messages(
        &self,
        batch_id: impl Into<String>,
    ) -> Result<Vec<Message>, StorageError> {
        let batch_id = batch_id.into();
        self.request(|reply| Command::BatchMessages { batch_id, reply })
            .await
    }

    /// Stop the writer thread after the commands queued before this one.
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Shutdown { reply })
            .await
            .map_err(|_| StorageError::ChannelClosed)?;
        rx.await.map_err(|_| StorageError::ChannelClosed)
    }
}

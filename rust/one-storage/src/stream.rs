use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use one_common::Hash;

use crate::{
    HashedStore, Namespace, OneStorageError, RecordKind, StorageBackend, WriteStatus,
};

/// How stream chunks are encoded on the API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Text chunks carrying UTF-8 content.
    Utf8,
    /// Text chunks carrying base64-encoded binary content.
    Base64,
    /// Byte chunks.
    Binary,
}

impl Encoding {
    fn chunk_kind(&self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf8 text",
            Encoding::Base64 => "base64 text",
            Encoding::Binary => "binary",
        }
    }
}

/// One unit of stream content.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// Text content (UTF-8 or base64, depending on the stream encoding).
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

/// Chunk payload size for read streams.
const READ_CHUNK: usize = 8 * 1024;
/// Base64 read chunks cover a multiple of 3 input bytes so that the
/// concatenation of chunks is the base64 of the whole record.
const BASE64_READ_CHUNK: usize = 6 * 1024;

/// A finite, single-consumer, cancellable sequence of chunks over one
/// record.
#[derive(Debug)]
pub struct ReadStream {
    chunks: VecDeque<Chunk>,
    canceled: Arc<AtomicBool>,
}

impl ReadStream {
    /// The next chunk, or `None` at the end of the record. After
    /// [`ReadStream::cancel`] every call fails with `StreamCanceled`.
    pub async fn next(&mut self) -> Result<Option<Chunk>, OneStorageError> {
        if self.canceled.load(Ordering::Acquire) {
            return Err(OneStorageError::StreamCanceled);
        }
        Ok(self.chunks.pop_front())
    }

    /// Cancels the stream. In-flight chunk processing may finish; no
    /// further chunks are produced.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// A handle with which another task can cancel this stream.
    pub fn canceler(&self) -> ReadStreamCanceler {
        ReadStreamCanceler(Arc::clone(&self.canceled))
    }
}

/// Cancels an associated [`ReadStream`] from afar.
#[derive(Clone)]
pub struct ReadStreamCanceler(Arc<AtomicBool>);

impl ReadStreamCanceler {
    /// Cancels the stream.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// The terminal result of a write stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamWriteOutcome {
    /// The record name that was written.
    pub name: String,
    /// The content address, when the record was stored by hash.
    pub hash: Option<Hash>,
    /// Whether the record was created by this stream.
    pub status: WriteStatus,
}

/// A write stream: accepts a finite sequence of same-kind chunks followed by
/// [`WriteStream::end`], which performs the single store write.
///
/// Content is buffered and hashed as it arrives; nothing touches the store
/// until `end`, so a canceled stream writes nothing at all.
pub struct WriteStream<B: StorageBackend> {
    store: HashedStore<B>,
    namespace: Namespace,
    name: Option<String>,
    encoding: Encoding,
    buffer: Vec<u8>,
    canceled: bool,
}

impl<B: StorageBackend> WriteStream<B> {
    /// Feeds one chunk. The chunk's kind must match the stream's encoding.
    pub async fn write(&mut self, chunk: Chunk) -> Result<(), OneStorageError> {
        if self.canceled {
            return Err(OneStorageError::StreamCanceled);
        }
        match (self.encoding, chunk) {
            (Encoding::Utf8, Chunk::Text(text)) => {
                self.buffer.extend_from_slice(text.as_bytes());
            }
            (Encoding::Base64, Chunk::Text(text)) => {
                let bytes = STANDARD.decode(text.as_bytes()).map_err(|_| {
                    OneStorageError::ChunkTypeMismatch {
                        established: "base64 text",
                        received: "malformed base64",
                    }
                })?;
                self.buffer.extend_from_slice(&bytes);
            }
            (Encoding::Binary, Chunk::Bytes(bytes)) => {
                self.buffer.extend_from_slice(&bytes);
            }
            (encoding, Chunk::Text(_)) => {
                return Err(OneStorageError::ChunkTypeMismatch {
                    established: encoding.chunk_kind(),
                    received: "text",
                });
            }
            (encoding, Chunk::Bytes(_)) => {
                return Err(OneStorageError::ChunkTypeMismatch {
                    established: encoding.chunk_kind(),
                    received: "binary",
                });
            }
        }
        Ok(())
    }

    /// Cancels the stream; [`WriteStream::end`] will fail with
    /// `StreamCanceled` and nothing is written.
    pub fn cancel(&mut self) {
        self.canceled = true;
    }

    /// Finishes the stream: computes the content address (or uses the name
    /// supplied at open time) and writes the record once. Idempotent on the
    /// resulting name.
    pub async fn end(self) -> Result<StreamWriteOutcome, OneStorageError> {
        if self.canceled {
            return Err(OneStorageError::StreamCanceled);
        }
        let kind = match self.encoding {
            Encoding::Utf8 => RecordKind::Text,
            Encoding::Base64 | Encoding::Binary => RecordKind::Binary,
        };
        let allowed = match self.namespace {
            Namespace::Blobs => kind == RecordKind::Binary,
            Namespace::Private => true,
            _ => kind == RecordKind::Text,
        };
        if !allowed {
            return Err(OneStorageError::EncodingMismatch {
                namespace: self.namespace,
                name: self.name.clone().unwrap_or_default(),
                requested: self.encoding.chunk_kind(),
            });
        }

        let (name, hash) = match self.name {
            Some(name) => (name, None),
            None => {
                let hash = Hash::digest(&self.buffer);
                (hash.to_hex(), Some(hash))
            }
        };
        let status = self
            .store
            .write_unique_kind(self.namespace, &name, &self.buffer, kind)
            .await?;
        Ok(StreamWriteOutcome { name, hash, status })
    }
}

impl<B: StorageBackend> HashedStore<B> {
    /// Opens a read stream over a record.
    ///
    /// Text records must be consumed as [`Encoding::Utf8`]; binary records
    /// as [`Encoding::Binary`] or [`Encoding::Base64`]. Anything else fails
    /// with `EncodingMismatch` up front.
    pub async fn open_read_stream(
        &self,
        namespace: Namespace,
        name: &str,
        encoding: Encoding,
    ) -> Result<ReadStream, OneStorageError> {
        let (kind, bytes) = match self.get_raw(namespace, name).await? {
            Some(record) => record,
            None => {
                return Err(OneStorageError::FileNotFound {
                    namespace,
                    name: name.to_owned(),
                });
            }
        };
        let mismatch = || OneStorageError::EncodingMismatch {
            namespace,
            name: name.to_owned(),
            requested: encoding.chunk_kind(),
        };

        let chunks = match (kind, encoding) {
            (RecordKind::Text, Encoding::Utf8) => {
                let text = String::from_utf8(bytes).map_err(|_| mismatch())?;
                chunk_text(&text)
            }
            (RecordKind::Binary, Encoding::Binary) => bytes
                .chunks(READ_CHUNK)
                .map(|chunk| Chunk::Bytes(chunk.to_vec()))
                .collect(),
            (RecordKind::Binary, Encoding::Base64) => bytes
                .chunks(BASE64_READ_CHUNK)
                .map(|chunk| Chunk::Text(STANDARD.encode(chunk)))
                .collect(),
            _ => return Err(mismatch()),
        };
        Ok(ReadStream {
            chunks,
            canceled: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Opens a write stream into a namespace. With `name`, the record is
    /// stored under that name (blob-by-name); otherwise under the hash of
    /// its content.
    pub fn open_write_stream(
        &self,
        namespace: Namespace,
        encoding: Encoding,
        name: Option<String>,
    ) -> WriteStream<B> {
        WriteStream {
            store: self.clone(),
            namespace,
            name,
            encoding,
            buffer: Vec::new(),
            canceled: false,
        }
    }
}

/// Splits text into chunks of roughly [`READ_CHUNK`] bytes on char
/// boundaries.
fn chunk_text(text: &str) -> VecDeque<Chunk> {
    let mut chunks = VecDeque::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut split = READ_CHUNK.min(rest.len());
        while !rest.is_char_boundary(split) {
            split -= 1;
        }
        let (head, tail) = rest.split_at(split);
        chunks.push_back(Chunk::Text(head.to_owned()));
        rest = tail;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::MemoryStorageBackend;

    #[tokio::test]
    async fn it_streams_a_blob_in_and_out() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());

        let mut writer = store.open_write_stream(Namespace::Blobs, Encoding::Binary, None);
        writer.write(Chunk::Bytes(vec![1u8; 10_000])).await?;
        writer.write(Chunk::Bytes(vec![2u8; 10_000])).await?;
        let outcome = writer.end().await?;
        assert_eq!(outcome.status, WriteStatus::New);
        let hash = outcome.hash.unwrap();

        let mut reader = store
            .open_read_stream(Namespace::Blobs, &hash.to_hex(), Encoding::Binary)
            .await?;
        let mut collected = Vec::new();
        while let Some(Chunk::Bytes(bytes)) = reader.next().await? {
            collected.extend_from_slice(&bytes);
        }
        assert_eq!(collected.len(), 20_000);
        assert_eq!(Hash::digest(&collected), hash);
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_mixed_chunk_kinds() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let mut writer = store.open_write_stream(Namespace::Blobs, Encoding::Binary, None);
        writer.write(Chunk::Bytes(vec![1, 2, 3])).await?;
        let error = writer.write(Chunk::Text("nope".into())).await.unwrap_err();
        assert_eq!(error.code(), "ChunkTypeMismatch");
        Ok(())
    }

    #[tokio::test]
    async fn it_rejects_binary_reads_of_text_records() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let (hash, _) = store.write_clob("text").await?;
        let error = store
            .open_read_stream(Namespace::Clobs, &hash.to_hex(), Encoding::Binary)
            .await
            .unwrap_err();
        assert_eq!(error.code(), "EncodingMismatch");
        Ok(())
    }

    #[tokio::test]
    async fn it_base64_chunks_concatenate_to_the_whole_record() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let blob: Vec<u8> = (0..20_000u32).map(|n| (n % 251) as u8).collect();
        let (hash, _) = store.write_blob(&blob).await?;

        let mut reader = store
            .open_read_stream(Namespace::Blobs, &hash.to_hex(), Encoding::Base64)
            .await?;
        let mut encoded = String::new();
        while let Some(Chunk::Text(text)) = reader.next().await? {
            encoded.push_str(&text);
        }
        assert_eq!(STANDARD.decode(encoded.as_bytes())?, blob);
        Ok(())
    }

    #[tokio::test]
    async fn it_writes_nothing_when_canceled() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let mut writer = store.open_write_stream(Namespace::Blobs, Encoding::Binary, None);
        writer.write(Chunk::Bytes(vec![9u8; 64])).await?;
        let hash = Hash::digest(vec![9u8; 64]);
        writer.cancel();
        let error = writer.end().await.unwrap_err();
        assert_eq!(error.code(), "StreamCanceled");
        assert!(!store.exists(Namespace::Blobs, &hash.to_hex()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn it_cancels_read_streams_between_chunks() -> Result<()> {
        let store = HashedStore::new(MemoryStorageBackend::new());
        let (hash, _) = store.write_blob(&vec![1u8; 50_000]).await?;
        let mut reader = store
            .open_read_stream(Namespace::Blobs, &hash.to_hex(), Encoding::Binary)
            .await?;
        assert!(reader.next().await?.is_some());
        reader.canceler().cancel();
        let error = reader.next().await.unwrap_err();
        assert_eq!(error.code(), "StreamCanceled");
        Ok(())
    }
}

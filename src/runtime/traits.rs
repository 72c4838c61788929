//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the session executor, the store and the
//! emotion aggregator with in-memory and scripted implementations.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Durable local key/value storage, one JSON document per key
///
/// Writes are synchronous. Callers decide whether a failure matters; the
/// components in this crate log and carry on.
pub trait LocalStorage: Send + Sync {
    /// Read the document under `namespace`/`key`
    fn load(&self, namespace: &str, key: &str) -> Result<Option<String>, String>;

    /// Write the document under `namespace`/`key`
    fn save(&self, namespace: &str, key: &str, value: &str) -> Result<(), String>;

    /// Delete the document under `namespace`/`key`
    fn remove(&self, namespace: &str, key: &str) -> Result<(), String>;
}

/// Something observed on an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text frame arrived
    Frame(String),
    /// The channel reported an error; a close usually follows
    Error(String),
    /// The channel is gone
    Closed,
}

/// An open duplex channel of text frames
///
/// Dropping `outbound` asks the adapter to close the underlying connection.
#[derive(Debug)]
pub struct Duplex {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Connect failed: {0}")]
    Connect(String),
}

/// Dials a duplex channel for one conversation
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, conversation_id: &str) -> Result<Duplex, TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

impl<T: LocalStorage + ?Sized> LocalStorage for Arc<T> {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<String>, String> {
        (**self).load(namespace, key)
    }

    fn save(&self, namespace: &str, key: &str, value: &str) -> Result<(), String> {
        (**self).save(namespace, key, value)
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), String> {
        (**self).remove(namespace, key)
    }
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn connect(&self, conversation_id: &str) -> Result<Duplex, TransportError> {
        (**self).connect(conversation_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

use crate::db::Database;
use std::sync::Arc;

/// Adapter to use Database as `LocalStorage`
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl LocalStorage for DatabaseStorage {
    fn load(&self, namespace: &str, key: &str) -> Result<Option<String>, String> {
        self.db.get(namespace, key).map_err(|e| e.to_string())
    }

    fn save(&self, namespace: &str, key: &str, value: &str) -> Result<(), String> {
        self.db.put(namespace, key, value).map_err(|e| e.to_string())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), String> {
        self.db
            .remove(namespace, key)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

//! Driver-backed transport
//!
//! Implements [`AggregateTransport`] over raw database commands through the
//! official driver: `aggregate` opens the stream, `getMore` pages it, and
//! `killCursors` releases it. Reply parsing and command assembly are plain
//! functions so they stay testable without a server.

use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::Client;
use tracing::debug;

use aqueduct_common::{AqueductError, Result};

use crate::pipeline::AggregateOptions;
use crate::transport::{AggregateTransport, CursorBatch, CursorHandle};

/// Connection pool configuration for the driver transport
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections kept warm
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool
    pub max_pool_size: Option<u32>,
    /// Connection timeout (default: 10s)
    pub connect_timeout: Option<Duration>,
    /// Server selection timeout (default: 30s)
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(2),
            max_pool_size: Some(10),
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("aqueduct".to_string()),
        }
    }
}

/// [`AggregateTransport`] backed by the official driver
pub struct DriverTransport {
    client: Client,
}

impl DriverTransport {
    /// Connect with default pool settings
    pub async fn connect(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string)
            .await
            .map_err(|e| AqueductError::Connection(e.to_string()))?;

        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        // Pin the stable API so replies keep the documented cursor shape
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options)
            .map_err(|e| AqueductError::Connection(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wrap an already-configured driver client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Check connectivity by pinging the server
    pub async fn ping(&self, database: &str) -> Result<()> {
        self.client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl AggregateTransport for DriverTransport {
    async fn run_aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[BsonDocument],
        options: &AggregateOptions,
    ) -> Result<CursorBatch> {
        let command = build_aggregate_command(collection, pipeline, options);
        debug!("running aggregate on {}.{}", database, collection);
        let reply = self.client.database(database).run_command(command).await?;
        parse_cursor_reply(&reply)
    }

    async fn get_more(&self, handle: &CursorHandle) -> Result<CursorBatch> {
        let command = doc! {
            "getMore": handle.cursor_id,
            "collection": handle.collection.clone(),
        };
        let reply = self
            .client
            .database(&handle.database)
            .run_command(command)
            .await?;
        parse_cursor_reply(&reply)
    }

    async fn kill_cursor(&self, handle: &CursorHandle) -> Result<()> {
        let command = doc! {
            "killCursors": handle.collection.clone(),
            "cursors": [handle.cursor_id],
        };
        self.client
            .database(&handle.database)
            .run_command(command)
            .await?;
        Ok(())
    }
}

/// Assemble the aggregate command document
fn build_aggregate_command(
    collection: &str,
    pipeline: &[BsonDocument],
    options: &AggregateOptions,
) -> BsonDocument {
    let mut cursor_spec = BsonDocument::new();
    if let Some(size) = options.batch_size {
        cursor_spec.insert("batchSize", size as i32);
    }

    let mut command = doc! {
        "aggregate": collection,
        "pipeline": pipeline.to_vec(),
        "cursor": cursor_spec,
    };
    if options.allow_disk_use {
        command.insert("allowDiskUse", true);
    }
    if let Some(limit) = options.max_time {
        command.insert("maxTimeMS", limit.as_millis() as i64);
    }
    if let Some(comment) = &options.comment {
        command.insert("comment", comment.as_str());
    }
    command
}

/// Extract the cursor id and batch from an aggregate or getMore reply
fn parse_cursor_reply(reply: &BsonDocument) -> Result<CursorBatch> {
    let cursor = reply
        .get_document("cursor")
        .map_err(|e| AqueductError::Transport(format!("Malformed cursor reply: {}", e)))?;

    let cursor_id = cursor
        .get_i64("id")
        .map_err(|e| AqueductError::Transport(format!("Malformed cursor id: {}", e)))?;

    let batch = cursor
        .get_array("firstBatch")
        .or_else(|_| cursor.get_array("nextBatch"))
        .map_err(|e| AqueductError::Transport(format!("Malformed result batch: {}", e)))?;

    let mut documents = Vec::with_capacity(batch.len());
    for item in batch {
        match item {
            Bson::Document(document) => documents.push(document.clone()),
            other => {
                return Err(AqueductError::Transport(format!(
                    "Non-document item in result batch: {}",
                    other
                )))
            }
        }
    }

    Ok(CursorBatch {
        cursor_id,
        documents,
    })
}

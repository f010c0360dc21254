//! Transport seam between the pipeline core and the wire
//!
//! The core never talks to a server directly: submission, batch fetching and
//! cursor release all go through [`AggregateTransport`]. Production code uses
//! the driver-backed implementation in [`crate::driver`]; tests substitute
//! scripted implementations.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document as BsonDocument;
use tracing::debug;

use aqueduct_common::Result;

use crate::cursor::ResultCursor;
use crate::pipeline::{AggregateOptions, Pipeline};
use crate::validation::{validate_database_name, ValidatedCollectionName};

/// Server-side cursor handle
///
/// A `cursor_id` of 0 means the server has already reaped the cursor and no
/// release call is owed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorHandle {
    pub cursor_id: i64,
    pub database: String,
    pub collection: String,
}

impl CursorHandle {
    /// True when the server still holds resources for this cursor
    pub fn is_live(&self) -> bool {
        self.cursor_id != 0
    }
}

/// One reply batch plus the cursor id to use for the next fetch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CursorBatch {
    /// Id for subsequent fetches; 0 signals exhaustion
    pub cursor_id: i64,
    pub documents: Vec<BsonDocument>,
}

/// Wire collaborator executing aggregate commands
///
/// Implementations report server diagnostics as
/// [`AqueductError::PipelineExecution`](aqueduct_common::AqueductError) and
/// connectivity faults as
/// [`AqueductError::Transport`](aqueduct_common::AqueductError). No retry is
/// performed at this seam; retry policy belongs to the implementation.
#[async_trait]
pub trait AggregateTransport: Send + Sync {
    /// Run the aggregate command and return the first batch
    async fn run_aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: &[BsonDocument],
        options: &AggregateOptions,
    ) -> Result<CursorBatch>;

    /// Fetch the next batch for a live cursor
    async fn get_more(&self, handle: &CursorHandle) -> Result<CursorBatch>;

    /// Release a live server-side cursor
    async fn kill_cursor(&self, handle: &CursorHandle) -> Result<()>;
}

/// Entry point for submitting pipelines
pub struct AggregateClient {
    transport: Arc<dyn AggregateTransport>,
}

impl AggregateClient {
    /// Create a client over the given transport
    pub fn new(transport: Arc<dyn AggregateTransport>) -> Self {
        Self { transport }
    }

    /// Submit a pipeline against `database.collection` and wrap the server's
    /// reply stream in a [`ResultCursor`]
    ///
    /// The pipeline and options are consumed; no retry is attempted on
    /// failure.
    pub async fn aggregate(
        &self,
        database: &str,
        collection: &str,
        pipeline: Pipeline,
        options: AggregateOptions,
    ) -> Result<ResultCursor> {
        validate_database_name(database)?;
        ValidatedCollectionName::new(collection)?;
        options.validate()?;

        debug!(
            "submitting aggregate on {}.{} with {} stages",
            database,
            collection,
            pipeline.len()
        );

        let documents = pipeline.to_documents();
        let first = self
            .transport
            .run_aggregate(database, collection, &documents, &options)
            .await?;

        Ok(ResultCursor::new(
            Arc::clone(&self.transport),
            database,
            collection,
            first,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::stage::Stage;
    use aqueduct_common::AqueductError;
    use bson::doc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        submissions: AtomicUsize,
    }

    impl CountingTransport {
        fn new() -> Self {
            Self {
                submissions: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AggregateTransport for CountingTransport {
        async fn run_aggregate(
            &self,
            _database: &str,
            _collection: &str,
            _pipeline: &[BsonDocument],
            _options: &AggregateOptions,
        ) -> Result<CursorBatch> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(CursorBatch {
                cursor_id: 0,
                documents: vec![doc! { "a": 1 }],
            })
        }

        async fn get_more(&self, _handle: &CursorHandle) -> Result<CursorBatch> {
            Ok(CursorBatch::default())
        }

        async fn kill_cursor(&self, _handle: &CursorHandle) -> Result<()> {
            Ok(())
        }
    }

    fn single_stage_pipeline() -> Pipeline {
        let mut builder = PipelineBuilder::new();
        builder.append(Stage::Limit { n: 1 }).unwrap();
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn test_aggregate_yields_first_batch() {
        let transport = Arc::new(CountingTransport::new());
        let client = AggregateClient::new(transport.clone());

        let mut cursor = client
            .aggregate(
                "inventory",
                "orders",
                single_stage_pipeline(),
                AggregateOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(cursor.next().await.unwrap(), Some(doc! { "a": 1 }));
        assert_eq!(cursor.next().await.unwrap(), None);
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aggregate_rejects_bad_collection_before_submission() {
        let transport = Arc::new(CountingTransport::new());
        let client = AggregateClient::new(transport.clone());

        let err = client
            .aggregate(
                "inventory",
                "system.profile",
                single_stage_pipeline(),
                AggregateOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AqueductError::InvalidArgument(_)));
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_aggregate_rejects_bad_database_before_submission() {
        let transport = Arc::new(CountingTransport::new());
        let client = AggregateClient::new(transport.clone());

        let err = client
            .aggregate(
                "bad db",
                "orders",
                single_stage_pipeline(),
                AggregateOptions::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AqueductError::InvalidArgument(_)));
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_aggregate_rejects_zero_batch_size() {
        let transport = Arc::new(CountingTransport::new());
        let client = AggregateClient::new(transport.clone());

        let err = client
            .aggregate(
                "inventory",
                "orders",
                single_stage_pipeline(),
                AggregateOptions::new().batch_size(0),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AqueductError::InvalidArgument(_)));
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cursor_handle_liveness() {
        let live = CursorHandle {
            cursor_id: 42,
            database: "inventory".to_string(),
            collection: "orders".to_string(),
        };
        assert!(live.is_live());

        let reaped = CursorHandle {
            cursor_id: 0,
            ..live.clone()
        };
        assert!(!reaped.is_live());
    }
}

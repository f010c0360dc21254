//! Result cursor over a streamed aggregate reply
//!
//! A cursor is lazy, forward-only, and iterated once. It owns the
//! server-side cursor handle for its lifetime; the handle is released
//! exactly once, whether by normal exhaustion, explicit close, a mid-stream
//! fault, or drop.

use std::collections::VecDeque;
use std::sync::Arc;

use async_stream::try_stream;
use bson::Document as BsonDocument;
use futures::Stream;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use aqueduct_common::{AqueductError, Result};

use crate::transport::{AggregateTransport, CursorBatch, CursorHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Server still holds the cursor; more batches may follow
    Live,
    /// Server reported exhaustion; buffered documents may remain
    Exhausted,
    /// A fault was surfaced; no further documents are produced
    Failed,
    /// Explicitly closed by the caller
    Closed,
}

/// Lazy, forward-only stream of result documents
pub struct ResultCursor {
    transport: Arc<dyn AggregateTransport>,
    handle: CursorHandle,
    buffer: VecDeque<BsonDocument>,
    state: CursorState,
}

impl ResultCursor {
    pub(crate) fn new(
        transport: Arc<dyn AggregateTransport>,
        database: &str,
        collection: &str,
        first: CursorBatch,
    ) -> Self {
        let state = if first.cursor_id == 0 {
            CursorState::Exhausted
        } else {
            CursorState::Live
        };
        Self {
            transport,
            handle: CursorHandle {
                cursor_id: first.cursor_id,
                database: database.to_string(),
                collection: collection.to_string(),
            },
            buffer: first.documents.into(),
            state,
        }
    }

    /// Next result document, fetching batches from the transport as needed
    ///
    /// Returns `Ok(None)` at end-of-sequence. A mid-stream fault is surfaced
    /// once as `Err`; afterwards the cursor yields end-of-sequence and
    /// documents already returned remain valid. Suspends only while a batch
    /// fetch is in flight.
    pub async fn next(&mut self) -> Result<Option<BsonDocument>> {
        loop {
            if let Some(next) = self.buffer.pop_front() {
                return Ok(Some(next));
            }
            if self.state != CursorState::Live {
                return Ok(None);
            }

            debug!(
                "fetching next batch for cursor {} on {}.{}",
                self.handle.cursor_id, self.handle.database, self.handle.collection
            );
            match self.transport.get_more(&self.handle).await {
                Ok(batch) => {
                    self.handle.cursor_id = batch.cursor_id;
                    if batch.cursor_id == 0 {
                        self.state = CursorState::Exhausted;
                    }
                    self.buffer.extend(batch.documents);
                }
                Err(err) => {
                    self.state = CursorState::Failed;
                    self.release_handle().await;
                    return Err(err);
                }
            }
        }
    }

    /// Decode the next document into `T`
    pub async fn next_as<T: DeserializeOwned>(&mut self) -> Result<Option<T>> {
        match self.next().await? {
            Some(document) => {
                let value = bson::from_document(document)
                    .map_err(|e| AqueductError::Deserialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Drain the remaining documents into a Vec
    pub async fn collect_documents(mut self) -> Result<Vec<BsonDocument>> {
        let mut all = Vec::new();
        while let Some(document) = self.next().await? {
            all.push(document);
        }
        Ok(all)
    }

    /// Adapt the cursor to a `futures::Stream` of documents
    pub fn into_stream(mut self) -> impl Stream<Item = Result<BsonDocument>> {
        try_stream! {
            while let Some(document) = self.next().await? {
                yield document;
            }
        }
    }

    /// True while the server may still produce more batches
    pub fn is_live(&self) -> bool {
        self.state == CursorState::Live
    }

    /// Number of documents buffered client-side
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Release the server-side cursor
    ///
    /// Idempotent: closing an already closed, failed, or exhausted cursor is
    /// a no-op (the server has already reaped an exhausted cursor). Buffered
    /// documents are discarded.
    pub async fn close(&mut self) -> Result<()> {
        self.buffer.clear();
        if self.state != CursorState::Live {
            return Ok(());
        }
        self.state = CursorState::Closed;

        let handle = self.handle.clone();
        self.handle.cursor_id = 0;
        debug!(
            "closing cursor {} on {}.{}",
            handle.cursor_id, handle.database, handle.collection
        );
        self.transport.kill_cursor(&handle).await
    }

    /// Best-effort release after a fault; the surfaced error is the
    /// caller-visible outcome, so a failed kill is only logged
    async fn release_handle(&mut self) {
        if !self.handle.is_live() {
            return;
        }
        let handle = self.handle.clone();
        self.handle.cursor_id = 0;
        if let Err(err) = self.transport.kill_cursor(&handle).await {
            warn!("failed to release cursor {}: {}", handle.cursor_id, err);
        }
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("handle", &self.handle)
            .field("buffer", &self.buffer)
            .field("state", &self.state)
            .finish()
    }
}

impl Drop for ResultCursor {
    fn drop(&mut self) {
        if self.state == CursorState::Live && self.handle.is_live() {
            warn!(
                "result cursor {} dropped without close, scheduling release",
                self.handle.cursor_id
            );
            let transport = Arc::clone(&self.transport);
            let handle = self.handle.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    if let Err(err) = transport.kill_cursor(&handle).await {
                        warn!("failed to release cursor {}: {}", handle.cursor_id, err);
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bson::doc;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a scripted sequence of getMore outcomes and counts kills
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<CursorBatch>>>,
        fetches: AtomicUsize,
        kills: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<CursorBatch>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fetches: AtomicUsize::new(0),
                kills: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl AggregateTransport for ScriptedTransport {
        async fn run_aggregate(
            &self,
            _database: &str,
            _collection: &str,
            _pipeline: &[BsonDocument],
            _options: &crate::pipeline::AggregateOptions,
        ) -> Result<CursorBatch> {
            unreachable!("cursor tests construct the cursor directly")
        }

        async fn get_more(&self, _handle: &CursorHandle) -> Result<CursorBatch> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CursorBatch::default()))
        }

        async fn kill_cursor(&self, _handle: &CursorHandle) -> Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn cursor_over(
        transport: Arc<ScriptedTransport>,
        cursor_id: i64,
        documents: Vec<BsonDocument>,
    ) -> ResultCursor {
        ResultCursor::new(
            transport,
            "inventory",
            "orders",
            CursorBatch {
                cursor_id,
                documents,
            },
        )
    }

    #[tokio::test]
    async fn test_single_batch_yields_in_order() {
        let transport = ScriptedTransport::new(vec![]);
        let mut cursor = cursor_over(
            transport.clone(),
            0,
            vec![doc! { "a": 1 }, doc! { "a": 2 }],
        );

        assert_eq!(cursor.next().await.unwrap(), Some(doc! { "a": 1 }));
        assert_eq!(cursor.next().await.unwrap(), Some(doc! { "a": 2 }));
        assert_eq!(cursor.next().await.unwrap(), None);
        // exhausted without a single getMore or kill
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(transport.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_pagination_across_batches() {
        let transport = ScriptedTransport::new(vec![
            Ok(CursorBatch {
                cursor_id: 7,
                documents: vec![doc! { "n": 3 }, doc! { "n": 4 }],
            }),
            Ok(CursorBatch {
                cursor_id: 0,
                documents: vec![doc! { "n": 5 }],
            }),
        ]);
        let mut cursor = cursor_over(
            transport.clone(),
            7,
            vec![doc! { "n": 1 }, doc! { "n": 2 }],
        );

        let mut seen = Vec::new();
        while let Some(document) = cursor.next().await.unwrap() {
            seen.push(document.get_i32("n").unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(transport.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(transport.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fault_surfaces_once_then_end_of_sequence() {
        let transport = ScriptedTransport::new(vec![Err(AqueductError::PipelineExecution {
            code: Some(292),
            message: "Exceeded memory limit for $group".to_string(),
        })]);
        let mut cursor = cursor_over(transport.clone(), 7, vec![doc! { "a": 1 }]);

        // the document already delivered stays valid
        assert_eq!(cursor.next().await.unwrap(), Some(doc! { "a": 1 }));

        let err = cursor.next().await.unwrap_err();
        assert!(matches!(err, AqueductError::PipelineExecution { .. }));

        // no further documents, and the server cursor was released
        assert_eq!(cursor.next().await.unwrap(), None);
        assert_eq!(transport.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let transport = ScriptedTransport::new(vec![]);
        let mut cursor = cursor_over(transport.clone(), 7, vec![doc! { "a": 1 }]);

        cursor.close().await.unwrap();
        cursor.close().await.unwrap();
        assert_eq!(transport.kills.load(Ordering::SeqCst), 1);
        assert_eq!(cursor.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_after_exhaustion_is_noop() {
        let transport = ScriptedTransport::new(vec![]);
        let mut cursor = cursor_over(transport.clone(), 0, vec![doc! { "a": 1 }]);

        while cursor.next().await.unwrap().is_some() {}
        cursor.close().await.unwrap();
        assert_eq!(transport.kills.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_drop_schedules_release() {
        let transport = ScriptedTransport::new(vec![]);
        let cursor = cursor_over(transport.clone(), 7, vec![doc! { "a": 1 }]);
        drop(cursor);

        for _ in 0..100 {
            if transport.kills.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(transport.kills.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collect_documents() {
        let transport = ScriptedTransport::new(vec![Ok(CursorBatch {
            cursor_id: 0,
            documents: vec![doc! { "n": 2 }],
        })]);
        let cursor = cursor_over(transport, 7, vec![doc! { "n": 1 }]);

        let all = cursor.collect_documents().await.unwrap();
        assert_eq!(all, vec![doc! { "n": 1 }, doc! { "n": 2 }]);
    }

    #[tokio::test]
    async fn test_into_stream() {
        use futures::StreamExt;

        let transport = ScriptedTransport::new(vec![]);
        let cursor = cursor_over(transport, 0, vec![doc! { "n": 1 }, doc! { "n": 2 }]);

        let collected: Vec<_> = cursor.into_stream().collect().await;
        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].as_ref().unwrap(), &doc! { "n": 1 });
    }

    #[tokio::test]
    async fn test_next_as_decodes_documents() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Order {
            sku: String,
            qty: i32,
        }

        let transport = ScriptedTransport::new(vec![]);
        let mut cursor = cursor_over(
            transport,
            0,
            vec![doc! { "sku": "almonds", "qty": 5 }],
        );

        let order: Option<Order> = cursor.next_as().await.unwrap();
        assert_eq!(
            order,
            Some(Order {
                sku: "almonds".to_string(),
                qty: 5
            })
        );
        let done: Option<Order> = cursor.next_as().await.unwrap();
        assert!(done.is_none());
    }

    #[tokio::test]
    async fn test_next_as_surfaces_decode_error() {
        #[derive(Debug, Deserialize)]
        struct Order {
            #[allow(dead_code)]
            qty: i32,
        }

        let transport = ScriptedTransport::new(vec![]);
        let mut cursor = cursor_over(transport, 0, vec![doc! { "qty": "not a number" }]);

        let err = cursor.next_as::<Order>().await.unwrap_err();
        assert!(matches!(err, AqueductError::Deserialization(_)));
    }
}

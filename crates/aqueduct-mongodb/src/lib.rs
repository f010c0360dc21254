//! Client-side aggregation pipeline construction and result streaming
//!
//! This crate builds aggregation pipelines, serializes them to the command
//! form the server expects, and streams the reply back through a cursor.
//! Stage execution stays server-side; the wire itself sits behind the
//! [`AggregateTransport`] seam.
//!
//! # Features
//! - Typed stage model with local structural validation
//! - Order-preserving pipeline builder
//! - Lazy result cursor with transparent batch fetching
//! - Idempotent cursor release, including on drop
//! - Driver-backed transport with pooled connections
//! - Typed result decoding via serde

pub mod cursor;
pub mod driver;
pub mod pipeline;
pub mod stage;
pub mod transport;
pub mod validation;

pub use aqueduct_common::{AqueductError, Result};
pub use cursor::ResultCursor;
pub use driver::{DriverTransport, PoolConfig};
pub use pipeline::{AggregateOptions, Pipeline, PipelineBuilder};
pub use stage::{Accumulator, SortDirection, Stage};
pub use transport::{AggregateClient, AggregateTransport, CursorBatch, CursorHandle};
pub use validation::{
    validate_database_name, validate_field_path, validate_output_field, ValidatedCollectionName,
    ValidatedFieldPath,
};

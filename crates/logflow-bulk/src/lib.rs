pub mod action;
pub mod command;
pub mod computation;
pub mod error;
pub mod service;
pub mod status;

pub use action::{
    action_factory, ActionRegistry, BulkAction, BulkActionFactory, DocumentSelector,
    NoopTransactionRunner, TransactionRunner,
};
pub use command::{BulkBucket, BulkCommand, BulkCommandBuilder, DEFAULT_BUCKET_SIZE};
pub use computation::{BulkActionComputation, StatusComputation};
pub use error::{BulkError, Result};
pub use service::{BulkService, BulkServiceBuilder, DONE_STREAM, STATUS_STREAM};
pub use status::{BulkState, BulkStatus, StatusDelta, StatusMessage, StatusStore};

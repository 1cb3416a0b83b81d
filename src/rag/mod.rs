//! Retrieve-augment-generate: the query-time half of the knowledge base.

mod pipeline;

pub use pipeline::{AnswerEvent, QueryResult, RagPipeline, RetrievedDoc, SourceRef};

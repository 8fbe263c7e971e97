/// The main library module for dermasim
pub mod config;
pub mod error;
pub mod evaluation;
pub mod similarity;
pub mod store;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{LoadError, SearchError, SearchResult, StoreError, StoreResult};
pub use evaluation::{EvalQuery, EvaluationReport, Evaluator};
pub use similarity::{
    AnalysisMatch, IndexLifecycle, IndexState, MetadataJoiner, MetadataRecord, RefreshPolicy,
    SimilarityService,
};
pub use store::{MemoryRecordStore, RecordStore, StoredRecord};
pub use vector::{FlatIndex, ItemId, QueryResult, ReferenceItem, VectorDimension, VectorError};

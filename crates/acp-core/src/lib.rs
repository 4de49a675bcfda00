//! ACP Core - transformation-and-trust pipeline
//!
//! The part of the adversarial content pipeline that decides what a
//! visitor gets to see:
//! - Accumulates behavior events and transformations per session
//! - Transforms passages through a model call
//! - Gates every transformation (heuristics, then optional LLM check)
//! - Evaluates sampled batches against a rubric
//! - Persists reports with a recent-first index
//!
//! # Example
//!
//! ```rust,ignore
//! use acp_core::{MemoryStore, Pipeline, PipelineConfig, TransformKind, TransformRequest};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::load("acp.toml")?;
//! let pipeline = Pipeline::from_config(config, Arc::new(MemoryStore::new())).await?;
//!
//! let request = TransformRequest::new("tab-1", "intro", "I write about distributed systems.", TransformKind::Rewrite)
//!     .with_level(2);
//! let response = pipeline.handle_transform(request).await?;
//! println!("gate passed: {}", response.gate_passed);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod batch;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod gate;
pub mod kv;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod reports;
pub mod session;
pub mod transform;
pub mod types;

// Re-exports for convenience
pub use batch::{check_batch_trigger, BatchAccumulator, BatchPoll, TriggerDecision};
pub use config::{
    BatchPolicy, EvaluationConfig, ExpansionConfig, GateConfig, ModelConfig, PipelineConfig,
    ReportConfig, SessionConfig, TransformConfig,
};
pub use error::{
    ApiError, ConfigError, EvaluationError, ModelError, SessionError, StoreError, TransformError,
};
pub use evaluator::{BatchEvaluator, RandomSampler, Sampler};
pub use gate::{GateInput, GateOptions, QualityGate};
pub use kv::{KeyValueStore, MemoryStore};
pub use model::{HttpModelClient, ModelClient, ModelRequest, ModelResponse, UnconfiguredClient};
pub use pipeline::{
    EvaluateRequest, EvaluateResponse, ExpansionLookup, ExpansionQuery, Pipeline, ReportsQuery,
    ReportsResponse, RequestMeta, TransformResponse,
};
pub use reports::{ReportStore, SessionStore};
pub use session::{Session, SessionState};
pub use transform::{TransformOutput, TransformRequest, TransformService, ValidatedTransform};
pub use types::{
    BatchId, BatchSummary, BehaviorEvent, BehaviorKind, ChunkId, EvaluationBatch,
    EvaluationReport, GateResult, GateTier, GeoLocation, IntensityLevel, ReportAggregate,
    SessionId, SkipReason, TransformKind, TransformationRecord, TransformationScore,
    TriggerReason, VisitorInfo,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for hosting the pipeline
    pub use crate::{
        ApiError, BehaviorEvent, BehaviorKind, EvaluateRequest, ExpansionQuery, KeyValueStore,
        MemoryStore, ModelClient, Pipeline, PipelineConfig, ReportsQuery, RequestMeta,
        TransformKind, TransformRequest,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

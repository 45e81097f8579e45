//! RealityCheck analysis engine.
//!
//! Turns a submitted startup idea into a scored analysis: research queries
//! are planned, issued through a rate limiter and a single-flight cache,
//! the evidence is curated, six dimension analyzers score it concurrently
//! and the scores are combined into a weighted verdict, all under one
//! wall-clock deadline.

pub mod analyzer;
pub mod cache;
pub mod error;
pub mod gatherer;
pub mod limiter;
pub mod models;
pub mod normalizer;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod scoring;
pub mod store;

pub use error::{Error, Result};
pub use models::{Analysis, AnalysisRequest, AnalysisStatus, Dimension, Evidence, Idea};
pub use orchestrator::{EngineSettings, Orchestrator, Services};

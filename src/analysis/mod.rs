//! Remote analysis of screening images.
//!
//! [`AnalysisClient`] talks to the inference service; [`AnalysisWorker`]
//! runs it off the UI loop and tags every response so stale ones can be
//! dropped.

mod client;
mod result;
mod worker;

pub use client::{AnalysisClient, AnalysisError, AnalysisRequest, DEFAULT_BASE_URL, DEFAULT_TIMEOUT};
pub use result::{
    AnalysisResponse, Detection, PatientEcho, ResultStatus, ScreeningResult, Tone, MISSING_CLASS,
    NORMAL_CLASS,
};
pub use worker::{AnalysisWorker, RequestId, WorkerEvent};

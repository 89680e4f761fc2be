//! PyroVision fire and smoke frame relay
//!
//! Two halves share this crate:
//!
//! - **Server**: accepts one JPEG/PNG frame per HTTP request, runs a
//!   detector, draws the detections and answers with the annotated JPEG plus
//!   `X-Detection-Status` / `X-Detection-Message` headers.
//! - **Client**: captures frames from a camera or other source, sends them one
//!   at a time at a capped rate and tracks session counters.
//!
//! # Module Structure
//!
//! - `detect`: detector trait, detections, backends (colour heuristic, stub, tract)
//! - `status`: SAFE/WARNING/DANGER derivation from detections
//! - `annotate`: box drawing and JPEG encoding
//! - `service`: decode → detect → status → annotate pipeline
//! - `api`: blocking HTTP server and multipart handling
//! - `client`: HTTP client for the inference endpoints
//! - `ingest`: frame sources
//! - `stream`: client session state and the paced control loop
//! - `config`: file and environment configuration for both binaries

pub mod annotate;
pub mod api;
pub mod client;
pub mod config;
pub mod detect;
pub mod ingest;
pub mod service;
pub mod status;
pub mod stream;

pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use client::{ClientError, FrameInference, InferenceClient, RemoteResult};
pub use config::{ClientConfig, ServerConfig};
pub use detect::{BoundingBox, Detection, Detector};
pub use ingest::{open_source, Frame, FrameSource};
pub use service::{Endpoint, InferError, InferenceResult, InferenceService};
pub use status::{derive_status, SafetyStatus, StatusPolicy, StatusReport};
pub use stream::{run_session, SessionControl, SessionSummary, StreamSession};

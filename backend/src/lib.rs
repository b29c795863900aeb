//! Download gateway backend.
//!
//! Every download request passes through the [`admission::AdmissionController`]
//! (maintenance mode, video block list, per-client rate limit) before the
//! [`fetch::MediaFetcher`] collaborator is asked to extract and stream media.

pub mod admission;
pub mod config;
pub mod error;
pub mod fetch;
pub mod http;
pub mod settings;
pub mod stats;
pub mod video_id;

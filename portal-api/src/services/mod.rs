//! Service layer: orchestration between routes and storage.

mod record_service;

pub use record_service::{RecordPage, RecordPageCache, RecordService};

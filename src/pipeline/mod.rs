//! Attachment ingestion pipeline.
//!
//! One run flows through:
//! 1. `query::SearchCriteria::render()`: date-stamped mail search
//! 2. `locator::locate()`: first candidate carrying a matching attachment
//! 3. `archive::open()`: decode and decrypt the archive in memory
//! 4. `sync::sync()`: replace each member in the destination container
//!
//! `controller::PipelineController` sequences the stages for one job.

pub mod archive;
pub mod controller;
pub mod locator;
pub mod query;
pub mod sync;
pub mod types;

//! Progress-callback trait for multi-output conversions.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events while a multi-page document or a batch is encoded item by item.
//! Single-image conversions emit no events.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events anywhere (a terminal progress bar, a job
//! record, a websocket) without the library knowing how the host application
//! communicates. The trait is `Send + Sync` because pages may be encoded
//! concurrently when `page_concurrency > 1`.
//!
//! # Example
//!
//! ```rust
//! use pixmorph::{ConversionProgressCallback, PipelineConfig, ToolPaths};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl ConversionProgressCallback for Counter {
//!     fn on_page_complete(&self, page: usize, total: usize, bytes: u64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{page}/{total}: {bytes} bytes");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .tools(ToolPaths::default())
//!     .progress_callback(Arc::new(Counter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Receives per-item events. All methods default to no-ops.
///
/// `page` is 1-indexed. With `page_concurrency > 1`, `on_page_*` calls may
/// arrive from several threads and out of order.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once, after rasterization, before any page is encoded.
    fn on_conversion_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// `bytes` is the size of the encoded page.
    fn on_page_complete(&self, page: usize, total_pages: usize, bytes: u64) {
        let _ = (page, total_pages, bytes);
    }

    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once after every item has been attempted.
    fn on_conversion_complete(&self, total_pages: usize, success_count: usize) {
        let _ = (total_pages, success_count);
    }
}

/// A no-op implementation.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

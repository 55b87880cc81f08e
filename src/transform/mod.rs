//! Source documents to table rows

pub mod catalog;
pub mod event;
pub mod rows;

pub use catalog::transform_catalog_record;
pub use event::transform_event_batch;

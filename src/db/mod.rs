//! Database layer - connection pooling, statements, bulk copy and schema DDL

pub mod bulk;
pub mod pool;
pub mod repository;
pub mod schema;

pub use bulk::{SONGPLAY_COLUMNS, bulk_load};
pub use pool::Pool;
pub use repository::FileTransaction;

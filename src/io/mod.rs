//! Source file discovery and reading

pub mod local_reader;
pub mod locator;

pub use local_reader::LocalFileReader;
pub use locator::locate;

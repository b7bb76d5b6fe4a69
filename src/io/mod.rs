//! I/O layer for locating and reading source files

pub mod discovery;
pub mod local_reader;

pub use discovery::discover_json_files;
pub use local_reader::LocalFileReader;

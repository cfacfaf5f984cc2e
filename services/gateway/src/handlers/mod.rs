pub mod ingest;
pub mod state;
pub mod stream;

pub mod state;
pub mod summary;

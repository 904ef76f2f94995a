pub mod credentials;
pub mod errors;
pub mod events;
pub mod images;
pub mod models;
pub mod runs;
pub mod scenarios;
pub mod settings;

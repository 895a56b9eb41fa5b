pub mod artifacts;
pub mod backends;
pub mod errors;
pub mod evaluation;
pub mod events;
pub mod output;
pub mod summary;

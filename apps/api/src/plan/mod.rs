pub mod chat_input;
pub mod extract;
pub mod handlers;
pub mod models;
pub mod prompts;

pub use models::TripLimits;

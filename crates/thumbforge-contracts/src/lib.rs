pub mod backends;
pub mod events;
pub mod jobs;
pub mod layout;
pub mod request;
pub mod scoring;
pub mod tables;
pub mod zones;

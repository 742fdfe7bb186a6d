pub mod coordinator;
pub mod domain;
pub mod errors;
pub mod result;
pub mod sweeper;
pub mod tracker;
pub mod traits;
pub mod workspace;

pub mod process;
pub mod project_store;
pub mod runner;

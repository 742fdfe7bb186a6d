/// Implementations of the core traits that drive host toolchains directly
/// through tokio subprocesses.
pub mod listener;
pub mod process;
pub mod runners;

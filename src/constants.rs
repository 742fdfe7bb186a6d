use std::time::Duration;

pub const NO_OUTPUT_MESSAGE: &str = "Code executed successfully (no output)";
pub const UNSUPPORTED_LANGUAGE_OUTPUT: &str = "Language not supported for execution";

pub const TEMP_DIR_NAME: &str = "codeplay";
pub const WORKSPACE_PREFIX: &str = "temp";

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const RETENTION: Duration = Duration::from_secs(60 * 60);

pub const INTERPRETED_TIMEOUT: Duration = Duration::from_secs(10);
pub const COMPILED_TIMEOUT: Duration = Duration::from_secs(15);
pub const TOOLCHAIN_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for output pipes once the process group is gone.
pub const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(2);

pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const LISTENER_DEMO_WINDOW: Duration = Duration::from_secs(3);
pub const LISTENER_PORT_MIN: u16 = 4000;
pub const LISTENER_PORT_MAX: u16 = 9999;

pub const HIGH_TEMP_FILE_WATERMARK: usize = 10;

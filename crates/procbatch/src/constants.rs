//! Names and limits shared by the SQL emitter and the batch reader.

/// Column name of the result set carrying a command's produced output values.
pub const OUTPUT_MARKER_COLUMN: &str = "__ProcBatchOutput";

/// Column name of the result set that terminates every command's slice.
pub const END_MARKER_COLUMN: &str = "__ProcBatchEnd";

/// Server-side variable holding the index of the command being executed.
pub const COMMAND_INDEX_VARIABLE: &str = "@CmdIndex";

/// Server-side variable holding the session NOCOUNT setting at batch start.
pub const NOCOUNT_VARIABLE: &str = "@NoCount";

/// Last major server version without inline `DECLARE ... = value` support.
pub const LEGACY_DECLARE_MAX_MAJOR_VERSION: u16 = 9;

/// Upper bound of parameters in one request.
pub const MAX_PARAMETERS: usize = 2100;

/// Default timeout for acquiring a target's gates, in milliseconds.
pub const DEFAULT_GATE_ACQUIRE_TIMEOUT_MS: u64 = 30_000;

/// Default number of targets executed at the same time.
pub const DEFAULT_MAX_CONCURRENT_TARGETS: usize = 8;

/// Server version assumed when an executor cannot detect one.
pub const DEFAULT_SERVER_VERSION: &str = "15.0";

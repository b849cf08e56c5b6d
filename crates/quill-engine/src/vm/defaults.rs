//! Default constants for engine configuration.

/// Priority assigned to newly created processes.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Default maximum number of execution frames per process.
pub const DEFAULT_MAX_FRAMES: usize = 1000;

/// Default maximum value-stack depth per process (in slots).
pub const DEFAULT_MAX_VALUES: usize = 1024 * 64;

/// Process group id meaning "not in any group".
pub const NO_PROCESS_GROUP: u32 = 0;

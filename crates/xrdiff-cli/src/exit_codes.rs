//! Standard exit codes for CLI operations

#![allow(dead_code)]

/// Success - every input XR processed without error
pub const SUCCESS: i32 = 0;

/// General error - at least one XR failed to process
pub const ERROR: i32 = 1;

/// Input error - unreadable or unparsable input documents
pub const INPUT_ERROR: i32 = 2;

/// Cluster error - the cluster could not be reached or initialized
pub const CLUSTER_ERROR: i32 = 3;

/// Timeout - the overall deadline elapsed
pub const TIMEOUT: i32 = 4;

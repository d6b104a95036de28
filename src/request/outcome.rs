//! Callable outcomes and execution contexts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const COMPLETED_BIT: u8 = 1 << 0;
const ERROR_BIT: u8 = 1 << 1;

/// Result flag posted by a callable.
///
/// `Error` implies `Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    None,
    Completed,
    Error,
}

impl Outcome {
    fn bits(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Completed => COMPLETED_BIT,
            Self::Error => ERROR_BIT | COMPLETED_BIT,
        }
    }

    /// True if the completed bit is set (`Completed` or `Error`).
    pub fn is_completed(self) -> bool {
        self.bits() & COMPLETED_BIT == COMPLETED_BIT
    }

    /// True if the error bit is set.
    pub fn is_error(self) -> bool {
        self.bits() & ERROR_BIT == ERROR_BIT
    }
}

/// Strategy used to dispatch a request's queued callables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionContext {
    /// Unspecified; resolved to the configured default at execute time.
    #[default]
    Default,
    /// Run every callable synchronously, in enqueue order, on the calling thread.
    Immediate,
    /// Run the batch in enqueue order at the coordinator's next frame-boundary phase.
    FrameBoundary,
    /// Submit each callable independently to the shared worker pool.
    WorkerPool,
    /// Schedule each callable behind a slot of the bounded-parallelism ring.
    Chained,
}

impl ExecutionContext {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Immediate => "immediate",
            Self::FrameBoundary => "frame-boundary",
            Self::WorkerPool => "worker-pool",
            Self::Chained => "chained",
        }
    }

    pub(crate) fn to_u8(self) -> u8 {
        match self {
            Self::Default => 0,
            Self::Immediate => 1,
            Self::FrameBoundary => 2,
            Self::WorkerPool => 3,
            Self::Chained => 4,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self, EngineError> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::Immediate),
            2 => Ok(Self::FrameBoundary),
            3 => Ok(Self::WorkerPool),
            4 => Ok(Self::Chained),
            other => Err(EngineError::UnsupportedContext(other.to_string())),
        }
    }

    /// True for the strategies that hand work to other threads.
    pub fn is_parallel(self) -> bool {
        matches!(self, Self::WorkerPool | Self::Chained)
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionContext {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Self::Default),
            "immediate" => Ok(Self::Immediate),
            "frame-boundary" | "end-of-frame" | "frame_boundary" => Ok(Self::FrameBoundary),
            "worker-pool" | "thread-pool" | "worker_pool" => Ok(Self::WorkerPool),
            "chained" | "job-system" => Ok(Self::Chained),
            other => Err(EngineError::UnsupportedContext(other.to_string())),
        }
    }
}

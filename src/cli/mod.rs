//! CLI subcommands for the `deferred-runtime-cli` binary.
//!
//! ```bash
//! deferred-runtime-cli run --frames 600      # demo host loop
//! deferred-runtime-cli config show --json    # effective configuration
//! deferred-runtime-cli config validate       # exit 1 on ignored values
//! ```

pub mod config_cmd;
pub mod run_cmd;

pub use run_cmd::{run, RunOptions};

//! Crate-internal logging macros.
//!
//! Everything logs through `tracing` under `log_*` names. The crate never
//! installs a subscriber; applications choose their own.

pub(crate) use tracing::{
    debug as log_debug, error as log_error, info as log_info, trace as log_trace,
    warn as log_warn,
};

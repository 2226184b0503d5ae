//! Mirador daemon: owns the shared clone and serves switch requests over a
//! Unix socket, one blocking worker per request.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_flags, request_link, request_news, request_refresh, request_release, request_state,
    request_status, request_stop, request_switch, request_switch_any, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{build_service, init_tracing, run, start_blocking, Service, LOG_FORMAT_ENV};

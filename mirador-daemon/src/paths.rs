use std::path::{Path, PathBuf};

pub use mirador_core::store::mirador_root;

pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn socket_path(home: &Path) -> PathBuf {
    mirador_root(home).join(DAEMON_SOCKET)
}

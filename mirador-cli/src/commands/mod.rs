pub mod daemon;
pub mod diff;
pub mod init;
pub mod instance;
pub mod preview;
pub mod state;

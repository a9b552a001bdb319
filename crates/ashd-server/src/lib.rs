//! ashd-server: privilege-separated, audited shell session server.

pub mod cli;
pub mod pty;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use cli::Cli;
pub use resolver::PasswdResolver;
pub use server::{ServerConfig, SshServer};
pub use transport::TcpSessionSource;

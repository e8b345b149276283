//! A small embeddable SMTP server.
//!
//! Each accepted connection is driven by a [`Session`]: it reads bytes from
//! its [`Transport`], frames them into CRLF terminated lines, feeds the lines
//! to a [`Protocol`] and writes the replies back. STARTTLS swaps the transport
//! for an encrypted one in place, AUTH PLAIN gates mail transactions behind an
//! application supplied authenticator, and every accepted message is handed to
//! a [`MessageHandler`].
//!
//! # Examples
//! ```no_run
//! use smtpserve::{load_tls_config, Server};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut server = Server::new(|message| {
//!     println!("{} -> {:?}", message.from, message.to);
//!     Ok(())
//! });
//! server
//!     .with_name("smtp.example.org")
//!     .with_tls(load_tls_config("cert.pem", "key.pem")?)
//!     .with_authenticator(|user, password| {
//!         anyhow::ensure!(user == "alice" && password == "secret", "invalid credentials");
//!         Ok(())
//!     });
//! server.serve()
//! # }
//! ```

mod logger;
pub mod message;
pub mod protocol;
mod server;
mod session;
pub mod tls;
pub mod transport;

pub use crate::logger::Logger;
pub use crate::message::Message;
pub use crate::protocol::{Hooks, Machine, Protocol, Reply};
pub use crate::server::Server;
pub use crate::session::{Authenticator, MessageHandler, Session, SessionBuilder};
pub use crate::tls::load_tls_config;
pub use crate::transport::Transport;

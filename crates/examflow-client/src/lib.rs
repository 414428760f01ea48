//! Queue session client, transports, CLI
//!
//! This crate provides the real-time exam-workflow queue client and the
//! `examflow` command-line interface built on it.
//!
//! ```no_run
//! # async fn demo() -> Result<(), examflow_client::SessionError> {
//! use examflow_client::{QueueSession, SessionConfig};
//! use futures_util::StreamExt;
//!
//! let base = url::Url::parse("https://clinic.example.com").unwrap();
//! let session = QueueSession::new(SessionConfig::new(base));
//! session.connect("staff-42", || {}, |e| eprintln!("{}", e));
//!
//! // once connected:
//! let mut items = session.queue_items()?;
//! session.take_next_item("cardiology")?;
//! if let Some(item) = items.next().await {
//!     println!("assigned {}", item.queue_item_id);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod facade;
pub mod manager;
pub mod secret;
pub mod session;
pub mod subscription;
pub mod transport;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use facade::{QueueSession, SessionConfig};
pub use manager::{SessionLease, SessionManager};
pub use session::{
    CommandError, DecodeError, ReconnectPolicy, SessionError, SessionResult, SessionState,
    SessionStatus, StaffCredential,
};
pub use subscription::{Payload, Subscription, SubscriptionHandle, Unsubscriber};
pub use transport::{Transport, TransportKind};

//! # tor-ctrl
//!
//! An async engine for the Tor control protocol: one shared connection,
//! a FIFO command pipeline, and broadcast event observation.
//!
//! Unlike a plain request/response client, the engine multiplexes a
//! single control connection between any number of callers:
//!
//! - Commands are enqueued and executed strictly one at a time, in
//!   enqueue order, so replies always match their commands.
//! - Asynchronous `650` events are peeled off the stream and broadcast
//!   to registered observers without disturbing command replies.
//! - Teardown is race-free: every job that ever entered the pipeline
//!   resolves exactly once, whether with its reply, a cancellation, or
//!   a connection-loss error.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tor_ctrl::{CtrlConfig, Result, TorCtrl};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Connect to the default control port (127.0.0.1:9051).
//!     let ctrl = TorCtrl::connect(CtrlConfig::default()).await?;
//!
//!     let version = ctrl.get_version().await?;
//!     println!("Connected to Tor {version}");
//!
//!     // Request a new identity.
//!     ctrl.signal(tor_ctrl::Signal::NewNym).await?;
//!
//!     ctrl.destroy().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrent callers
//!
//! A [`TorCtrl`] is a cheap clone. Enqueue from as many tasks as you
//! like; each [`JobHandle`] resolves with its own command's result:
//!
//! ```rust,no_run
//! # use tor_ctrl::{cmd::GetInfo, Result, TorCtrl};
//! # async fn example(ctrl: TorCtrl) -> Result<()> {
//! let version = ctrl.enqueue(GetInfo::new("version"))?;
//! let uptime = ctrl.enqueue(GetInfo::new("uptime"))?;
//! println!("{} up for {}s", version.await?, uptime.await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Event Monitoring
//!
//! Observers are callbacks, delivered in registration order. A failing
//! observer never blocks the ones after it:
//!
//! ```rust,no_run
//! # use tor_ctrl::{EventType, Observer, Result, TorCtrl};
//! # async fn example(ctrl: TorCtrl) -> Result<()> {
//! ctrl.subscribe(Observer::new(EventType::Bw, |event| {
//!     println!("bandwidth: {}", event.payload);
//! }));
//! ctrl.set_events([EventType::Bw]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Authentication
//!
//! All four methods are supported; SAFECOOKIE verifies the server's
//! challenge hash before revealing anything derived from the cookie:
//!
//! ```rust,no_run
//! # use tor_ctrl::{AuthCredential, Result, TorCtrl};
//! # async fn example(ctrl: TorCtrl) -> Result<()> {
//! ctrl.authenticate(&AuthCredential::safe_cookie(
//!     "/var/run/tor/control.authcookie",
//! ))
//! .await?;
//! // Or let PROTOCOLINFO decide.
//! ctrl.auto_authenticate().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils`: an in-memory scriptable control port for testing
//!   code built on this crate.
//!
//! ## Protocol Compatibility
//!
//! Implements Tor Control Protocol version 1 as specified in the
//! [Tor Control Specification](https://spec.torproject.org/control-spec/).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod auth;
pub mod cmd;
pub mod config;
mod conn;
pub mod error;
pub mod events;
mod framing;
pub mod protocol;
mod queue;
mod transport;
pub mod types;
pub mod uncaught;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export the main surface for convenience.
pub use auth::{AuthCredential, AuthMethod, ProtocolInfo};
pub use cmd::TorCmd;
pub use config::{CtrlAddress, CtrlConfig};
pub use conn::{ConnState, TorCtrl};
pub use error::{Result, StatusCode, TorCtrlError};
pub use events::{
    EventKey, EventNotification, EventRegistry, EventType, ExecPolicy, Observer, ObserverId,
};
pub use protocol::{Command, Reply, ReplyLine};
pub use queue::{JobHandle, JobId};
pub use types::{CreatedOnionService, OnionAddress, Signal, TorVersion};
pub use uncaught::UncaughtError;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Tor Control Protocol version supported.
pub const PROTOCOL_VERSION: u32 = 1;

//! Advertising DNS-SD services through a local mDNS responder
//!
//! The cotton-dnssd crate keeps a named network service (name,
//! service type, port, TXT metadata) advertised by a local discovery
//! daemon -- such as Avahi, or an in-process responder -- and looks
//! after everything that can happen to it once it is out there: name
//! collisions with other services, local or remote, are resolved by
//! picking a new name ("Printer" becomes "Printer #2"); changes of
//! the daemon's own host name withdraw and then restore the service;
//! failures are reported rather than retried.
//!
//! The crate does not speak the mDNS wire protocol itself. That is
//! the daemon's job, and the daemon is reached through the [`Daemon`]
//! trait. Two implementations are provided: [`LocalDaemon`], which
//! keeps the books in-process and never touches the network, and,
//! with the `mdns-sd` feature, `MdnsSdDaemon`, which uses the
//! `mdns-sd` crate's responder.
//!
//! Everything is single-threaded and poll-driven. A [`Publisher`] is
//! the state machine for one service; a [`PollDriver`] owns a daemon
//! and any number of publishers, and must be given a chance to run
//! regularly by calling [`PollDriver::iterate`]. Programs that only
//! want one driver can use the free functions in [`global`] instead.

#![warn(rustdoc::missing_crate_level_docs)]

mod alternative;
mod config;
mod daemon;
mod error;
mod event;
pub mod global;
mod local_daemon;
#[cfg(feature = "mdns-sd")]
mod mdns_sd_daemon;
mod poll_driver;
mod publisher;
mod service_info;

pub use alternative::alternative_service_name;
pub use config::DriverConfig;
pub use daemon::{
    ClientState, ConnectionKey, Daemon, DaemonNotification, GroupKey,
    GroupState, PublisherKey, StateChange,
};
pub use error::{AddServiceError, DaemonError, Error};
pub use event::{Callback, CollisionKind, Event};
pub use local_daemon::{Fault, LocalDaemon};
#[cfg(feature = "mdns-sd")]
pub use mdns_sd_daemon::{MdnsSdConfig, MdnsSdDaemon};
pub use poll_driver::{Iteration, PollDriver};
pub use publisher::{Publisher, PublisherState};
pub use service_info::{PublishOptions, ServiceInfo, MAX_NAME_LENGTH};

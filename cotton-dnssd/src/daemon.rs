use crate::{AddServiceError, DaemonError, ServiceInfo};
use std::time::Duration;

slotmap::new_key_type! {
    /// Identifies one connection to the daemon
    pub struct ConnectionKey;

    /// Identifies one entry group on the daemon
    pub struct GroupKey;

    /// Identifies one published service within a [`crate::PollDriver`]
    pub struct PublisherKey;
}

/// The state of a daemon connection, as reported by the daemon
///
/// These mirror the state of the daemon itself: a host-name collision
/// on the network, for instance, sends every connection back through
/// `Collision` and `Registering` before `Running` again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Still waiting for the daemon
    Connecting,
    /// The daemon is (re-)establishing its own host records
    Registering,
    /// The daemon is up and its host name is established
    Running,
    /// The daemon's host name collided with another host
    Collision,
    /// The connection has failed for good
    Failure(DaemonError),
}

/// The state of an entry group, as reported by the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    /// Created or reset, and not yet committed
    Uncommitted,
    /// Committed; the daemon is probing the network
    Registering,
    /// The records are live on the network
    Established,
    /// Another host on the network already uses one of the names
    Collision,
    /// The daemon gave up on the group
    Failure(DaemonError),
}

/// What a [`DaemonNotification`] is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Client(ClientState),
    Group(GroupKey, GroupState),
}

/// A state change queued by the daemon for one observer
///
/// The observer is the publisher named when the connection was
/// opened; notifications about groups go to the observer of the
/// connection the group was created on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonNotification {
    pub observer: PublisherKey,
    pub change: StateChange,
}

/// A connection to a local discovery daemon
///
/// This is the whole of what the publishing state machine needs from
/// the daemon. Requests are fire-and-forget: their outcome arrives
/// later, as notifications returned by
/// [`Daemon::next_notification`] during [`crate::PollDriver::iterate`].
/// Nothing here may block.
///
/// See [`crate::LocalDaemon`] for an in-process implementation.
#[cfg_attr(test, mockall::automock)]
pub trait Daemon {
    /// Open a new connection, whose notifications go to `observer`
    ///
    /// # Errors
    ///
    /// Returns `Err` if the daemon is unreachable, or cannot allocate
    /// a connection.
    fn connect(
        &mut self,
        observer: PublisherKey,
    ) -> Result<ConnectionKey, DaemonError>;

    /// Close a connection, along with any groups still created on it
    fn disconnect(&mut self, connection: ConnectionKey);

    /// Create a new, empty, entry group on a connection
    ///
    /// # Errors
    ///
    /// Returns `Err` if the connection is not valid, or the daemon
    /// cannot allocate a group.
    fn new_group(
        &mut self,
        connection: ConnectionKey,
    ) -> Result<GroupKey, DaemonError>;

    /// Whether a group holds no records
    fn is_empty(&self, group: GroupKey) -> bool;

    /// Add a service record to an uncommitted group
    ///
    /// # Errors
    ///
    /// Returns [`AddServiceError::Collision`] if another group on this
    /// daemon already holds the name; `Other` for anything else.
    fn add_service(
        &mut self,
        group: GroupKey,
        service: &ServiceInfo,
    ) -> Result<(), AddServiceError>;

    /// Ask the daemon to start announcing a group's records
    ///
    /// # Errors
    ///
    /// Returns `Err` if the group is empty or otherwise not valid.
    fn commit(&mut self, group: GroupKey) -> Result<(), DaemonError>;

    /// Withdraw and remove all of a group's records, keeping the group
    fn reset(&mut self, group: GroupKey);

    /// Release a group
    fn free_group(&mut self, group: GroupKey);

    /// Let the backend collect pending I/O, for at most `timeout`
    fn pump(&mut self, timeout: Duration);

    /// Take the next queued notification, if any
    fn next_notification(&mut self) -> Option<DaemonNotification>;
}

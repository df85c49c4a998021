use crate::alternative::alternative_service_name;
use crate::daemon::{
    ClientState, ConnectionKey, Daemon, GroupKey, GroupState, PublisherKey,
};
use crate::event::{Callback, CollisionKind, Event};
use crate::{AddServiceError, Error, ServiceInfo};

/// Where a [`Publisher`] has got to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherState {
    /// Waiting for the daemon connection to reach `Running`
    Connecting,
    /// The entry group is committed; waiting to hear how it went
    Committed,
    /// The service is live on the network
    Established,
    /// The daemon is re-registering; records withdrawn until it's back
    Suspended,
    /// Stopped by a fatal error
    Failed(Error),
    /// Torn down by [`Publisher::close`]
    Removed,
}

/// The entry group a [`Publisher`] is associated with, if any
///
/// Group notifications are only accepted for the owned group, or,
/// while none is assigned yet, for whichever group the daemon reports
/// (which is then adopted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupSlot {
    Unassigned,
    Owned(GroupKey),
}

/// The state machine for one advertised service
///
/// A `Publisher` owns one daemon connection and at most one entry
/// group. It creates and commits the group once the connection is
/// running, renames the service whenever the daemon reports a
/// collision, and withdraws the records while the daemon re-registers
/// its host name.
///
/// It does not own the daemon; every operation takes the [`Daemon`]
/// as a parameter. This low-level facility is usually wrapped-up in a
/// [`crate::PollDriver`], which routes daemon notifications to the
/// right `Publisher`.
pub struct Publisher<CB: Callback> {
    info: ServiceInfo,
    connection: Option<ConnectionKey>,
    group: GroupSlot,
    state: PublisherState,
    callback: CB,
}

impl<CB: Callback> Publisher<CB> {
    /// Create a new, unconnected, `Publisher`
    #[must_use]
    pub fn new(info: ServiceInfo, callback: CB) -> Self {
        Self {
            info,
            connection: None,
            group: GroupSlot::Unassigned,
            state: PublisherState::Connecting,
            callback,
        }
    }

    #[must_use]
    pub fn service(&self) -> &ServiceInfo {
        &self.info
    }

    #[must_use]
    pub fn state(&self) -> &PublisherState {
        &self.state
    }

    /// The entry group currently owned, if any
    #[must_use]
    pub fn group(&self) -> Option<GroupKey> {
        match self.group {
            GroupSlot::Owned(g) => Some(g),
            GroupSlot::Unassigned => None,
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(
            self.state,
            PublisherState::Failed(_) | PublisherState::Removed
        )
    }

    /// Connect to the daemon, naming `key` as the observer
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the daemon cannot be reached.
    /// Nothing is retried.
    pub fn open(
        &mut self,
        key: PublisherKey,
        daemon: &mut dyn Daemon,
    ) -> Result<(), Error> {
        match daemon.connect(key) {
            Ok(connection) => {
                self.connection = Some(connection);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to connect for '{}': {}",
                    self.info.name(),
                    e
                );
                Err(Error::Connection(e))
            }
        }
    }

    /// Handle a change in the state of the daemon connection
    ///
    /// # Errors
    ///
    /// Returns the fatal error, if this change stopped the service.
    /// It has already been reported to the callback.
    pub fn on_client_state(
        &mut self,
        state: ClientState,
        daemon: &mut dyn Daemon,
    ) -> Result<(), Error> {
        if self.is_stopped() {
            return Ok(());
        }
        match state {
            ClientState::Running => self.create_services(daemon),
            ClientState::Failure(e) => {
                // The connection is gone; nothing to roll back
                self.abandon(Error::Connection(e), None)
            }
            ClientState::Collision | ClientState::Registering => {
                if let GroupSlot::Owned(g) = self.group {
                    daemon.reset(g);
                    self.state = PublisherState::Suspended;
                    tracing::warn!(
                        "Withdrawing service '{}' while the host name settles",
                        self.info.name()
                    );
                    self.callback.on_event(&Event::Withdrawn {
                        name: self.info.name().to_string(),
                    });
                }
                Ok(())
            }
            ClientState::Connecting => Ok(()),
        }
    }

    /// Handle a change in the state of an entry group
    ///
    /// Notifications about any group other than the owned one are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns the fatal error, if this change stopped the service.
    /// It has already been reported to the callback.
    pub fn on_group_state(
        &mut self,
        group: GroupKey,
        state: GroupState,
        daemon: &mut dyn Daemon,
    ) -> Result<(), Error> {
        if self.is_stopped() {
            return Ok(());
        }
        match self.group {
            GroupSlot::Owned(g) if g != group => {
                tracing::trace!(
                    "Ignoring {:?} from stale group {:?}",
                    state,
                    group
                );
                return Ok(());
            }
            GroupSlot::Unassigned => self.group = GroupSlot::Owned(group),
            GroupSlot::Owned(_) => {}
        }

        match state {
            GroupState::Established => {
                self.state = PublisherState::Established;
                tracing::info!(
                    "Service '{}' successfully established",
                    self.info.name()
                );
                self.callback.on_event(&Event::Established {
                    name: self.info.name().to_string(),
                });
                Ok(())
            }
            GroupState::Collision => {
                self.rename(CollisionKind::Remote);
                daemon.reset(group);
                self.create_services(daemon)
            }
            GroupState::Failure(e) => {
                self.abandon(Error::GroupFailure(e), Some(daemon))
            }
            GroupState::Uncommitted | GroupState::Registering => Ok(()),
        }
    }

    /// Create, populate and commit the entry group
    ///
    /// Does nothing if the group already holds the service record.
    /// Local collisions are resolved here, by renaming and trying
    /// again for as long as the daemon keeps reporting them.
    fn create_services(&mut self, daemon: &mut dyn Daemon) -> Result<(), Error> {
        let Some(connection) = self.connection else {
            return Ok(());
        };

        let group = match self.group {
            GroupSlot::Owned(g) => g,
            GroupSlot::Unassigned => match daemon.new_group(connection) {
                Ok(g) => {
                    self.group = GroupSlot::Owned(g);
                    g
                }
                Err(e) => return self.abandon(Error::GroupCreation(e), None),
            },
        };

        if !daemon.is_empty(group) {
            return Ok(());
        }

        loop {
            tracing::info!("Adding service '{}'", self.info.name());
            self.callback.on_event(&Event::Adding {
                name: self.info.name().to_string(),
            });
            match daemon.add_service(group, &self.info) {
                Ok(()) => break,
                Err(AddServiceError::Collision) => {
                    self.rename(CollisionKind::Local);
                    daemon.reset(group);
                }
                Err(AddServiceError::Other(e)) => {
                    return self
                        .abandon(Error::ServiceRegistration(e), Some(daemon));
                }
            }
        }

        if let Err(e) = daemon.commit(group) {
            return self.abandon(Error::Commit(e), Some(daemon));
        }
        self.state = PublisherState::Committed;
        Ok(())
    }

    fn rename(&mut self, cause: CollisionKind) {
        let to = alternative_service_name(self.info.name());
        tracing::info!(
            "Service name collision, renaming service to '{}'",
            to
        );
        let from = self.info.rename(to.clone());
        self.callback.on_event(&Event::Renamed { from, to, cause });
    }

    /// Stop for good, rolling back the group first if asked to
    ///
    /// The handles are kept: [`Publisher::close`] still releases them.
    fn abandon(
        &mut self,
        error: Error,
        rollback: Option<&mut dyn Daemon>,
    ) -> Result<(), Error> {
        if let (Some(daemon), GroupSlot::Owned(g)) = (rollback, self.group) {
            daemon.reset(g);
        }
        tracing::error!("Service '{}' failed: {}", self.info.name(), error);
        self.state = PublisherState::Failed(error.clone());
        self.callback.on_event(&Event::Failed {
            name: self.info.name().to_string(),
            error: error.clone(),
        });
        Err(error)
    }

    /// Release the entry group, then the connection
    ///
    /// Safe to call more than once, and whether or not the group was
    /// ever committed.
    pub fn close(&mut self, daemon: &mut dyn Daemon) {
        if let GroupSlot::Owned(g) =
            core::mem::replace(&mut self.group, GroupSlot::Unassigned)
        {
            daemon.reset(g);
            daemon.free_group(g);
        }
        if let Some(c) = self.connection.take() {
            daemon.disconnect(c);
        }
        self.state = PublisherState::Removed;
    }
}

#[cfg(test)]
#[path = "tests/publisher.rs"]
mod tests;

use crate::daemon::{
    ClientState, ConnectionKey, Daemon, DaemonNotification, GroupKey,
    GroupState, PublisherKey, StateChange,
};
use crate::{AddServiceError, DaemonError, ServiceInfo};
use slotmap::SlotMap;
use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// A daemon request which can be made to fail, see
/// [`LocalDaemon::inject_fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Connect,
    NewGroup,
    AddService,
    Commit,
}

struct Connection {
    observer: PublisherKey,
}

struct Group {
    connection: ConnectionKey,
    observer: PublisherKey,
    entries: Vec<ServiceInfo>,
    committed: bool,
}

impl Group {
    fn holds(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name() == name)
    }
}

struct Inner {
    server: ClientState,
    connections: SlotMap<ConnectionKey, Connection>,
    groups: SlotMap<GroupKey, Group>,
    remote_names: HashSet<String>,
    faults: Vec<Fault>,
    queue: VecDeque<DaemonNotification>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            server: ClientState::Running,
            connections: SlotMap::with_key(),
            groups: SlotMap::with_key(),
            remote_names: HashSet::new(),
            faults: Vec::new(),
            queue: VecDeque::new(),
        }
    }
}

impl Inner {
    fn take_fault(&mut self, fault: Fault) -> bool {
        if let Some(n) = self.faults.iter().position(|f| *f == fault) {
            self.faults.swap_remove(n);
            true
        } else {
            false
        }
    }

    fn notify_group(&mut self, key: GroupKey, state: GroupState) {
        if let Some(group) = self.groups.get(key) {
            self.queue.push_back(DaemonNotification {
                observer: group.observer,
                change: StateChange::Group(key, state),
            });
        }
    }

    /// Settle a committed group: established, or colliding with a
    /// remote name
    fn probe(&mut self, key: GroupKey) {
        let Some(group) = self.groups.get(key) else {
            return;
        };
        if !group.committed || self.server != ClientState::Running {
            return;
        }
        let claimed = group
            .entries
            .iter()
            .any(|e| self.remote_names.contains(e.name()));
        let state = if claimed {
            GroupState::Collision
        } else {
            GroupState::Established
        };
        self.notify_group(key, state);
    }
}

/// A discovery daemon that lives inside the process
///
/// `LocalDaemon` keeps the same books as a real mDNS responder
/// (connections, entry groups, which names are taken) and reports the
/// same state changes, but never touches the network. Names can be
/// marked as taken by other hosts with [`LocalDaemon::claim_remote`],
/// and daemon-wide state changes (host name collisions, failures)
/// simulated with [`LocalDaemon::set_server_state`].
///
/// Clones share state, so a clone kept aside can be used to steer and
/// inspect a `LocalDaemon` that has been handed to a
/// [`crate::PollDriver`].
#[derive(Clone, Default)]
pub struct LocalDaemon {
    inner: Rc<RefCell<Inner>>,
}

impl LocalDaemon {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next request of this kind fail
    pub fn inject_fault(&self, fault: Fault) {
        self.inner.borrow_mut().faults.push(fault);
    }

    /// Pretend that another host on the network uses `name`
    ///
    /// Any committed group holding that name collides.
    pub fn claim_remote(&self, name: impl Into<String>) {
        let name = name.into();
        let mut inner = self.inner.borrow_mut();
        let colliding: Vec<GroupKey> = inner
            .groups
            .iter()
            .filter(|(_, g)| g.committed && g.holds(&name))
            .map(|(k, _)| k)
            .collect();
        inner.remote_names.insert(name);
        for key in colliding {
            inner.notify_group(key, GroupState::Collision);
        }
    }

    /// The other host using `name` has gone away
    pub fn release_remote(&self, name: &str) {
        self.inner.borrow_mut().remote_names.remove(name);
    }

    /// Change the state of the daemon itself
    ///
    /// Every connection is told. Committed groups are settled again
    /// when the daemon returns to `Running`.
    pub fn set_server_state(&self, state: ClientState) {
        let mut inner = self.inner.borrow_mut();
        inner.server = state.clone();
        let observers: Vec<PublisherKey> =
            inner.connections.values().map(|c| c.observer).collect();
        for observer in observers {
            inner.queue.push_back(DaemonNotification {
                observer,
                change: StateChange::Client(state.clone()),
            });
        }
        if state == ClientState::Running {
            let keys: Vec<GroupKey> = inner.groups.keys().collect();
            for key in keys {
                inner.probe(key);
            }
        }
    }

    /// Report failure of whichever group holds `name`
    pub fn fail_group(&self, name: &str, error: DaemonError) {
        let mut inner = self.inner.borrow_mut();
        let keys: Vec<GroupKey> = inner
            .groups
            .iter()
            .filter(|(_, g)| g.holds(name))
            .map(|(k, _)| k)
            .collect();
        for key in keys {
            inner.notify_group(key, GroupState::Failure(error.clone()));
        }
    }

    /// Names currently announced, in order
    #[must_use]
    pub fn announced_names(&self) -> Vec<String> {
        let inner = self.inner.borrow();
        let mut names: Vec<String> = inner
            .groups
            .values()
            .filter(|g| g.committed)
            .flat_map(|g| g.entries.iter().map(|e| e.name().to_string()))
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.inner.borrow().connections.len()
    }

    #[must_use]
    pub fn group_count(&self) -> usize {
        self.inner.borrow().groups.len()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.borrow().queue.len()
    }
}

impl Daemon for LocalDaemon {
    fn connect(
        &mut self,
        observer: PublisherKey,
    ) -> Result<ConnectionKey, DaemonError> {
        let mut inner = self.inner.borrow_mut();
        if inner.take_fault(Fault::Connect) {
            return Err(DaemonError::Unreachable);
        }
        let key = inner.connections.insert(Connection { observer });
        let state = inner.server.clone();
        inner.queue.push_back(DaemonNotification {
            observer,
            change: StateChange::Client(state),
        });
        Ok(key)
    }

    fn disconnect(&mut self, connection: ConnectionKey) {
        let mut inner = self.inner.borrow_mut();
        if inner.connections.remove(connection).is_some() {
            inner.groups.retain(|_, g| g.connection != connection);
        }
    }

    fn new_group(
        &mut self,
        connection: ConnectionKey,
    ) -> Result<GroupKey, DaemonError> {
        let mut inner = self.inner.borrow_mut();
        if inner.take_fault(Fault::NewGroup) {
            return Err(DaemonError::ResourceExhausted);
        }
        let observer = inner
            .connections
            .get(connection)
            .ok_or(DaemonError::Disconnected)?
            .observer;
        let key = inner.groups.insert(Group {
            connection,
            observer,
            entries: Vec::new(),
            committed: false,
        });
        inner.notify_group(key, GroupState::Uncommitted);
        Ok(key)
    }

    fn is_empty(&self, group: GroupKey) -> bool {
        self.inner
            .borrow()
            .groups
            .get(group)
            .map_or(true, |g| g.entries.is_empty())
    }

    fn add_service(
        &mut self,
        group: GroupKey,
        service: &ServiceInfo,
    ) -> Result<(), AddServiceError> {
        let mut inner = self.inner.borrow_mut();
        if inner.take_fault(Fault::AddService) {
            return Err(AddServiceError::Other(DaemonError::Backend(
                "injected".to_string(),
            )));
        }
        match inner.groups.get(group) {
            None => return Err(AddServiceError::Other(DaemonError::BadState)),
            Some(g) if g.committed => {
                return Err(AddServiceError::Other(DaemonError::BadState))
            }
            Some(_) => {}
        }
        let taken = inner.groups.iter().any(|(k, g)| {
            k != group
                && g.entries.iter().any(|e| {
                    e.name() == service.name()
                        && e.service_type() == service.service_type()
                })
        });
        if taken {
            return Err(AddServiceError::Collision);
        }
        inner.groups[group].entries.push(service.clone());
        Ok(())
    }

    fn commit(&mut self, group: GroupKey) -> Result<(), DaemonError> {
        let mut inner = self.inner.borrow_mut();
        if inner.take_fault(Fault::Commit) {
            return Err(DaemonError::Backend("injected".to_string()));
        }
        let g = inner.groups.get_mut(group).ok_or(DaemonError::BadState)?;
        if g.entries.is_empty() {
            return Err(DaemonError::IsEmpty);
        }
        g.committed = true;
        inner.notify_group(group, GroupState::Registering);
        inner.probe(group);
        Ok(())
    }

    fn reset(&mut self, group: GroupKey) {
        let mut inner = self.inner.borrow_mut();
        if let Some(g) = inner.groups.get_mut(group) {
            g.entries.clear();
            g.committed = false;
            inner.notify_group(group, GroupState::Uncommitted);
        }
    }

    fn free_group(&mut self, group: GroupKey) {
        self.inner.borrow_mut().groups.remove(group);
    }

    fn pump(&mut self, _timeout: Duration) {}

    fn next_notification(&mut self) -> Option<DaemonNotification> {
        self.inner.borrow_mut().queue.pop_front()
    }
}

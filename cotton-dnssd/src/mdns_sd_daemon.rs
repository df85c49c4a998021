use crate::daemon::{
    ClientState, ConnectionKey, Daemon, DaemonNotification, GroupKey,
    GroupState, PublisherKey, StateChange,
};
use crate::{AddServiceError, DaemonError, ServiceInfo};
use serde::Deserialize;
use slotmap::SlotMap;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Settings for [`MdnsSdDaemon`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MdnsSdConfig {
    /// Host name to advertise; defaults to the system host name
    #[serde(default)]
    pub host_name: Option<String>,

    /// Comma-separated addresses to advertise; empty means all of
    /// this host's addresses
    #[serde(default)]
    pub address: String,
}

/// Append ".local." to a bare host name or service type
fn qualify(name: &str) -> String {
    let name = name.trim_end_matches('.');
    if name.ends_with(".local") {
        format!("{name}.")
    } else {
        format!("{name}.local.")
    }
}

fn backend_error(e: impl core::fmt::Display) -> DaemonError {
    DaemonError::Backend(e.to_string())
}

struct Group {
    connection: ConnectionKey,
    observer: PublisherKey,
    entries: Vec<ServiceInfo>,
    /// Full names handed to the responder
    registered: Vec<String>,
    /// Registered names not yet announced
    unannounced: Vec<String>,
}

/// Connections and entry groups, and what the responder has said
/// about them
#[derive(Default)]
struct Books {
    connections: SlotMap<ConnectionKey, PublisherKey>,
    groups: SlotMap<GroupKey, Group>,
    queue: VecDeque<DaemonNotification>,
    disconnected: bool,
}

impl Books {
    fn notify_group(&mut self, key: GroupKey, state: GroupState) {
        if let Some(group) = self.groups.get(key) {
            self.queue.push_back(DaemonNotification {
                observer: group.observer,
                change: StateChange::Group(key, state),
            });
        }
    }

    /// The responder has announced `fullname`
    ///
    /// A group is established once every record in it has been
    /// announced; later re-announcements change nothing.
    fn announced(&mut self, fullname: &str) {
        let settled: Vec<GroupKey> = self
            .groups
            .iter_mut()
            .filter_map(|(k, g)| {
                let n = g.unannounced.iter().position(|f| f == fullname)?;
                g.unannounced.swap_remove(n);
                g.unannounced.is_empty().then_some(k)
            })
            .collect();
        for key in settled {
            self.notify_group(key, GroupState::Established);
        }
    }

    /// The responder reported an error; every group with records out
    /// there has failed
    fn failed(&mut self, error: &DaemonError) {
        let live: Vec<GroupKey> = self
            .groups
            .iter()
            .filter(|(_, g)| !g.registered.is_empty())
            .map(|(k, _)| k)
            .collect();
        for key in live {
            self.notify_group(key, GroupState::Failure(error.clone()));
        }
    }

    /// The responder thread has gone; every connection has failed
    fn lost(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        let observers: Vec<PublisherKey> =
            self.connections.values().copied().collect();
        for observer in observers {
            self.queue.push_back(DaemonNotification {
                observer,
                change: StateChange::Client(ClientState::Failure(
                    DaemonError::Disconnected,
                )),
            });
        }
    }
}

/// A [`Daemon`] backed by the `mdns-sd` crate's responder
///
/// `mdns-sd` runs its own responder thread; this adapter keeps the
/// books for connections and entry groups, registers a group's
/// services when it is committed, and unregisters them again when it
/// is reset. `mdns-sd` does not probe for conflicting names, so the
/// only collisions reported are local ones. A committed group becomes
/// `Established` when the responder reports having announced all of
/// its records; responder errors fail every group with records
/// registered. Both arrive on the responder's monitor channel, which
/// is read by [`Daemon::pump`].
pub struct MdnsSdDaemon {
    responder: mdns_sd::ServiceDaemon,
    events: mdns_sd::Receiver<mdns_sd::DaemonEvent>,
    host_name: String,
    address: String,
    books: Books,
}

impl MdnsSdDaemon {
    /// Start the responder
    ///
    /// # Errors
    ///
    /// Returns `Err` if the system host name cannot be read, or the
    /// responder cannot be started (e.g. no sockets).
    pub fn new(config: &MdnsSdConfig) -> Result<Self, DaemonError> {
        let host_name = match &config.host_name {
            Some(h) => h.clone(),
            None => hostname::get()
                .map_err(backend_error)?
                .to_string_lossy()
                .to_string(),
        };
        let responder =
            mdns_sd::ServiceDaemon::new().map_err(backend_error)?;
        let events = responder.monitor().map_err(backend_error)?;
        tracing::info!("Started mDNS responder as {}", host_name);
        Ok(Self {
            responder,
            events,
            host_name: qualify(&host_name),
            address: config.address.clone(),
            books: Books::default(),
        })
    }

    fn to_mdns(
        &self,
        service: &ServiceInfo,
    ) -> Result<mdns_sd::ServiceInfo, DaemonError> {
        let properties: HashMap<String, String> = service
            .txt_records()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let info = mdns_sd::ServiceInfo::new(
            &qualify(service.service_type()),
            service.name(),
            &self.host_name,
            self.address.as_str(),
            service.port(),
            properties,
        )
        .map_err(backend_error)?;
        Ok(if self.address.is_empty() {
            info.enable_addr_auto()
        } else {
            info
        })
    }

    fn withdraw(&mut self, key: GroupKey) {
        let Some(group) = self.books.groups.get_mut(key) else {
            return;
        };
        for fullname in group.registered.drain(..) {
            if let Err(e) = self.responder.unregister(&fullname) {
                tracing::debug!("Failed to unregister {}: {}", fullname, e);
            }
        }
        group.unannounced.clear();
        group.entries.clear();
    }

    fn on_responder_event(&mut self, event: mdns_sd::DaemonEvent) {
        match event {
            mdns_sd::DaemonEvent::Announce(fullname, addrs) => {
                tracing::debug!("Announced {} on {}", fullname, addrs);
                self.books.announced(&fullname);
            }
            mdns_sd::DaemonEvent::Error(e) => {
                tracing::warn!("mDNS responder error: {}", e);
                self.books.failed(&backend_error(e));
            }
            other => tracing::trace!("{:?}", other),
        }
    }
}

impl Daemon for MdnsSdDaemon {
    fn connect(
        &mut self,
        observer: PublisherKey,
    ) -> Result<ConnectionKey, DaemonError> {
        if self.books.disconnected {
            return Err(DaemonError::Unreachable);
        }
        let key = self.books.connections.insert(observer);
        self.books.queue.push_back(DaemonNotification {
            observer,
            change: StateChange::Client(ClientState::Running),
        });
        Ok(key)
    }

    fn disconnect(&mut self, connection: ConnectionKey) {
        if self.books.connections.remove(connection).is_none() {
            return;
        }
        let orphans: Vec<GroupKey> = self
            .books
            .groups
            .iter()
            .filter(|(_, g)| g.connection == connection)
            .map(|(k, _)| k)
            .collect();
        for key in orphans {
            self.withdraw(key);
            self.books.groups.remove(key);
        }
    }

    fn new_group(
        &mut self,
        connection: ConnectionKey,
    ) -> Result<GroupKey, DaemonError> {
        let observer = *self
            .books
            .connections
            .get(connection)
            .ok_or(DaemonError::Disconnected)?;
        let key = self.books.groups.insert(Group {
            connection,
            observer,
            entries: Vec::new(),
            registered: Vec::new(),
            unannounced: Vec::new(),
        });
        self.books.notify_group(key, GroupState::Uncommitted);
        Ok(key)
    }

    fn is_empty(&self, group: GroupKey) -> bool {
        self.books
            .groups
            .get(group)
            .map_or(true, |g| g.entries.is_empty())
    }

    fn add_service(
        &mut self,
        group: GroupKey,
        service: &ServiceInfo,
    ) -> Result<(), AddServiceError> {
        if !self.books.groups.contains_key(group) {
            return Err(AddServiceError::Other(DaemonError::BadState));
        }
        let taken = self.books.groups.iter().any(|(k, g)| {
            k != group
                && g.entries.iter().any(|e| {
                    e.name() == service.name()
                        && e.service_type() == service.service_type()
                })
        });
        if taken {
            return Err(AddServiceError::Collision);
        }
        self.books.groups[group].entries.push(service.clone());
        Ok(())
    }

    fn commit(&mut self, group: GroupKey) -> Result<(), DaemonError> {
        let entries = match self.books.groups.get(group) {
            None => return Err(DaemonError::BadState),
            Some(g) if g.entries.is_empty() => return Err(DaemonError::IsEmpty),
            Some(g) => g.entries.clone(),
        };
        for service in &entries {
            let info = self.to_mdns(service)?;
            let fullname = info.get_fullname().to_string();
            self.responder.register(info).map_err(backend_error)?;
            let g = &mut self.books.groups[group];
            g.registered.push(fullname.clone());
            g.unannounced.push(fullname);
        }
        self.books.notify_group(group, GroupState::Registering);
        Ok(())
    }

    fn reset(&mut self, group: GroupKey) {
        if self.books.groups.contains_key(group) {
            self.withdraw(group);
            self.books.notify_group(group, GroupState::Uncommitted);
        }
    }

    fn free_group(&mut self, group: GroupKey) {
        self.withdraw(group);
        self.books.groups.remove(group);
    }

    fn pump(&mut self, _timeout: Duration) {
        while let Ok(event) = self.events.try_recv() {
            self.on_responder_event(event);
        }
        if self.events.is_disconnected() {
            self.books.lost();
        }
    }

    fn next_notification(&mut self) -> Option<DaemonNotification> {
        self.books.queue.pop_front()
    }
}

impl Drop for MdnsSdDaemon {
    fn drop(&mut self) {
        if let Err(e) = self.responder.shutdown() {
            tracing::error!("Failed to shutdown mDNS responder: {}", e);
        }
    }
}

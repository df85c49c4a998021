use crate::daemon::{Daemon, DaemonNotification, PublisherKey, StateChange};
use crate::event::Callback;
use crate::publisher::{Publisher, PublisherState};
use crate::{DriverConfig, Error, ServiceInfo};
use slotmap::SlotMap;
use std::time::Duration;

/// What one [`PollDriver::iterate`] pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// Nothing was pending
    Idle,
    /// This many notifications were dispatched
    Dispatched(usize),
    /// The driver has been asked to quit; nothing was done
    Quit,
}

/// Runs any number of [`Publisher`]s against one [`Daemon`]
///
/// The driver owns the daemon and the publishers; publishers are
/// referred to by [`PublisherKey`], which stays unique even after the
/// publisher is removed, so a late notification for a removed
/// publisher is simply dropped.
///
/// There is no thread and no timer in here: the owner must call
/// [`PollDriver::iterate`] regularly, e.g. once per tick of its own
/// event loop. All publisher callbacks are made from within
/// `iterate` (or `publish`/`remove`).
pub struct PollDriver<CB: Callback> {
    daemon: Box<dyn Daemon>,
    publishers: SlotMap<PublisherKey, Publisher<CB>>,
    config: DriverConfig,
    quitting: bool,
}

impl<CB: Callback> PollDriver<CB> {
    /// Create a new `PollDriver` around a daemon connection factory
    #[must_use]
    pub fn new(daemon: Box<dyn Daemon>, config: DriverConfig) -> Self {
        Self {
            daemon,
            publishers: SlotMap::with_key(),
            config,
            quitting: false,
        }
    }

    /// Start publishing a service
    ///
    /// Connects to the daemon; the rest happens during later calls to
    /// [`PollDriver::iterate`], with progress reported to `callback`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the daemon cannot be reached.
    /// No publisher is kept in that case.
    pub fn publish(
        &mut self,
        info: ServiceInfo,
        callback: CB,
    ) -> Result<PublisherKey, Error> {
        let key = self.publishers.insert(Publisher::new(info, callback));
        if let Err(e) = self.publishers[key].open(key, self.daemon.as_mut()) {
            self.publishers.remove(key);
            return Err(e);
        }
        Ok(key)
    }

    /// Stop publishing a service, releasing its group and connection
    ///
    /// Returns `false` if there was no such publisher (e.g. it was
    /// already removed), in which case nothing happens.
    pub fn remove(&mut self, key: PublisherKey) -> bool {
        match self.publishers.remove(key) {
            Some(mut publisher) => {
                tracing::debug!(
                    "Removing service '{}'",
                    publisher.service().name()
                );
                publisher.close(self.daemon.as_mut());
                true
            }
            None => false,
        }
    }

    /// Dispatch the notifications pending right now
    ///
    /// Notifications queued while these are being handled (e.g. the
    /// result of a commit) wait for the next pass, so this always
    /// returns promptly. `timeout` bounds how long the daemon backend
    /// may spend collecting I/O first; zero means not at all.
    pub fn iterate(&mut self, timeout: Duration) -> Iteration {
        if self.quitting {
            return Iteration::Quit;
        }
        self.daemon.pump(timeout);
        let pending: Vec<DaemonNotification> =
            std::iter::from_fn(|| self.daemon.next_notification()).collect();
        if pending.is_empty() {
            return Iteration::Idle;
        }
        let n = pending.len();
        for notification in pending {
            self.dispatch(notification);
        }
        Iteration::Dispatched(n)
    }

    fn dispatch(&mut self, notification: DaemonNotification) {
        let Some(publisher) = self.publishers.get_mut(notification.observer)
        else {
            tracing::trace!(
                "Dropping {:?} for departed {:?}",
                notification.change,
                notification.observer
            );
            return;
        };
        let daemon = self.daemon.as_mut();
        let result = match notification.change {
            StateChange::Client(state) => {
                publisher.on_client_state(state, daemon)
            }
            StateChange::Group(group, state) => {
                publisher.on_group_state(group, state, daemon)
            }
        };
        if result.is_err() && self.config.quit_on_failure {
            self.quit();
        }
    }

    /// Stop dispatching: every later [`PollDriver::iterate`] does
    /// nothing and returns [`Iteration::Quit`]
    pub fn quit(&mut self) {
        if !self.quitting {
            tracing::info!("Poll driver quitting");
        }
        self.quitting = true;
    }

    #[must_use]
    pub fn is_quitting(&self) -> bool {
        self.quitting
    }

    #[must_use]
    pub fn state(&self, key: PublisherKey) -> Option<&PublisherState> {
        self.publishers.get(key).map(Publisher::state)
    }

    /// The service as currently published (the name may have changed)
    #[must_use]
    pub fn service(&self, key: PublisherKey) -> Option<&ServiceInfo> {
        self.publishers.get(key).map(Publisher::service)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}

impl<CB: Callback> Drop for PollDriver<CB> {
    fn drop(&mut self) {
        for (_, mut publisher) in self.publishers.drain() {
            publisher.close(self.daemon.as_mut());
        }
    }
}

#[cfg(test)]
#[path = "tests/poll_driver.rs"]
mod tests;

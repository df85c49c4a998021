use crate::Error;

/// Who else claimed the name, when a collision forces a rename
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionKind {
    /// Another service held by the same daemon
    Local,
    /// A service on another host
    Remote,
}

/// Progress of one published service, as reported to its owner
///
/// Name collisions are handled internally, but are reported here (as
/// `Renamed`) so that the owner knows the name actually in use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The service record is being added to the daemon
    Adding {
        name: String,
    },

    /// The name was taken, so the service now uses another
    Renamed {
        from: String,
        to: String,
        cause: CollisionKind,
    },

    /// The service is live on the network under this name
    Established {
        name: String,
    },

    /// The daemon is re-registering its host name; the service record
    /// has been withdrawn and will be added again afterwards
    Withdrawn {
        name: String,
    },

    /// The service has stopped for good
    Failed {
        name: String,
        error: Error,
    },
}

/// A callback made by [`crate::Publisher`] as the service progresses
///
/// See the implementation in [`crate::global`].
pub trait Callback {
    /// Something happened to the service
    fn on_event(&self, event: &Event);
}

impl<F: Fn(&Event)> Callback for F {
    fn on_event(&self, event: &Event) {
        self(event);
    }
}

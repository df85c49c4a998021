/// The errors a discovery daemon can report for a single request
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonError {
    /// The daemon is not running, or refused the connection
    Unreachable,
    /// The connection to the daemon has gone away
    Disconnected,
    /// The daemon has run out of some resource (memory, objects)
    ResourceExhausted,
    /// The request is not valid in the object's current state
    BadState,
    /// Committing a group which holds no records
    IsEmpty,
    /// The service name is not a valid DNS-SD instance name
    InvalidServiceName,
    /// The service type is not a valid DNS-SD service type
    InvalidServiceType,
    /// Anything else, as described by the backend
    Backend(String),
}

impl ::core::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        match self {
            Self::Unreachable => f.write_str("daemon not running"),
            Self::Disconnected => f.write_str("daemon connection lost"),
            Self::ResourceExhausted => f.write_str("daemon out of resources"),
            Self::BadState => f.write_str("bad state"),
            Self::IsEmpty => f.write_str("entry group is empty"),
            Self::InvalidServiceName => f.write_str("invalid service name"),
            Self::InvalidServiceType => f.write_str("invalid service type"),
            Self::Backend(s) => write!(f, "daemon error: {s}"),
        }
    }
}

impl ::std::error::Error for DaemonError {}

/// Why adding a service record to an entry group failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddServiceError {
    /// The name is already held by another group on the same daemon
    Collision,
    /// Any other failure
    Other(DaemonError),
}

impl ::core::fmt::Display for AddServiceError {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        match self {
            Self::Collision => f.write_str("local name collision"),
            Self::Other(e) => write!(f, "{e}"),
        }
    }
}

impl ::std::error::Error for AddServiceError {
    fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
        match self {
            Self::Other(e) => Some(e),
            Self::Collision => None,
        }
    }
}

/// The errors which can stop a published service
///
/// Name collisions never appear here: they are resolved by renaming
/// the service. Everything else is terminal for the service
/// concerned.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The publish options were incomplete or out of range
    InvalidOptions(&'static str),
    /// Could not connect to the daemon, or the connection failed later
    Connection(DaemonError),
    /// The daemon would not create an entry group
    GroupCreation(DaemonError),
    /// The daemon refused the service record
    ServiceRegistration(DaemonError),
    /// The daemon refused to commit the entry group
    Commit(DaemonError),
    /// The daemon reported failure of a committed entry group
    GroupFailure(DaemonError),
    /// `init` has not been called on this thread
    NotInitialised,
}

impl ::core::fmt::Display for Error {
    fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
        match self {
            Self::InvalidOptions(s) => write!(f, "invalid options: {s}"),
            Self::Connection(e) => write!(f, "client failure: {e}"),
            Self::GroupCreation(e) => {
                write!(f, "entry group creation failed: {e}")
            }
            Self::ServiceRegistration(e) => {
                write!(f, "failed to add service: {e}")
            }
            Self::Commit(e) => write!(f, "failed to commit entry group: {e}"),
            Self::GroupFailure(e) => write!(f, "entry group failure: {e}"),
            Self::NotInitialised => f.write_str("not initialised"),
        }
    }
}

impl ::std::error::Error for Error {
    fn source(&self) -> Option<&(dyn ::std::error::Error + 'static)> {
        match self {
            Self::Connection(e)
            | Self::GroupCreation(e)
            | Self::ServiceRegistration(e)
            | Self::Commit(e)
            | Self::GroupFailure(e) => Some(e),
            Self::InvalidOptions(_) | Self::NotInitialised => None,
        }
    }
}

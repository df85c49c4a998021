//! The per-process call surface: `init`, `publish`, `remove`, `poll`
//!
//! Bindings for other languages, or programs that only ever want one
//! driver, can use these free functions instead of owning a
//! [`PollDriver`]. The driver lives in thread-local storage: all calls
//! must come from the same thread, which is also the thread on which
//! event closures are called.
//!
//! Event closures are called after the driver has finished its pass,
//! so a closure may itself call [`remove`] (or [`publish`]).

use crate::daemon::{Daemon, PublisherKey};
use crate::event::{Callback, Event};
use crate::{
    DaemonError, DriverConfig, Error, Iteration, PollDriver, PublishOptions,
    ServiceInfo,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

type Listener = Rc<dyn Fn(&Event)>;
type Outbox = Rc<RefCell<Vec<(Listener, Event)>>>;

/// Holds events back until the driver is no longer borrowed
struct QueuedCallback {
    listener: Listener,
    outbox: Outbox,
}

impl Callback for QueuedCallback {
    fn on_event(&self, event: &Event) {
        self.outbox
            .borrow_mut()
            .push((self.listener.clone(), event.clone()));
    }
}

struct Global {
    driver: PollDriver<QueuedCallback>,
    outbox: Outbox,
}

thread_local! {
    static GLOBAL: RefCell<Option<Global>> = const { RefCell::new(None) };
}

/// Identifies one service published with [`publish`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceHandle(PublisherKey);

fn with_global<T>(
    f: impl FnOnce(&mut Global) -> T,
) -> Result<(T, Outbox), Error> {
    GLOBAL.with(|g| {
        let mut g = g.borrow_mut();
        let global = g.as_mut().ok_or(Error::NotInitialised)?;
        let outbox = global.outbox.clone();
        Ok((f(global), outbox))
    })
}

fn deliver(outbox: &Outbox) {
    loop {
        let batch = std::mem::take(&mut *outbox.borrow_mut());
        if batch.is_empty() {
            return;
        }
        for (listener, event) in batch {
            listener(&event);
        }
    }
}

/// Whether this platform normally has a local mDNS responder
#[must_use]
pub fn is_supported() -> bool {
    cfg!(target_os = "linux")
}

/// Make sure this thread's driver exists, using the default daemon
/// backend
///
/// The driver is per-thread, not per-process: another thread calling
/// [`publish`] or [`poll`] gets [`Error::NotInitialised`] until it
/// calls `init` itself, and then has a driver of its own.
///
/// With the `mdns-sd` feature that is [`crate::MdnsSdDaemon`];
/// otherwise it is [`crate::LocalDaemon`], which publishes nothing
/// beyond this process.
///
/// Returns `Ok(false)` if the driver already existed, in which case
/// nothing changes.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the backend cannot be started.
pub fn init() -> Result<bool, Error> {
    init_with(DriverConfig::default(), default_daemon)
}

#[cfg(feature = "mdns-sd")]
fn default_daemon() -> Result<Box<dyn Daemon>, DaemonError> {
    let daemon =
        crate::MdnsSdDaemon::new(&crate::MdnsSdConfig::default())?;
    Ok(Box::new(daemon))
}

#[cfg(not(feature = "mdns-sd"))]
fn default_daemon() -> Result<Box<dyn Daemon>, DaemonError> {
    Ok(Box::new(crate::LocalDaemon::new()))
}

/// Make sure this thread's driver exists, creating it with `factory`
/// if not
///
/// `factory` is only called if the driver does not yet exist. As with
/// [`init`], the driver belongs to the calling thread.
/// Returns `Ok(false)` if it already did.
///
/// # Errors
///
/// Returns [`Error::Connection`] if `factory` fails.
pub fn init_with<F>(config: DriverConfig, factory: F) -> Result<bool, Error>
where
    F: FnOnce() -> Result<Box<dyn Daemon>, DaemonError>,
{
    GLOBAL.with(|g| {
        let mut g = g.borrow_mut();
        if g.is_some() {
            return Ok(false);
        }
        let daemon = factory().map_err(|e| {
            tracing::error!("Failed to create poll driver: {}", e);
            Error::Connection(e)
        })?;
        *g = Some(Global {
            driver: PollDriver::new(daemon, config),
            outbox: Rc::default(),
        });
        Ok(true)
    })
}

/// Start publishing a service
///
/// `on_event` hears about the service's progress (renames,
/// establishment, failure). One poll pass is made straight away.
///
/// If the driver has quit (see [`DriverConfig::quit_on_failure`]) the
/// service is still accepted, but makes no progress until
/// [`shutdown`] and a fresh [`init`]; a warning is logged.
///
/// # Errors
///
/// Returns [`Error::InvalidOptions`] if `options` are incomplete or
/// out of range, [`Error::Connection`] if the daemon cannot be
/// reached, or [`Error::NotInitialised`] if [`init`] has not been
/// called.
pub fn publish<F>(
    options: &PublishOptions,
    on_event: F,
) -> Result<ServiceHandle, Error>
where
    F: Fn(&Event) + 'static,
{
    let info = ServiceInfo::try_from(options)?;
    let (result, outbox) = with_global(|global| {
        let callback = QueuedCallback {
            listener: Rc::new(on_event),
            outbox: global.outbox.clone(),
        };
        let key = global.driver.publish(info, callback)?;
        if global.driver.iterate(Duration::ZERO) == Iteration::Quit {
            tracing::warn!(
                "Poll driver has quit; service will not be advertised"
            );
        }
        Ok(ServiceHandle(key))
    })?;
    deliver(&outbox);
    result
}

/// Stop publishing a service
///
/// Removing a service twice is harmless.
///
/// # Errors
///
/// Returns [`Error::NotInitialised`] if [`init`] has not been called.
pub fn remove(handle: ServiceHandle) -> Result<(), Error> {
    let (_, outbox) = with_global(|global| global.driver.remove(handle.0))?;
    deliver(&outbox);
    Ok(())
}

/// Process whatever the daemon has reported since last time
///
/// Never blocks.
///
/// # Errors
///
/// Returns [`Error::NotInitialised`] if [`init`] has not been called.
pub fn poll() -> Result<Iteration, Error> {
    let (iteration, outbox) =
        with_global(|global| global.driver.iterate(Duration::ZERO))?;
    deliver(&outbox);
    Ok(iteration)
}

/// The name a service is currently published under
///
/// Returns `None` for a service which has been removed.
///
/// # Errors
///
/// Returns [`Error::NotInitialised`] if [`init`] has not been called.
pub fn service_name(handle: ServiceHandle) -> Result<Option<String>, Error> {
    let (name, _) = with_global(|global| {
        global
            .driver
            .service(handle.0)
            .map(|s| s.name().to_string())
    })?;
    Ok(name)
}

/// Tear down the driver and every service still published
///
/// A later [`init`] creates a fresh one.
pub fn shutdown() {
    let global = GLOBAL.with(|g| g.borrow_mut().take());
    drop(global);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalDaemon;
    use std::cell::Cell;

    fn printer() -> PublishOptions {
        PublishOptions {
            name: "printer".to_string(),
            service_type: "_ipp._tcp".to_string(),
            data: "loc=lab".to_string(),
            port: 631,
        }
    }

    // Each test runs on its own thread, so has its own driver

    #[test]
    fn calls_before_init_fail() {
        assert_eq!(poll(), Err(Error::NotInitialised));
        assert_eq!(
            publish(&printer(), |_| {}).err(),
            Some(Error::NotInitialised)
        );
    }

    #[test]
    fn init_is_idempotent() {
        let calls = Cell::new(0);
        let factory = || -> Result<Box<dyn Daemon>, DaemonError> {
            calls.set(calls.get() + 1);
            Ok(Box::new(LocalDaemon::new()))
        };
        assert_eq!(init_with(DriverConfig::default(), factory), Ok(true));
        assert_eq!(init_with(DriverConfig::default(), factory), Ok(false));
        assert_eq!(init(), Ok(false));
        assert_eq!(calls.get(), 1);
        shutdown();
    }

    #[test]
    fn failed_init_leaves_nothing() {
        let r = init_with(DriverConfig::default(), || {
            Err(DaemonError::Unreachable)
        });
        assert_eq!(r, Err(Error::Connection(DaemonError::Unreachable)));
        assert_eq!(poll(), Err(Error::NotInitialised));
    }

    #[test]
    fn shutdown_then_init_again() {
        assert_eq!(init(), Ok(true));
        shutdown();
        assert_eq!(poll(), Err(Error::NotInitialised));
        assert_eq!(init(), Ok(true));
        shutdown();
    }

    #[test]
    fn invalid_options_rejected() {
        init().unwrap();
        let mut o = printer();
        o.port = 0;
        assert_eq!(
            publish(&o, |_| {}).err(),
            Some(Error::InvalidOptions("port out of range"))
        );
        shutdown();
    }

    #[test]
    fn driver_is_per_thread() {
        init_with(DriverConfig::default(), || {
            Ok(Box::new(LocalDaemon::new()) as Box<dyn Daemon>)
        })
        .unwrap();
        let other = std::thread::spawn(poll).join().unwrap();
        assert_eq!(other, Err(Error::NotInitialised));
        assert_eq!(poll(), Ok(Iteration::Idle));
        shutdown();
    }

    #[test]
    fn publish_after_quit_makes_no_progress() {
        let daemon = LocalDaemon::new();
        let d2 = daemon.clone();
        let config = DriverConfig {
            quit_on_failure: true,
        };
        init_with(config, move || Ok(Box::new(d2) as Box<dyn Daemon>))
            .unwrap();
        daemon.inject_fault(crate::Fault::NewGroup);

        let failed = Rc::new(Cell::new(false));
        let f2 = failed.clone();
        let _ = publish(&printer(), move |e| {
            if let Event::Failed { .. } = e {
                f2.set(true);
            }
        })
        .unwrap();
        assert!(failed.get());
        assert_eq!(poll(), Ok(Iteration::Quit));

        let established = Rc::new(Cell::new(false));
        let e2 = established.clone();
        let h = publish(&printer(), move |e| {
            if let Event::Established { .. } = e {
                e2.set(true);
            }
        })
        .unwrap();
        for _ in 0..10 {
            assert_eq!(poll(), Ok(Iteration::Quit));
        }
        assert!(!established.get());
        assert_eq!(service_name(h), Ok(Some("printer".to_string())));
        assert!(daemon.announced_names().is_empty());
        shutdown();
    }

    #[test]
    fn closure_may_remove_its_own_service() {
        let daemon = LocalDaemon::new();
        let d2 = daemon.clone();
        init_with(DriverConfig::default(), move || {
            Ok(Box::new(d2) as Box<dyn Daemon>)
        })
        .unwrap();

        let handle: Rc<Cell<Option<ServiceHandle>>> = Rc::default();
        let h2 = handle.clone();
        let h = publish(&printer(), move |e| {
            if let (Event::Established { .. }, Some(h)) = (e, h2.get()) {
                remove(h).unwrap();
            }
        })
        .unwrap();
        handle.set(Some(h));

        while service_name(h).unwrap().is_some() {
            assert_ne!(poll().unwrap(), Iteration::Quit);
        }
        assert_eq!(daemon.connection_count(), 0);
        assert_eq!(daemon.group_count(), 0);
        shutdown();
    }
}

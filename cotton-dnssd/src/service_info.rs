use crate::Error;
use serde::Deserialize;
use std::num::NonZeroU16;

/// Longest service instance name, in bytes: one DNS label
pub const MAX_NAME_LENGTH: usize = 63;

/// The record a caller supplies to publish a service
///
/// All four fields are required. This is also the shape of a
/// `[[service]]` table in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishOptions {
    /// Service instance name, e.g. "Kitchen printer"
    pub name: String,

    /// Service type, e.g. "_ipp._tcp"
    #[serde(rename = "type")]
    pub service_type: String,

    /// TXT metadata, e.g. "loc=lab"
    pub data: String,

    /// Port number; must be in 1..=65535
    pub port: i64,
}

/// The identity and payload of one advertised service
///
/// Only the name ever changes, and only when the daemon reports a
/// collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    name: String,
    service_type: String,
    txt_data: String,
    port: NonZeroU16,
}

impl ServiceInfo {
    /// Create a new `ServiceInfo`, checking each field
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOptions`] if the name is empty or
    /// longer than [`MAX_NAME_LENGTH`], the type is empty, or the
    /// port is zero.
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        txt_data: impl Into<String>,
        port: u16,
    ) -> Result<Self, Error> {
        let name = name.into();
        let service_type = service_type.into();
        if name.is_empty() {
            return Err(Error::InvalidOptions("empty name"));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(Error::InvalidOptions("name too long"));
        }
        if service_type.is_empty() {
            return Err(Error::InvalidOptions("empty type"));
        }
        let port = NonZeroU16::new(port)
            .ok_or(Error::InvalidOptions("port out of range"))?;
        Ok(Self {
            name,
            service_type,
            txt_data: txt_data.into(),
            port,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    #[must_use]
    pub fn txt_data(&self) -> &str {
        &self.txt_data
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port.get()
    }

    /// The TXT data as `key=value` pairs
    ///
    /// Entries are separated by `;`; an entry with no `=` is a
    /// boolean attribute and gets an empty value.
    pub fn txt_records(&self) -> impl Iterator<Item = (&str, &str)> {
        self.txt_data
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.split_once('=').unwrap_or((s, "")))
    }

    pub(crate) fn rename(&mut self, name: String) -> String {
        core::mem::replace(&mut self.name, name)
    }
}

impl TryFrom<&PublishOptions> for ServiceInfo {
    type Error = Error;

    fn try_from(options: &PublishOptions) -> Result<Self, Error> {
        let port = u16::try_from(options.port)
            .map_err(|_| Error::InvalidOptions("port out of range"))?;
        Self::new(
            options.name.clone(),
            options.service_type.clone(),
            options.data.clone(),
            port,
        )
    }
}

//! Bluetooth RFCOMM transport through BlueZ.
//!
//! Registers an RFCOMM server profile with a fixed service UUID. BlueZ picks
//! the channel and advertises the UUID over SDP, so clients discover the
//! server by UUID rather than by channel number.

use std::io;

use bluer::rfcomm::{Profile, ProfileHandle, Role, Stream};
use bluer::{Session, Uuid};
use futures::StreamExt;

use super::{AcceptError, Accepted, Transport};

/// Service UUID clients look for.
pub const DEFAULT_SERVICE_UUID: &str = "025fe2ae-0762-4bed-90f2-d8d778f020fe";

/// Advertised service name.
pub const DEFAULT_SERVICE_NAME: &str = "Playlink";

/// RFCOMM listener registered as a BlueZ profile.
pub struct BluetoothTransport {
    uuid: Uuid,
    name: String,
    session: Option<Session>,
    profile: Option<ProfileHandle>,
}

impl BluetoothTransport {
    /// Build a transport for `service_uuid`. Fails if the UUID does not parse.
    pub fn new(service_uuid: &str, name: impl Into<String>) -> io::Result<Self> {
        let uuid = Uuid::parse_str(service_uuid)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        Ok(Self {
            uuid,
            name: name.into(),
            session: None,
            profile: None,
        })
    }
}

impl Transport for BluetoothTransport {
    type Stream = Stream;

    fn type_name(&self) -> &'static str {
        "Bluetooth"
    }

    async fn create_socket(&mut self) -> io::Result<()> {
        let session = Session::new().await.map_err(io::Error::other)?;
        let adapter = session.default_adapter().await.map_err(io::Error::other)?;
        adapter.set_powered(true).await.map_err(io::Error::other)?;

        let profile = Profile {
            uuid: self.uuid,
            name: Some(self.name.clone()),
            role: Some(Role::Server),
            require_authentication: Some(false),
            require_authorization: Some(false),
            ..Default::default()
        };
        let handle = session
            .register_profile(profile)
            .await
            .map_err(io::Error::other)?;

        tracing::info!(
            "Advertising RFCOMM service {} on adapter {}",
            self.uuid,
            adapter.name()
        );
        self.session = Some(session);
        self.profile = Some(handle);
        Ok(())
    }

    async fn accept(&mut self) -> Result<Accepted<Stream>, AcceptError> {
        let profile = self.profile.as_mut().ok_or_else(AcceptError::not_listening)?;
        let Some(request) = profile.next().await else {
            return Err(AcceptError::Fatal(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "BlueZ profile unregistered",
            )));
        };

        let peer = request.device().to_string();
        let stream = request
            .accept()
            .map_err(|e| AcceptError::Transient(io::Error::other(e)))?;
        Ok(Accepted { stream, peer })
    }

    fn teardown(&mut self) {
        // Dropping the handle unregisters the profile.
        if self.profile.take().is_some() {
            tracing::debug!("Unregistered RFCOMM service {}", self.uuid);
        }
        self.session = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_uuid_parses() {
        let transport =
            BluetoothTransport::new(DEFAULT_SERVICE_UUID, DEFAULT_SERVICE_NAME).unwrap();
        assert_eq!(transport.uuid.to_string(), DEFAULT_SERVICE_UUID);
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let err = BluetoothTransport::new("not-a-uuid", "x").err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}

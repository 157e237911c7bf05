//! Lifecycle events and status snapshots handed to the presentation layer.

use crate::engine::{ConnectionState, DeviceIdentity};
use crate::error::GreeError;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Point-in-time copy of the connection state and every cached value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSnapshot {
    pub state: ConnectionState,
    pub identity: Option<DeviceIdentity>,
    pub endpoint: Option<SocketAddr>,
    pub properties: HashMap<String, i64>,
}

impl DeviceSnapshot {
    /// Last value reported for `code`, or `None` if the unit has not reported it.
    pub fn get(&self, code: &str) -> Option<i64> {
        self.properties.get(code).copied()
    }

    pub fn is_bound(&self) -> bool {
        self.state.is_bound()
    }

    pub fn name(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.name.as_str())
    }
}

/// Events emitted by a [`Device`](crate::Device).
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A bind attempt finished. `success` is false when the unit confirmed a
    /// binding that could not be matched to the identified device.
    Connected {
        success: bool,
        snapshot: DeviceSnapshot,
    },
    /// Values refreshed by a status reply
    Status(DeviceSnapshot),
    /// Values changed by a command reply
    Update(DeviceSnapshot),
    /// A datagram was dropped
    Error {
        error: GreeError,
        snapshot: DeviceSnapshot,
    },
    /// Socket lost, unit unresponsive, or device stopped
    Disconnected(DeviceSnapshot),
}

impl DeviceEvent {
    pub fn snapshot(&self) -> &DeviceSnapshot {
        match self {
            DeviceEvent::Connected { snapshot, .. }
            | DeviceEvent::Error { snapshot, .. }
            | DeviceEvent::Status(snapshot)
            | DeviceEvent::Update(snapshot)
            | DeviceEvent::Disconnected(snapshot) => snapshot,
        }
    }

    /// Route this event to the matching listener callback.
    pub fn dispatch(&self, listener: &dyn DeviceListener) {
        match self {
            DeviceEvent::Connected { success, snapshot } => {
                listener.on_connected(*success, snapshot)
            }
            DeviceEvent::Status(snapshot) => listener.on_status(snapshot),
            DeviceEvent::Update(snapshot) => listener.on_update(snapshot),
            DeviceEvent::Error { error, snapshot } => listener.on_error(error, snapshot),
            DeviceEvent::Disconnected(snapshot) => listener.on_disconnected(snapshot),
        }
    }
}

/// Callback-style consumer of device events. Every method defaults to a no-op.
pub trait DeviceListener: Send + Sync {
    fn on_connected(&self, _success: bool, _snapshot: &DeviceSnapshot) {}
    fn on_status(&self, _snapshot: &DeviceSnapshot) {}
    fn on_update(&self, _snapshot: &DeviceSnapshot) {}
    fn on_error(&self, _error: &GreeError, _snapshot: &DeviceSnapshot) {}
    fn on_disconnected(&self, _snapshot: &DeviceSnapshot) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl DeviceListener for Recorder {
        fn on_connected(&self, success: bool, _snapshot: &DeviceSnapshot) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("connected:{}", success));
        }

        fn on_error(&self, error: &GreeError, _snapshot: &DeviceSnapshot) {
            self.calls.lock().unwrap().push(format!("error:{}", error));
        }
    }

    #[test]
    fn dispatch_routes_to_callbacks() {
        let recorder = Recorder::default();
        let snapshot = DeviceSnapshot::default();

        DeviceEvent::Connected {
            success: true,
            snapshot: snapshot.clone(),
        }
        .dispatch(&recorder);
        DeviceEvent::Status(snapshot.clone()).dispatch(&recorder);
        DeviceEvent::Error {
            error: GreeError::NotConnected,
            snapshot,
        }
        .dispatch(&recorder);

        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["connected:true", "error:Device is not bound"]
        );
    }

    #[test]
    fn snapshot_distinguishes_absent_from_zero() {
        let mut snapshot = DeviceSnapshot::default();
        snapshot.properties.insert("Pow".into(), 0);
        assert_eq!(snapshot.get("Pow"), Some(0));
        assert_eq!(snapshot.get("SetTem"), None);
        assert!(!snapshot.is_bound());
    }
}

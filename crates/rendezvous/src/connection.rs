//! The aggregate describing one transfer attempt.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use oscar_protocol::IcbmCookie;

use crate::events::{EventPost, RvEvent};
use crate::settings::Settings;
use crate::types::{ConnectionInfo, Initiator};

/// Property set when a transfer was moved onto a proxy after the first
/// attempt.
pub const PROP_REDIRECTED: &str = "redirected";

/// One rendezvous transfer attempt: who, where, how, and where events go.
///
/// Shared between stages behind an `Arc`; the mutable parts (connection
/// info and the property bag) carry their own locks.
#[derive(Debug)]
pub struct RvConnection {
    screen_name: String,
    buddy: String,
    cookie: IcbmCookie,
    initiator: Initiator,
    info: RwLock<ConnectionInfo>,
    settings: Arc<Settings>,
    events: EventPost,
    properties: Mutex<HashMap<String, String>>,
}

impl RvConnection {
    pub fn new(
        screen_name: impl Into<String>,
        buddy: impl Into<String>,
        cookie: IcbmCookie,
        initiator: Initiator,
        settings: Arc<Settings>,
        events: EventPost,
    ) -> Self {
        Self {
            screen_name: screen_name.into(),
            buddy: buddy.into(),
            cookie,
            initiator,
            info: RwLock::new(ConnectionInfo::default()),
            settings,
            events,
            properties: Mutex::new(HashMap::new()),
        }
    }

    /// Our own screen name, sent to the proxy relay.
    pub fn screen_name(&self) -> &str {
        &self.screen_name
    }

    pub fn buddy(&self) -> &str {
        &self.buddy
    }

    pub fn cookie(&self) -> IcbmCookie {
        self.cookie
    }

    pub fn initiator(&self) -> Initiator {
        self.initiator
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn events(&self) -> &EventPost {
        &self.events
    }

    pub fn post(&self, event: RvEvent) {
        self.events.post(event);
    }

    pub fn connection_info(&self) -> ConnectionInfo {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_connection_info(&self, info: ConnectionInfo) {
        *self.info.write().unwrap_or_else(PoisonError::into_inner) = info;
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }

    pub fn is_redirected(&self) -> bool {
        self.property(PROP_REDIRECTED).is_some_and(|v| v == "true")
    }

    pub fn mark_redirected(&self) {
        self.set_property(PROP_REDIRECTED, "true");
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn conn() -> RvConnection {
        RvConnection::new(
            "alice",
            "bob",
            IcbmCookie::new([9; 8]),
            Initiator::Me,
            Arc::new(Settings::default()),
            EventPost::discard(),
        )
    }

    #[test]
    fn connection_info_updates() {
        let c = conn();
        assert_eq!(c.connection_info(), ConnectionInfo::default());

        c.set_connection_info(ConnectionInfo {
            internal_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: Some(5000),
            ..Default::default()
        });
        assert_eq!(c.connection_info().port, Some(5000));
    }

    #[test]
    fn redirected_property() {
        let c = conn();
        assert!(!c.is_redirected());
        c.mark_redirected();
        assert!(c.is_redirected());
        assert_eq!(c.property(PROP_REDIRECTED).as_deref(), Some("true"));
    }

    #[test]
    fn identity_accessors() {
        let c = conn();
        assert_eq!(c.screen_name(), "alice");
        assert_eq!(c.buddy(), "bob");
        assert_eq!(c.initiator(), Initiator::Me);
        assert_eq!(c.cookie(), IcbmCookie::new([9; 8]));
    }
}

//! Source directory and periodic refresh
//!
//! A [`SourceDirectory`] reports which sources can currently be attached.
//! [`DiscoveryMonitor`] turns consecutive snapshots into add/remove
//! notifications, and [`reconcile`] applies them to a running mixer.

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use crate::audio::port::AudioSourcePort;
use crate::config::SourceConfig;
use crate::error::{ControlError, Error, SourceError};
use crate::mixer::MixerHandle;
use crate::network::receiver::{UdpSourcePort, UdpSourceReceiver};

/// Everything needed to open a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceHandle {
    pub name: String,
    pub address: SocketAddr,
}

/// Where sources come from
pub trait SourceDirectory: Send + Sync {
    /// Sources available right now, by name
    fn snapshot(&self) -> BTreeMap<String, SourceHandle>;

    /// Open a port for `handle`
    fn open(&self, handle: &SourceHandle) -> Result<Box<dyn AudioSourcePort>, SourceError>;
}

/// Directory of UDP sources declared in configuration. Entries can be added
/// and removed at runtime.
pub struct StaticDirectory {
    sources: RwLock<BTreeMap<String, SourceHandle>>,
    channels: u16,
}

impl StaticDirectory {
    /// `channels` is the mixer layout received audio is converted to
    pub fn new(sources: Vec<SourceConfig>, channels: u16) -> Self {
        let sources = sources
            .into_iter()
            .map(|s| {
                (
                    s.name.clone(),
                    SourceHandle {
                        name: s.name,
                        address: s.bind,
                    },
                )
            })
            .collect();
        Self {
            sources: RwLock::new(sources),
            channels,
        }
    }

    /// Add or replace a source
    pub fn register(&self, name: &str, address: SocketAddr) {
        self.sources.write().insert(
            name.to_string(),
            SourceHandle {
                name: name.to_string(),
                address,
            },
        );
    }

    /// Remove a source; returns whether it was known
    pub fn unregister(&self, name: &str) -> bool {
        self.sources.write().remove(name).is_some()
    }
}

impl SourceDirectory for StaticDirectory {
    fn snapshot(&self) -> BTreeMap<String, SourceHandle> {
        self.sources.read().clone()
    }

    fn open(&self, handle: &SourceHandle) -> Result<Box<dyn AudioSourcePort>, SourceError> {
        let receiver = UdpSourceReceiver::start(&handle.name, handle.address, self.channels)
            .map_err(|e| SourceError::OpenFailed {
                name: handle.name.clone(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(UdpSourcePort::new(receiver)))
    }
}

/// A change between two directory snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Added(SourceHandle),
    Removed(String),
}

/// Diffs successive directory snapshots
#[derive(Debug, Default)]
pub struct DiscoveryMonitor {
    known: BTreeMap<String, SourceHandle>,
}

impl DiscoveryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a new snapshot and report what changed since the last one. A
    /// source whose handle changed is reported as removed, then added.
    pub fn refresh(&mut self, directory: &dyn SourceDirectory) -> Vec<DiscoveryEvent> {
        let current = directory.snapshot();
        let events = diff(&self.known, &current);
        self.known = current;
        events
    }

    /// Names seen in the last snapshot
    pub fn known(&self) -> impl Iterator<Item = &str> {
        self.known.keys().map(String::as_str)
    }
}

fn diff(
    previous: &BTreeMap<String, SourceHandle>,
    current: &BTreeMap<String, SourceHandle>,
) -> Vec<DiscoveryEvent> {
    let mut events = Vec::new();

    for (name, handle) in previous {
        match current.get(name) {
            Some(now) if now == handle => {}
            _ => events.push(DiscoveryEvent::Removed(name.clone())),
        }
    }
    for (name, handle) in current {
        match previous.get(name) {
            Some(before) if before == handle => {}
            _ => events.push(DiscoveryEvent::Added(handle.clone())),
        }
    }

    events
}

/// Apply discovery events to the mixer: attach appearing sources listed in
/// `wanted`, detach vanished ones. Failures are logged and skipped.
pub fn reconcile(mixer: &MixerHandle, events: &[DiscoveryEvent], wanted: &BTreeSet<String>) {
    for event in events {
        match event {
            DiscoveryEvent::Removed(name) => match mixer.detach(name) {
                Ok(()) => tracing::info!("Source '{}' disappeared, detached", name),
                Err(ControlError::UnknownChannel(_)) => {}
                Err(e) => tracing::warn!("Failed to detach '{}': {}", name, e),
            },
            DiscoveryEvent::Added(handle) => {
                tracing::info!("Source '{}' available at {}", handle.name, handle.address);
                if !wanted.contains(&handle.name) {
                    continue;
                }
                match mixer.attach(&handle.name) {
                    Ok(()) => {}
                    Err(Error::Control(ControlError::AlreadyAttached(_))) => {}
                    Err(e) => tracing::warn!("Failed to attach '{}': {}", handle.name, e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str, port: u16) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], port)),
            auto_attach: true,
        }
    }

    #[test]
    fn test_first_refresh_adds_everything() {
        let directory = StaticDirectory::new(vec![source("a", 6001), source("b", 6002)], 2);
        let mut monitor = DiscoveryMonitor::new();

        let events = monitor.refresh(&directory);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, DiscoveryEvent::Added(_))));
        assert!(monitor.refresh(&directory).is_empty());
    }

    #[test]
    fn test_removed_and_changed_sources() {
        let directory = StaticDirectory::new(vec![source("a", 6001), source("b", 6002)], 2);
        let mut monitor = DiscoveryMonitor::new();
        monitor.refresh(&directory);

        assert!(directory.unregister("a"));
        directory.register("b", SocketAddr::from(([127, 0, 0, 1], 6003)));

        let events = monitor.refresh(&directory);
        assert_eq!(
            events,
            vec![
                DiscoveryEvent::Removed("a".to_string()),
                DiscoveryEvent::Removed("b".to_string()),
                DiscoveryEvent::Added(SourceHandle {
                    name: "b".to_string(),
                    address: SocketAddr::from(([127, 0, 0, 1], 6003)),
                }),
            ]
        );
        assert_eq!(monitor.known().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_reconcile_attaches_wanted_and_detaches_vanished() {
        use crate::config::EngineConfig;
        use crate::mixer::MixerEngine;
        use std::sync::Arc;

        let directory = Arc::new(StaticDirectory::new(
            vec![source("wanted", 0), source("other", 0)],
            2,
        ));
        let (mixer, _cycle) = MixerEngine::create(EngineConfig::default(), None).unwrap();
        let mixer = mixer.with_directory(directory.clone());

        let mut monitor = DiscoveryMonitor::new();
        let wanted: BTreeSet<String> = ["wanted".to_string()].into_iter().collect();

        let events = monitor.refresh(directory.as_ref());
        reconcile(&mixer, &events, &wanted);
        assert_eq!(mixer.channel_names(), vec!["wanted"]);

        directory.unregister("wanted");
        let events = monitor.refresh(directory.as_ref());
        reconcile(&mixer, &events, &wanted);
        assert!(mixer.channel_names().is_empty());
        mixer.reclaim();
    }
}

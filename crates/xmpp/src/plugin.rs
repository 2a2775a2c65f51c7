//! Conversational plugins.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use jid::Jid;
use nobot_core::event::{Channel, Event, EventBus, EventPayload, EventSource};
use tracing::{debug, info, warn};

use crate::error::PluginError;
use crate::session::SessionHandle;

/// A responder to inbound chat text.
///
/// `respond` must not block: long-running work is spawned and its result
/// sent back through the [`SessionHandle`] the plugin was built with.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, text: &str) -> bool;

    fn respond(&self, sender: &Jid, text: &str);
}

pub type PluginConstructor = Arc<dyn Fn(SessionHandle) -> Box<dyn Plugin> + Send + Sync>;

/// Plugin identifiers mapped to their constructors.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    constructors: BTreeMap<String, PluginConstructor>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, id: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(SessionHandle) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.constructors.insert(id.into(), Arc::new(constructor));
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.constructors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    fn constructor(&self, id: &str) -> Result<&PluginConstructor, PluginError> {
        self.constructors
            .get(id)
            .ok_or_else(|| PluginError::Unknown(id.to_string()))
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("ids", &self.constructors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Loaded plugins, in configuration order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    /// Build every plugin named in `ids`.
    ///
    /// All identifiers are resolved before anything is constructed, so an
    /// unknown one leaves nothing half-loaded.
    pub fn load(
        ids: &[String],
        catalog: &PluginCatalog,
        handle: &SessionHandle,
        event_bus: &dyn EventBus,
    ) -> Result<Self, PluginError> {
        let constructors = ids
            .iter()
            .map(|id| catalog.constructor(id).map(|constructor| (id, constructor)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut registry = Self::default();
        for (id, constructor) in constructors {
            registry.plugins.push(constructor(handle.clone()));
            info!(plugin_id = %id, "plugin loaded");
            publish_loaded(event_bus, id);
        }
        Ok(registry)
    }

    /// Offer `text` to every plugin in order; each match responds.
    ///
    /// Returns how many plugins responded.
    pub fn dispatch(&self, sender: &Jid, text: &str) -> usize {
        let mut responded = 0;
        for plugin in &self.plugins {
            if plugin.matches(text) {
                debug!(plugin = plugin.name(), %sender, "plugin matched");
                plugin.respond(sender, text);
                responded += 1;
            }
        }
        responded
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

fn publish_loaded(event_bus: &dyn EventBus, id: &str) {
    let Ok(channel) = Channel::new("plugin.loaded") else {
        return;
    };

    let event = Event::new(
        channel,
        EventSource::Plugin(id.to_string()),
        EventPayload::PluginLoaded {
            plugin_id: id.to_string(),
        },
    );
    if let Err(error) = event_bus.publish(event) {
        warn!(%error, plugin_id = %id, "failed to publish plugin load event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionHandle;
    use assert_matches::assert_matches;
    use nobot_core::event::BroadcastEventBus;
    use std::str::FromStr;
    use std::sync::Mutex;

    type CallLog = Arc<Mutex<Vec<(String, String)>>>;

    struct Recorder {
        name: &'static str,
        prefix: Option<&'static str>,
        calls: CallLog,
    }

    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn matches(&self, text: &str) -> bool {
            self.prefix.is_none_or(|prefix| text.starts_with(prefix))
        }

        fn respond(&self, _sender: &Jid, text: &str) {
            self.calls
                .lock()
                .unwrap()
                .push((self.name.to_string(), text.to_string()));
        }
    }

    fn catalog(calls: &CallLog) -> PluginCatalog {
        let mut catalog = PluginCatalog::new();
        let always = Arc::clone(calls);
        catalog.register("always", move |_| {
            Box::new(Recorder {
                name: "always",
                prefix: None,
                calls: Arc::clone(&always),
            })
        });
        let ping = Arc::clone(calls);
        catalog.register("ping", move |_| {
            Box::new(Recorder {
                name: "ping",
                prefix: Some("ping"),
                calls: Arc::clone(&ping),
            })
        });
        catalog
    }

    fn sender() -> Jid {
        Jid::from_str("lobby@conf.example.com/Alice").unwrap()
    }

    #[test]
    fn every_matching_plugin_responds_in_registration_order() {
        let calls = CallLog::default();
        let (handle, _commands) = SessionHandle::detached("bot@example.com");
        let bus = BroadcastEventBus::default();
        let registry = PluginRegistry::load(
            &["always".to_string(), "ping".to_string()],
            &catalog(&calls),
            &handle,
            &bus,
        )
        .unwrap();

        assert_eq!(registry.dispatch(&sender(), "ping!"), 2);
        assert_eq!(registry.dispatch(&sender(), "hello"), 1);

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                ("always".to_string(), "ping!".to_string()),
                ("ping".to_string(), "ping!".to_string()),
                ("always".to_string(), "hello".to_string()),
            ]
        );
    }

    #[test]
    fn load_order_follows_configuration_not_catalog() {
        let calls = CallLog::default();
        let (handle, _commands) = SessionHandle::detached("bot@example.com");
        let bus = BroadcastEventBus::default();
        let registry = PluginRegistry::load(
            &["ping".to_string(), "always".to_string()],
            &catalog(&calls),
            &handle,
            &bus,
        )
        .unwrap();

        assert_eq!(registry.names(), vec!["ping", "always"]);
    }

    #[test]
    fn unknown_plugin_fails_without_loading_anything() {
        let calls = CallLog::default();
        let (handle, _commands) = SessionHandle::detached("bot@example.com");
        let bus = BroadcastEventBus::default();
        let error = PluginRegistry::load(
            &["always".to_string(), "nope".to_string()],
            &catalog(&calls),
            &handle,
            &bus,
        )
        .err()
        .unwrap();

        assert_matches!(&error, PluginError::Unknown(id) if id == "nope");
        assert_eq!(error.to_string(), "Cannot find plugin 'nope'");
    }

    #[tokio::test]
    async fn load_publishes_plugin_loaded_events() {
        let calls = CallLog::default();
        let (handle, _commands) = SessionHandle::detached("bot@example.com");
        let bus = BroadcastEventBus::default();
        let mut subscription = bus.subscribe("plugin.*").unwrap();

        PluginRegistry::load(&["ping".to_string()], &catalog(&calls), &handle, &bus).unwrap();

        let event = subscription.recv().await.unwrap();
        assert_eq!(event.channel.as_str(), "plugin.loaded");
        assert_matches!(
            event.payload,
            EventPayload::PluginLoaded { plugin_id } if plugin_id == "ping"
        );
    }

    #[test]
    fn catalog_lists_registered_ids() {
        let calls = CallLog::default();
        let catalog = catalog(&calls);
        assert!(catalog.contains("ping"));
        assert!(!catalog.contains("pugme"));
        assert_eq!(catalog.ids().collect::<Vec<_>>(), vec!["always", "ping"]);
    }

    #[test]
    fn empty_registry_dispatches_nothing() {
        let registry = PluginRegistry::default();
        assert!(registry.is_empty());
        assert_eq!(registry.dispatch(&sender(), "ping"), 0);
    }
}

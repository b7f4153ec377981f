use std::collections::HashMap;

use crate::{Trigger, TryParse};

/// Lookup table from event name to [`Trigger`] for one configuration snapshot.
///
/// The registry is built in one pass and never mutated afterwards. A configuration refresh builds a
/// new registry.
#[derive(Debug, Default, Clone)]
pub struct TriggerRegistry {
    triggers: HashMap<String, Trigger>,
}

impl TriggerRegistry {
    /// Build a registry from `triggers`.
    ///
    /// If several triggers share an event name, the one processed last replaces the others. Input
    /// collections without a defined order (e.g., a `HashSet`) make the survivor unpredictable, so
    /// configuration sources must keep event names unique. A collision is logged.
    pub fn build(triggers: impl IntoIterator<Item = Trigger>) -> TriggerRegistry {
        let mut registry = HashMap::new();
        for trigger in triggers {
            if let Some(previous) = registry.insert(trigger.event_name.clone(), trigger) {
                log::warn!(target: "paywall",
                           event_name = previous.event_name.as_str();
                           "duplicate trigger for event name, keeping the last one");
            }
        }
        TriggerRegistry { triggers: registry }
    }

    /// Build a registry from server configuration, skipping triggers that failed to parse.
    pub fn from_configuration<'a>(
        triggers: impl IntoIterator<Item = &'a TryParse<Trigger>>,
    ) -> TriggerRegistry {
        TriggerRegistry::build(triggers.into_iter().filter_map(|trigger| match trigger {
            TryParse::Parsed(trigger) => Some(trigger.clone()),
            TryParse::ParseFailed(json) => {
                log::warn!(target: "paywall",
                           trigger:serde = json;
                           "skipping trigger that failed to parse");
                None
            }
        }))
    }

    pub fn get(&self, event_name: &str) -> Option<&Trigger> {
        self.triggers.get(event_name)
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Iterate over registered triggers in no particular order.
    pub fn triggers(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }
}

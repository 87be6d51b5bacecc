use serde::Deserialize;

use crate::error::ConfigError;
use crate::exchange::Exchange;
use crate::queue::{ErrorHandling, QueueConfig};

/// Top-level bus configuration, deserializable from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub bus_name: String,
    /// Identifies this process as the publisher of outgoing messages.
    pub host_info: String,
    /// Client-facing text substituted when a handler error carries none.
    pub default_client_error_message: String,
    /// Bus-wide retry policy; queue- and message-level policies override it.
    pub error_handling: Option<ErrorHandling>,
    /// Capacity of the diagnostic event broadcast channel.
    pub event_channel_capacity: usize,
    pub queues: Vec<QueueConfig>,
    pub exchanges: Vec<Exchange>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus_name: String::new(),
            host_info: "localhost".to_string(),
            default_client_error_message:
                "The request could not be processed. Please try again later.".to_string(),
            error_handling: None,
            event_channel_capacity: 256,
            queues: Vec::new(),
            exchanges: Vec::new(),
        }
    }
}

impl BusConfig {
    pub fn new(bus_name: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            ..Self::default()
        }
    }

    pub fn add_queue(mut self, queue: QueueConfig) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn add_exchange(mut self, exchange: Exchange) -> Self {
        self.exchanges.push(exchange);
        self
    }

    /// Construction-time validation — the only fatal error path.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_name.trim().is_empty() {
            return Err(ConfigError::EmptyBusName);
        }
        if self.default_client_error_message.trim().is_empty() {
            return Err(ConfigError::EmptyClientErrorMessage);
        }

        let mut queue_names = std::collections::HashSet::new();
        for queue in &self.queues {
            if !queue_names.insert(queue.name.as_str()) {
                return Err(ConfigError::DuplicateQueue(queue.name.clone()));
            }
        }

        let mut exchange_names = std::collections::HashSet::new();
        for exchange in &self.exchanges {
            if !exchange_names.insert(exchange.name.as_str()) {
                return Err(ConfigError::DuplicateExchange(exchange.name.clone()));
            }
            for binding in &exchange.bindings {
                if !queue_names.contains(binding.queue.as_str()) {
                    return Err(ConfigError::UnknownBindingTarget {
                        exchange: exchange.name.clone(),
                        queue: binding.queue.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The designated fault queue, if one is configured.
    pub fn fault_queue_name(&self) -> Option<&str> {
        self.queues
            .iter()
            .find(|q| q.is_fault_queue)
            .map(|q| q.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeType;

    #[test]
    fn default_config_values() {
        let config = BusConfig::default();
        assert_eq!(config.host_info, "localhost");
        assert!(!config.default_client_error_message.is_empty());
        assert_eq!(config.event_channel_capacity, 256);
        assert!(config.queues.is_empty());
    }

    #[test]
    fn empty_bus_name_is_rejected() {
        let config = BusConfig::default();
        assert!(matches!(config.validate(), Err(ConfigError::EmptyBusName)));
    }

    #[test]
    fn empty_client_error_message_is_rejected() {
        let mut config = BusConfig::new("bus");
        config.default_client_error_message = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyClientErrorMessage)
        ));
    }

    #[test]
    fn duplicate_queue_names_are_rejected() {
        let config = BusConfig::new("bus")
            .add_queue(QueueConfig::new("q1"))
            .add_queue(QueueConfig::new("q1"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateQueue(name)) if name == "q1"
        ));
    }

    #[test]
    fn binding_to_unknown_queue_is_rejected() {
        let config = BusConfig::new("bus")
            .add_queue(QueueConfig::new("q1"))
            .add_exchange(Exchange::new("commands", ExchangeType::Direct).bind("missing", "r"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownBindingTarget { queue, .. }) if queue == "missing"
        ));
    }

    #[test]
    fn toml_parsing_with_overrides() {
        let toml_str = r#"
            bus_name = "billing-bus"
            host_info = "billing-01"

            [error_handling]
            max_retries = 5
            retry_interval_ms = 500

            [[queues]]
            name = "invoices"
            queue_type = "SequentialDelayable"

            [[queues]]
            name = "faults"
            is_fault_queue = true
            is_pull = true

            [[exchanges]]
            name = "commands"
            exchange_type = "Direct"
            bindings = [{ queue = "invoices", route = "invoice.create" }]
        "#;
        let config: BusConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.bus_name, "billing-bus");
        assert_eq!(config.host_info, "billing-01");
        assert_eq!(config.error_handling.unwrap().max_retries, 5);
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.fault_queue_name(), Some("faults"));
        assert_eq!(config.exchanges[0].bindings[0].route, "invoice.create");
    }

    #[test]
    fn toml_parsing_empty_uses_defaults() {
        let config: BusConfig = toml::from_str("").unwrap();
        assert_eq!(config.host_info, "localhost");
        assert!(config.exchanges.is_empty());
    }
}

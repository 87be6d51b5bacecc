use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Routing behavior of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExchangeType {
    /// Bindings whose route name equals the routing key.
    #[default]
    Direct,
    /// Every binding.
    FanOut,
    /// Bindings matched against the exchange's header pattern.
    Headers,
}

/// Header-pattern combinator for `ExchangeType::Headers`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum HeadersMatch {
    /// Every pattern entry must be present and equal (conjunction).
    #[default]
    All,
    /// At least one pattern entry must be present and equal (disjunction).
    Any,
}

/// Pairing of a target queue with a route name on an exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub queue: String,
    #[serde(default)]
    pub route: String,
}

/// Named routing point. Bindings keep insertion order; a queue bound more
/// than once is visited once per binding (the bus deduplicates by queue id
/// before dispatch).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Exchange {
    pub name: String,
    pub exchange_type: ExchangeType,
    pub bindings: Vec<Binding>,
    /// Header pattern consulted by `ExchangeType::Headers`.
    pub headers: HashMap<String, String>,
    pub headers_match: HeadersMatch,
}

impl Default for Exchange {
    fn default() -> Self {
        Self {
            name: String::new(),
            exchange_type: ExchangeType::Direct,
            bindings: Vec::new(),
            headers: HashMap::new(),
            headers_match: HeadersMatch::All,
        }
    }
}

impl Exchange {
    pub fn new(name: impl Into<String>, exchange_type: ExchangeType) -> Self {
        Self {
            name: name.into(),
            exchange_type,
            ..Self::default()
        }
    }

    pub fn bind(mut self, queue: impl Into<String>, route: impl Into<String>) -> Self {
        self.bindings.push(Binding {
            queue: queue.into(),
            route: route.into(),
        });
        self
    }

    pub fn with_headers(
        mut self,
        headers: HashMap<String, String>,
        headers_match: HeadersMatch,
    ) -> Self {
        self.headers = headers;
        self.headers_match = headers_match;
        self
    }

    /// Resolve the target queue names for a publication, in binding
    /// insertion order.
    pub fn resolve(
        &self,
        routing_key: Option<&str>,
        message_headers: &HashMap<String, String>,
    ) -> Vec<&str> {
        match self.exchange_type {
            ExchangeType::Direct => self
                .bindings
                .iter()
                .filter(|b| Some(b.route.as_str()) == routing_key)
                .map(|b| b.queue.as_str())
                .collect(),
            ExchangeType::FanOut => self.bindings.iter().map(|b| b.queue.as_str()).collect(),
            ExchangeType::Headers => {
                if !match_headers(message_headers, &self.headers, self.headers_match) {
                    return Vec::new();
                }
                self.bindings.iter().map(|b| b.queue.as_str()).collect()
            }
        }
    }
}

/// Strict-equality header matching. Empty message headers or an empty
/// pattern never match.
pub fn match_headers(
    message_headers: &HashMap<String, String>,
    pattern: &HashMap<String, String>,
    mode: HeadersMatch,
) -> bool {
    if message_headers.is_empty() || pattern.is_empty() {
        return false;
    }
    match mode {
        HeadersMatch::All => pattern
            .iter()
            .all(|(k, v)| message_headers.get(k) == Some(v)),
        HeadersMatch::Any => pattern
            .iter()
            .any(|(k, v)| message_headers.get(k) == Some(v)),
    }
}

//! Declarative net definitions.
//!
//! Nets can be described in JSON or YAML:
//!
//! ```yaml
//! tokens: [{ name: water, volume: 1 }]
//! places:
//!   - { name: tank, capacity: 100, marking: { water: 10 } }
//!   - { name: basin }
//! transitions:
//!   - name: pump
//!     period: 2
//!     consumers: [{ place: tank, token: water, quantity: 2 }]
//!     producers: [{ place: basin, token: water, quantity: 2 }]
//! ```

use crate::error::NetError;
use crate::net::Net;
use crate::place::{Place, UNBOUNDED};
use crate::token::NamedToken;
use crate::transition::Transition;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

fn default_volume() -> u32 {
    1
}

/// A token kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDef {
    pub name: String,

    #[serde(default = "default_volume")]
    pub volume: u32,
}

/// A place with optional capacity and initial marking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceDef {
    pub name: String,

    /// Total volume bound; absent means unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<u64>,

    /// Initial committed counts keyed by token name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub marking: BTreeMap<String, i64>,
}

/// One weighted arc of a transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArcDef {
    pub place: String,
    pub token: String,
    pub quantity: i64,
}

/// A transition with its arcs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDef {
    pub name: String,

    #[serde(default)]
    pub period: u64,

    #[serde(default)]
    pub consumers: Vec<ArcDef>,

    #[serde(default)]
    pub producers: Vec<ArcDef>,
}

/// Raw net definition as read from disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetDefinitionRaw {
    #[serde(default)]
    pub tokens: Vec<TokenDef>,

    #[serde(default)]
    pub places: Vec<PlaceDef>,

    #[serde(default)]
    pub transitions: Vec<TransitionDef>,

    /// Optional metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Validated net definition.
#[derive(Debug, Clone)]
pub struct NetDefinition {
    /// Net name.
    pub name: String,

    /// Token kinds by name.
    tokens: BTreeMap<String, NamedToken>,

    /// Original raw definition.
    pub raw: NetDefinitionRaw,

    /// Hash of the definition for identification.
    pub checksum: String,
}

impl NetDefinition {
    /// Parses and validates a definition from a JSON value.
    pub fn from_json(name: impl Into<String>, json: &serde_json::Value) -> Result<Self, NetError> {
        let raw: NetDefinitionRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(name, raw)
    }

    /// Parses and validates a definition from JSON text.
    pub fn from_json_str(name: impl Into<String>, text: &str) -> Result<Self, NetError> {
        let raw: NetDefinitionRaw = serde_json::from_str(text)?;
        Self::from_raw(name, raw)
    }

    /// Parses and validates a definition from YAML text.
    pub fn from_yaml_str(name: impl Into<String>, text: &str) -> Result<Self, NetError> {
        let raw: NetDefinitionRaw = serde_yaml::from_str(text)?;
        Self::from_raw(name, raw)
    }

    /// Validates a raw definition.
    pub fn from_raw(name: impl Into<String>, raw: NetDefinitionRaw) -> Result<Self, NetError> {
        let name = name.into();

        let mut tokens = BTreeMap::new();
        for def in &raw.tokens {
            let token = NamedToken::new(&def.name, def.volume).map_err(|_| invalid(format!(
                "token '{}' must have a positive volume",
                def.name
            )))?;
            if tokens.insert(def.name.clone(), token).is_some() {
                return Err(invalid(format!("duplicate token '{}'", def.name)));
            }
        }

        let mut places = HashSet::new();
        for place in &raw.places {
            if !places.insert(place.name.as_str()) {
                return Err(invalid(format!("duplicate place '{}'", place.name)));
            }
            for (token, count) in &place.marking {
                if !tokens.contains_key(token) {
                    return Err(invalid(format!(
                        "place '{}' marks undeclared token '{}'",
                        place.name, token
                    )));
                }
                if *count < 0 {
                    return Err(invalid(format!(
                        "place '{}' has negative marking {} for '{}'",
                        place.name, count, token
                    )));
                }
            }
        }

        let mut transitions = HashSet::new();
        for transition in &raw.transitions {
            if !transitions.insert(transition.name.as_str()) {
                return Err(invalid(format!(
                    "duplicate transition '{}'",
                    transition.name
                )));
            }
            for arc in transition.consumers.iter().chain(&transition.producers) {
                if !places.contains(arc.place.as_str()) {
                    return Err(invalid(format!(
                        "transition '{}' references undeclared place '{}'",
                        transition.name, arc.place
                    )));
                }
                if !tokens.contains_key(&arc.token) {
                    return Err(invalid(format!(
                        "transition '{}' references undeclared token '{}'",
                        transition.name, arc.token
                    )));
                }
                if arc.quantity <= 0 {
                    return Err(invalid(format!(
                        "transition '{}' has non-positive quantity {} on place '{}'",
                        transition.name, arc.quantity, arc.place
                    )));
                }
            }
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            name,
            tokens,
            raw,
            checksum,
        })
    }

    /// Looks up a declared token kind.
    pub fn token(&self, name: &str) -> Option<&NamedToken> {
        self.tokens.get(name)
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, NetError> {
        Ok(serde_json::to_value(&self.raw)?)
    }

    /// Creates every place, transition and arc of this definition in `net`
    /// and seeds the initial marking.
    pub fn build_into(&self, net: &Net<NamedToken>) -> Result<NetLayout, NetError> {
        let mut layout = NetLayout::default();

        for def in &self.raw.places {
            let place = net
                .create_place_with_capacity(Some(&def.name), def.capacity.unwrap_or(UNBOUNDED))?;
            for (token_name, count) in &def.marking {
                let token = self.require_token(token_name)?;
                if !place.add_token(token, *count)? {
                    return Err(invalid(format!(
                        "initial marking of {} '{}' does not fit place '{}'",
                        count, token_name, def.name
                    )));
                }
            }
            layout.places.insert(def.name.clone(), place);
        }

        for def in &self.raw.transitions {
            let transition = net.create_transition(def.period, Some(&def.name))?;
            for arc in &def.consumers {
                let place = layout.require_place(&arc.place)?;
                let token = self.require_token(&arc.token)?;
                transition.add_consumer(place, token.clone(), arc.quantity, None)?;
            }
            for arc in &def.producers {
                let place = layout.require_place(&arc.place)?;
                let token = self.require_token(&arc.token)?;
                transition.add_producer(place, token.clone(), arc.quantity, None)?;
            }
            layout.transitions.insert(def.name.clone(), transition);
        }

        tracing::info!(
            "Built net '{}' ({} places, {} transitions, checksum {})",
            self.name,
            layout.places.len(),
            layout.transitions.len(),
            self.checksum
        );
        Ok(layout)
    }

    fn require_token(&self, name: &str) -> Result<&NamedToken, NetError> {
        self.token(name)
            .ok_or_else(|| invalid(format!("undeclared token '{}'", name)))
    }
}

fn invalid(reason: String) -> NetError {
    NetError::InvalidDefinition { reason }
}

/// Name-to-handle mapping of a net built from a definition.
#[derive(Debug, Default)]
pub struct NetLayout {
    pub places: BTreeMap<String, Arc<Place<NamedToken>>>,
    pub transitions: BTreeMap<String, Arc<Transition<NamedToken>>>,
}

impl NetLayout {
    pub fn place(&self, name: &str) -> Option<&Arc<Place<NamedToken>>> {
        self.places.get(name)
    }

    pub fn transition(&self, name: &str) -> Option<&Arc<Transition<NamedToken>>> {
        self.transitions.get(name)
    }

    fn require_place(&self, name: &str) -> Result<&Arc<Place<NamedToken>>, NetError> {
        self.place(name)
            .ok_or_else(|| invalid(format!("undeclared place '{}'", name)))
    }

    /// Committed counts keyed by place name, then token name.
    pub fn marking(&self) -> BTreeMap<String, BTreeMap<String, i64>> {
        self.places
            .iter()
            .map(|(name, place)| {
                let counts = place
                    .tokens()
                    .into_iter()
                    .map(|(token, count)| (token.name().to_string(), count))
                    .collect();
                (name.clone(), counts)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn sample_definition() -> serde_json::Value {
        serde_json::json!({
            "tokens": [{"name": "water"}, {"name": "barrel", "volume": 5}],
            "places": [
                {"name": "tank", "capacity": 100, "marking": {"water": 10}},
                {"name": "basin"}
            ],
            "transitions": [
                {
                    "name": "pump",
                    "period": 2,
                    "consumers": [{"place": "tank", "token": "water", "quantity": 2}],
                    "producers": [{"place": "basin", "token": "water", "quantity": 2}]
                }
            ]
        })
    }

    #[test]
    fn test_parse_definition() {
        let def = NetDefinition::from_json("irrigation", &sample_definition()).unwrap();

        assert_eq!(def.name, "irrigation");
        assert_eq!(def.raw.places.len(), 2);
        assert_eq!(def.token("water").unwrap().volume().get(), 1);
        assert_eq!(def.token("barrel").unwrap().volume().get(), 5);
        assert_eq!(def.checksum.len(), 8);
    }

    #[test]
    fn test_yaml_matches_json() {
        let yaml = r#"
tokens:
  - name: water
  - name: barrel
    volume: 5
places:
  - name: tank
    capacity: 100
    marking: { water: 10 }
  - name: basin
transitions:
  - name: pump
    period: 2
    consumers: [{ place: tank, token: water, quantity: 2 }]
    producers: [{ place: basin, token: water, quantity: 2 }]
"#;
        let from_yaml = NetDefinition::from_yaml_str("irrigation", yaml).unwrap();
        let from_json = NetDefinition::from_json("irrigation", &sample_definition()).unwrap();
        assert_eq!(from_yaml.checksum, from_json.checksum);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let a = NetDefinition::from_json("a", &sample_definition()).unwrap();
        let mut json = sample_definition();
        json["transitions"][0]["period"] = serde_json::json!(3);
        let b = NetDefinition::from_json("a", &json).unwrap();
        assert_ne!(a.checksum, b.checksum);
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        let cases = [
            serde_json::json!({"tokens": [{"name": "w"}, {"name": "w"}]}),
            serde_json::json!({"tokens": [{"name": "w", "volume": 0}]}),
            serde_json::json!({"places": [{"name": "p"}, {"name": "p"}]}),
            serde_json::json!({"places": [{"name": "p", "marking": {"w": 1}}]}),
            serde_json::json!({
                "tokens": [{"name": "w"}],
                "places": [{"name": "p", "marking": {"w": -1}}]
            }),
            serde_json::json!({
                "tokens": [{"name": "w"}],
                "transitions": [{"name": "t", "consumers": [{"place": "p", "token": "w", "quantity": 1}]}]
            }),
            serde_json::json!({
                "places": [{"name": "p"}],
                "transitions": [{"name": "t", "producers": [{"place": "p", "token": "w", "quantity": 1}]}]
            }),
            serde_json::json!({
                "tokens": [{"name": "w"}],
                "places": [{"name": "p"}],
                "transitions": [{"name": "t", "consumers": [{"place": "p", "token": "w", "quantity": 0}]}]
            }),
            serde_json::json!({"transitions": [{"name": "t"}, {"name": "t"}]}),
        ];

        for json in cases {
            let result = NetDefinition::from_json("bad", &json);
            assert!(
                matches!(result, Err(NetError::InvalidDefinition { .. })),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            NetDefinition::from_json_str("bad", "{"),
            Err(NetError::Json(_))
        ));
        assert!(matches!(
            NetDefinition::from_yaml_str("bad", "places: {"),
            Err(NetError::Yaml(_))
        ));
    }

    #[test]
    fn test_build_into_net() {
        let def = NetDefinition::from_json("irrigation", &sample_definition()).unwrap();
        let net = Net::new();
        let layout = def.build_into(&net).unwrap();

        assert_eq!(net.place_count(), 2);
        assert_eq!(net.transition_count(), 1);

        let water = def.token("water").unwrap();
        let tank = layout.place("tank").unwrap();
        assert_eq!(tank.capacity(), 100);
        assert_eq!(tank.description(), Some("tank"));
        assert_eq!(tank.get_token_count(water), 10);
        assert!(!layout.place("basin").unwrap().is_bounded());

        let pump = layout.transition("pump").unwrap();
        assert_eq!(pump.period(), 2);
        assert_eq!(pump.consumers().len(), 1);
        assert_eq!(pump.producers().len(), 1);

        // Period 2: two idle ticks, then the first attempt
        assert_eq!(net.tick().unwrap().idle, 1);
        assert_eq!(net.tick().unwrap().idle, 1);
        assert_eq!(net.tick().unwrap().committed, 1);
        let marking = layout.marking();
        assert_eq!(marking["tank"]["water"], 8);
        assert_eq!(marking["basin"]["water"], 2);
    }

    #[test]
    fn test_build_rejects_overfull_marking() {
        let json = serde_json::json!({
            "tokens": [{"name": "barrel", "volume": 5}],
            "places": [{"name": "shed", "capacity": 10, "marking": {"barrel": 3}}]
        });
        let def = NetDefinition::from_json("storage", &json).unwrap();

        let result = def.build_into(&Net::new());
        assert!(matches!(result, Err(NetError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_to_json_roundtrip() {
        let def = NetDefinition::from_json("irrigation", &sample_definition()).unwrap();
        let again = NetDefinition::from_json("irrigation", &def.to_json().unwrap()).unwrap();
        assert_eq!(def.checksum, again.checksum);
    }
}

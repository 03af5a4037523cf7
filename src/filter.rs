//! Query filters and their per-resource normalization.
//!
//! ClearPass does not agree with itself on how MAC addresses look: the
//! `endpoint` resource stores them as bare lowercase hex, while `guest`
//! expects uppercase hyphenated pairs. Filters are normalized against the
//! target resource right before the request is issued.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{CppmError, CppmResult, MacAddress};

/// How a MAC-valued filter field is written for a given resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MacFormat {
    /// `86df11223344`
    BareLower,
    /// `86-DF-11-22-33-44`
    Hyphen,
}

impl MacFormat {
    fn apply(self, raw: &str) -> String {
        let mac = MacAddress::new(raw);
        match self {
            MacFormat::BareLower => mac.bare_lower(),
            MacFormat::Hyphen => mac.hyphen(),
        }
    }
}

static NORMALIZERS: Lazy<HashMap<&'static str, HashMap<&'static str, MacFormat>>> =
    Lazy::new(|| {
        HashMap::from([
            ("endpoint", HashMap::from([("mac_address", MacFormat::BareLower)])),
            ("guest", HashMap::from([("mac", MacFormat::Hyphen)])),
            ("insight", HashMap::from([("mac", MacFormat::BareLower)])),
        ])
    });

/// A query filter: field name to JSON value.
///
/// Values may be plain strings, structured JSON (operators such as `$in`),
/// or the `{"$exists": true}` marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `field` to equal `value`.
    pub fn equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(field.into(), Value::String(value.into()));
        self
    }

    /// Requires `field` to be present.
    pub fn exists(mut self, field: impl Into<String>) -> Self {
        self.0.insert(field.into(), json!({ "$exists": true }));
        self
    }

    /// Sets an arbitrary JSON condition on `field`.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.0.insert(field.into(), value);
    }

    /// Adds every condition of `other`, overriding fields already set.
    pub fn merge(&mut self, other: Filter) {
        self.0.extend(other.0);
    }

    /// Parses a command-line style expression and adds it.
    ///
    /// - `field` requires the field to exist.
    /// - `field={...}` takes the right hand side as a JSON object.
    /// - `field=value` requires the field to equal the string `value`.
    pub fn parse_arg(&mut self, arg: &str) -> CppmResult<()> {
        let arg = arg.trim();
        match arg.split_once('=') {
            None => {
                self.0.insert(arg.to_string(), json!({ "$exists": true }));
            }
            Some((field, value)) => {
                let field = field.trim().to_string();
                let value = value.trim();
                if value.starts_with('{') {
                    let parsed: Value = serde_json::from_str(value)?;
                    self.0.insert(field, parsed);
                } else {
                    self.0.insert(field, Value::String(value.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Parses a JSON object into a filter.
    pub fn from_json_str(text: &str) -> CppmResult<Self> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Ok(Filter(map)),
            other => Err(CppmError::Normalization {
                field: String::new(),
                reason: format!("filter must be a JSON object, got {other}"),
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Rewrites the fields the target resource has a rule for.
    ///
    /// The resource is the first segment of `path`. Only string values are
    /// rewritten; objects and arrays under a rule field are left alone, and
    /// any other scalar there is rejected before any request is made.
    pub fn normalize(mut self, path: &str) -> CppmResult<Self> {
        let resource = path.trim_start_matches('/').split('/').next().unwrap_or_default();
        let Some(rules) = NORMALIZERS.get(resource) else {
            return Ok(self);
        };
        for (field, value) in self.0.iter_mut() {
            let Some(format) = rules.get(field.as_str()) else {
                continue;
            };
            match value {
                Value::String(raw) => *raw = format.apply(raw),
                Value::Object(_) | Value::Array(_) => {}
                other => {
                    return Err(CppmError::Normalization {
                        field: field.clone(),
                        reason: format!("expected a MAC address string, got {other}"),
                    })
                }
            }
        }
        Ok(self)
    }

    /// JSON text sent in the `filter` query parameter.
    pub fn to_query_value(&self) -> CppmResult<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        Filter(map)
    }
}

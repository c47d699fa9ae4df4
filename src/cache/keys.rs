//! Cache key construction.
//!
//! A [`CacheKey`] is a resource plus the canonical JSON form of the request
//! parameters. Canonical means object keys are sorted at every depth, so two
//! structurally equal parameter values always produce the same key no matter
//! the field declaration order or map iteration order.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::error::CacheError;
use super::resource::Resource;

/// Parameters that may be used to address a cache entry.
///
/// Implementing the trait is an explicit opt-in; the default method is the
/// canonical JSON encoding, which is what almost every params type wants:
///
/// ```ignore
/// #[derive(Serialize)]
/// struct KpiQuery { range: String }
///
/// impl CacheKeyable for KpiQuery {}
/// ```
pub trait CacheKeyable: Serialize {
    fn key_fragment(&self) -> Result<String, serde_json::Error> {
        canonical_json(self)
    }
}

/// Requests without parameters.
impl CacheKeyable for () {
    fn key_fragment(&self) -> Result<String, serde_json::Error> {
        Ok(String::new())
    }
}

impl CacheKeyable for Value {}
impl CacheKeyable for str {}
impl CacheKeyable for String {}
impl<V: Serialize> CacheKeyable for HashMap<String, V> {}
impl<V: Serialize> CacheKeyable for BTreeMap<String, V> {}

/// Identity of a cached entry across both tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    resource: Resource,
    fragment: String,
}

impl CacheKey {
    pub fn new<P>(resource: Resource, params: &P) -> Result<Self, CacheError>
    where
        P: CacheKeyable + ?Sized,
    {
        let fragment = params
            .key_fragment()
            .map_err(|source| CacheError::Serialization { resource, source })?;
        Ok(Self { resource, fragment })
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// The string form persisted by the durable tier.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.fragment)
    }
}

/// Serialize any value to JSON with object keys sorted at every level.
pub fn canonical_json<T>(value: &T) -> Result<String, serde_json::Error>
where
    T: Serialize + ?Sized,
{
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut fields: Vec<(&String, &Value)> = map.iter().collect();
            fields.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

            out.push('{');
            for (index, (name, field)) in fields.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(name)?);
                out.push(':');
                write_canonical(field, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar)?),
    }
    Ok(())
}

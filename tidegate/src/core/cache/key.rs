//! Cache-key derivation
//!
//! A [`QueryDescriptor`] names a query family plus its parameters. The cache
//! key is a pure function of the normalized descriptor: parameters are held
//! sorted, transient call-site fields never enter the digest, and the tenant
//! discriminator is always mixed in, so two logically identical queries
//! collide on the same key no matter how the call sites spell them.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

const KEY_PREFIX: &str = "qc";

// Separators below parameter values; keeps ("ab","c") and ("a","bc") from
// hashing identically.
const FIELD_SEP: u8 = 0x1e;
const PAIR_SEP: u8 = 0x1f;

/// Normalized description of one cacheable query.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    namespace: String,
    tenant: Option<String>,
    params: BTreeMap<String, String>,
    transient: BTreeMap<String, String>,
    tags: Vec<String>,
}

impl QueryDescriptor {
    /// Start a descriptor for a query family, e.g. `orders.list`.
    pub fn new(namespace: impl Into<String>) -> Self {
        QueryDescriptor {
            namespace: namespace.into(),
            tenant: None,
            params: BTreeMap::new(),
            transient: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    /// Scope the key to a tenant so multi-tenant deployments never collide.
    pub fn tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Add a parameter that shapes the result set. Insertion order is
    /// irrelevant; parameters are normalized sorted.
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Add a call-site-only field (a debug flag, a request id). Transient
    /// fields are carried for the compute callback but never enter the key.
    pub fn transient(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.transient.insert(key.into(), value.to_string());
        self
    }

    /// Tag the entry with an entity it covers, for tag-based invalidation.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// The query family name.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Read back a keyed parameter.
    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Read back a transient field.
    pub fn get_transient(&self, key: &str) -> Option<&str> {
        self.transient.get(key).map(String::as_str)
    }

    /// Tags registered on this descriptor.
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Derive the deterministic cache key.
    pub fn cache_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([FIELD_SEP]);
        hasher.update(self.tenant.as_deref().unwrap_or("-").as_bytes());
        for (key, value) in &self.params {
            hasher.update([FIELD_SEP]);
            hasher.update(key.as_bytes());
            hasher.update([PAIR_SEP]);
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();
        let mut key = String::with_capacity(KEY_PREFIX.len() + self.namespace.len() + 66);
        key.push_str(KEY_PREFIX);
        key.push(':');
        key.push_str(&self.namespace);
        key.push(':');
        for byte in digest {
            // Writing hex into a String cannot fail.
            let _ = write!(key, "{byte:02x}");
        }
        key
    }
}

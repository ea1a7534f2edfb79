//! Cache key derivation

use crate::domain::DomainError;

use super::entity::CacheId;

/// Separator between the cache name and the id segment
pub const KEY_SEPARATOR: char = ':';

/// Derives namespaced cache keys from entity ids
///
/// Keys have the form `{cache_name}:{id_segment}`. The id segment never
/// contains the separator: `%` and `:` are percent-encoded, so a key's owning
/// cache is always everything before its last separator. Nested names such as
/// `exposed:users` therefore never share keys with `exposed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCodec {
    cache_name: String,
    prefix: String,
}

impl KeyCodec {
    /// Creates a codec for the given cache name
    pub fn new(cache_name: impl Into<String>) -> Result<Self, DomainError> {
        let cache_name = cache_name.into();
        Self::validate_name(&cache_name)?;

        let prefix = format!("{}{}", cache_name, KEY_SEPARATOR);
        Ok(Self { cache_name, prefix })
    }

    fn validate_name(name: &str) -> Result<(), DomainError> {
        if name.is_empty() {
            return Err(DomainError::configuration("Cache name cannot be empty"));
        }

        if name.chars().any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']' | '\\')) {
            return Err(DomainError::configuration(format!(
                "Cache name '{}' cannot contain whitespace or glob characters",
                name
            )));
        }

        Ok(())
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    /// Returns the `{cache_name}:` prefix shared by every key
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Encodes an id into its cache key
    pub fn encode<I: CacheId>(&self, id: &I) -> String {
        format!("{}{}", self.prefix, escape_segment(&id.key_segment()))
    }

    pub fn encode_all<'a, I: CacheId>(&self, ids: impl IntoIterator<Item = &'a I>) -> Vec<String> {
        ids.into_iter().map(|id| self.encode(id)).collect()
    }

    /// Glob matching every key in this namespace
    pub fn namespace_glob(&self) -> String {
        format!("{}*", self.prefix)
    }

    /// Returns true if the key belongs to this namespace
    ///
    /// Keys of a nested cache (`{cache_name}:child:id`) are not owned.
    pub fn owns(&self, key: &str) -> bool {
        key.strip_prefix(&self.prefix)
            .is_some_and(|segment| !segment.contains(KEY_SEPARATOR))
    }
}

fn escape_segment(segment: &str) -> String {
    if !segment.contains(['%', KEY_SEPARATOR]) {
        return segment.to_string();
    }

    let mut escaped = String::with_capacity(segment.len() + 4);
    for c in segment.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            KEY_SEPARATOR => escaped.push_str("%3A"),
            other => escaped.push(other),
        }
    }
    escaped
}

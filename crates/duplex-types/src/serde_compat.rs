//! Lenient serde helpers for payloads produced by other implementations.
//!
//! Some peers encode empty lists as `null`. These helpers map such values to
//! the field's default instead of failing the whole payload.

use serde::{Deserialize, Deserializer};

/// Deserialize `null` as `T::default()`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Plugins {
        #[serde(default, deserialize_with = "null_as_default")]
        plugins: Vec<String>,
    }

    #[test]
    fn test_null_becomes_empty() {
        let parsed: Plugins = serde_json::from_str(r#"{"plugins":null}"#).unwrap();
        assert!(parsed.plugins.is_empty());
    }

    #[test]
    fn test_missing_becomes_empty() {
        let parsed: Plugins = serde_json::from_str("{}").unwrap();
        assert!(parsed.plugins.is_empty());
    }

    #[test]
    fn test_values_pass_through() {
        let parsed: Plugins = serde_json::from_str(r#"{"plugins":["chat"]}"#).unwrap();
        assert_eq!(parsed.plugins, vec!["chat"]);
    }

    #[test]
    fn test_wrong_type_still_fails() {
        assert!(serde_json::from_str::<Plugins>(r#"{"plugins":7}"#).is_err());
    }
}

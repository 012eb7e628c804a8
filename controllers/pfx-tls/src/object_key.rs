//! `namespace/name` keys used on the work queue.

use crate::error::InvalidKey;
use kube::{Resource, ResourceExt};

/// Build the queue key of an object: `namespace/name`, or `name` when cluster scoped.
///
/// Returns `None` for objects without a name.
pub fn meta_namespace_key<K: Resource>(obj: &K) -> Option<String> {
    let name = obj.meta().name.as_deref().filter(|n| !n.is_empty())?;
    Some(match obj.namespace() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_string(),
    })
}

/// Split a queue key back into `(namespace, name)`; the namespace is empty for `name` keys.
pub fn split_meta_namespace_key(key: &str) -> Result<(String, String), InvalidKey> {
    let mut parts = key.split('/');
    let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
        (Some(name), None, None) => ("", name),
        (Some(namespace), Some(name), None) => (namespace, name),
        _ => return Err(InvalidKey(key.to_string())),
    };
    if name.is_empty() {
        return Err(InvalidKey(key.to_string()));
    }
    Ok((namespace.to_string(), name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_meta_namespace_key() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("web-tls".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(meta_namespace_key(&secret).as_deref(), Some("default/web-tls"));

        let unnamed = Secret::default();
        assert_eq!(meta_namespace_key(&unnamed), None);
    }

    #[test]
    fn test_split_meta_namespace_key() {
        assert_eq!(
            split_meta_namespace_key("default/web-tls").expect("valid key"),
            ("default".to_string(), "web-tls".to_string())
        );
        assert_eq!(
            split_meta_namespace_key("web-tls").expect("valid key"),
            (String::new(), "web-tls".to_string())
        );
    }

    #[test]
    fn test_split_rejects_malformed_keys() {
        for key in ["a/b/c", "default/", "", "/"] {
            assert!(split_meta_namespace_key(key).is_err(), "{key:?} should be rejected");
        }
    }
}

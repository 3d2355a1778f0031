use std::sync::Arc;

use error_stack::Report;
use kube::runtime::watcher;

use crate::k8s::KubernetesError;

/// Read access to a locally cached collection of cluster objects.
pub trait Lister<K>: Send + Sync {
    /// Returns every currently known object. Never performs network I/O.
    fn list(&self) -> Result<Vec<Arc<K>>, Report<KubernetesError>>;

    /// True once the initial full listing has been applied.
    fn has_synced(&self) -> bool;
}

/// Which objects a cache mirrors, fixed when the cache is constructed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ListScope {
    /// Every object of the resource type, cluster-wide
    #[default]
    All,
    /// Only objects matching the filter
    Filtered(ListFilter),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Restrict to one namespace (namespaced resources only)
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListScope {
    /// Builds a scope from optional CLI filters, falling back to `All`.
    pub fn from_filters(
        namespace: Option<String>,
        label_selector: Option<String>,
        field_selector: Option<String>,
    ) -> Self {
        let filter = ListFilter {
            namespace: namespace.filter(|s| !s.is_empty()),
            label_selector: label_selector.filter(|s| !s.is_empty()),
            field_selector: field_selector.filter(|s| !s.is_empty()),
        };
        if filter == ListFilter::default() {
            ListScope::All
        } else {
            ListScope::Filtered(filter)
        }
    }

    /// Translates the scope into a watcher configuration.
    ///
    /// The namespace restriction is expressed as a `metadata.namespace` field
    /// selector so the same cluster-wide API handle serves every resource type.
    pub(crate) fn watcher_config(&self) -> watcher::Config {
        let config = watcher::Config::default();
        let ListScope::Filtered(filter) = self else {
            return config;
        };

        let mut config = config;
        if let Some(labels) = &filter.label_selector {
            config = config.labels(labels);
        }

        let fields: Vec<String> = filter
            .namespace
            .iter()
            .map(|ns| format!("metadata.namespace={ns}"))
            .chain(filter.field_selector.iter().cloned())
            .collect();
        if !fields.is_empty() {
            config = config.fields(&fields.join(","));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn empty_filters_select_all_objects() {
        assert_eq!(
            ListScope::from_filters(None, Some(String::new()), None),
            ListScope::All
        );
        let config = ListScope::All.watcher_config();
        assert_eq!(config.label_selector, None);
        assert_eq!(config.field_selector, None);
    }

    #[test]
    fn filtered_scope_combines_namespace_and_field_selectors() {
        let scope = ListScope::from_filters(
            Some("batch".to_string()),
            Some("team=infra".to_string()),
            Some("status.phase!=Succeeded".to_string()),
        );
        let config = scope.watcher_config();
        assert_eq!(config.label_selector.as_deref(), Some("team=infra"));
        assert_eq!(
            config.field_selector.as_deref(),
            Some("metadata.namespace=batch,status.phase!=Succeeded")
        );
    }
}

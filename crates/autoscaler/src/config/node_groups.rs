//! Loading of the node groups file.

use std::path::Path;

use api_types::NodeGroupConfig;
use api_types::NodeGroupsFile;
use error_stack::Report;
use error_stack::ResultExt;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}")]
    ReadFailed { path: String },
    #[error("Failed to decode node groups document")]
    DecodeFailed,
    #[error("Invalid node group configuration: {message}")]
    Invalid { message: String },
}

/// Reads and decodes the node groups file at `path`.
///
/// Only the document shape is checked here; semantic validation happens when
/// the registry is built.
pub fn load_node_groups(path: &Path) -> Result<Vec<NodeGroupConfig>, Report<ConfigError>> {
    let display = path.display().to_string();
    let content = std::fs::read_to_string(path).change_context(ConfigError::ReadFailed {
        path: display.clone(),
    })?;
    parse_node_groups(&content).attach_printable_lazy(|| format!("file: {display}"))
}

pub fn parse_node_groups(content: &str) -> Result<Vec<NodeGroupConfig>, Report<ConfigError>> {
    let file: NodeGroupsFile =
        serde_yaml::from_str(content).change_context(ConfigError::DecodeFailed)?;
    Ok(file.node_groups)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    const GROUPS: &str = r#"
node_groups:
  - name: pool-a
    label_key: pool
    label_value: a
    min_nodes: 1
    max_nodes: 5
  - name: pool-b
    label_key: pool
    label_value: b
    min_nodes: 0
    max_nodes: 3
    cooldown_seconds: 60
"#;

    #[test]
    fn loads_groups_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(GROUPS.as_bytes()).unwrap();

        let groups = load_node_groups(file.path()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].name, "pool-a");
        assert_eq!(groups[0].cooldown_seconds, 300);
        assert_eq!(groups[1].cooldown_seconds, 60);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_node_groups(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::ReadFailed { .. }
        ));
    }

    #[test]
    fn malformed_document_is_a_decode_error() {
        let err = parse_node_groups("node_groups: [{ name: x }]").unwrap_err();
        assert!(matches!(err.current_context(), ConfigError::DecodeFailed));
    }
}

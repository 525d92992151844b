//! Leading YAML frontmatter extraction for markdown documents.

use serde::de::DeserializeOwned;

/// Return the YAML text between a leading `---` line and the next `---` line.
pub fn extract(content: &str) -> Option<&str> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some(&rest[..offset]);
        }
        offset += line.len();
    }
    None
}

/// Deserialize the frontmatter block into `T`. Missing or malformed
/// frontmatter yields `None`.
pub fn parse<T: DeserializeOwned>(content: &str) -> Option<T> {
    let block = extract(content)?;
    match serde_yaml::from_str(block) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "ignoring malformed frontmatter");
            None
        }
    }
}

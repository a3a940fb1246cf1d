//! Leading `---` delimited YAML blocks on markdown content.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppError;

const DELIMITER: &str = "---";

/// Splits `content` into its raw frontmatter block (without delimiters) and the body.
///
/// Content without a well-formed leading block is returned whole as the body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let mut lines = content.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return (None, content);
    };
    if first.trim() != DELIMITER {
        return (None, content);
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    for line in lines {
        if line.trim() == DELIMITER {
            let yaml = content.get(yaml_start..offset).unwrap_or_default();
            let body = content
                .get(offset.saturating_add(line.len())..)
                .unwrap_or_default();
            return (Some(yaml), body);
        }
        offset = offset.saturating_add(line.len());
    }

    (None, content)
}

/// Parses the frontmatter of `content` into `T`, falling back to `T::default()`
/// when the content carries no block.
pub fn parse_frontmatter<T>(content: &str) -> Result<(T, &str), AppError>
where
    T: DeserializeOwned + Default,
{
    match split_frontmatter(content) {
        (Some(yaml), body) if !yaml.trim().is_empty() => Ok((serde_yaml::from_str(yaml)?, body)),
        (_, body) => Ok((T::default(), body)),
    }
}

/// Renders `frontmatter` as a leading block followed by `body` byte for byte, so
/// offsets into the body stay valid after a parse of the result.
pub fn render_with_frontmatter<T: Serialize>(frontmatter: &T, body: &str) -> Result<String, AppError> {
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("{DELIMITER}\n{yaml}{DELIMITER}\n{body}"))
}

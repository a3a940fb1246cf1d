use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{deserialize_string_or_list, union_into};

/// Frontmatter of an input document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceFrontmatter {
    #[serde(default)]
    pub consolidated: bool,
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub answered_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl SourceFrontmatter {
    /// Flags the document as consolidated and records the questions it answered.
    pub fn mark_consolidated<I, S>(mut self, questions: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.consolidated = true;
        union_into(&mut self.answered_questions, questions);
        self.processed_at = Some(now);
        self
    }

    /// Clears the consolidated flag so the next run picks the document up again.
    pub fn reset(mut self) -> Self {
        self.consolidated = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::frontmatter::{parse_frontmatter, render_with_frontmatter};

    #[test]
    fn marking_keeps_existing_keys_and_dedupes_questions() {
        let content = "---\nauthor: Ada\n---\nSome notes.";
        let (frontmatter, body): (SourceFrontmatter, &str) =
            parse_frontmatter(content).expect("parse");
        assert!(!frontmatter.consolidated);

        let marked = frontmatter.mark_consolidated(["Why?", "How?", "Why?"], Utc::now());
        let rendered = render_with_frontmatter(&marked, body).expect("render");
        let (reparsed, reparsed_body): (SourceFrontmatter, &str) =
            parse_frontmatter(&rendered).expect("reparse");

        assert!(reparsed.consolidated);
        assert_eq!(reparsed.answered_questions, vec!["Why?", "How?"]);
        assert!(reparsed.processed_at.is_some());
        assert_eq!(
            reparsed.extra.get("author").and_then(serde_yaml::Value::as_str),
            Some("Ada")
        );
        assert_eq!(reparsed_body, "Some notes.");
    }

    #[test]
    fn reset_only_clears_the_flag() {
        let marked = SourceFrontmatter::default().mark_consolidated(["Why?"], Utc::now());
        let reset = marked.reset();
        assert!(!reset.consolidated);
        assert_eq!(reset.answered_questions, vec!["Why?"]);
    }
}

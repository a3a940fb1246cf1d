use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{deserialize_string_or_list, union_into};

/// Frontmatter of an answer record. Keys this type does not know are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerFrontmatter {
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub tags: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub aliases: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub links: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub chunk_source: Vec<String>,
    #[serde(
        default,
        deserialize_with = "deserialize_string_or_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub category: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// What one chunk contributes to an answer record.
#[derive(Debug, Clone)]
pub struct RecordContribution<'a> {
    pub topics: &'a [String],
    pub questions: &'a [String],
    pub document: &'a str,
    pub anchor: &'a str,
}

/// Unions a chunk's contribution into `existing`. Set-valued keys are only ever extended.
pub fn create_frontmatter(
    mut existing: AnswerFrontmatter,
    contribution: &RecordContribution<'_>,
    now: DateTime<Utc>,
) -> AnswerFrontmatter {
    union_into(&mut existing.tags, contribution.topics.iter().cloned());
    union_into(
        &mut existing.aliases,
        contribution
            .questions
            .iter()
            .filter(|question| !question.is_empty())
            .cloned(),
    );
    union_into(&mut existing.links, [format!("[[{}]]", contribution.document)]);
    union_into(&mut existing.chunk_source, [contribution.anchor]);
    existing.processed_at = Some(now);
    existing
}

/// Adds `category` to the frontmatter's category set.
pub fn add_category(mut existing: AnswerFrontmatter, category: &str) -> AnswerFrontmatter {
    union_into(&mut existing.category, [category]);
    existing
}

/// Trailing block naming where an appended section came from.
pub fn location_block(question: &str, document: &str, anchor: &str) -> String {
    format!("\n\n---\nquestion: {question} \nsource: [[{document}]] \nlink: {anchor}\n\n---\n\n")
}

/// File name of the record answering `question`.
pub fn record_file_name(question: &str) -> String {
    format!("{question}.md")
}

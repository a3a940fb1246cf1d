//! Normalization of model-produced questions and topics into stable file and folder names.

use common::error::AppError;
use unicode_normalization::UnicodeNormalization;

const QUESTION_MIN_CHARS: usize = 3;
const QUESTION_MAX_CHARS: usize = 200;
const TOPIC_MIN_CHARS: usize = 2;
const TOPIC_MAX_CHARS: usize = 100;

/// Lowercase slug made of `[a-z0-9-]`, with single dashes between words.
pub fn format_topic(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    for ch in lowered.nfkd() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' => ch,
            ' ' | '-' => '-',
            _ => continue,
        };
        if mapped == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(mapped);
    }
    slug.trim_end_matches('-').to_string()
}

/// Single-spaced question ending in exactly one `?`.
///
/// Characters other than letters, digits, whitespace and `'(),.-_` are dropped, which
/// keeps the result usable as a file name.
pub fn format_question(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let stem = collapsed.trim_end_matches('?').trim_end_matches(' ');

    let mut question: String = stem
        .chars()
        .filter(|ch| {
            ch.is_alphanumeric() || ch.is_whitespace() || matches!(ch, '\'' | '(' | ')' | ',' | '.' | '-' | '_')
        })
        .nfkd()
        .collect();
    question.push('?');
    question
}

pub fn validate_question(raw: &str) -> Result<String, AppError> {
    let formatted = format_question(raw);
    let length = formatted.chars().count();
    if length < QUESTION_MIN_CHARS {
        return Err(AppError::Validation(format!("invalid question: '{raw}'")));
    }
    if length > QUESTION_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "question too long ({length} characters): '{raw}'"
        )));
    }
    Ok(formatted)
}

pub fn validate_topic(raw: &str) -> Result<String, AppError> {
    let formatted = format_topic(raw);
    let length = formatted.chars().count();
    if length < TOPIC_MIN_CHARS {
        return Err(AppError::Validation(format!("invalid topic: '{raw}'")));
    }
    if length > TOPIC_MAX_CHARS {
        return Err(AppError::Validation(format!(
            "topic too long ({length} characters): '{raw}'"
        )));
    }
    Ok(formatted)
}

pub mod answer_record;
pub mod chunk;
pub mod derived_item;
pub mod processing_ledger;
pub mod source_document;

use serde::{
    de::{self, SeqAccess, Visitor},
    Deserializer,
};
use std::fmt;

struct StringOrListVisitor;

impl<'de> Visitor<'de> for StringOrListVisitor {
    type Value = Vec<String>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string or a list of strings")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(vec![value.to_string()])
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(vec![value])
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Vec::new())
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Vec::new())
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut values = Vec::new();
        while let Some(value) = seq.next_element::<String>()? {
            values.push(value);
        }
        Ok(values)
    }
}

/// Hand-edited frontmatter often carries a bare string where a list is expected.
pub fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(StringOrListVisitor)
}

/// Appends every value from `additions` not already present, keeping first-insertion order.
pub fn union_into<I, S>(target: &mut Vec<String>, additions: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for value in additions {
        let value = value.into();
        if !target.contains(&value) {
            target.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_keeps_order_and_skips_duplicates() {
        let mut values = vec!["a".to_string(), "b".to_string()];
        union_into(&mut values, ["b", "c", "a", "d"]);
        assert_eq!(values, vec!["a", "b", "c", "d"]);
    }
}

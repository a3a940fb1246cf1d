use std::fmt;

use serde::{
    de::{self, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};

/// Index partition a derived item lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Question,
    Topic,
    Category,
}

impl ItemKind {
    pub const ALL: [ItemKind; 3] = [ItemKind::Question, ItemKind::Topic, ItemKind::Category];

    pub fn table_name(self) -> &'static str {
        match self {
            ItemKind::Question => "derived_question",
            ItemKind::Topic => "derived_topic",
            ItemKind::Category => "derived_category",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ItemKind::Question => "question",
            ItemKind::Topic => "topic",
            ItemKind::Category => "category",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Metadata stored next to each embedding in the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(
        default,
        serialize_with = "serialize_usage_count",
        deserialize_with = "deserialize_usage_count"
    )]
    pub usage_count: u64,
    #[serde(default)]
    pub merged_from: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_identity: Option<String>,
}

fn serialize_usage_count<S>(count: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&count.to_string())
}

struct UsageCountVisitor;

impl<'de> Visitor<'de> for UsageCountVisitor {
    type Value = u64;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a non-negative integer or its string form")
    }

    fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(value)
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        u64::try_from(value).map_err(|_| E::custom(format!("negative usage count {value}")))
    }

    fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if value.is_finite() && value >= 0.0 && value.fract() == 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            Ok(value as u64)
        } else {
            Err(E::custom(format!("invalid usage count {value}")))
        }
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        value
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid usage count '{value}'")))
    }

    fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        self.visit_str(&value)
    }
}

fn deserialize_usage_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(UsageCountVisitor)
}

/// Fields shared by every kind of derived item.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub identity: String,
    pub embedding: Vec<f32>,
    pub usage_count: u64,
    pub merged_from: Vec<String>,
    pub original_identity: String,
}

impl ItemRecord {
    /// A record seen for the first time.
    pub fn fresh(identity: impl Into<String>, embedding: Vec<f32>) -> Self {
        let identity = identity.into();
        Self {
            original_identity: identity.clone(),
            identity,
            embedding,
            usage_count: 1,
            merged_from: Vec::new(),
        }
    }

    pub fn from_metadata(identity: String, embedding: Vec<f32>, metadata: ItemMetadata) -> Self {
        let original_identity = metadata
            .original_identity
            .unwrap_or_else(|| identity.clone());
        Self {
            identity,
            embedding,
            usage_count: metadata.usage_count,
            merged_from: metadata.merged_from,
            original_identity,
        }
    }

    pub fn metadata(&self) -> ItemMetadata {
        ItemMetadata {
            usage_count: self.usage_count,
            merged_from: self.merged_from.clone(),
            original_identity: Some(self.original_identity.clone()),
        }
    }
}

/// A question, topic or category tracked for duplication.
#[derive(Debug, Clone, PartialEq)]
pub enum DerivedItem {
    Question(ItemRecord),
    Topic(ItemRecord),
    Category(ItemRecord),
}

impl DerivedItem {
    pub fn new(kind: ItemKind, record: ItemRecord) -> Self {
        match kind {
            ItemKind::Question => DerivedItem::Question(record),
            ItemKind::Topic => DerivedItem::Topic(record),
            ItemKind::Category => DerivedItem::Category(record),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            DerivedItem::Question(_) => ItemKind::Question,
            DerivedItem::Topic(_) => ItemKind::Topic,
            DerivedItem::Category(_) => ItemKind::Category,
        }
    }

    pub fn record(&self) -> &ItemRecord {
        match self {
            DerivedItem::Question(record)
            | DerivedItem::Topic(record)
            | DerivedItem::Category(record) => record,
        }
    }

    pub fn identity(&self) -> &str {
        &self.record().identity
    }
}

/// One neighbor returned by a similarity query.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IndexMatch {
    #[serde(rename = "identity")]
    pub id: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: ItemMetadata,
}

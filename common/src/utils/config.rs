use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: Option<String>,
    #[serde(default)]
    pub surrealdb_password: Option<String>,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,
    #[serde(default = "default_input_folder")]
    pub input_folder: String,
    #[serde(default = "default_output_folder")]
    pub output_folder: String,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_question_threshold")]
    pub question_similarity_threshold: f64,
    #[serde(default = "default_topic_threshold")]
    pub topic_similarity_threshold: f64,
    #[serde(default = "default_category_threshold")]
    pub category_similarity_threshold: f64,
    #[serde(default = "default_similar_items_count")]
    pub similar_items_count: usize,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            embedding_backend: EmbeddingBackend::default(),
            surrealdb_address: String::new(),
            surrealdb_username: None,
            surrealdb_password: None,
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            data_dir: default_data_dir(),
            storage: default_storage_kind(),
            input_folder: default_input_folder(),
            output_folder: default_output_folder(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            question_similarity_threshold: default_question_threshold(),
            topic_similarity_threshold: default_topic_threshold(),
            category_similarity_threshold: default_category_threshold(),
            similar_items_count: default_similar_items_count(),
            request_delay_ms: default_request_delay_ms(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_surrealdb_namespace() -> String {
    "consolidation".to_string()
}

fn default_surrealdb_database() -> String {
    "knowledge".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_input_folder() -> String {
    "raw_notes".to_string()
}

fn default_output_folder() -> String {
    "summarized_notes".to_string()
}

fn default_min_chunk_size() -> usize {
    200
}

fn default_max_chunk_size() -> usize {
    400
}

fn default_question_threshold() -> f64 {
    0.9
}

fn default_topic_threshold() -> f64 {
    0.8
}

fn default_category_threshold() -> f64 {
    0.6
}

fn default_similar_items_count() -> usize {
    3
}

fn default_request_delay_ms() -> u64 {
    100
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

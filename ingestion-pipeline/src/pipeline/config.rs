use common::{error::AppError, utils::config::AppConfig};

#[derive(Debug, Clone)]
pub struct ConsolidationTuning {
    pub chunk_min_tokens: usize,
    pub chunk_max_tokens: usize,
    pub question_similarity_threshold: f64,
    pub topic_similarity_threshold: f64,
    pub category_similarity_threshold: f64,
    pub similar_items_count: usize,
}

impl Default for ConsolidationTuning {
    fn default() -> Self {
        Self {
            chunk_min_tokens: 200,
            chunk_max_tokens: 400,
            question_similarity_threshold: 0.9,
            topic_similarity_threshold: 0.8,
            category_similarity_threshold: 0.6,
            similar_items_count: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub tuning: ConsolidationTuning,
    pub input_folder: String,
    pub output_folder: String,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            tuning: ConsolidationTuning::default(),
            input_folder: "raw_notes".to_string(),
            output_folder: "summarized_notes".to_string(),
        }
    }
}

impl ConsolidationConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            tuning: ConsolidationTuning {
                chunk_min_tokens: config.min_chunk_size,
                chunk_max_tokens: config.max_chunk_size,
                question_similarity_threshold: config.question_similarity_threshold,
                topic_similarity_threshold: config.topic_similarity_threshold,
                category_similarity_threshold: config.category_similarity_threshold,
                similar_items_count: config.similar_items_count,
            },
            input_folder: config.input_folder.clone(),
            output_folder: config.output_folder.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let tuning = &self.tuning;
        if tuning.chunk_min_tokens == 0
            || tuning.chunk_max_tokens == 0
            || tuning.chunk_min_tokens > tuning.chunk_max_tokens
        {
            return Err(AppError::Validation(format!(
                "invalid chunk token bounds {}..={}; ensure 0 < min <= max",
                tuning.chunk_min_tokens, tuning.chunk_max_tokens
            )));
        }
        if self.output_folder.trim_matches('/').is_empty() {
            return Err(AppError::Validation(
                "output folder must not be empty".into(),
            ));
        }
        Ok(())
    }
}

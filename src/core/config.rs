use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Filesystem layout for all persistent state.
///
/// Everything lives under one data directory so that wiping it resets the
/// service to a blank, uninitialized state.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    pub index_dir: PathBuf,
    pub config_path: PathBuf,
}

impl AppPaths {
    pub fn new() -> Self {
        let data_dir = discover_data_dir();
        Self::at(data_dir)
    }

    pub fn at(data_dir: PathBuf) -> Self {
        let log_dir = data_dir.join("logs");
        let db_path = data_dir.join("metrics.db");
        let index_dir = data_dir.join("kb_index");
        let config_path = data_dir.join("config.toml");

        for dir in [&data_dir, &log_dir] {
            let _ = fs::create_dir_all(dir);
        }

        AppPaths {
            data_dir,
            log_dir,
            db_path,
            index_dir,
            config_path,
        }
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

fn discover_data_dir() -> PathBuf {
    if let Ok(dir) = env::var("DESKBOT_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if cfg!(debug_assertions) {
        return env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let xdg = env::var("XDG_DATA_HOME").unwrap_or_else(|_| {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.local/share", home)
    });
    PathBuf::from(xdg).join("deskbot")
}

/// Runtime configuration, loaded from `config.toml` under the data dir when
/// present, with serde defaults for every field so a missing or partial file
/// still yields a working setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub index: IndexSettings,
    #[serde(default)]
    pub answer: AnswerSettings,
    #[serde(default)]
    pub models: ModelSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::warn!("Invalid config at {}: {}; using defaults", path.display(), err);
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { port: default_port() }
    }
}

fn default_port() -> u16 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Base URLs of the help-center portals to crawl.
    #[serde(default)]
    pub site_roots: Vec<String>,
    /// Product label attached to every record from this deployment.
    #[serde(default = "default_product")]
    pub product: String,
    /// Hosts whose article listing lives at a non-derivable path.
    #[serde(default)]
    pub listing_overrides: HashMap<String, String>,
    #[serde(default = "default_listing_path")]
    pub listing_path: String,
    #[serde(default = "default_folder_marker")]
    pub folder_marker: String,
    #[serde(default = "default_category_marker")]
    pub category_marker: String,
    #[serde(default = "default_article_marker")]
    pub article_marker: String,
    #[serde(default = "default_login_marker")]
    pub login_marker: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
    #[serde(default = "default_folder_delay_ms")]
    pub folder_delay_ms: u64,
    #[serde(default = "default_article_delay_ms")]
    pub article_delay_ms: u64,
    #[serde(default = "default_min_content_len")]
    pub min_content_len: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            site_roots: Vec::new(),
            product: default_product(),
            listing_overrides: HashMap::new(),
            listing_path: default_listing_path(),
            folder_marker: default_folder_marker(),
            category_marker: default_category_marker(),
            article_marker: default_article_marker(),
            login_marker: default_login_marker(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            image_timeout_secs: default_image_timeout_secs(),
            folder_delay_ms: default_folder_delay_ms(),
            article_delay_ms: default_article_delay_ms(),
            min_content_len: default_min_content_len(),
        }
    }
}

fn default_product() -> String {
    "support".to_string()
}

fn default_listing_path() -> String {
    "/support/solutions".to_string()
}

fn default_folder_marker() -> String {
    "/support/solutions/folders/".to_string()
}

fn default_category_marker() -> String {
    "/support/solutions/categories/".to_string()
}

fn default_article_marker() -> String {
    "/support/solutions/articles/".to_string()
}

fn default_login_marker() -> String {
    "/support/login".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_image_timeout_secs() -> u64 {
    5
}

fn default_folder_delay_ms() -> u64 {
    400
}

fn default_article_delay_ms() -> u64 {
    200
}

fn default_min_content_len() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_embed_max_attempts")]
    pub embed_max_attempts: u32,
    #[serde(default = "default_embed_backoff_ms")]
    pub embed_backoff_ms: u64,
    #[serde(default = "default_embed_backoff_ceiling_ms")]
    pub embed_backoff_ceiling_ms: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            embed_max_attempts: default_embed_max_attempts(),
            embed_backoff_ms: default_embed_backoff_ms(),
            embed_backoff_ceiling_ms: default_embed_backoff_ceiling_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    20
}

fn default_batch_delay_ms() -> u64 {
    2000
}

fn default_embed_max_attempts() -> u32 {
    5
}

fn default_embed_backoff_ms() -> u64 {
    2000
}

fn default_embed_backoff_ceiling_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSettings {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_limit_chars")]
    pub context_limit_chars: usize,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    #[serde(default = "default_uninitialized_response")]
    pub uninitialized_response: String,
}

impl Default for AnswerSettings {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            context_limit_chars: default_context_limit_chars(),
            prompt_template: default_prompt_template(),
            uninitialized_response: default_uninitialized_response(),
        }
    }
}

fn default_top_k() -> usize {
    2
}

fn default_context_limit_chars() -> usize {
    6000
}

fn default_prompt_template() -> String {
    "You are a helpful support assistant.\n\
     Answer the question based ONLY on the context below, in the language \"{language}\".\n\
     If the answer is not in the context, say \"I don't know.\"\n\n\
     Context:\n{context}\n\n\
     Question: {question}\n\n\
     Answer:"
        .to_string()
}

fn default_uninitialized_response() -> String {
    "I am not yet initialized with knowledge. Please trigger a scrape first.".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// Base URL of an OpenAI-compatible inference server.
    #[serde(default = "default_model_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_caption_model")]
    pub caption_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: default_model_base_url(),
            generation_model: default_generation_model(),
            embedding_model: default_embedding_model(),
            caption_model: default_caption_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_model_base_url() -> String {
    "http://127.0.0.1:1234".to_string()
}

fn default_generation_model() -> String {
    "tinyllama-1.1b-chat-v1.0".to_string()
}

fn default_embedding_model() -> String {
    "all-minilm-l6-v2".to_string()
}

fn default_caption_model() -> String {
    "blip-image-captioning-base".to_string()
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f64 {
    0.7
}

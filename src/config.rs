use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Runtime configuration. Every field has a default so a missing or
/// partial config file still boots; the only fatal startup condition is
/// handled in `main` (missing reasoning credentials).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub assistant_name: String,
    pub wake_word: String,
    /// Skip the wake-word gate entirely (text-first deployments).
    pub start_awake: bool,
    /// Idle seconds before dropping back to the wake-word gate. 0 disables.
    pub auto_sleep_secs: u64,
    pub channel_capacity: usize,
    pub pop_timeout_ms: u64,
    pub dispatch: DispatchConfig,
    pub reasoning: ReasoningConfig,
    pub healing: HealingConfig,
    pub memory: MemoryConfig,
    pub speech: SpeechConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assistant_name: "Vigil".to_string(),
            wake_word: "vigil".to_string(),
            start_awake: false,
            auto_sleep_secs: 120,
            channel_capacity: 30,
            pop_timeout_ms: 200,
            dispatch: DispatchConfig::default(),
            reasoning: ReasoningConfig::default(),
            healing: HealingConfig::default(),
            memory: MemoryConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Sliding conversation window, counted in turns (user + assistant).
    pub max_turns: usize,
    /// User-turn count that triggers summary compaction.
    pub summary_trigger: usize,
    pub confirmation_timeout_ms: u64,
    /// Bounded wait for the speech sink after a spoken reply.
    pub speech_wait_secs: u64,
    /// Minimum chunk length before a sentence is flushed to speech.
    pub min_speak_chars: usize,
    /// Minimum reply length for the factual-memorization heuristic.
    pub memorize_min_chars: usize,
    pub error_backoff_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            summary_trigger: 8,
            confirmation_timeout_ms: 10_000,
            speech_wait_secs: 15,
            min_speak_chars: 20,
            memorize_min_chars: 40,
            error_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub base_url: String,
    /// Environment variable holding the API key. Read once at startup.
    pub api_key_env: String,
    pub fast_model: String,
    pub mid_model: String,
    pub deep_model: String,
    pub max_attempts: u32,
    pub temperature: f64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "VIGIL_API_KEY".to_string(),
            fast_model: "llama-3.1-8b-instant".to_string(),
            mid_model: "llama-3.3-70b-versatile".to_string(),
            deep_model: "llama-3.3-70b-versatile".to_string(),
            max_attempts: 2,
            temperature: 0.6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    pub tick_secs: u64,
    pub heartbeat_stall_secs: u64,
    pub memory_pressure_pct: f32,
    pub queue_depth_limit: usize,
    pub cooldown_secs: u64,
    pub history_cap: usize,
    /// `restart_brain` only fires when clear_queue's historical success
    /// rate exceeds this bar.
    pub restart_gate: f64,
    pub history_path: PathBuf,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            tick_secs: 3,
            heartbeat_stall_secs: 6,
            memory_pressure_pct: 85.0,
            queue_depth_limit: 25,
            cooldown_secs: 10,
            history_cap: 50,
            restart_gate: 0.4,
            history_path: PathBuf::from("vigil_healing.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub path: PathBuf,
    pub max_records: usize,
    pub flush_secs: u64,
    /// Candidate ceiling for the semantic rerank step.
    pub rerank_candidates: usize,
    /// Bounded cache of rerank scores/token sets.
    pub score_cache: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("vigil_memory.json"),
            max_records: 500,
            flush_secs: 5,
            rerank_candidates: 30,
            score_cache: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// External synthesis program, invoked once per utterance.
    pub program: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_speech_program(),
        }
    }
}

fn default_speech_program() -> String {
    if cfg!(target_os = "macos") {
        "say".to_string()
    } else {
        "espeak".to_string()
    }
}

impl Config {
    /// Loads from a TOML file; a missing or malformed file falls back to
    /// defaults rather than aborting startup.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config file malformed, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

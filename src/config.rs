use std::env;
use std::time::Duration;

const DEFAULT_WELCOME: &str = "Hello! I'm your AI assistant. What can I help you with today?\n\n{{choice:See Features}}\n{{link:https://example.com/docs|Documentation}}";

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant on a website. Provide clear, concise, and accurate responses to relevant questions only.

When appropriate, you can use these formats. Put them at the bottom of the response:
- {{choice:Option Name}} - Creates clickable choice buttons
- {{link:https://url.com|Button Text}} - Creates clickable link buttons

Avoid using these repetitively."#;

/// Top-level configuration. Defaults are usable out of the box; every knob
/// can be overridden from the environment via [`ChatbotConfig::from_env`].
#[derive(Clone, Debug)]
pub struct ChatbotConfig {
    /// Origin the widget is served from; requests declaring a different
    /// origin are rejected before anything else runs.
    pub app_origin: String,
    pub welcome_message: String,
    pub system_prompt: String,
    pub generation_timeout: Duration,
    pub limits: LimitConfig,
    pub throttle: ThrottleConfig,
    pub content: ContentConfig,
    pub security: SecurityConfig,
}

/// Server-side limiter settings (sliding window + token bucket).
#[derive(Clone, Copy, Debug)]
pub struct LimitConfig {
    pub window_max: u64,
    pub window: Duration,
    pub bucket_capacity: u64,
    pub refill_rate: u64,
    pub refill_interval: Duration,
}

/// Client-side pacing settings. Advisory only; the server pipeline is the
/// authoritative enforcement.
#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    pub min_spacing: Duration,
    pub max_message_len: usize,
    pub daily_cap: u32,
    /// Cooldown applied on a 429 that carries no Retry-After header.
    pub default_cooldown: Duration,
}

/// Content validation settings.
#[derive(Clone, Debug)]
pub struct ContentConfig {
    /// Character ceiling across the pending message batch.
    pub max_chars: usize,
    pub blocked_keywords: Vec<String>,
    /// A single character repeated more than this many times is spam.
    pub max_char_run: usize,
}

#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub enable_bot_detection: bool,
    pub enable_shield: bool,
    /// User-agent substrings exempt from bot blocking (e.g. search engines).
    pub allowed_agents: Vec<String>,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            app_origin: "http://localhost:3000".to_string(),
            welcome_message: DEFAULT_WELCOME.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            generation_timeout: Duration::from_secs(30),
            limits: LimitConfig::default(),
            throttle: ThrottleConfig::default(),
            content: ContentConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            window_max: 8,
            window: Duration::from_secs(30),
            bucket_capacity: 5,
            refill_rate: 2,
            refill_interval: Duration::from_secs(10),
        }
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_secs(2),
            max_message_len: 1000,
            daily_cap: 20,
            default_cooldown: Duration::from_secs(10),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            blocked_keywords: Vec::new(),
            max_char_run: 12,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_bot_detection: true,
            enable_shield: true,
            allowed_agents: Vec::new(),
        }
    }
}

impl ChatbotConfig {
    /// Build a config from defaults plus `CHATGATE_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(origin) = env::var("CHATGATE_APP_ORIGIN") {
            config.app_origin = origin;
        }
        if let Ok(welcome) = env::var("CHATGATE_WELCOME_MESSAGE") {
            config.welcome_message = welcome;
        }
        if let Ok(prompt) = env::var("CHATGATE_SYSTEM_PROMPT") {
            config.system_prompt = prompt;
        }
        if let Some(secs) = parse_env_u64("CHATGATE_GENERATION_TIMEOUT_SECS") {
            config.generation_timeout = Duration::from_secs(secs);
        }

        if let Some(max) = parse_env_u64("CHATGATE_WINDOW_MAX") {
            config.limits.window_max = max;
        }
        if let Some(secs) = parse_env_u64("CHATGATE_WINDOW_SECS") {
            config.limits.window = Duration::from_secs(secs);
        }
        if let Some(cap) = parse_env_u64("CHATGATE_BUCKET_CAPACITY") {
            config.limits.bucket_capacity = cap;
        }
        if let Some(rate) = parse_env_u64("CHATGATE_REFILL_RATE") {
            config.limits.refill_rate = rate;
        }
        if let Some(secs) = parse_env_u64("CHATGATE_REFILL_INTERVAL_SECS") {
            config.limits.refill_interval = Duration::from_secs(secs);
        }

        if let Some(ms) = parse_env_u64("CHATGATE_MIN_SPACING_MS") {
            config.throttle.min_spacing = Duration::from_millis(ms);
        }
        if let Some(len) = parse_env_u64("CHATGATE_MAX_MESSAGE_LEN") {
            config.throttle.max_message_len = len as usize;
            config.content.max_chars = len as usize;
        }
        if let Some(cap) = parse_env_u64("CHATGATE_DAILY_CAP") {
            config.throttle.daily_cap = cap as u32;
        }

        if let Ok(keywords) = env::var("CHATGATE_BLOCKED_KEYWORDS") {
            config.content.blocked_keywords = split_list(&keywords);
        }
        if let Some(run) = parse_env_u64("CHATGATE_MAX_CHAR_RUN") {
            config.content.max_char_run = run as usize;
        }

        if let Ok(v) = env::var("CHATGATE_BOT_DETECTION") {
            config.security.enable_bot_detection = parse_bool(&v);
        }
        if let Ok(v) = env::var("CHATGATE_SHIELD") {
            config.security.enable_shield = parse_bool(&v);
        }
        if let Ok(agents) = env::var("CHATGATE_ALLOWED_AGENTS") {
            config.security.allowed_agents = split_list(&agents);
        }

        config
    }
}

fn parse_env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

//! Tunable constants shared across the engine.

pub const MAX_HEALTH: i32 = 100;
pub const MIN_HEALTH: i32 = 0;
pub const FIRST_LEVEL: u8 = 1;
pub const FINAL_LEVEL: u8 = 5;

pub const DAMAGE_NONE: i32 = 0;
pub const DAMAGE_MINOR: i32 = -10;
pub const DAMAGE_MAJOR: i32 = -20;

pub const CHARISMA_MULTIPLIER: f32 = 0.5;
pub const NEUTRAL_MULTIPLIER: f32 = 1.0;

// Retrieval
pub const CHUNK_TARGET_WORDS: usize = 180;
pub const CHUNK_OVERLAP_WORDS: usize = 40;
pub const MAX_CHUNKS: usize = 80;
pub const MAX_CHUNK_CHARS: usize = 1_600;
pub const MAX_DOCUMENT_CHARS: usize = 120_000;
pub const DEFAULT_TOP_K: usize = 4;
pub const CHUNK_CACHE_CAPACITY: usize = 8;
pub const MIN_TERM_LEN: usize = 3;
pub const OCCURRENCE_WEIGHT: f64 = 0.35;
pub const COVERAGE_WEIGHT: f64 = 2.0;
pub const DIGIT_BONUS: f64 = 0.5;

// Backend retry budgets
pub const JUDGMENT_MAX_ATTEMPTS: u32 = 3;
pub const JUDGMENT_BACKOFF_MS: u64 = 2_000;
pub const POST_MORTEM_MAX_ATTEMPTS: u32 = 3;
pub const POST_MORTEM_BACKOFF_MS: u64 = 4_000;

// Stream recovery
pub const STITCH_SUFFIX_CHARS: usize = 80;

// Snapshots
pub const SNAPSHOT_STORAGE_KEY: &str = "founders_gauntlet_active_run_v1";
pub const SNAPSHOT_VERSION: u32 = 1;
pub const RESTORE_MAX_ATTEMPTS: u32 = 3;

// Post-mortem
pub const REPORT_LIST_LEN: usize = 3;
pub const DEFAULT_SCORE: i32 = 50;

// Valuation
pub const BASE_VALUATION_USD: i64 = 2_500_000;
pub const CONFIDENCE_WEIGHT_USD: i64 = 45_000;
pub const TECHNICAL_WEIGHT_USD: i64 = 70_000;
pub const BUSINESS_WEIGHT_USD: i64 = 90_000;
pub const RESILIENCE_WEIGHT_USD: i64 = 55_000;
pub const HP_WEIGHT_USD: i64 = 65_000;
pub const DECK_BONUS_USD: i64 = 500_000;
pub const PERK_DEPTH_BONUS_USD: i64 = 175_000;
pub const VALUATION_ROUNDING_USD: i64 = 50_000;
pub const VALUATION_AUDIO_THRESHOLD_USD: i64 = 3_500_000;

// Leaderboard
pub const MAX_HANDLE_CHARS: usize = 40;
pub const MAX_OUTCOME_CHARS: usize = 24;
pub const MAX_THEME_CHARS: usize = 64;
pub const LEADERBOARD_MAX_LIMIT: usize = 100;
pub const SOLO_CLAN: &str = "Solo";
pub const DEFAULT_THEME: &str = "General SaaS";
pub const DEFAULT_APP_URL: &str = "https://your-gauntlet-app-url";

//! Founder's Gauntlet Game Engine
//!
//! Platform-agnostic turn engine for the Founder's Gauntlet pitch game: five
//! investor personas, streamed in-character replies, structured per-turn
//! judgments, perks, post-mortem coaching and crash recovery.
//! This crate provides all game mechanics without UI or model-vendor dependencies;
//! callers supply a [`TextBackend`], a [`SnapshotStore`] and optionally a [`RunStore`].

pub mod backend;
pub mod constants;
pub mod engine;
pub mod judgment;
pub mod leaderboard;
pub mod numbers;
pub mod perks;
pub mod personas;
pub mod postmortem;
pub mod prompts;
pub mod result;
pub mod retrieval;
pub mod session;
pub mod snapshot;
pub mod stream;
pub mod voice;

// Re-export commonly used types
pub use backend::{BackendError, TextBackend, TokenStream, is_quota_message, strip_code_fence};
pub use engine::{EngineConfig, EngineError, GauntletEngine, TurnReport};
pub use judgment::{JudgmentService, RetryPolicy, TurnJudgment, parse_judgment, snap_damage};
pub use leaderboard::{
    ClanRow, MemoryRunStore, PlayerRow, RunRecord, RunStore, clean_text, save_run,
    submit_session,
};
pub use perks::{ActivePerks, PerkKind, PerkPick, Resolution};
pub use personas::{ContentError, GameContent, PerkInfo, Persona, Theme};
pub use postmortem::{
    PostMortemReport, PostMortemService, ReportIssue, ReportScores, normalize_report,
    validate_report,
};
pub use prompts::TurnContext;
pub use result::{build_share_text, compute_valuation, damage_track, format_currency};
pub use retrieval::{
    ChunkCache, RankedExcerpt, RetrievalChunk, RetrievalConfig, build_context, index, retrieve,
};
pub use session::{
    ChatTurn, Effect, Event, Outcome, Session, SessionError, Speaker, TerminalState,
    TurnLogEntry, TurnPhase,
};
pub use snapshot::{
    AuxState, MemorySnapshotStore, RestoreOutcome, SessionSnapshot, SnapshotRecovery,
    SnapshotStore, StoreError, StoreRead,
};
pub use stream::{ReplyStream, collect_reply, stitch_continuation, stream_reply};
pub use voice::{AudioOutcome, VoiceState};

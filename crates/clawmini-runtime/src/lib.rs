//! Turn execution for clawmini.
//!
//! - [`prompt`]: system prompt from workspace files, skills and memory
//! - [`skills`]: skill discovery and the snapshot file
//! - [`turn`]: the per-turn event multiplexer

pub mod prompt;
pub mod skills;
pub mod turn;

pub use prompt::{
    DEFAULT_PROMPT_FILE_MAX_CHARS, PromptAssembler, SystemPrompt, TRUNCATION_MARKER,
    WORKSPACE_SECTIONS,
};
pub use skills::{SkillEntry, SkillsCatalog};
pub use turn::{TurnDriver, TurnEventStream};

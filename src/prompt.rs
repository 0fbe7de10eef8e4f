//! System instruction builder for the companion persona

use std::fmt::Write as _;
use std::path::Path;

use crate::{Error, Result};

/// Built-in persona instructions
pub const ANI_INSTRUCTIONS: &str = include_str!("../personas/ani.md");

/// Label used for a pomodoro cycle in the context sentence
const POMODORO_LABEL: &str = "Utility Cycle";

/// What the user is focusing on right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusTarget {
    /// A timed pomodoro cycle
    Pomodoro,
    /// A named goal
    Goal(String),
}

impl FocusTarget {
    /// Name used in the context sentence
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Pomodoro => POMODORO_LABEL,
            Self::Goal(name) => name,
        }
    }
}

/// User state provided by the host application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserState {
    /// Cumulative focus time in minutes
    pub total_focus_minutes: u64,
    /// Ongoing focus ritual, if any
    pub active_goal: Option<FocusTarget>,
}

impl UserState {
    /// Dynamic context sentence describing the user
    #[must_use]
    pub fn context_text(&self) -> String {
        let mut context = format!(
            "The user's total focus time is {} hours. ",
            self.total_focus_minutes / 60
        );
        if let Some(target) = &self.active_goal {
            let _ = write!(
                context,
                "The user is currently in a deep focus ritual for: {}. ",
                target.label()
            );
        }
        context
    }
}

/// Persona instructions and user context frozen at session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    instructions: String,
    user_state: UserState,
}

impl ContextSnapshot {
    /// Snapshot the built-in persona with `user_state`
    #[must_use]
    pub fn new(user_state: UserState) -> Self {
        Self::with_instructions(ANI_INSTRUCTIONS, user_state)
    }

    /// Snapshot custom persona instructions with `user_state`
    #[must_use]
    pub fn with_instructions(instructions: impl Into<String>, user_state: UserState) -> Self {
        Self {
            instructions: instructions.into(),
            user_state,
        }
    }

    /// Persona instructions
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// User state at snapshot time
    #[must_use]
    pub const fn user_state(&self) -> &UserState {
        &self.user_state
    }

    /// Full system instruction sent to the models
    #[must_use]
    pub fn system_instruction(&self) -> String {
        format!(
            "{}\n\nCONTEXT: {}",
            self.instructions.trim_end(),
            self.user_state.context_text()
        )
    }
}

/// Read persona instructions from a file, or fall back to the built-in text
///
/// # Errors
///
/// Returns error if `path` is given but cannot be read or is empty
pub fn load_instructions(path: Option<&Path>) -> Result<String> {
    let Some(path) = path else {
        return Ok(ANI_INSTRUCTIONS.to_string());
    };

    let text = std::fs::read_to_string(path)?;
    if text.trim().is_empty() {
        return Err(Error::Config(format!(
            "instructions file is empty: {}",
            path.display()
        )));
    }

    tracing::debug!(path = %path.display(), "loaded persona instructions");
    Ok(text)
}

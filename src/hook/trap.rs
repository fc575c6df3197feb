//! Compatibility shim for shells that only offer a pre-instruction trap.
//!
//! Such a trap fires before *every* simple command: the user's, the ones
//! inside the prompt command, and the ones run by the trap handler itself.
//! `TrapShim` decides which firings correspond to a user command being
//! started. It is a small state machine and holds no shell handles, so a
//! host drives it with plain strings.

/// The two values a user's command can observe from whatever ran before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellVars {
    /// `$?`
    pub status: i32,
    /// `$_`
    pub last_arg: String,
}

/// How one trap firing is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A top-level command typed at the prompt is about to run.
    Interactive,
    /// The pending instruction is part of the prompt command.
    Administrative,
    /// Not at the interactive top level, or fired from inside the handler.
    Suppressed,
}

#[derive(Debug, Clone)]
pub struct TrapShim {
    prompt_command: String,
    interactive_mode: bool,
    /// One saved frame per handler invocation still executing.
    frames: Vec<ShellVars>,
    /// Vars seen when the prompt command started, restored once it ends.
    prompt_vars: Option<ShellVars>,
}

impl TrapShim {
    /// `prompt_command` is the full prompt-setup string (after installation);
    /// each of its `;`/newline separated segments is treated as administrative.
    pub fn new(prompt_command: impl Into<String>) -> Self {
        Self {
            prompt_command: prompt_command.into(),
            interactive_mode: false,
            frames: Vec::new(),
            prompt_vars: None,
        }
    }

    /// Called once per prompt display, after the prompt command has run.
    pub const fn prompt_displayed(&mut self) {
        self.interactive_mode = true;
    }

    /// The prompt command starts running; `observed` is what the user's
    /// command left behind.
    pub fn save_prompt_vars(&mut self, observed: ShellVars) {
        self.prompt_vars = Some(observed);
    }

    /// The vars to restore after the prompt command, if it saved any.
    pub const fn take_prompt_vars(&mut self) -> Option<ShellVars> {
        self.prompt_vars.take()
    }

    pub const fn interactive_mode(&self) -> bool {
        self.interactive_mode
    }

    /// Number of handler invocations currently executing.
    pub const fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn set_prompt_command(&mut self, prompt_command: impl Into<String>) {
        self.prompt_command = prompt_command.into();
    }

    /// Enter the handler for `pending` with the vars observed at entry.
    ///
    /// Every `begin` must be paired with an [`Self::end`], whatever the
    /// classification.
    pub fn begin(&mut self, pending: &str, observed: ShellVars) -> Classification {
        let reentrant = !self.frames.is_empty();
        self.frames.push(observed);
        if reentrant {
            return Classification::Suppressed;
        }
        if self.is_prompt_machinery(pending) {
            return Classification::Administrative;
        }
        if !self.interactive_mode {
            return Classification::Suppressed;
        }
        // Only the first command after a prompt counts; the rest of a
        // pipeline or list belongs to the same user command.
        self.interactive_mode = false;
        Classification::Interactive
    }

    /// Leave the handler, returning the vars the host must restore.
    ///
    /// `None` means `end` was called without a matching `begin`.
    pub fn end(&mut self) -> Option<ShellVars> {
        self.frames.pop()
    }

    fn is_prompt_machinery(&self, pending: &str) -> bool {
        let pending = pending.trim();
        !pending.is_empty() && super::prompt_segments(&self.prompt_command).any(|s| s == pending)
    }
}

pub mod script;
pub mod trap;

use trap::{Classification, ShellVars, TrapShim};

use crate::intercept::{AfterOutcome, Clock, CommandSource, InterceptionMachine, SystemClock};

/// Callback appended to a registry's "before" list.
pub const BEFORE_HOOK: &str = "__cmdstamp_preexec";
/// Callback appended to a registry's "after" list; also the first segment of
/// the prompt command on trap-style hosts.
pub const AFTER_HOOK: &str = "__cmdstamp_precmd";
/// Handler installed as the pre-instruction trap.
pub const TRAP_HOOK: &str = "__cmdstamp_debug_trap";
/// Last prompt-command segment: re-enables interactive mode for the next command.
pub const ARM_HOOK: &str = "__cmdstamp_arm";

/// The notification primitive a host shell exposes, with its current contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookSurface {
    /// Ordered lists of callbacks run around each interactive command (zsh
    /// `preexec_functions` / `precmd_functions`).
    Registry {
        before: Vec<String>,
        after: Vec<String>,
    },
    /// One trap fired before every instruction plus a prompt command (bash
    /// `trap ... DEBUG` / `PROMPT_COMMAND`).
    SingleTrap {
        trap: Option<String>,
        prompt_command: Option<String>,
    },
    /// No usable pre/post notification.
    Unsupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    Registry,
    SingleTrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed(Primitive),
    AlreadyInstalled(Primitive),
}

impl InstallOutcome {
    pub const fn primitive(self) -> Primitive {
        match self {
            Self::Installed(p) | Self::AlreadyInstalled(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    Unsupported,
    /// The trap is already set to a handler that is not ours.
    TrapClaimed(String),
}

impl std::fmt::Display for InstallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsupported => write!(f, "shell exposes no pre/post command hook"),
            Self::TrapClaimed(existing) => {
                write!(f, "pre-instruction trap already in use: {existing}")
            }
        }
    }
}

impl std::error::Error for InstallError {}

/// Split a prompt command into its trimmed, non-empty `;`/newline segments.
pub fn prompt_segments(prompt_command: &str) -> impl Iterator<Item = &str> {
    prompt_command
        .split([';', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Whether our hooks are already present on `surface`.
pub fn is_installed(surface: &HookSurface) -> bool {
    match surface {
        HookSurface::Registry { before, after } => {
            before.iter().any(|h| h == BEFORE_HOOK) && after.iter().any(|h| h == AFTER_HOOK)
        }
        HookSurface::SingleTrap {
            trap,
            prompt_command,
        } => trap_is_ours(trap.as_deref()) && prompt_has_hooks(prompt_command.as_deref()),
        HookSurface::Unsupported => false,
    }
}

fn trap_is_ours(trap: Option<&str>) -> bool {
    trap.is_some_and(|t| t.contains(TRAP_HOOK))
}

fn prompt_has_hooks(prompt_command: Option<&str>) -> bool {
    prompt_command.is_some_and(|p| {
        prompt_segments(p).any(|s| s == AFTER_HOOK) && prompt_segments(p).any(|s| s == ARM_HOOK)
    })
}

fn is_own_segment(segment: &str) -> bool {
    segment
        .split_whitespace()
        .next()
        .is_some_and(|word| word == AFTER_HOOK || word == ARM_HOOK)
}

/// `prompt_command` without our own segments. Other segments keep their
/// original text and separators.
fn foreign_prompt_command(prompt_command: &str) -> String {
    prompt_command
        .lines()
        .filter_map(|line| {
            let kept: Vec<&str> = line
                .split(';')
                .filter(|part| !part.trim().is_empty() && !is_own_segment(part.trim()))
                .collect();
            let line = kept.join(";");
            let line = line.trim();
            (!line.is_empty()).then(|| line.to_owned())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wire our callbacks into `surface`, at most once.
///
/// Registry hosts get `BEFORE_HOOK`/`AFTER_HOOK` appended to their lists.
/// Trap hosts get `TRAP_HOOK` as the trap, `AFTER_HOOK` prepended to the
/// prompt command (so it sees the user command's status first) and
/// `ARM_HOOK` appended (so nothing else in the prompt command runs in
/// interactive mode). Nothing is changed when an error is returned.
///
/// # Errors
/// [`InstallError::Unsupported`] when the host has no usable primitive,
/// [`InstallError::TrapClaimed`] when another handler owns the trap.
pub fn install(surface: &mut HookSurface) -> Result<InstallOutcome, InstallError> {
    if is_installed(surface) {
        return match surface {
            HookSurface::Registry { .. } => Ok(InstallOutcome::AlreadyInstalled(Primitive::Registry)),
            HookSurface::SingleTrap { .. } => {
                Ok(InstallOutcome::AlreadyInstalled(Primitive::SingleTrap))
            }
            HookSurface::Unsupported => Err(InstallError::Unsupported),
        };
    }
    match surface {
        HookSurface::Registry { before, after } => {
            if !before.iter().any(|h| h == BEFORE_HOOK) {
                before.push(BEFORE_HOOK.to_owned());
            }
            if !after.iter().any(|h| h == AFTER_HOOK) {
                after.push(AFTER_HOOK.to_owned());
            }
            Ok(InstallOutcome::Installed(Primitive::Registry))
        }
        HookSurface::SingleTrap {
            trap,
            prompt_command,
        } => {
            if let Some(existing) = trap.as_deref()
                && !existing.trim().is_empty()
                && !trap_is_ours(Some(existing))
            {
                return Err(InstallError::TrapClaimed(existing.to_owned()));
            }
            *trap = Some(format!("{TRAP_HOOK} \"$_\""));
            if !prompt_has_hooks(prompt_command.as_deref()) {
                // Drop a stray half of an earlier install before re-adding both.
                let existing = foreign_prompt_command(prompt_command.as_deref().unwrap_or_default());
                *prompt_command = Some(if existing.is_empty() {
                    format!("{AFTER_HOOK}\n{ARM_HOOK}")
                } else {
                    format!("{AFTER_HOOK}\n{existing}\n{ARM_HOOK}")
                });
            }
            Ok(InstallOutcome::Installed(Primitive::SingleTrap))
        }
        HookSurface::Unsupported => Err(InstallError::Unsupported),
    }
}

/// Number of entries in the host's notification chain.
pub fn chain_len(surface: &HookSurface) -> usize {
    match surface {
        HookSurface::Registry { before, after } => before.len() + after.len(),
        HookSurface::SingleTrap {
            trap,
            prompt_command,
        } => {
            usize::from(trap.is_some())
                + prompt_command
                    .as_deref()
                    .map_or(0, |p| prompt_segments(p).count())
        }
        HookSurface::Unsupported => 0,
    }
}

/// An interception machine bound to a host shell's hook primitive.
///
/// Registry hosts call [`Self::before`] and [`Self::after`]. Trap hosts call
/// [`Self::trap_enter`]/[`Self::trap_exit`] (or [`Self::debug_trap`]) for
/// every trap firing, then [`Self::precmd`] and [`Self::arm`] at the two
/// ends of the prompt command.
pub struct HookedSession<S: CommandSource, C: Clock = SystemClock> {
    machine: InterceptionMachine<C>,
    source: S,
    primitive: Option<Primitive>,
    shim: Option<TrapShim>,
}

impl<S: CommandSource, C: Clock> HookedSession<S, C> {
    /// Install into `surface` and bind `machine` to it.
    ///
    /// If installation fails the error is reported once and the session
    /// runs disabled: every event becomes a no-op.
    pub fn attach(surface: &mut HookSurface, mut machine: InterceptionMachine<C>, source: S) -> Self {
        let primitive = match install(surface) {
            Ok(outcome) => Some(outcome.primitive()),
            Err(e) => {
                tracing::warn!("{e}; command logging disabled for this session");
                machine.disable();
                None
            }
        };
        let shim = match (primitive, &*surface) {
            (
                Some(Primitive::SingleTrap),
                HookSurface::SingleTrap { prompt_command, .. },
            ) => Some(TrapShim::new(prompt_command.clone().unwrap_or_default())),
            _ => None,
        };
        Self {
            machine,
            source,
            primitive,
            shim,
        }
    }

    pub const fn primitive(&self) -> Option<Primitive> {
        self.primitive
    }

    pub const fn machine(&self) -> &InterceptionMachine<C> {
        &self.machine
    }

    pub const fn machine_mut(&mut self) -> &mut InterceptionMachine<C> {
        &mut self.machine
    }

    pub const fn shim(&self) -> Option<&TrapShim> {
        self.shim.as_ref()
    }

    /// Registry "before" callback.
    pub fn before(&mut self) -> bool {
        self.primitive == Some(Primitive::Registry) && self.machine.on_before()
    }

    /// Registry "after" callback.
    pub fn after(&mut self) -> AfterOutcome {
        self.machine.on_after_from(&mut self.source)
    }

    /// A trap firing for `pending` begins. Returns how it was classified;
    /// an `Interactive` firing starts the command's clock.
    pub fn trap_enter(&mut self, pending: &str, observed: ShellVars) -> Classification {
        let Some(shim) = self.shim.as_mut() else {
            return Classification::Suppressed;
        };
        let class = shim.begin(pending, observed);
        if class == Classification::Interactive {
            self.machine.on_before();
        }
        class
    }

    /// The innermost trap firing ends; returns the vars to restore.
    pub fn trap_exit(&mut self) -> Option<ShellVars> {
        self.shim.as_mut()?.end()
    }

    /// One complete, non-nested trap firing.
    pub fn debug_trap(&mut self, pending: &str, observed: ShellVars) -> ShellVars {
        self.trap_enter(pending, observed.clone());
        self.trap_exit().unwrap_or(observed)
    }

    /// First prompt-command segment: record the finished command. `observed`
    /// is what that command left in `$?`/`$_`.
    pub fn precmd(&mut self, observed: ShellVars) -> AfterOutcome {
        if let Some(shim) = self.shim.as_mut() {
            shim.save_prompt_vars(observed);
        }
        self.after()
    }

    /// Last prompt-command segment: re-arm interactive mode and return the
    /// vars saved by [`Self::precmd`].
    pub fn arm(&mut self) -> Option<ShellVars> {
        let shim = self.shim.as_mut()?;
        shim.prompt_displayed();
        shim.take_prompt_vars()
    }
}

#[cfg(test)]
mod tests;

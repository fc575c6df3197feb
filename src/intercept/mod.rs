//! Per-session interception state machine.
//!
//! The machine sees two notifications per interactive command: `on_before`
//! when the shell is about to run it and `on_after` once it has completed and
//! the next prompt is about to be drawn. It pairs them into a
//! [`CommandRecord`] and hands that to the [`HistoryStore`].

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::filter::PatternFilter;
use crate::store::{CommandRecord, HistoryStore};

/// Source of the current time. Timestamps are stored with second precision.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(0)
    }
}

/// The host's history facility: yields the text of the most recently
/// completed command, exactly as the shell recorded it.
pub trait CommandSource {
    fn last_completed_command(&mut self) -> Option<String>;
}

impl<F> CommandSource for F
where
    F: FnMut() -> Option<String>,
{
    fn last_completed_command(&mut self) -> Option<String> {
        self()
    }
}

/// Output of the shell's history builtin, captured by the integration script.
#[derive(Debug, Clone)]
pub struct HistoryLine {
    text: Option<String>,
    numbered: bool,
}

impl HistoryLine {
    /// Text that is already the bare command (zsh `$history[...]`).
    pub const fn raw(text: Option<String>) -> Self {
        Self {
            text,
            numbered: false,
        }
    }

    /// Text in bash `history 1` layout, with a leading sequence-number column.
    pub const fn numbered(text: Option<String>) -> Self {
        Self {
            text,
            numbered: true,
        }
    }
}

impl CommandSource for HistoryLine {
    fn last_completed_command(&mut self) -> Option<String> {
        let text = self.text.take()?;
        if self.numbered {
            Some(strip_history_number(&text).to_owned())
        } else {
            Some(text)
        }
    }
}

/// Strip bash's `  123  ` (or `  123* ` for edited entries) prefix.
///
/// Lines that do not start with a sequence number are returned unchanged.
pub fn strip_history_number(line: &str) -> &str {
    let trimmed = line.trim_start();
    let digits = trimmed.len() - trimmed.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return line;
    }
    let rest = &trimmed[digits..];
    let rest = rest.strip_prefix('*').unwrap_or(rest);
    if rest.is_empty() {
        return rest;
    }
    if !rest.starts_with([' ', '\t']) {
        return line;
    }
    rest.trim_start_matches([' ', '\t'])
}

/// Whether a start timestamp is waiting for its stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingStop,
}

/// Mutable per-session flags. Serializable so short-lived hook processes can
/// hand the state from one notification to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterceptionState {
    pub enabled: bool,
    /// True exactly when the next before-notification starts a real command.
    pub preexec_armed: bool,
    /// Set until the first after-notification (the initial prompt draw).
    pub login_suppressed: bool,
    pub pending_start_time: Option<DateTime<Utc>>,
    /// Ignore rules added during this session.
    #[serde(default)]
    pub extra_ignore: Vec<String>,
}

impl InterceptionState {
    /// State of a session that has not drawn its first prompt yet.
    pub const fn new(enabled: bool) -> Self {
        Self {
            enabled,
            preexec_armed: false,
            login_suppressed: true,
            pending_start_time: None,
            extra_ignore: Vec::new(),
        }
    }

    pub const fn phase(&self) -> Phase {
        if self.pending_start_time.is_some() {
            Phase::AwaitingStop
        } else {
            Phase::Idle
        }
    }
}

/// What `on_after` did with the command that just finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AfterOutcome {
    /// First prompt of the session; nothing to pair.
    LoginSuppressed,
    Disabled,
    /// No matching before-notification was seen.
    NoPendingStart,
    /// The history facility returned nothing usable.
    Empty,
    Ignored,
    Recorded(CommandRecord),
    /// The record was built but could not be written; it has been dropped.
    StorageFailed,
}

pub struct InterceptionMachine<C: Clock = SystemClock> {
    state: InterceptionState,
    filter: PatternFilter,
    store: HistoryStore,
    max_records: usize,
    clock: C,
}

impl InterceptionMachine<SystemClock> {
    pub fn new(config: &Config, state: InterceptionState) -> Self {
        Self::with_clock(config, state, SystemClock)
    }
}

impl<C: Clock> InterceptionMachine<C> {
    pub fn with_clock(config: &Config, state: InterceptionState, clock: C) -> Self {
        let filter = PatternFilter::new(config.ignore_rules.iter().chain(&state.extra_ignore));
        Self {
            state,
            filter,
            store: HistoryStore::new(&config.log_file),
            max_records: config.max_records,
            clock,
        }
    }

    pub const fn state(&self) -> &InterceptionState {
        &self.state
    }

    pub fn into_state(self) -> InterceptionState {
        self.state
    }

    pub const fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Handle a before-notification. Returns `true` if a start time was captured.
    ///
    /// Ignored while disabled and while a previous start is still pending, so
    /// nested evaluations inside a running command cannot restart the clock.
    pub fn on_before(&mut self) -> bool {
        if !self.state.enabled || !self.state.preexec_armed {
            return false;
        }
        self.state.pending_start_time = Some(self.clock.now());
        self.state.preexec_armed = false;
        true
    }

    /// Handle an after-notification with the text the history facility reports
    /// for the command that just completed.
    ///
    /// Never fails: every path re-arms the machine and leaves it `Idle`.
    pub fn on_after(&mut self, recovered: Option<&str>) -> AfterOutcome {
        self.state.preexec_armed = true;
        let pending = self.state.pending_start_time.take();

        if self.state.login_suppressed {
            self.state.login_suppressed = false;
            return AfterOutcome::LoginSuppressed;
        }
        if !self.state.enabled {
            return AfterOutcome::Disabled;
        }
        let Some(start_time) = pending else {
            return AfterOutcome::NoPendingStart;
        };
        let text = recovered.map(str::trim).unwrap_or_default();
        if text.is_empty() {
            return AfterOutcome::Empty;
        }
        if let Some(rule) = self.filter.matching_rule(text) {
            tracing::debug!("not recording {text:?}: matches ignore rule {rule:?}");
            return AfterOutcome::Ignored;
        }

        let record = CommandRecord {
            text: text.to_owned(),
            start_time,
            // A clock step backwards must not produce stop < start.
            stop_time: self.clock.now().max(start_time),
        };
        match self.store.record(&record, self.max_records) {
            Ok(()) => AfterOutcome::Recorded(record),
            Err(e) => {
                tracing::warn!("history entry dropped: {e:#}");
                AfterOutcome::StorageFailed
            }
        }
    }

    /// Pull the text from `source` and run [`Self::on_after`].
    pub fn on_after_from<S: CommandSource + ?Sized>(&mut self, source: &mut S) -> AfterOutcome {
        let text = source.last_completed_command();
        self.on_after(text.as_deref())
    }

    pub const fn enable(&mut self) {
        self.state.enabled = true;
    }

    /// Disable recording. A command already in flight is dropped.
    pub fn disable(&mut self) {
        self.state.enabled = false;
        self.state.pending_start_time = None;
    }

    /// Add an ignore rule for the rest of the session.
    ///
    /// Returns `false` if the rule does not compile; it is not kept.
    pub fn add_ignore_rule(&mut self, rule: &str) -> bool {
        if !self.filter.push(rule) {
            return false;
        }
        self.state.extra_ignore.push(rule.to_owned());
        true
    }
}

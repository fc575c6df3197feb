#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use super::*;
use crate::config::Config;
use crate::intercept::InterceptionState;

struct StepClock(Cell<i64>);

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let t = self.0.get();
        self.0.set(t + 1);
        Utc.timestamp_opt(t, 0).unwrap()
    }
}

type History = Rc<RefCell<Vec<String>>>;
type Session = HookedSession<Box<dyn FnMut() -> Option<String>>, StepClock>;

fn session(cfg: &Config, surface: &mut HookSurface) -> (Session, History) {
    let history: History = Rc::default();
    let h = Rc::clone(&history);
    let source: Box<dyn FnMut() -> Option<String>> = Box::new(move || h.borrow().last().cloned());
    let machine = InterceptionMachine::with_clock(
        cfg,
        InterceptionState::new(cfg.enabled),
        StepClock(Cell::new(1_700_000_000)),
    );
    (HookedSession::attach(surface, machine, source), history)
}

fn bash_surface(prompt_command: Option<&str>) -> HookSurface {
    HookSurface::SingleTrap {
        trap: None,
        prompt_command: prompt_command.map(ToOwned::to_owned),
    }
}

fn zsh_surface() -> HookSurface {
    HookSurface::Registry {
        before: vec!["_user_preexec".to_owned()],
        after: Vec::new(),
    }
}

fn vars(status: i32, last_arg: &str) -> ShellVars {
    ShellVars {
        status,
        last_arg: last_arg.to_owned(),
    }
}

fn logged(cfg: &Config) -> Vec<String> {
    crate::query::list(&cfg.log_file)
        .unwrap()
        .map(|(_, t)| t)
        .collect()
}

/// Drives a session the way bash does: the trap fires for each simple command
/// of the typed line, then before each prompt-command segment runs.
struct FakeBash {
    session: Session,
    history: History,
    prompt_command: String,
}

impl FakeBash {
    fn start(cfg: &Config, existing_prompt: Option<&str>) -> Self {
        let mut surface = bash_surface(existing_prompt);
        let (session, history) = session(cfg, &mut surface);
        let HookSurface::SingleTrap { prompt_command, .. } = surface else {
            unreachable!()
        };
        let mut bash = Self {
            session,
            history,
            prompt_command: prompt_command.unwrap_or_default(),
        };
        bash.draw_prompt(ShellVars::default());
        bash
    }

    /// Run the prompt command. Each segment in between clobbers `$?`/`$_`,
    /// so the vars returned must come from what `precmd` saved.
    fn draw_prompt(&mut self, observed: ShellVars) -> (AfterOutcome, ShellVars) {
        let segments: Vec<String> = prompt_segments(&self.prompt_command)
            .map(ToOwned::to_owned)
            .collect();
        let mut current = observed;
        let mut outcome = None;
        let mut restored = None;
        for segment in &segments {
            assert_eq!(self.session.debug_trap(segment, current.clone()), current);
            match segment.as_str() {
                AFTER_HOOK => outcome = Some(self.session.precmd(current.clone())),
                ARM_HOOK => restored = self.session.arm(),
                other => {
                    let last = other.split_whitespace().last().unwrap_or_default();
                    current = vars(0, last);
                }
            }
        }
        (outcome.unwrap(), restored.unwrap())
    }

    /// Type `line`, made of `simple_commands`, and let it finish with `status`.
    fn type_line(&mut self, line: &str, simple_commands: &[&str], status: i32) -> AfterOutcome {
        for cmd in simple_commands {
            let observed = vars(0, "prev");
            assert_eq!(self.session.debug_trap(cmd, observed.clone()), observed);
        }
        self.history.borrow_mut().push(line.to_owned());
        let observed = vars(status, "last");
        let (outcome, restored) = self.draw_prompt(observed.clone());
        assert_eq!(restored, observed);
        outcome
    }
}

// --- install ---

#[test]
fn registry_install_appends_to_end() {
    let mut surface = zsh_surface();
    assert_eq!(
        install(&mut surface),
        Ok(InstallOutcome::Installed(Primitive::Registry))
    );
    let HookSurface::Registry { before, after } = &surface else {
        unreachable!()
    };
    assert_eq!(before, &["_user_preexec", BEFORE_HOOK]);
    assert_eq!(after, &[AFTER_HOOK]);
}

#[test]
fn registry_install_is_idempotent() {
    let mut surface = zsh_surface();
    install(&mut surface).unwrap();
    let once = chain_len(&surface);
    assert_eq!(
        install(&mut surface),
        Ok(InstallOutcome::AlreadyInstalled(Primitive::Registry))
    );
    assert_eq!(chain_len(&surface), once);
}

#[test]
fn registry_half_install_is_completed_without_duplicates() {
    let mut surface = HookSurface::Registry {
        before: vec![BEFORE_HOOK.to_owned()],
        after: Vec::new(),
    };
    install(&mut surface).unwrap();
    assert_eq!(chain_len(&surface), 2);
    assert!(is_installed(&surface));
}

#[test]
fn trap_install_wraps_prompt_command() {
    let mut surface = bash_surface(Some("history -a;"));
    assert_eq!(
        install(&mut surface),
        Ok(InstallOutcome::Installed(Primitive::SingleTrap))
    );
    let HookSurface::SingleTrap {
        trap,
        prompt_command,
    } = &surface
    else {
        unreachable!()
    };
    assert_eq!(trap.as_deref(), Some("__cmdstamp_debug_trap \"$_\""));
    assert_eq!(
        prompt_command.as_deref(),
        Some("__cmdstamp_precmd\nhistory -a;\n__cmdstamp_arm")
    );
}

#[test]
fn trap_install_on_empty_prompt_command() {
    let mut surface = bash_surface(None);
    install(&mut surface).unwrap();
    let HookSurface::SingleTrap { prompt_command, .. } = &surface else {
        unreachable!()
    };
    assert_eq!(
        prompt_command.as_deref(),
        Some("__cmdstamp_precmd\n__cmdstamp_arm")
    );
}

#[test]
fn trap_install_is_idempotent() {
    let mut surface = bash_surface(Some("update_title"));
    install(&mut surface).unwrap();
    let once = surface.clone();
    assert_eq!(
        install(&mut surface),
        Ok(InstallOutcome::AlreadyInstalled(Primitive::SingleTrap))
    );
    assert_eq!(surface, once);
    assert_eq!(chain_len(&surface), 4);
}

#[test]
fn trap_reinstall_after_prompt_command_reset() {
    let mut surface = bash_surface(None);
    install(&mut surface).unwrap();
    if let HookSurface::SingleTrap { prompt_command, .. } = &mut surface {
        // User's rc file appended to PROMPT_COMMAND, losing our arm hook.
        *prompt_command = Some("__cmdstamp_precmd\nmy_prompt".to_owned());
    }
    install(&mut surface).unwrap();
    let HookSurface::SingleTrap { prompt_command, .. } = &surface else {
        unreachable!()
    };
    assert_eq!(
        prompt_command.as_deref(),
        Some("__cmdstamp_precmd\nmy_prompt\n__cmdstamp_arm")
    );
}

#[test]
fn trap_reinstall_strips_stale_hooks_per_segment() {
    let mut surface = bash_surface(Some("__cmdstamp_precmd; foo\nbar;__cmdstamp_arm \"$x\""));
    install(&mut surface).unwrap();
    let HookSurface::SingleTrap { prompt_command, .. } = &surface else {
        unreachable!()
    };
    assert_eq!(
        prompt_command.as_deref(),
        Some("__cmdstamp_precmd\nfoo\nbar\n__cmdstamp_arm")
    );
}

#[test]
fn trap_claimed_by_other_handler_is_error_and_untouched() {
    let mut surface = HookSurface::SingleTrap {
        trap: Some("other_debug_handler".to_owned()),
        prompt_command: Some("x".to_owned()),
    };
    let before = surface.clone();
    assert_eq!(
        install(&mut surface),
        Err(InstallError::TrapClaimed("other_debug_handler".to_owned()))
    );
    assert_eq!(surface, before);
}

#[test]
fn unsupported_host_is_error() {
    let mut surface = HookSurface::Unsupported;
    assert_eq!(install(&mut surface), Err(InstallError::Unsupported));
    assert_eq!(chain_len(&surface), 0);
}

#[test]
fn install_error_messages() {
    assert!(InstallError::Unsupported.to_string().contains("no pre/post"));
    assert!(
        InstallError::TrapClaimed("foo".to_owned())
            .to_string()
            .contains("foo")
    );
}

#[test]
fn prompt_segments_split_and_trim() {
    let segs: Vec<&str> = prompt_segments(" a ;b\n\n c;").collect();
    assert_eq!(segs, vec!["a", "b", "c"]);
}

// --- registry session ---

#[test]
fn registry_session_records_each_command_once() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut surface = zsh_surface();
    let (mut s, history) = session(&cfg, &mut surface);
    assert_eq!(s.primitive(), Some(Primitive::Registry));

    // Initial prompt.
    assert_eq!(s.after(), AfterOutcome::LoginSuppressed);

    for cmd in ["echo hi", "pwd"] {
        assert!(s.before());
        history.borrow_mut().push(cmd.to_owned());
        assert!(matches!(s.after(), AfterOutcome::Recorded(_)));
    }
    // Empty line: prompt redrawn without a before.
    assert_eq!(s.after(), AfterOutcome::NoPendingStart);
    assert_eq!(logged(&cfg), vec!["echo hi", "pwd"]);
}

#[test]
fn failed_install_runs_disabled() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut surface = HookSurface::Unsupported;
    let (mut s, history) = session(&cfg, &mut surface);
    assert_eq!(s.primitive(), None);
    assert!(!s.machine().state().enabled);
    s.after();
    assert!(!s.before());
    history.borrow_mut().push("ls".to_owned());
    assert_eq!(s.after(), AfterOutcome::Disabled);
    assert!(!cfg.log_file.exists());
}

// --- trap session ---

#[test]
fn trap_session_pipeline_recorded_once() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, Some("update_title; history -a"));

    let outcome = bash.type_line("ls | wc -l", &["ls", "wc -l"], 0);
    let AfterOutcome::Recorded(rec) = outcome else {
        unreachable!("expected a record")
    };
    assert_eq!(rec.text, "ls | wc -l");
    assert!(rec.start_time <= rec.stop_time);

    bash.type_line("make && make test", &["make", "make test"], 2);
    assert_eq!(logged(&cfg), vec!["ls | wc -l", "make && make test"]);
}

#[test]
fn trap_session_first_prompt_is_not_logged() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let bash = FakeBash::start(&cfg, None);
    assert!(!cfg.log_file.exists());
    assert!(bash.session.shim().unwrap().interactive_mode());
}

#[test]
fn trap_session_prompt_machinery_does_not_start_a_command() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, Some("update_title"));
    // Two prompt redraws with no command typed (e.g. Ctrl-C at the prompt).
    bash.draw_prompt(ShellVars::default());
    bash.draw_prompt(ShellVars::default());
    assert!(!cfg.log_file.exists());
    assert_eq!(bash.session.machine().state().pending_start_time, None);
}

#[test]
fn trap_session_nested_firing_is_suppressed_and_restored() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, None);

    let outer = vars(1, "outer");
    let inner = vars(7, "inner");
    assert_eq!(
        bash.session.trap_enter("vim notes", outer.clone()),
        Classification::Interactive
    );
    assert_eq!(
        bash.session.trap_enter("command cmdstamp hook before", inner.clone()),
        Classification::Suppressed
    );
    assert_eq!(bash.session.trap_exit(), Some(inner));
    assert_eq!(bash.session.trap_exit(), Some(outer));
    assert_eq!(bash.session.trap_exit(), None);

    bash.history.borrow_mut().push("vim notes".to_owned());
    bash.draw_prompt(ShellVars::default());
    assert_eq!(logged(&cfg), vec!["vim notes"]);
}

#[test]
fn trap_session_ignored_command_does_not_disturb_next() {
    let dir = TempDir::new().unwrap();
    let mut cfg = Config::with_log_file(dir.path().join("h.log"));
    cfg.ignore_rules.push("^ls$".to_owned());
    let mut bash = FakeBash::start(&cfg, None);
    assert_eq!(bash.type_line("ls", &["ls"], 0), AfterOutcome::Ignored);
    assert!(matches!(
        bash.type_line("ls -la", &["ls -la"], 0),
        AfterOutcome::Recorded(_)
    ));
    assert_eq!(logged(&cfg), vec!["ls -la"]);
}

#[test]
fn trap_session_disable_mid_flight() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, None);

    bash.session.debug_trap("sleep 5", ShellVars::default());
    bash.session.machine_mut().disable();
    bash.history.borrow_mut().push("sleep 5".to_owned());
    assert_eq!(bash.draw_prompt(ShellVars::default()).0, AfterOutcome::Disabled);

    bash.session.machine_mut().enable();
    assert!(matches!(
        bash.type_line("echo back", &["echo back"], 0),
        AfterOutcome::Recorded(_)
    ));
    assert_eq!(logged(&cfg), vec!["echo back"]);
}

#[test]
fn trap_session_restores_vars_clobbered_by_prompt_command() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, Some("update_title; history -a"));
    bash.session.debug_trap("echo hello world", vars(0, "prev"));
    bash.history.borrow_mut().push("echo hello world".to_owned());
    let (outcome, restored) = bash.draw_prompt(vars(1, "world"));
    assert!(matches!(outcome, AfterOutcome::Recorded(_)));
    assert_eq!(restored, vars(1, "world"));
}

#[test]
fn arm_without_precmd_restores_nothing() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, None);
    assert_eq!(bash.session.arm(), None);
    assert!(bash.session.shim().unwrap().interactive_mode());
}

#[test]
fn registry_callbacks_ignored_on_trap_host() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::with_log_file(dir.path().join("h.log"));
    let mut bash = FakeBash::start(&cfg, None);
    assert!(!bash.session.before());
}

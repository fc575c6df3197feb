use cmdstamp::config::Config;
use cmdstamp::hook::script::{self, Shell};
use cmdstamp::intercept::{HistoryLine, InterceptionMachine};
use cmdstamp::query;
use cmdstamp::session::SessionStore;

const NO_SESSION: &str = "not inside a cmdstamp shell session (CMDSTAMP_SESSION is unset); \
                          load the integration with: eval \"$(cmdstamp init bash)\"";

/// Load the session's machine, run `f` on it, then save the state back.
fn with_machine<T>(
    id: &str,
    f: impl FnOnce(&mut InterceptionMachine) -> T,
) -> anyhow::Result<T> {
    let config = Config::load()?;
    let sessions = SessionStore::open_default()?;
    let state = sessions.load(id, config.enabled)?;
    let mut machine = InterceptionMachine::new(&config, state);
    let out = f(&mut machine);
    sessions.save(id, machine.state())?;
    Ok(out)
}

pub fn cmd_init(shell: Shell) -> i32 {
    match std::env::current_exe() {
        Ok(bin) => {
            print!("{}", script::init_script(shell, &bin));
            0
        }
        Err(e) => {
            eprintln!("[cmdstamp] error: cannot locate own executable: {e}");
            1
        }
    }
}

// Hook entry points run inside the user's prompt: they print nothing on
// stdout and always exit 0.

pub fn cmd_hook_before(session: Option<&str>) -> i32 {
    let Some(id) = session else {
        tracing::debug!("hook before: no session");
        return 0;
    };
    if let Err(e) = with_machine(id, InterceptionMachine::on_before) {
        tracing::warn!("hook before: {e:#}");
    }
    0
}

pub fn cmd_hook_after(session: Option<&str>, command: Option<String>, numbered: bool) -> i32 {
    let Some(id) = session else {
        tracing::debug!("hook after: no session");
        return 0;
    };
    let mut source = if numbered {
        HistoryLine::numbered(command)
    } else {
        HistoryLine::raw(command)
    };
    match with_machine(id, |m| m.on_after_from(&mut source)) {
        Ok(outcome) => tracing::debug!("hook after: {outcome:?}"),
        Err(e) => tracing::warn!("hook after: {e:#}"),
    }
    0
}

pub fn cmd_hook_end(session: Option<&str>) -> i32 {
    let Some(id) = session else {
        return 0;
    };
    if let Err(e) = SessionStore::open_default().and_then(|s| s.remove(id)) {
        tracing::warn!("hook end: {e:#}");
    }
    0
}

pub fn cmd_set_enabled(session: Option<&str>, enabled: bool) -> i32 {
    let Some(id) = session else {
        eprintln!("[cmdstamp] {NO_SESSION}");
        return 1;
    };
    let result = with_machine(id, |m| {
        if enabled {
            m.enable();
        } else {
            m.disable();
        }
    });
    match result {
        Ok(()) => {
            let word = if enabled { "enabled" } else { "disabled" };
            eprintln!("[cmdstamp] recording {word} for this session");
            0
        }
        Err(e) => {
            eprintln!("[cmdstamp] error: {e:#}");
            1
        }
    }
}

pub fn cmd_ignore(session: Option<&str>, rule: &str) -> i32 {
    let Some(id) = session else {
        eprintln!("[cmdstamp] {NO_SESSION}");
        return 1;
    };
    match with_machine(id, |m| m.add_ignore_rule(rule)) {
        Ok(true) => {
            eprintln!("[cmdstamp] ignoring commands matching {rule:?} in this session");
            0
        }
        Ok(false) => {
            eprintln!("[cmdstamp] error: invalid ignore rule {rule:?}");
            1
        }
        Err(e) => {
            eprintln!("[cmdstamp] error: {e:#}");
            1
        }
    }
}

pub fn cmd_status(session: Option<&str>) -> i32 {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("[cmdstamp] error: {e:#}");
            return 1;
        }
    };
    let (enabled, extra) = match session {
        Some(id) => match SessionStore::open_default().and_then(|s| s.load(id, config.enabled)) {
            Ok(state) => (state.enabled, state.extra_ignore),
            Err(e) => {
                eprintln!("[cmdstamp] error: {e:#}");
                return 1;
            }
        },
        None => (config.enabled, Vec::new()),
    };
    let records = match query::list(&config.log_file) {
        Ok(entries) => entries.count(),
        Err(e) => {
            eprintln!("[cmdstamp] error: {e:#}");
            return 1;
        }
    };

    println!("session:   {}", session.unwrap_or("none"));
    println!("recording: {}", if enabled { "enabled" } else { "disabled" });
    println!("log file:  {}", config.log_file.display());
    println!("records:   {records} (max {})", config.max_records);
    for rule in config.ignore_rules.iter().chain(&extra) {
        println!("ignore:    {rule}");
    }
    0
}

#[derive(serde::Serialize)]
struct ListEntry {
    index: usize,
    command: String,
}

pub fn cmd_list(json: bool) -> i32 {
    let entries = match Config::load().and_then(|c| query::list(&c.log_file)) {
        Ok(e) => e,
        Err(e) => {
            eprintln!("[cmdstamp] error listing history: {e:#}");
            return 1;
        }
    };

    if json {
        let entries: Vec<ListEntry> = entries
            .map(|(index, command)| ListEntry { index, command })
            .collect();
        return match serde_json::to_string_pretty(&entries) {
            Ok(s) => {
                println!("{s}");
                0
            }
            Err(e) => {
                eprintln!("[cmdstamp] error: {e}");
                1
            }
        };
    }

    let mut any = false;
    for (index, command) in entries {
        any = true;
        // One line per entry: embedded newlines are shown escaped.
        println!("{index:>5}  {}", cmdstamp::store::escape(&command));
    }
    if !any {
        eprintln!("[cmdstamp] no history entries found");
    }
    0
}

pub fn cmd_show(index: usize) -> i32 {
    let record = match Config::load().and_then(|c| query::show(&c.log_file, index)) {
        Ok(Some(r)) => r,
        Ok(None) => {
            eprintln!("[cmdstamp] history entry {index} not found");
            return 1;
        }
        Err(e) => {
            eprintln!("[cmdstamp] error getting history entry: {e:#}");
            return 1;
        }
    };

    println!("Command: {}", record.text);
    println!("Start:   {}", record.start_time.to_rfc2822());
    println!("Stop:    {}", record.stop_time.to_rfc2822());
    0
}

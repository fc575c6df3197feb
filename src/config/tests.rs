#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::*;

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    fs::write(&path, content).unwrap();
    path
}

fn clear_env() {
    // SAFETY: test-only env mutation; #[serial] prevents races.
    unsafe {
        std::env::remove_var("CMDSTAMP_MAX_RECORDS");
        std::env::remove_var("CMDSTAMP_ENABLED");
        std::env::remove_var("CMDSTAMP_IGNORE");
    }
}

// --- defaults ---

#[test]
fn defaults() {
    let cfg = Config::with_log_file("/tmp/h.log");
    assert_eq!(cfg.max_records, 3000);
    assert!(cfg.enabled);
    assert_eq!(cfg.ignore_rules, vec!["cmdstamp( .*)?", "__cmdstamp.*"]);
    assert_eq!(cfg.log_file, PathBuf::from("/tmp/h.log"));
}

#[test]
fn builtin_rules_cover_control_commands() {
    let cfg = Config::with_log_file("/tmp/h.log");
    let filter = crate::filter::PatternFilter::new(&cfg.ignore_rules);
    assert!(filter.matches("cmdstamp disable"));
    assert!(filter.matches("cmdstamp"));
    assert!(filter.matches("__cmdstamp_precmd"));
    assert!(!filter.matches("cmdstampede"));
}

// --- load_from ---

#[test]
fn missing_file_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let cfg = Config::load_from(Some(&dir.path().join("nope.toml")), "/l".into());
    assert_eq!(cfg, Config::with_log_file("/l"));
}

#[test]
fn no_file_gives_defaults() {
    assert_eq!(Config::load_from(None, "/l".into()), Config::with_log_file("/l"));
}

#[test]
fn file_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[history]
max_records = 50
enabled = false
ignore = ["ls", "cd( .*)?"]
file = "/var/tmp/cmds.log"
"#,
    );
    let cfg = Config::load_from(Some(&path), "/l".into());
    assert_eq!(cfg.max_records, 50);
    assert!(!cfg.enabled);
    assert_eq!(cfg.log_file, PathBuf::from("/var/tmp/cmds.log"));
    assert_eq!(
        cfg.ignore_rules,
        vec!["cmdstamp( .*)?", "__cmdstamp.*", "ls", "cd( .*)?"]
    );
}

#[test]
fn partial_section_keeps_other_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[history]\nmax_records = 7\n");
    let cfg = Config::load_from(Some(&path), "/l".into());
    assert_eq!(cfg.max_records, 7);
    assert!(cfg.enabled);
    assert_eq!(cfg.ignore_rules.len(), 2);
}

#[test]
fn invalid_toml_gives_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[history\nmax_records = ");
    assert_eq!(
        Config::load_from(Some(&path), "/l".into()),
        Config::with_log_file("/l")
    );
}

#[test]
fn file_without_history_section() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[other]\nkey = 1\n");
    assert_eq!(
        Config::load_from(Some(&path), "/l".into()),
        Config::with_log_file("/l")
    );
}

// --- apply_env ---

#[test]
#[serial]
fn env_overrides() {
    clear_env();
    unsafe {
        std::env::set_var("CMDSTAMP_MAX_RECORDS", "12");
        std::env::set_var("CMDSTAMP_ENABLED", "no");
        std::env::set_var("CMDSTAMP_IGNORE", "ls\n\n  pwd  \n");
    }
    let mut cfg = Config::with_log_file("/l");
    cfg.apply_env();
    clear_env();
    assert_eq!(cfg.max_records, 12);
    assert!(!cfg.enabled);
    assert_eq!(cfg.ignore_rules[2..], ["ls", "pwd"]);
}

#[test]
#[serial]
fn invalid_env_values_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("CMDSTAMP_MAX_RECORDS", "lots");
        std::env::set_var("CMDSTAMP_ENABLED", "maybe");
    }
    let mut cfg = Config::with_log_file("/l");
    cfg.apply_env();
    clear_env();
    assert_eq!(cfg, Config::with_log_file("/l"));
}

#[test]
#[serial]
fn load_reads_home_config_and_env() {
    clear_env();
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[history]\nmax_records = 99\n");
    unsafe {
        std::env::set_var("CMDSTAMP_HOME", dir.path());
        std::env::remove_var("CMDSTAMP_LOG_FILE");
        std::env::set_var("CMDSTAMP_MAX_RECORDS", "5");
    }
    let cfg = Config::load().unwrap();
    unsafe { std::env::remove_var("CMDSTAMP_HOME") };
    clear_env();
    assert_eq!(cfg.max_records, 5);
    assert_eq!(cfg.log_file, dir.path().join("history.log"));
}

// --- parse_bool ---

#[test]
fn parse_bool_spellings() {
    assert_eq!(parse_bool("1"), Some(true));
    assert_eq!(parse_bool("TRUE"), Some(true));
    assert_eq!(parse_bool(" off "), Some(false));
    assert_eq!(parse_bool("nah"), None);
}

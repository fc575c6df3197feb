//! Per-shell-session state files.
//!
//! Every `cmdstamp hook ...` invocation is a fresh process, so the
//! [`InterceptionState`] of a shell session is kept in
//! `{sessions_dir}/{session_id}.toml` between notifications.

use std::path::PathBuf;

use anyhow::Context as _;

use crate::intercept::InterceptionState;

#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

/// Session ids come from the environment and end up in a file name.
fn validate_id(id: &str) -> anyhow::Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if ok {
        Ok(())
    } else {
        anyhow::bail!("invalid session id {id:?}")
    }
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store under the platform session directory (see [`crate::paths::sessions_dir`]).
    ///
    /// # Errors
    /// Returns an error if no state directory can be determined.
    pub fn open_default() -> anyhow::Result<Self> {
        let dir = crate::paths::sessions_dir()
            .ok_or_else(|| anyhow::anyhow!("cannot determine session state directory"))?;
        Ok(Self::new(dir))
    }

    fn path_for(&self, id: &str) -> anyhow::Result<PathBuf> {
        validate_id(id)?;
        Ok(self.dir.join(format!("{id}.toml")))
    }

    /// Load the state of session `id`, or a fresh state if it has none yet.
    ///
    /// A corrupt state file is reported and replaced by a fresh state.
    ///
    /// # Errors
    /// Returns an error for an invalid id or an unreadable file.
    pub fn load(&self, id: &str, default_enabled: bool) -> anyhow::Result<InterceptionState> {
        let path = self.path_for(id)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(InterceptionState::new(default_enabled));
            }
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("read session state {}", path.display())));
            }
        };
        match toml::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!("corrupt session state {}: {e}", path.display());
                Ok(InterceptionState::new(default_enabled))
            }
        }
    }

    /// Persist `state` for session `id` (write to a temp file, then rename).
    ///
    /// # Errors
    /// Returns an error for an invalid id or if the write fails.
    pub fn save(&self, id: &str, state: &InterceptionState) -> anyhow::Result<()> {
        let path = self.path_for(id)?;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create {}", self.dir.display()))?;
        let content = toml::to_string_pretty(state).context("serialize session state")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, content)
            .with_context(|| format!("write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &path)
            .with_context(|| format!("replace {}", path.display()))?;
        Ok(())
    }

    /// Forget session `id`. Returns `Ok(false)` if it had no state.
    ///
    /// # Errors
    /// Returns an error for an invalid id or if the file cannot be removed.
    pub fn remove(&self, id: &str) -> anyhow::Result<bool> {
        let path = self.path_for(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context(format!("remove {}", path.display()))),
        }
    }
}

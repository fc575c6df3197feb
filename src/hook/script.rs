//! Shell integration scripts printed by `cmdstamp init <shell>`.
//!
//! Both scripts install the same hooks as [`super::install`], in shell
//! syntax, and forward the two notifications to `cmdstamp hook before` and
//! `cmdstamp hook after`. Sourcing a script twice is a no-op.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Shell {
    /// Single DEBUG trap plus `PROMPT_COMMAND`.
    Bash,
    /// `preexec_functions` / `precmd_functions` registries.
    Zsh,
}

const BIN_PLACEHOLDER: &str = "@CMDSTAMP_BIN@";

const BASH_TEMPLATE: &str = r#"# cmdstamp: bash integration (DEBUG trap + PROMPT_COMMAND).
# Load from ~/.bashrc with:  eval "$(cmdstamp init bash)"
if [[ $- == *i* ]]; then
  __cmdstamp_current_trap=$(trap -p DEBUG)
  if [[ -n "$__cmdstamp_current_trap" && "$__cmdstamp_current_trap" != *__cmdstamp_debug_trap* ]]; then
    printf '[cmdstamp] DEBUG trap already in use; command logging disabled\n' >&2
  else
    __cmdstamp_bin=@CMDSTAMP_BIN@
    # First load in this shell process; re-sourcing keeps the session.
    if [[ "${__cmdstamp_owner:-}" != "$$" ]]; then
      __cmdstamp_owner=$$
      export CMDSTAMP_SESSION="bash-$$-$RANDOM"
      __cmdstamp_interactive_mode=
      __cmdstamp_depth=0
      __cmdstamp_status=0
      __cmdstamp_last_arg=
      __cmdstamp_prev_exit=
    fi

    __cmdstamp_in_prompt_command() {
      local segment
      local -a segments
      IFS=$';\n' read -r -d '' -a segments <<< "${PROMPT_COMMAND:-}"
      for segment in "${segments[@]}"; do
        segment="${segment#"${segment%%[![:space:]]*}"}"
        segment="${segment%"${segment##*[![:space:]]}"}"
        [[ -n "$segment" && "$segment" == "$1" ]] && return 0
      done
      return 1
    }

    # Print PROMPT_COMMAND without our own segments.
    __cmdstamp_foreign_prompt_command() {
      local line part trimmed
      local -a parts kept lines
      while IFS= read -r line; do
        kept=()
        IFS=';' read -r -a parts <<< "$line"
        for part in "${parts[@]}"; do
          trimmed="${part#"${part%%[![:space:]]*}"}"
          trimmed="${trimmed%"${trimmed##*[![:space:]]}"}"
          case "$trimmed" in
            '' | __cmdstamp_precmd | __cmdstamp_arm | '__cmdstamp_arm '*) ;;
            *) kept+=("$part") ;;
          esac
        done
        if (( ${#kept[@]} > 0 )); then
          lines+=("$(IFS=';'; printf '%s' "${kept[*]}")")
        fi
      done <<< "${PROMPT_COMMAND:-}"
      (IFS=$'\n'; printf '%s' "${lines[*]}")
    }

    # $? is restored by bash after the trap and $_ by the trap's own trailing
    # "$_" argument. Must return 0: under extdebug non-zero skips the command.
    __cmdstamp_debug_trap() {
      (( __cmdstamp_depth > 0 )) && return 0
      __cmdstamp_depth=$(( __cmdstamp_depth + 1 ))
      if [[ "$BASH_COMMAND" == __cmdstamp_precmd ]]; then
        __cmdstamp_last_arg=$1
      elif [[ -z "${COMP_LINE:-}" && -n "$__cmdstamp_interactive_mode" ]] \
        && ! __cmdstamp_in_prompt_command "$BASH_COMMAND"; then
        __cmdstamp_interactive_mode=
        "$__cmdstamp_bin" hook before
      fi
      __cmdstamp_depth=$(( __cmdstamp_depth - 1 ))
      return 0
    }

    __cmdstamp_precmd() {
      __cmdstamp_status=$?
      "$__cmdstamp_bin" hook after --numbered --command "$(HISTTIMEFORMAT= builtin history 1)"
      return "$__cmdstamp_status"
    }

    # Last prompt segment: leaves $? and $_ as the user's command set them.
    __cmdstamp_arm() {
      __cmdstamp_interactive_mode=1
      return "$__cmdstamp_status"
    }

    __cmdstamp_exit() {
      "$__cmdstamp_bin" hook end
      eval "${__cmdstamp_prev_exit:-}"
    }

    # Run `hook end` on exit, ahead of any EXIT trap already set.
    __cmdstamp_chain_exit() {
      local current
      current=$(trap -p EXIT)
      [[ "$current" == *__cmdstamp_exit* ]] && return 0
      if [[ -n "$current" ]]; then
        eval "set -- $current"
        __cmdstamp_prev_exit=$3
      fi
      trap __cmdstamp_exit EXIT
    }

    __cmdstamp_rest=$(__cmdstamp_foreign_prompt_command)
    PROMPT_COMMAND=$'__cmdstamp_precmd\n'"$__cmdstamp_rest"$'\n__cmdstamp_arm "$__cmdstamp_last_arg"'
    trap '__cmdstamp_debug_trap "$_"' DEBUG
    __cmdstamp_chain_exit
    unset __cmdstamp_rest
  fi
  unset __cmdstamp_current_trap
fi
"#;

const ZSH_TEMPLATE: &str = r#"# cmdstamp: zsh integration (preexec / precmd hooks).
# Load from ~/.zshrc with:  eval "$(cmdstamp init zsh)"
if [[ -o interactive ]] && (( ! ${precmd_functions[(Ie)__cmdstamp_precmd]} )); then
  export CMDSTAMP_SESSION="zsh-$$-$RANDOM"
  typeset -g __cmdstamp_bin=@CMDSTAMP_BIN@

  __cmdstamp_preexec() {
    "$__cmdstamp_bin" hook before
  }

  __cmdstamp_precmd() {
    local __cmdstamp_status=$?
    "$__cmdstamp_bin" hook after --command "${${(@)history}[1]}"
    return $__cmdstamp_status
  }

  __cmdstamp_exit() {
    "$__cmdstamp_bin" hook end
  }

  autoload -Uz add-zsh-hook
  add-zsh-hook preexec __cmdstamp_preexec
  add-zsh-hook precmd __cmdstamp_precmd
  add-zsh-hook zshexit __cmdstamp_exit
fi
"#;

/// Single-quote `arg` for POSIX shells.
pub fn shell_escape(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "'\\''"))
}

/// Render the integration script for `shell`, invoking the binary at `bin`.
pub fn init_script(shell: Shell, bin: &Path) -> String {
    let template = match shell {
        Shell::Bash => BASH_TEMPLATE,
        Shell::Zsh => ZSH_TEMPLATE,
    };
    template.replace(BIN_PLACEHOLDER, &shell_escape(&bin.to_string_lossy()))
}

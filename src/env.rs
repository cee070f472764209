use crate::config::{DEFAULT_PROMPT, EngineConfig};
use chrono::Local;
use std::collections::{HashMap, VecDeque};
use std::env as stdenv;
use std::fs;
use std::path::{Path, PathBuf};

/// Failure of [`Environment::pop_directory`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    #[error("Directory stack is empty")]
    Empty,
    #[error("Cannot find path: {}", .0.display())]
    Missing(PathBuf),
}

#[derive(Debug, Clone)]
struct Variable {
    name: String,
    value: String,
}

/// Session state of one engine instance.
///
/// The environment contains:
/// - variables, looked up case-insensitively and handed to every spawned child;
/// - the current directory, used as the working directory of children and as the
///   base for relative paths (the process-wide working directory is never touched);
/// - a LIFO directory stack for `pushd`/`popd`;
/// - a bounded command history (oldest entries are evicted first).
#[derive(Debug, Clone)]
pub struct Environment {
    vars: HashMap<String, Variable>,
    current_dir: PathBuf,
    dir_stack: Vec<PathBuf>,
    history: VecDeque<String>,
    history_capacity: usize,
    user_name: String,
    machine_name: String,
    home_dir: PathBuf,
}

impl Environment {
    /// Capture the current process state into a new `Environment` instance.
    ///
    /// Variables are copied from the process environment and `PROMPT` is set from
    /// the configured template.
    pub fn new(config: &EngineConfig) -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let current_dir = fs::canonicalize(&current_dir).unwrap_or(current_dir);
        let mut env = Self {
            vars: HashMap::new(),
            current_dir: current_dir.clone(),
            dir_stack: Vec::new(),
            history: VecDeque::new(),
            history_capacity: config.history_capacity.max(1),
            user_name: String::new(),
            machine_name: String::new(),
            home_dir: PathBuf::new(),
        };
        for (k, v) in stdenv::vars_os() {
            env.set_var(k.to_string_lossy(), v.to_string_lossy());
        }
        env.user_name = env
            .get_var("USER")
            .or_else(|| env.get_var("USERNAME"))
            .unwrap_or("user")
            .to_string();
        env.machine_name = machine_name(&env);
        env.home_dir = env
            .get_var("HOME")
            .or_else(|| env.get_var("USERPROFILE"))
            .map(PathBuf::from)
            .unwrap_or(current_dir);
        env.set_var("PROMPT", config.prompt_template.as_str());
        env
    }

    /// Get the value of a variable; names are matched case-insensitively.
    pub fn get_var(&self, name: &str) -> Option<&str> {
        self.vars.get(&fold(name)).map(|v| v.value.as_str())
    }

    /// Set or override a variable. The spelling of the first assignment is kept.
    pub fn set_var(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        self.vars
            .entry(fold(&name))
            .and_modify(|v| v.value = value.clone())
            .or_insert(Variable { name, value });
    }

    /// All variables in no particular order.
    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars
            .values()
            .map(|v| (v.name.as_str(), v.value.as_str()))
    }

    /// All variables sorted by name.
    pub fn sorted_vars(&self) -> Vec<(&str, &str)> {
        let mut vars: Vec<_> = self.vars().collect();
        vars.sort_by(|a, b| a.0.cmp(b.0));
        vars
    }

    pub fn current_dir(&self) -> &Path {
        &self.current_dir
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn machine_name(&self) -> &str {
        &self.machine_name
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    /// Interpret `path` relative to the current directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }

    /// Change the current directory. Succeeds only if the target is an existing
    /// directory; the stored path is absolute and canonical.
    pub fn change_directory(&mut self, path: impl AsRef<Path>) -> bool {
        let target = self.resolve(path);
        match fs::canonicalize(&target) {
            Ok(dir) if dir.is_dir() => {
                log::debug!("cd {} -> {}", self.current_dir.display(), dir.display());
                self.current_dir = dir;
                true
            }
            Ok(other) => {
                log::debug!("cd: {} is not a directory", other.display());
                false
            }
            Err(e) => {
                log::debug!("cd: can't canonicalize {}: {e}", target.display());
                false
            }
        }
    }

    /// Remember the current directory and change to `path`.
    ///
    /// Nothing is pushed when the change fails.
    pub fn push_directory(&mut self, path: impl AsRef<Path>) -> bool {
        let previous = self.current_dir.clone();
        if self.change_directory(path) {
            self.dir_stack.push(previous);
            true
        } else {
            false
        }
    }

    /// Return to the most recently pushed directory.
    ///
    /// If that directory no longer exists the entry is consumed and the current
    /// directory stays as it is.
    pub fn pop_directory(&mut self) -> Result<&Path, PopError> {
        let previous = self.dir_stack.pop().ok_or(PopError::Empty)?;
        if !previous.is_dir() {
            return Err(PopError::Missing(previous));
        }
        self.current_dir = previous;
        Ok(&self.current_dir)
    }

    pub fn dir_stack(&self) -> &[PathBuf] {
        &self.dir_stack
    }

    /// Append a command line to history. Blank lines are ignored.
    pub fn add_to_history(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.history.push_back(line.to_string());
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }

    /// History, oldest first.
    pub fn history(&self) -> impl ExactSizeIterator<Item = &str> {
        self.history.iter().map(String::as_str)
    }

    pub fn prompt_template(&self) -> &str {
        self.get_var("PROMPT").unwrap_or(DEFAULT_PROMPT)
    }

    /// Render the prompt from the `PROMPT` template.
    ///
    /// Tokens are replaced in this order: `$P` current directory, `$G` `>`, `$D` date,
    /// `$T` time, `$U` user, `$M` machine. A result of exactly `WS>` is shown as
    /// `WS [<leaf dir>]> `; anything else gets a trailing space.
    pub fn render_prompt(&self) -> String {
        let now = Local::now();
        let rendered = self
            .prompt_template()
            .replace("$P", &self.current_dir.display().to_string())
            .replace("$G", ">")
            .replace("$D", &now.format("%Y-%m-%d").to_string())
            .replace("$T", &now.format("%H:%M").to_string())
            .replace("$U", &self.user_name)
            .replace("$M", &self.machine_name);
        if rendered == "WS>" {
            return format!("WS [{}]> ", self.leaf_dir_name());
        }
        format!("{rendered} ")
    }

    fn leaf_dir_name(&self) -> String {
        if let Some(name) = self.current_dir.file_name() {
            return name.to_string_lossy().into_owned();
        }
        // Filesystem root: `C:\` becomes `C:`, `/` stays `/`.
        let full = self.current_dir.to_string_lossy();
        let trimmed = full.trim_end_matches(['\\', '/']);
        if trimmed.is_empty() {
            full.into_owned()
        } else {
            trimmed.to_string()
        }
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_uppercase()
}

#[cfg(unix)]
fn machine_name(env: &Environment) -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .or_else(|| env.get_var("HOSTNAME").map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(unix))]
fn machine_name(env: &Environment) -> String {
    env.get_var("COMPUTERNAME")
        .or_else(|| env.get_var("HOSTNAME"))
        .unwrap_or("localhost")
        .to_string()
}

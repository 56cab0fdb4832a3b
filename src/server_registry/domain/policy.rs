//! Validation applied before a STDIO server process is spawned.

use super::{ServerConfigError, StdioTransportConfig};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Commands allowed by [`SpawnPolicy::with_defaults`].
const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "node", "npx", "python", "python3", "uv", "uvx", "deno", "bun", "docker",
];

/// Environment variables that can inject code into a spawned process.
const BLOCKED_ENV_VARS: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "NODE_OPTIONS",
    "PYTHONSTARTUP",
    "PYTHONPATH",
    "PERL5OPT",
    "RUBYOPT",
    "BASH_ENV",
    "ENV",
];

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '>', '<', '\n', '\r'];

/// Allow-list and sanitisation rules for locally spawned servers.
///
/// The policy is an owned value handed to whatever spawns processes, so
/// changes made through [`SpawnPolicy::allow_command`] never leak between
/// independent owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnPolicy {
    allowed_commands: BTreeSet<String>,
}

impl Default for SpawnPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl SpawnPolicy {
    /// Creates a policy that allows nothing.
    #[must_use]
    pub const fn deny_all() -> Self {
        Self {
            allowed_commands: BTreeSet::new(),
        }
    }

    /// Creates a policy allowing common runtime launchers.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            allowed_commands: DEFAULT_ALLOWED_COMMANDS
                .iter()
                .map(|command| (*command).to_owned())
                .collect(),
        }
    }

    /// Adds `command` to the allow-list.
    pub fn allow_command(&mut self, command: impl Into<String>) {
        let normalized = command.into().trim().to_owned();
        if !normalized.is_empty() {
            self.allowed_commands.insert(normalized);
        }
    }

    /// Removes `command` from the allow-list. Returns whether it was present.
    pub fn revoke_command(&mut self, command: &str) -> bool {
        self.allowed_commands.remove(command.trim())
    }

    /// Returns whether `command` may be spawned.
    ///
    /// Both the command as written and its file name are checked, so
    /// `/usr/bin/node` is allowed when `node` is.
    #[must_use]
    pub fn is_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.contains(command) {
            return true;
        }
        Path::new(command)
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| self.allowed_commands.contains(name))
    }

    /// Validates `transport` and returns a copy with a sanitised environment.
    ///
    /// # Errors
    ///
    /// Returns [`ServerConfigError::CommandNotAllowed`] when the command is
    /// not allowed, or [`ServerConfigError::UnsafeArgument`] when an argument
    /// contains shell metacharacters.
    pub fn check(
        &self,
        transport: &StdioTransportConfig,
    ) -> Result<StdioTransportConfig, ServerConfigError> {
        if !self.is_allowed(transport.command()) {
            return Err(ServerConfigError::CommandNotAllowed(
                transport.command().to_owned(),
            ));
        }

        if let Some(unsafe_arg) = transport
            .args()
            .iter()
            .find(|arg| arg.contains(SHELL_METACHARACTERS))
        {
            return Err(ServerConfigError::UnsafeArgument(unsafe_arg.clone()));
        }

        Ok(transport.clone().with_env(sanitize_env(transport.env())))
    }
}

/// Drops environment variables that can inject code into a child process.
#[must_use]
pub fn sanitize_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    env.iter()
        .filter(|(key, _)| {
            !BLOCKED_ENV_VARS
                .iter()
                .any(|blocked| key.eq_ignore_ascii_case(blocked))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn stdio(command: &str, args: &[&str]) -> StdioTransportConfig {
        StdioTransportConfig::new(command)
            .expect("valid command")
            .with_args(args.iter().map(|arg| (*arg).to_owned()))
    }

    #[rstest]
    #[case("npx", true)]
    #[case("/usr/local/bin/node", true)]
    #[case("bash", false)]
    #[case("rm", false)]
    fn default_allow_list(#[case] command: &str, #[case] allowed: bool) {
        assert_eq!(SpawnPolicy::with_defaults().is_allowed(command), allowed);
    }

    #[test]
    fn allow_and_revoke_are_scoped_to_the_policy() {
        let mut policy = SpawnPolicy::deny_all();
        let untouched = SpawnPolicy::deny_all();

        policy.allow_command("my-server");

        assert!(policy.is_allowed("my-server"));
        assert!(!untouched.is_allowed("my-server"));
        assert!(policy.revoke_command("my-server"));
        assert!(!policy.is_allowed("my-server"));
    }

    #[rstest]
    #[case("server.js; rm -rf /")]
    #[case("$(whoami)")]
    #[case("a | b")]
    fn shell_metacharacters_are_rejected(#[case] arg: &str) {
        let result = SpawnPolicy::with_defaults().check(&stdio("node", &[arg]));

        assert_eq!(
            result,
            Err(ServerConfigError::UnsafeArgument(arg.to_owned()))
        );
    }

    #[test]
    fn check_strips_injection_variables() {
        let transport = stdio("node", &["server.js"]).with_env([
            ("LD_PRELOAD".to_owned(), "/tmp/evil.so".to_owned()),
            ("node_options".to_owned(), "--require evil".to_owned()),
            ("API_TOKEN".to_owned(), "secret".to_owned()),
        ]);

        let checked = SpawnPolicy::with_defaults()
            .check(&transport)
            .expect("allowed command");

        assert_eq!(checked.env().len(), 1);
        assert!(checked.env().contains_key("API_TOKEN"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert_eq!(
            SpawnPolicy::with_defaults().check(&stdio("curl", &[])),
            Err(ServerConfigError::CommandNotAllowed("curl".to_owned()))
        );
    }
}

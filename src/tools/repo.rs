//! Typed invocation for fetching an existing configuration repository.

use std::path::PathBuf;

use crate::tool_traits::ToolInvocation;

/// `git clone --depth 1 -- <url> <dest>`
///
/// `--` keeps a URL from ever being read as an option.
#[derive(Debug, Clone)]
pub struct GitCloneArgs {
    pub program: String,
    pub url: String,
    pub dest: PathBuf,
}

impl ToolInvocation for GitCloneArgs {
    fn program(&self) -> &str {
        &self.program
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "clone".to_string(),
            "--depth".to_string(),
            "1".to_string(),
            "--".to_string(),
            self.url.clone(),
            self.dest.display().to_string(),
        ]
    }

    /// Fail instead of waiting for credentials nobody will type.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())]
    }
}

//! Type-safe external tool contracts.
//!
//! Every privileged tool the installer runs is described by a struct that
//! implements `ToolInvocation`. The struct is the contract: argument order,
//! environment and stdin payload are fixed in one place and nothing is ever
//! interpolated into a shell command line.

/// Trait for typed tool invocations.
///
/// # Contract
///
/// - `program()`: executable name or path, resolved through `PATH`.
/// - `to_cli_args()`: argv after the program, passed verbatim (no shell).
/// - `get_env_vars()`: extra environment for the child.
/// - `stdin_payload()`: bytes written to the child's stdin, then closed.
///   Secrets travel here and nowhere else.
/// - `display()`: the command line as it appears in logs. Must never
///   contain the stdin payload.
///
/// # Example
///
/// ```
/// use keystone_installer::tool_traits::ToolInvocation;
/// use keystone_installer::tools::disk::UmountArgs;
///
/// let args = UmountArgs {
///     program: "umount".to_string(),
///     target: "/mnt/boot".into(),
/// };
///
/// assert_eq!(args.to_cli_args(), vec!["/mnt/boot"]);
/// assert_eq!(args.display(), "umount /mnt/boot");
/// ```
pub trait ToolInvocation {
    /// Program to execute.
    fn program(&self) -> &str;

    /// Arguments exactly as the tool expects them.
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables the tool requires.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Data fed to stdin. `None` means stdin is `/dev/null`.
    fn stdin_payload(&self) -> Option<String> {
        None
    }

    /// Loggable command line: `KEY=value program arg...`.
    fn display(&self) -> String {
        let mut parts: Vec<String> = self
            .get_env_vars()
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        parts.push(self.program().to_string());
        parts.extend(self.to_cli_args());
        parts.join(" ")
    }
}

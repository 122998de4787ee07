//! Child process isolation and teardown.
//!
//! Disk tools must never outlive the installer: an orphaned `disko` or
//! `nixos-install` keeps writing to the target after the operator has been
//! told the run ended.
//!
//! - Every child gets its own process group and a parent-death signal
//! - Live children are tracked in a global registry
//! - A timed-out child is torn down as a whole group (SIGTERM, grace, SIGKILL)
//! - SIGINT/SIGTERM/SIGHUP on the installer tear down every registered group

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Set of child process-group leaders that are currently running.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    shutting_down: bool,
}

impl ChildRegistry {
    /// Process-wide registry shared by the executor and the signal handler.
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        log::debug!("Registered child process group {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        log::debug!("Unregistered child process group {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Tear down every registered group. Runs at most once per registry.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.shutting_down {
            log::debug!("Child teardown already in progress");
            return;
        }
        self.shutting_down = true;

        if self.pids.is_empty() {
            return;
        }

        log::info!("Terminating {} child process group(s)", self.pids.len());
        let leaders: Vec<u32> = self.pids.drain().collect();
        terminate_groups(&leaders, grace_period);
    }
}

/// Lock a registry, recovering the data if a panicking thread poisoned it.
fn lock_registry(registry: &Mutex<ChildRegistry>) -> MutexGuard<'_, ChildRegistry> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration of one child in the global registry; unregisters on drop.
#[derive(Debug)]
pub struct ChildRegistration {
    pid: u32,
}

impl ChildRegistration {
    pub fn new(pid: u32) -> Self {
        lock_registry(&ChildRegistry::global()).register(pid);
        Self { pid }
    }
}

impl Drop for ChildRegistration {
    fn drop(&mut self) {
        lock_registry(&ChildRegistry::global()).unregister(self.pid);
    }
}

/// SIGTERM each group, wait up to `grace_period` for the leaders, then
/// SIGKILL every group.
///
/// The final SIGKILL goes out even when a leader already exited: members that
/// ignore SIGTERM outlive their leader and would keep its pipes open.
pub fn terminate_groups(leaders: &[u32], grace_period: Duration) {
    for &pid in leaders {
        if let Err(e) = send_signal_to_group(pid, Signal::SIGTERM) {
            log::debug!("SIGTERM to group {} failed ({}), signalling leader", pid, e);
            let _ = send_signal(pid, Signal::SIGTERM);
        }
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if leaders.iter().all(|&pid| !is_process_alive(pid)) {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    for &pid in leaders {
        if is_process_alive(pid) {
            log::warn!("Process group {} ignored SIGTERM, sending SIGKILL", pid);
        }
        // ESRCH here just means the whole group is already gone.
        if send_signal_to_group(pid, Signal::SIGKILL).is_err() && is_process_alive(pid) {
            let _ = send_signal(pid, Signal::SIGKILL);
        }
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole group, so grandchildren die too.
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Alive means present and not a zombie.
pub fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state letter.
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| !matches!(state, "Z" | "X")),
        Err(_) => true,
    }
}

/// RAII guard that tears down all registered children when dropped.
/// Held by the binary for the lifetime of a run.
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        log::debug!("ProcessGuard dropped, tearing down children");
        lock_registry(&self.registry).terminate_all(Duration::from_secs(5));
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that tear down children and exit.
/// Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            log::warn!("Received signal {}, terminating child processes", sig);
            lock_registry(&ChildRegistry::global()).terminate_all(Duration::from_secs(3));
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to isolate the child.
pub trait CommandProcessGroup {
    /// Run the child as leader of a new process group that receives
    /// SIGTERM if the installer dies.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;

        self.process_group(0);
        // SAFETY: prctl is async-signal-safe and touches no shared state.
        unsafe {
            self.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

//! OS process helpers: liveness checks and signals.

use std::io;

/// Signals the supervisor sends to managed processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Ask the process to finish its current task and exit
    Terminate,
    /// Force termination
    Kill,
}

/// Whether `pid` refers to a running process
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        // kill(pid, 0) performs the permission and existence checks without sending anything
        let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
        result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        // No portable liveness check; assume alive so registrations are never stolen
        true
    }
}

/// Deliver `signal` to `pid`
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    if pid == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "refusing to signal pid 0"));
    }
    deliver(pid as i64, signal)
}

/// Deliver `signal` to every member of process group `pgid`, including
/// grandchildren whose parent has already exited
pub fn signal_group(pgid: u32, signal: Signal) -> io::Result<()> {
    if pgid <= 1 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal process group {pgid}"),
        ));
    }
    deliver(-(pgid as i64), signal)
}

/// Whether any process is left in group `pgid`
pub fn group_alive(pgid: u32) -> bool {
    if pgid <= 1 {
        return false;
    }

    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(-(pgid as libc::pid_t), 0) };
        result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        false
    }
}

/// `pid` itself when it leads its own process group, so the whole group can be
/// signalled without touching unrelated processes
pub fn own_group(pid: u32) -> Option<u32> {
    if pid == 0 {
        return None;
    }

    #[cfg(unix)]
    {
        let pgid = unsafe { libc::getpgid(pid as libc::pid_t) };
        (pgid > 0 && pgid as u32 == pid).then_some(pid)
    }

    #[cfg(not(unix))]
    {
        None
    }
}

fn deliver(target: i64, signal: Signal) -> io::Result<()> {
    #[cfg(unix)]
    {
        let signo = match signal {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        if unsafe { libc::kill(target as libc::pid_t, signo) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = (target, signal);
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process signals are only supported on unix",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }

    /// Gone or a zombie waiting for its new parent to reap it
    #[cfg(target_os = "linux")]
    fn exited(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_group_kill_reaches_grandchildren() {
        use std::io::{BufRead, BufReader};
        use std::os::unix::process::CommandExt;

        let mut leader = std::process::Command::new("sh")
            .args(["-c", "sleep 30 & echo $!; wait"])
            .stdout(std::process::Stdio::piped())
            .process_group(0)
            .spawn()
            .unwrap();
        let pgid = leader.id();
        let mut line = String::new();
        BufReader::new(leader.stdout.take().unwrap())
            .read_line(&mut line)
            .unwrap();
        let grandchild: u32 = line.trim().parse().unwrap();

        assert_eq!(own_group(pgid), Some(pgid));
        assert!(group_alive(pgid));
        assert!(!exited(grandchild));

        signal_group(pgid, Signal::Kill).unwrap();
        leader.wait().unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !exited(grandchild) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(exited(grandchild));
    }

    #[test]
    fn test_group_helpers_refuse_shared_groups() {
        assert!(signal_group(0, Signal::Kill).is_err());
        assert!(signal_group(1, Signal::Kill).is_err());
        assert!(!group_alive(0));
        assert_eq!(own_group(0), None);
    }

    #[test]
    fn test_reaped_child_is_dead() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_alive(pid));
    }
}

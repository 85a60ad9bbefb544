use std::fmt;

use thiserror::Error;
use tracing::debug;

use crate::config::AttachOptions;
use crate::handle::ProcessHandle;
use crate::runtime::{self, Runtime};

/// Identifier of a running OS process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(u32);

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl From<ProcessId> for u32 {
    fn from(pid: ProcessId) -> Self {
        pid.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum AttachError {
    #[error("process not found with criteria {0}")]
    NotFound(String),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(&'static str),
    #[error("permission denied for process {pid}: {source}")]
    PermissionDenied {
        pid: ProcessId,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to enumerate modules of process {pid}: {source}")]
    Enumeration {
        pid: ProcessId,
        #[source]
        source: std::io::Error,
    },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttachError {
    /// Classifies an I/O failure that happened while inspecting `pid`.
    pub(crate) fn from_io(pid: ProcessId, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(pid.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { pid, source },
            _ => Self::Enumeration { pid, source },
        }
    }
}

/// What to attach to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Id(ProcessId),
    /// Exact executable name, e.g. `game.exe` or `bash`.
    Name(String),
}

impl From<ProcessId> for Target {
    fn from(pid: ProcessId) -> Self {
        Self::Id(pid)
    }
}

impl From<u32> for Target {
    fn from(pid: u32) -> Self {
        Self::Id(ProcessId(pid))
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(pid) => write!(f, "pid {pid}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

#[cfg(not(windows))]
mod discovery {
    use std::path::Path;

    use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

    use super::{AttachError, ProcessId};

    pub fn find_process_id(name: &str) -> Result<ProcessId, AttachError> {
        let mut sys = System::new();
        sys.refresh_processes();

        let process = sys
            .processes()
            .values()
            .filter(|process| executable_name(process.exe(), process.name()) == name)
            .min_by_key(|process| process.pid().as_u32());

        process
            .map(|process| ProcessId::from(process.pid().as_u32()))
            .ok_or_else(|| AttachError::NotFound(name.to_string()))
    }

    /// The file name of the executable. The kernel's process name is cut to
    /// 15 bytes on Linux, so it is only used when there is no executable path
    /// to read, as for kernel threads or processes owned by other users.
    pub(super) fn executable_name<'a>(exe: &'a Path, process_name: &'a str) -> &'a str {
        exe.file_name()
            .and_then(|file_name| file_name.to_str())
            .unwrap_or(process_name)
    }

    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    pub fn process_exists(pid: ProcessId) -> bool {
        let mut sys = System::new();
        sys.refresh_process(Pid::from_u32(u32::from(pid)))
    }
}

#[cfg(windows)]
mod discovery {
    use std::io;
    use std::mem;

    use winapi::shared::minwindef::{DWORD, FALSE};
    use winapi::um::tlhelp32::{
        CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W,
        TH32CS_SNAPPROCESS,
    };

    use super::{AttachError, ProcessId};
    use crate::memory::channel::OwnedHandle;

    pub fn find_process_id(name: &str) -> Result<ProcessId, AttachError> {
        let raw = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        // closed on every return path when `snapshot` drops
        let snapshot =
            OwnedHandle::new(raw).ok_or_else(|| AttachError::Io(io::Error::last_os_error()))?;

        let mut entry: PROCESSENTRY32W = unsafe { mem::zeroed() };
        entry.dwSize = mem::size_of::<PROCESSENTRY32W>() as DWORD;

        let mut more = unsafe { Process32FirstW(snapshot.raw(), &mut entry) } != FALSE;
        while more {
            let len = entry
                .szExeFile
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(entry.szExeFile.len());

            if String::from_utf16_lossy(&entry.szExeFile[..len]) == name {
                return Ok(ProcessId::from(entry.th32ProcessID));
            }

            more = unsafe { Process32NextW(snapshot.raw(), &mut entry) } != FALSE;
        }

        Err(AttachError::NotFound(name.to_string()))
    }
}

pub use discovery::find_process_id;

/// Resolves targets into [`ProcessHandle`]s.
#[derive(Debug, Clone, Copy)]
pub struct Attacher {
    options: AttachOptions,
    runtime: &'static Runtime,
}

impl Attacher {
    pub fn new() -> Result<Self, AttachError> {
        Self::with_options(AttachOptions::default())
    }

    /// Fails with [`AttachError::UnsupportedPlatform`] on anything other than
    /// Linux or Windows.
    pub fn with_options(options: AttachOptions) -> Result<Self, AttachError> {
        let runtime = runtime::init()?;
        Ok(Self { options, runtime })
    }

    pub fn options(&self) -> AttachOptions {
        self.options
    }

    pub fn runtime(&self) -> &'static Runtime {
        self.runtime
    }

    pub fn attach(&self, target: impl Into<Target>) -> Result<ProcessHandle, AttachError> {
        let target = target.into();
        debug!(%target, "attaching");

        let pid = match target {
            Target::Id(pid) => pid,
            Target::Name(name) => find_process_id(&name)?,
        };

        self.attach_pid(pid)
    }

    #[cfg(target_os = "linux")]
    fn attach_pid(&self, pid: ProcessId) -> Result<ProcessHandle, AttachError> {
        use crate::memory::channel::LinuxChannel;

        if !discovery::process_exists(pid) {
            return Err(AttachError::NotFound(pid.to_string()));
        }

        let channel = LinuxChannel::new(pid, self.options.transfer, self.runtime);
        ProcessHandle::new(pid, Box::new(channel))
    }

    #[cfg(windows)]
    fn attach_pid(&self, pid: ProcessId) -> Result<ProcessHandle, AttachError> {
        use crate::memory::channel::WindowsChannel;

        // dropping the channel on a failed module listing closes the handle
        let channel = WindowsChannel::open(pid)?;
        ProcessHandle::new(pid, Box::new(channel))
    }

    #[cfg(not(any(target_os = "linux", windows)))]
    fn attach_pid(&self, _pid: ProcessId) -> Result<ProcessHandle, AttachError> {
        Err(AttachError::UnsupportedPlatform(self.runtime.os()))
    }
}

/// Attaches to a process by id or exact executable name with default options.
pub fn attach(target: impl Into<Target>) -> Result<ProcessHandle, AttachError> {
    Attacher::new()?.attach(target)
}

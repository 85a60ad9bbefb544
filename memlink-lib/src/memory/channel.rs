use super::MemoryAccessError;
use crate::process::AttachError;
use crate::region::RegionDirectory;

const PROBE_CHUNK: usize = 4096;

/// Moves bytes between this process and one target process.
///
/// One implementation exists per supported platform. Channels keep no
/// per-call state, so a single channel can be used from many threads at
/// once.
pub trait MemoryChannel: Send + Sync {
    /// Copies `buffer.len()` bytes from `address` in the target into `buffer`.
    ///
    /// Anything short of a full transfer is an error.
    fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError>;

    /// Copies all of `buffer` to `address` in the target.
    fn write(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError>;

    /// Probes by reading the whole range and discarding the bytes.
    ///
    /// The range is read a page at a time through a fixed scratch buffer, so
    /// any `size` yields an answer rather than an allocation failure.
    fn can_read(&self, address: u64, size: usize) -> bool {
        let Some(size) = u64::try_from(size).ok() else {
            return false;
        };
        if address.checked_add(size).is_none() {
            return false;
        }

        let mut scratch = [0u8; PROBE_CHUNK];
        let mut offset = 0;
        while offset < size {
            let len = (size - offset).min(PROBE_CHUNK as u64) as usize;
            if self.read(address + offset, &mut scratch[..len]).is_err() {
                return false;
            }
            offset += len as u64;
        }

        true
    }

    /// Snapshots the executable modules currently loaded in the target.
    fn modules(&self) -> Result<RegionDirectory, AttachError>;
}

#[cfg(target_os = "linux")]
mod platform {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::FileExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    use libc::{c_void, iovec, pid_t, process_vm_readv, process_vm_writev};
    use once_cell::sync::OnceCell;
    use tracing::{debug, trace, warn};

    use super::MemoryChannel;
    use crate::config::TransferMode;
    use crate::memory::{check_transferred, remote_address, MemoryAccessError};
    use crate::process::{AttachError, ProcessId};
    use crate::region::RegionDirectory;
    use crate::runtime::Runtime;

    /// Linux channel built on `process_vm_readv`/`process_vm_writev`, with
    /// `/proc/<pid>/mem` as the alternative transport.
    #[derive(Debug)]
    pub struct LinuxChannel {
        pid: ProcessId,
        mode: TransferMode,
        vectored_unavailable: AtomicBool,
        mem: OnceCell<File>,
    }

    impl LinuxChannel {
        pub fn new(pid: ProcessId, mode: TransferMode, runtime: &Runtime) -> Self {
            let vectored_unavailable = mode == TransferMode::Auto && !runtime.vectored_io();
            if vectored_unavailable {
                debug!(%pid, "vectored transfers unavailable, using /proc/{pid}/mem");
            }

            Self {
                pid,
                mode,
                vectored_unavailable: AtomicBool::new(vectored_unavailable),
                mem: OnceCell::new(),
            }
        }

        pub fn mode(&self) -> TransferMode {
            self.mode
        }

        fn raw_pid(&self) -> pid_t {
            u32::from(self.pid) as pid_t
        }

        fn readv(&self, remote: usize, buffer: &mut [u8]) -> io::Result<usize> {
            let local_iov = iovec {
                iov_base: buffer.as_mut_ptr() as *mut c_void,
                iov_len: buffer.len(),
            };

            let remote_iov = iovec {
                iov_base: remote as *mut c_void,
                iov_len: buffer.len(),
            };

            let result =
                unsafe { process_vm_readv(self.raw_pid(), &local_iov, 1, &remote_iov, 1, 0) };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(result as usize)
        }

        fn writev(&self, remote: usize, buffer: &[u8]) -> io::Result<usize> {
            // the kernel only reads through the local iovec for writes
            let local_iov = iovec {
                iov_base: buffer.as_ptr() as *mut c_void,
                iov_len: buffer.len(),
            };

            let remote_iov = iovec {
                iov_base: remote as *mut c_void,
                iov_len: buffer.len(),
            };

            let result =
                unsafe { process_vm_writev(self.raw_pid(), &local_iov, 1, &remote_iov, 1, 0) };
            if result == -1 {
                return Err(io::Error::last_os_error());
            }

            Ok(result as usize)
        }

        fn mem_file(&self) -> io::Result<&File> {
            self.mem.get_or_try_init(|| {
                let path = format!("/proc/{}/mem", self.pid);
                match OpenOptions::new().read(true).write(true).open(&path) {
                    Ok(file) => Ok(file),
                    Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                        debug!(pid = %self.pid, "{path} is not writable, opening read-only");
                        File::open(&path)
                    }
                    Err(e) => Err(e),
                }
            })
        }

        fn use_vectored(&self) -> bool {
            match self.mode {
                TransferMode::Vectored => true,
                TransferMode::ProcMem => false,
                TransferMode::Auto => !self.vectored_unavailable.load(Ordering::Relaxed),
            }
        }

        /// Only `Auto` switches transports, and only when the syscall itself
        /// is refused rather than the address. `ENOSYS` switches for good;
        /// `EPERM` may be a seccomp filter or plain ptrace denial, so it only
        /// reroutes the current transfer.
        fn should_fall_back(&self, error: &io::Error) -> bool {
            if self.mode != TransferMode::Auto {
                return false;
            }

            match error.raw_os_error() {
                Some(libc::ENOSYS) => {
                    warn!(
                        pid = %self.pid,
                        %error,
                        "vectored transfers unsupported, switching to /proc/{}/mem",
                        self.pid
                    );
                    self.vectored_unavailable.store(true, Ordering::Relaxed);
                    true
                }
                Some(libc::EPERM) => {
                    debug!(
                        pid = %self.pid,
                        %error,
                        "vectored transfer refused, trying /proc/{}/mem",
                        self.pid
                    );
                    true
                }
                _ => false,
            }
        }

        /// Repeats a refused transfer through `/proc/<pid>/mem`. If that fails
        /// too after an `EPERM`, the original error is the one reported.
        fn fall_back(
            &self,
            refused: io::Error,
            transfer: impl FnOnce(&File) -> io::Result<usize>,
        ) -> io::Result<usize> {
            match self.mem_file().and_then(transfer) {
                Err(error) if refused.raw_os_error() == Some(libc::EPERM) => {
                    debug!(pid = %self.pid, %error, "/proc/{}/mem failed as well", self.pid);
                    Err(refused)
                }
                other => other,
            }
        }
    }

    impl MemoryChannel for LinuxChannel {
        fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError> {
            let size = buffer.len();
            if size == 0 {
                return Ok(());
            }

            let remote = remote_address(address)?;
            let result = if self.use_vectored() {
                match self.readv(remote, buffer) {
                    Err(e) if self.should_fall_back(&e) => {
                        self.fall_back(e, |mem| mem.read_at(buffer, address))
                    }
                    other => other,
                }
            } else {
                self.mem_file().and_then(|mem| mem.read_at(buffer, address))
            };

            let transferred = result.map_err(|source| {
                trace!(pid = %self.pid, address, size, %source, "read failed");
                MemoryAccessError::Transfer {
                    address,
                    size,
                    source,
                }
            })?;

            check_transferred(address, size, transferred)
        }

        fn write(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError> {
            let size = buffer.len();
            if size == 0 {
                return Ok(());
            }

            let remote = remote_address(address)?;
            let result = if self.use_vectored() {
                match self.writev(remote, buffer) {
                    Err(e) if self.should_fall_back(&e) => {
                        self.fall_back(e, |mem| mem.write_at(buffer, address))
                    }
                    other => other,
                }
            } else {
                self.mem_file().and_then(|mem| mem.write_at(buffer, address))
            };

            let transferred = result.map_err(|source| {
                trace!(pid = %self.pid, address, size, %source, "write failed");
                MemoryAccessError::Transfer {
                    address,
                    size,
                    source,
                }
            })?;

            check_transferred(address, size, transferred)
        }

        fn modules(&self) -> Result<RegionDirectory, AttachError> {
            let maps = std::fs::read_to_string(format!("/proc/{}/maps", self.pid))
                .map_err(|source| AttachError::from_io(self.pid, source))?;

            let directory = RegionDirectory::parse_maps(&maps);
            debug!(pid = %self.pid, modules = directory.len(), "parsed memory map");

            Ok(directory)
        }
    }

    /// Tries a one byte vectored read of our own memory.
    pub(crate) fn probe_vectored_io() -> bool {
        let source = [0x5au8];
        let mut target = [0u8];

        let local_iov = iovec {
            iov_base: target.as_mut_ptr() as *mut c_void,
            iov_len: 1,
        };

        let remote_iov = iovec {
            iov_base: source.as_ptr() as *mut c_void,
            iov_len: 1,
        };

        let result = unsafe { process_vm_readv(libc::getpid(), &local_iov, 1, &remote_iov, 1, 0) };

        result == 1 && target == source
    }

}

#[cfg(windows)]
mod platform {
    use std::io;
    use std::mem;
    use std::ptr;

    use tracing::{debug, trace};
    use winapi::shared::basetsd::SIZE_T;
    use winapi::shared::minwindef::{DWORD, FALSE, HMODULE, LPCVOID, LPVOID, MAX_PATH};
    use winapi::shared::winerror::{ERROR_ACCESS_DENIED, ERROR_INVALID_PARAMETER};
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::memoryapi::{ReadProcessMemory, VirtualQueryEx, WriteProcessMemory};
    use winapi::um::processthreadsapi::OpenProcess;
    use winapi::um::psapi::{
        EnumProcessModulesEx, GetModuleBaseNameW, GetModuleInformation, LIST_MODULES_ALL,
        MODULEINFO,
    };
    use winapi::um::winnt::{
        HANDLE, MEMORY_BASIC_INFORMATION, PAGE_EXECUTE, PAGE_EXECUTE_READ,
        PAGE_EXECUTE_READWRITE, PAGE_EXECUTE_WRITECOPY, PAGE_READONLY, PAGE_READWRITE,
        PAGE_WRITECOPY, PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ,
        PROCESS_VM_WRITE,
    };

    use super::MemoryChannel;
    use crate::memory::{check_transferred, remote_address, MemoryAccessError};
    use crate::process::{AttachError, ProcessId};
    use crate::region::{MemoryRegion, RegionDirectory};

    /// Query, read and write only.
    const ACCESS_RIGHTS: DWORD =
        PROCESS_QUERY_INFORMATION | PROCESS_VM_READ | PROCESS_VM_WRITE | PROCESS_VM_OPERATION;

    /// A kernel handle closed exactly once, on drop.
    #[derive(Debug)]
    pub(crate) struct OwnedHandle(HANDLE);

    // kernel handles are process-wide and usable from any thread
    unsafe impl Send for OwnedHandle {}
    unsafe impl Sync for OwnedHandle {}

    impl OwnedHandle {
        pub(crate) fn new(raw: HANDLE) -> Option<Self> {
            if raw.is_null() || raw == INVALID_HANDLE_VALUE {
                return None;
            }

            Some(Self(raw))
        }

        pub(crate) fn raw(&self) -> HANDLE {
            self.0
        }
    }

    impl Drop for OwnedHandle {
        fn drop(&mut self) {
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    /// Windows channel built on `ReadProcessMemory`/`WriteProcessMemory`.
    #[derive(Debug)]
    pub struct WindowsChannel {
        pid: ProcessId,
        handle: OwnedHandle,
    }

    impl WindowsChannel {
        pub fn open(pid: ProcessId) -> Result<Self, AttachError> {
            let raw = unsafe { OpenProcess(ACCESS_RIGHTS, FALSE, u32::from(pid)) };
            let handle = OwnedHandle::new(raw).ok_or_else(|| {
                let source = io::Error::last_os_error();
                match source.raw_os_error().map(|code| code as DWORD) {
                    Some(ERROR_INVALID_PARAMETER) => AttachError::NotFound(pid.to_string()),
                    Some(ERROR_ACCESS_DENIED) => AttachError::PermissionDenied { pid, source },
                    _ => AttachError::Io(source),
                }
            })?;

            debug!(%pid, "opened process handle");
            Ok(Self { pid, handle })
        }

        fn describe_module(&self, module: HMODULE) -> Option<MemoryRegion> {
            let mut name = [0u16; MAX_PATH];
            let len = unsafe {
                GetModuleBaseNameW(
                    self.handle.raw(),
                    module,
                    name.as_mut_ptr(),
                    name.len() as DWORD,
                )
            };
            if len == 0 {
                return None;
            }

            let mut info: MODULEINFO = unsafe { mem::zeroed() };
            let result = unsafe {
                GetModuleInformation(
                    self.handle.raw(),
                    module,
                    &mut info,
                    mem::size_of::<MODULEINFO>() as DWORD,
                )
            };
            if result == 0 {
                return None;
            }

            let base = info.lpBaseOfDll as u64;
            MemoryRegion::new(
                String::from_utf16_lossy(&name[..len as usize]),
                base,
                u64::from(info.SizeOfImage),
                self.protection(base),
            )
        }

        fn protection(&self, address: u64) -> &'static str {
            let mut mbi: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
            let result = unsafe {
                VirtualQueryEx(
                    self.handle.raw(),
                    address as LPCVOID,
                    &mut mbi,
                    mem::size_of::<MEMORY_BASIC_INFORMATION>() as SIZE_T,
                )
            };
            if result == 0 {
                return "----";
            }

            protection_flags(mbi.Protect)
        }
    }

    fn protection_flags(protect: DWORD) -> &'static str {
        match protect & 0xff {
            PAGE_EXECUTE => "--x-",
            PAGE_EXECUTE_READ => "r-x-",
            PAGE_EXECUTE_READWRITE => "rwx-",
            PAGE_EXECUTE_WRITECOPY => "rwxp",
            PAGE_READONLY => "r---",
            PAGE_READWRITE => "rw--",
            PAGE_WRITECOPY => "rw-p",
            _ => "----",
        }
    }

    impl MemoryChannel for WindowsChannel {
        fn read(&self, address: u64, buffer: &mut [u8]) -> Result<(), MemoryAccessError> {
            let size = buffer.len();
            if size == 0 {
                return Ok(());
            }

            let remote = remote_address(address)?;
            let mut transferred: SIZE_T = 0;
            let result = unsafe {
                ReadProcessMemory(
                    self.handle.raw(),
                    remote as LPCVOID,
                    buffer.as_mut_ptr() as LPVOID,
                    size,
                    &mut transferred,
                )
            };
            if result == 0 {
                let source = io::Error::last_os_error();
                trace!(pid = %self.pid, address, size, %source, "read failed");
                return Err(MemoryAccessError::Transfer {
                    address,
                    size,
                    source,
                });
            }

            check_transferred(address, size, transferred)
        }

        fn write(&self, address: u64, buffer: &[u8]) -> Result<(), MemoryAccessError> {
            let size = buffer.len();
            if size == 0 {
                return Ok(());
            }

            let remote = remote_address(address)?;
            let mut transferred: SIZE_T = 0;
            let result = unsafe {
                WriteProcessMemory(
                    self.handle.raw(),
                    remote as LPVOID,
                    buffer.as_ptr() as LPCVOID,
                    size,
                    &mut transferred,
                )
            };
            if result == 0 {
                let source = io::Error::last_os_error();
                trace!(pid = %self.pid, address, size, %source, "write failed");
                return Err(MemoryAccessError::Transfer {
                    address,
                    size,
                    source,
                });
            }

            check_transferred(address, size, transferred)
        }

        fn modules(&self) -> Result<RegionDirectory, AttachError> {
            let mut modules: Vec<HMODULE> = vec![ptr::null_mut(); 1024];

            loop {
                let mut needed: DWORD = 0;
                let result = unsafe {
                    EnumProcessModulesEx(
                        self.handle.raw(),
                        modules.as_mut_ptr(),
                        (modules.len() * mem::size_of::<HMODULE>()) as DWORD,
                        &mut needed,
                        LIST_MODULES_ALL,
                    )
                };
                if result == 0 {
                    return Err(AttachError::Enumeration {
                        pid: self.pid,
                        source: io::Error::last_os_error(),
                    });
                }

                let count = needed as usize / mem::size_of::<HMODULE>();
                if count <= modules.len() {
                    modules.truncate(count);
                    break;
                }

                modules.resize(count, ptr::null_mut());
            }

            let directory = RegionDirectory::from_regions(
                modules
                    .into_iter()
                    .filter(|module| !module.is_null())
                    .filter_map(|module| self.describe_module(module)),
            );
            debug!(pid = %self.pid, modules = directory.len(), "enumerated modules");

            Ok(directory)
        }
    }
}

#[cfg(target_os = "linux")]
pub use platform::LinuxChannel;
#[cfg(target_os = "linux")]
pub(crate) use platform::probe_vectored_io;

#[cfg(windows)]
pub(crate) use platform::OwnedHandle;
#[cfg(windows)]
pub use platform::WindowsChannel;

#[cfg(not(target_os = "linux"))]
pub(crate) fn probe_vectored_io() -> bool {
    false
}

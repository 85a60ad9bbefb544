//! Read and write the memory of another process.
//!
//! Attach by pid or executable name, look up loaded modules, and move typed
//! values in and out of the target's address space. Linux transfers go
//! through `process_vm_readv`/`process_vm_writev` (or `/proc/<pid>/mem`),
//! Windows transfers through `ReadProcessMemory`/`WriteProcessMemory`.
//!
//! ```no_run
//! use memlink_lib::{attach, DataSource};
//!
//! let process = attach("game.exe")?;
//! let health = process.module_address("game.exe", 0x1f4a0)?;
//! process.write_i32(health, 100)?;
//! assert_eq!(process.read_i32(health)?, 100);
//! process.close();
//! # Ok::<(), memlink_lib::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod handle;
pub mod memory;
pub mod process;
pub mod region;
pub mod runtime;

pub use config::{AttachOptions, ConfigError, TransferMode};
pub use error::{Error, Result};
pub use handle::ProcessHandle;
pub use memory::access::DataSource;
pub use memory::buffer::{NativeBuffer, NativeValue};
pub use memory::channel::MemoryChannel;
pub use memory::MemoryAccessError;
pub use process::{attach, find_process_id, AttachError, Attacher, ProcessId, Target};
pub use region::{MemoryRegion, ModuleNotFoundError, RegionDirectory};
pub use runtime::{init, Runtime};

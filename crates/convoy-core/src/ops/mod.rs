//! The operations abstraction: every side effect the system performs is
//! reached through one of these capability traits, so the orchestrator,
//! plan engine, validator and updater can be driven end-to-end against
//! in-memory variants ([`memory`]) in tests while production wires the
//! shell-backed implementations.

pub mod build;
pub mod changesets;
pub mod fs;
pub mod git;
pub mod memory;
pub mod process;
pub mod registry;

pub use build::{BuildOps, ShellBuild};
pub use changesets::{ChangesetOps, FsChangesets};
pub use fs::{FsOps, LocalFs};
pub use git::{GitOps, ShellGit};
pub use process::{ProcessOps, ShellProcess, SpawnRequest, SpawnResult};
pub use registry::{NpmRegistry, RegistryOps};

use crate::config::CommandsConfig;

/// The aggregate handed through the call tree: one value per capability
/// group. Functions bound only the groups they actually use.
pub struct Ops<C, G, F, P, R, B> {
    pub changesets: C,
    pub git: G,
    pub fs: F,
    pub process: P,
    pub registry: R,
    pub build: B,
}

/// Production wiring: disk changesets, shell git, local filesystem, shell
/// subprocesses, the npm registry, and the configured build command.
pub type ShellOps = Ops<FsChangesets, ShellGit, LocalFs, ShellProcess, NpmRegistry, ShellBuild>;

impl ShellOps {
    pub fn shell(commands: &CommandsConfig) -> Self {
        Ops {
            changesets: FsChangesets,
            git: ShellGit,
            fs: LocalFs,
            process: ShellProcess,
            registry: NpmRegistry::new(commands.install.clone()),
            build: ShellBuild::new(commands.build.clone()),
        }
    }
}

/// In-memory wiring for tests: all state is shared behind cheap clones, so
/// keep handles to the fields before handing the aggregate away.
pub type MemoryOps = Ops<
    memory::MemoryChangesets,
    memory::MemoryGit,
    memory::MemoryFs,
    memory::MemoryProcess,
    memory::MemoryRegistry,
    memory::MemoryBuild,
>;

impl MemoryOps {
    pub fn memory() -> Self {
        Ops {
            changesets: memory::MemoryChangesets::default(),
            git: memory::MemoryGit::default(),
            fs: memory::MemoryFs::default(),
            process: memory::MemoryProcess::ok(),
            registry: memory::MemoryRegistry::default(),
            build: memory::MemoryBuild::default(),
        }
    }

    /// Clone of the aggregate sharing all underlying state.
    pub fn handle(&self) -> Self {
        Ops {
            changesets: self.changesets.clone(),
            git: self.git.clone(),
            fs: self.fs.clone(),
            process: self.process.clone(),
            registry: self.registry.clone(),
            build: self.build.clone(),
        }
    }
}

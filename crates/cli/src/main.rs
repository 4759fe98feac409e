//! `stratafs` binary — CLI shell over the `stratafs-core` and
//! `stratafs-control` library crates.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use fuser::{
    AccessFlags, BsdFileFlags, FileHandle, Filesystem, INodeNo, LockOwner, MountOption, OpenFlags,
    ReadFlags, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow, WriteFlags,
};
use std::ffi::OsStr;
use std::time::SystemTime;
use tracing::{error, info};

use stratafs_control::ControlState;
use stratafs_core::config::Config;
use stratafs_core::handler::StrataHandler;

/// `fuser::Filesystem` can't be implemented directly on `Arc<StrataHandler>`
/// (neither type is local to this crate's orphan-rule purview), so this
/// thin handle forwards every callback to the shared handler — it's the
/// one copy the FUSE session owns, while the control facade keeps its own
/// clone of the same `Arc`.
struct MountedFs(Arc<StrataHandler>);

impl Filesystem for MountedFs {
    fn lookup(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEntry) {
        self.0.lookup(req, parent, name, reply)
    }

    fn getattr(&self, req: &Request, ino: INodeNo, fh: Option<FileHandle>, reply: ReplyAttr) {
        self.0.getattr(req, ino, fh, reply)
    }

    fn readlink(&self, req: &Request, ino: INodeNo, reply: ReplyData) {
        self.0.readlink(req, ino, reply)
    }

    fn mkdir(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        self.0.mkdir(req, parent, name, mode, umask, reply)
    }

    fn rmdir(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        self.0.rmdir(req, parent, name, reply)
    }

    fn unlink(&self, req: &Request, parent: INodeNo, name: &OsStr, reply: ReplyEmpty) {
        self.0.unlink(req, parent, name, reply)
    }

    fn open(&self, req: &Request, ino: INodeNo, flags: OpenFlags, reply: ReplyOpen) {
        self.0.open(req, ino, flags, reply)
    }

    #[allow(clippy::too_many_arguments)]
    fn read(
        &self,
        req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: u64,
        size: u32,
        read_flags: ReadFlags,
        flags: u32,
        lock_owner: Option<LockOwner>,
        reply: ReplyData,
    ) {
        self.0.read(req, ino, fh, offset, size, read_flags, flags, lock_owner, reply)
    }

    #[allow(clippy::too_many_arguments)]
    fn write(
        &self,
        req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        offset: i64,
        data: &[u8],
        write_flags: WriteFlags,
        flags: OpenFlags,
        lock_owner: Option<LockOwner>,
        reply: ReplyWrite,
    ) {
        self.0.write(req, ino, fh, offset, data, write_flags, flags, lock_owner, reply)
    }

    fn release(
        &self,
        req: &Request,
        ino: INodeNo,
        fh: FileHandle,
        flags: OpenFlags,
        lock_owner: Option<LockOwner>,
        flush: bool,
        reply: ReplyEmpty,
    ) {
        self.0.release(req, ino, fh, flags, lock_owner, flush, reply)
    }

    fn fsync(&self, req: &Request, ino: INodeNo, fh: FileHandle, datasync: bool, reply: ReplyEmpty) {
        self.0.fsync(req, ino, fh, datasync, reply)
    }

    fn access(&self, req: &Request, ino: INodeNo, mask: AccessFlags, reply: ReplyEmpty) {
        self.0.access(req, ino, mask, reply)
    }

    fn readdir(&self, req: &Request, ino: INodeNo, fh: FileHandle, offset: u64, reply: ReplyDirectory) {
        self.0.readdir(req, ino, fh, offset, reply)
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &self,
        req: &Request,
        ino: INodeNo,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        ctime: Option<SystemTime>,
        fh: Option<FileHandle>,
        crtime: Option<SystemTime>,
        chgtime: Option<SystemTime>,
        bkuptime: Option<SystemTime>,
        flags: Option<BsdFileFlags>,
        reply: ReplyAttr,
    ) {
        self.0.setattr(
            req, ino, mode, uid, gid, size, atime, mtime, ctime, fh, crtime, chgtime, bkuptime,
            flags, reply,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        req: &Request,
        parent: INodeNo,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        self.0.create(req, parent, name, mode, umask, flags, reply)
    }

    fn statfs(&self, req: &Request, ino: INodeNo, reply: ReplyStatfs) {
        self.0.statfs(req, ino, reply)
    }
}

#[derive(Parser)]
#[command(name = "stratafs", version, about = "Virtual organizational filesystem", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the filesystem at the given mountpoint
    Mount {
        /// Path to the TOML config file
        #[arg(long)]
        config: PathBuf,

        /// Mount point directory (must already exist)
        mountpoint: PathBuf,

        /// Run in the foreground (default backgrounds the FUSE session only;
        /// the process itself never daemonizes/forks)
        #[arg(long)]
        foreground: bool,
    },
    /// Parse and validate a config file without mounting
    Validate {
        config: PathBuf,
    },
    /// List the virtual layers a config defines
    Layers {
        config: PathBuf,
    },
    /// List the rules a config defines, in evaluation order
    Rules {
        config: PathBuf,
    },
}

fn init_logging(config: Option<&Config>) {
    let default_directive = config
        .map(|c| format!("stratafs={}", c.logging.level))
        .unwrap_or_else(|| "stratafs=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse().unwrap_or_else(|_| "stratafs=info".parse().unwrap())),
        )
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, unmounting..."),
            _ = sigterm.recv() => info!("received SIGTERM, unmounting..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, unmounting...");
    }
}

fn load_config(path: &PathBuf) -> Result<Config, ExitCode> {
    Config::load(path).map_err(|e| {
        init_logging(None);
        error!(config = %path.display(), error = %e, "config load/validation failed");
        ExitCode::from(1)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            let config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };
            init_logging(Some(&config));
            info!(version = config.version.as_str(), sources = config.sources.len(), "config is valid");
            ExitCode::SUCCESS
        }
        Commands::Layers { config } => {
            let config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };
            for layer in &config.virtual_layers {
                println!("{}\t{}", layer.name(), if layer.enabled() { "enabled" } else { "disabled" });
            }
            ExitCode::SUCCESS
        }
        Commands::Rules { config } => {
            let config = match load_config(&config) {
                Ok(c) => c,
                Err(code) => return code,
            };
            for rule in &config.rules {
                println!(
                    "{}\t{:?}\t{}",
                    rule.name.as_deref().unwrap_or("<unnamed>"),
                    rule.action,
                    if rule.enabled { "enabled" } else { "disabled" }
                );
            }
            ExitCode::SUCCESS
        }
        Commands::Mount { config: config_path, mountpoint, foreground } => {
            let config = match load_config(&config_path) {
                Ok(c) => c,
                Err(code) => return code,
            };
            init_logging(Some(&config));

            let assembly = match stratafs_core::wiring::build(&config) {
                Ok(a) => a,
                Err(e) => {
                    error!(error = %e, "failed to assemble filesystem from config");
                    return ExitCode::from(1);
                }
            };
            let handler = Arc::new(assembly.handler);

            let mut options = vec![
                MountOption::FSName("stratafs".to_string()),
                if config.readonly { MountOption::RO } else { MountOption::RW },
            ];
            if config.allow_other {
                options.push(MountOption::AllowOther);
            }
            if !foreground {
                options.push(MountOption::AutoUnmount);
            }

            let session = match fuser::spawn_mount2(MountedFs(Arc::clone(&handler)), &mountpoint, &options) {
                Ok(s) => s,
                Err(e) => {
                    error!(mountpoint = %mountpoint.display(), error = %e, "mount failed");
                    return ExitCode::from(1);
                }
            };
            info!(mountpoint = %mountpoint.display(), "mounted");

            let mut exit_code = ExitCode::from(130);

            if config.metrics.enabled {
                let control_state = ControlState::new(handler, config.clone(), Some(config_path));
                let addr = format!("127.0.0.1:{}", config.metrics.port);
                match tokio::net::TcpListener::bind(&addr).await {
                    Ok(listener) => {
                        info!(addr = addr.as_str(), "control facade listening");
                        let app = stratafs_control::router(control_state);
                        tokio::select! {
                            result = axum::serve(listener, app) => {
                                if let Err(e) = result {
                                    error!(error = %e, "control facade exited");
                                    exit_code = ExitCode::from(1);
                                }
                            }
                            _ = shutdown_signal() => {}
                        }
                    }
                    Err(e) => {
                        error!(addr = addr.as_str(), error = %e, "could not bind control facade");
                        shutdown_signal().await;
                    }
                }
            } else {
                shutdown_signal().await;
            }

            drop(session);
            info!(mountpoint = %mountpoint.display(), "unmounted");
            exit_code
        }
    }
}

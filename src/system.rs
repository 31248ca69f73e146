//! Pseudo filesystems that must exist before the boot script runs

use anyhow::{Context, Result};
use log::{debug, info};
use rustix::fs::Mode;
use rustix::io::Errno;
use rustix::mount::{mount, MountFlags};

struct KernelMount {
    source: &'static str,
    target: &'static str,
    fstype: &'static str,
    flags: MountFlags,
    data: &'static str,
}

const KERNEL_MOUNTS: &[KernelMount] = &[
    KernelMount {
        source: "proc",
        target: "/proc",
        fstype: "proc",
        flags: MountFlags::empty(),
        data: "",
    },
    KernelMount {
        source: "sysfs",
        target: "/sys",
        fstype: "sysfs",
        flags: MountFlags::empty(),
        data: "",
    },
    KernelMount {
        source: "devtmpfs",
        target: "/dev",
        fstype: "devtmpfs",
        flags: MountFlags::NOSUID,
        data: "mode=0755",
    },
    KernelMount {
        source: "tmpfs",
        target: "/run",
        fstype: "tmpfs",
        flags: MountFlags::NOSUID.union(MountFlags::NODEV),
        data: "mode=0755",
    },
];

fn ensure_dir(path: &str) -> Result<()> {
    match rustix::fs::mkdir(path, Mode::from_raw_mode(0o755)) {
        Ok(()) | Err(Errno::EXIST) => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to create {}", path)),
    }
}

/// Mount /proc, /sys, /dev and /run. An already mounted target is left alone.
pub fn mount_kernel_filesystems() -> Result<()> {
    for m in KERNEL_MOUNTS {
        ensure_dir(m.target)?;

        match mount(m.source, m.target, m.fstype, m.flags, m.data) {
            Ok(()) => info!("mounted {}", m.target),
            Err(Errno::BUSY) => debug!("{} already mounted", m.target),
            Err(e) => return Err(e).with_context(|| format!("Failed to mount {}", m.target)),
        }
    }

    // Builtins resolve block devices under /dev/block.
    ensure_dir(crate::kernel::DEV_BLOCK)
}

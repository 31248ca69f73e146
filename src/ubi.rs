//! UBI: attaching raw flash partitions and mounting their volumes

use std::collections::HashMap;
use std::sync::Mutex;

use log::{debug, error, info, warn};

use crate::context::Context;
use crate::error::{BuiltinError, Result};
use crate::kernel::{Kernel, MountRequest};
use crate::mount::{mount_device, mtd_lookup, MountOptions, Source};

pub const UBI_CTRL: &str = "/dev/ubi_ctrl";
pub const UBIFS: &str = "ubifs";

/// `struct ubi_attach_req` from the kernel UBI user API.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UbiAttachReq {
    pub ubi_num: i32,
    pub mtd_num: i32,
    pub vid_hdr_offset: i32,
    pub padding: [u8; 12],
}

/// Which UBI device number a first attach asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeNumber {
    Fixed(u32),
    /// Next number from a counter that starts at 1.
    Dynamic,
}

/// Attach MTD partition `mtd_num` as UBI device `ubi_num` through `control`.
///
/// Returns the device number the kernel assigned. Leaves no state behind.
pub fn attach(kernel: &dyn Kernel, control: &str, ubi_num: u32, mtd_num: u32) -> Result<u32> {
    // Negative numbers mean auto-assign to the kernel.
    let out_of_range = |what: &str, n: u32| BuiltinError::InvalidArgument(format!("{} {}", what, n));
    let mut req = UbiAttachReq {
        ubi_num: i32::try_from(ubi_num).map_err(|_| out_of_range("ubi number", ubi_num))?,
        mtd_num: i32::try_from(mtd_num).map_err(|_| out_of_range("mtd number", mtd_num))?,
        vid_hdr_offset: 0,
        ..Default::default()
    };

    kernel.ubi_attach(control, &mut req).map_err(|source| {
        error!("attaching mtd{} to ubi{} via {} failed: {}", mtd_num, ubi_num, control, source);
        BuiltinError::UbiAttach {
            mtd: mtd_num,
            ubi: ubi_num,
            source,
        }
    })?;

    Ok(u32::try_from(req.ubi_num).unwrap_or(ubi_num))
}

#[derive(Debug)]
struct Partitions {
    volumes: HashMap<u32, u32>,
    next_dynamic: u32,
}

/// Partition to UBI device map, kept for the life of the process.
///
/// Entries are never removed. The lock is held across the attach request so
/// async mounts cannot race for the same partition or counter value.
#[derive(Debug)]
pub struct UbiTable {
    inner: Mutex<Partitions>,
}

impl Default for UbiTable {
    fn default() -> Self {
        UbiTable {
            inner: Mutex::new(Partitions {
                volumes: HashMap::new(),
                next_dynamic: 1,
            }),
        }
    }
}

impl UbiTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn volume_for(&self, mtd: u32) -> Result<Option<u32>> {
        let parts = self
            .inner
            .lock()
            .map_err(|_| BuiltinError::LockPoisoned("ubi partition table"))?;
        Ok(parts.volumes.get(&mtd).copied())
    }

    /// Attach `mtd` unless it already is, and return its UBI device number.
    pub fn ensure_attached(
        &self,
        kernel: &dyn Kernel,
        control: &str,
        mtd: u32,
        requested: VolumeNumber,
    ) -> Result<u32> {
        let mut parts = self
            .inner
            .lock()
            .map_err(|_| BuiltinError::LockPoisoned("ubi partition table"))?;

        if let Some(&ubi) = parts.volumes.get(&mtd) {
            if let VolumeNumber::Fixed(n) = requested {
                if n != ubi {
                    warn!("mtd{} already attached as ubi{}, ignoring ubi{}", mtd, ubi, n);
                }
            }
            debug!("mtd{} already attached as ubi{}", mtd, ubi);
            return Ok(ubi);
        }

        let wanted = match requested {
            VolumeNumber::Fixed(n) => n,
            VolumeNumber::Dynamic => parts.next_dynamic,
        };
        let assigned = attach(kernel, control, wanted, mtd)?;
        if requested == VolumeNumber::Dynamic {
            parts.next_dynamic = assigned + 1;
        }
        parts.volumes.insert(mtd, assigned);
        info!("attached mtd{} as ubi{}", mtd, assigned);
        Ok(assigned)
    }
}

/// Mount UBI volume `vol_name` of `source` on `target` as ubifs.
///
/// For `mtd@name` sources the partition is attached first, or on remount
/// looked up in the table. Other sources are handed to mount(2) unchanged.
pub fn mount_ubifs(
    ctx: &Context,
    volume: VolumeNumber,
    vol_name: &str,
    source: &str,
    target: &str,
    opts: &MountOptions,
) -> Result<()> {
    let device = match Source::parse(source) {
        Source::Mtd(name) => {
            let mtd = mtd_lookup(ctx, name)?;
            let ubi = if opts.flags.remount {
                ctx.ubi
                    .volume_for(mtd)?
                    .ok_or(BuiltinError::UbiNotAttached(mtd))?
            } else {
                ctx.ubi
                    .ensure_attached(ctx.kernel.as_ref(), &ctx.ubi_ctrl, mtd, volume)?
            };
            format!("ubi{}:{}", ubi, vol_name)
        }
        _ => source.to_string(),
    };

    mount_device(
        ctx,
        &MountRequest {
            source: &device,
            target,
            fs_type: UBIFS,
            flags: opts.flags,
            data: opts.options.as_deref(),
        },
    )
}

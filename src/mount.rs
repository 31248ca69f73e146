//! Mount source resolution: raw devices, `mtd@name` and `loop@file`

use std::fs::OpenOptions;
use std::io;

use log::{debug, error, info, warn};
use rustix::mount::MountFlags;

use crate::context::Context;
use crate::crypto::{self, DataMount};
use crate::devices::COMMAND_RETRY_TIMEOUT;
use crate::error::{BuiltinError, IoContext, Result};
use crate::kernel::{MountRequest, DEV_BLOCK};

/// The only mount point that gets the encrypted-data treatment.
pub const DATA_MNT_POINT: &str = "/data";

const MS_REMOUNT: u32 = 0x20;

struct NamedFlag {
    name: &'static str,
    flags: MountFlags,
    remount: bool,
}

const MOUNT_FLAGS: &[NamedFlag] = &[
    NamedFlag { name: "noatime", flags: MountFlags::NOATIME, remount: false },
    NamedFlag { name: "nosuid", flags: MountFlags::NOSUID, remount: false },
    NamedFlag { name: "nodev", flags: MountFlags::NODEV, remount: false },
    NamedFlag { name: "nodiratime", flags: MountFlags::NODIRATIME, remount: false },
    NamedFlag { name: "ro", flags: MountFlags::RDONLY, remount: false },
    NamedFlag { name: "rw", flags: MountFlags::empty(), remount: false },
    NamedFlag { name: "remount", flags: MountFlags::empty(), remount: true },
    NamedFlag { name: "defaults", flags: MountFlags::empty(), remount: false },
];

/// Mount flags plus the remount bit, which rustix keeps out of `MountFlags`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSet {
    pub flags: MountFlags,
    pub remount: bool,
}

impl Default for FlagSet {
    fn default() -> Self {
        FlagSet {
            flags: MountFlags::empty(),
            remount: false,
        }
    }
}

impl FlagSet {
    pub fn read_only(&self) -> bool {
        self.flags.contains(MountFlags::RDONLY)
    }

    /// The `MS_*` bitset as mount(2) sees it.
    pub fn bits(&self) -> u32 {
        let remount = if self.remount { MS_REMOUNT } else { 0 };
        self.flags.bits() | remount
    }
}

/// Everything after `<path>` on a mount line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub flags: FlagSet,
    /// Free-form data string: the last token, when it is not a flag name.
    pub options: Option<String>,
    /// Poll for the device node before mounting.
    pub wait: bool,
}

/// Parse trailing mount tokens.
///
/// Known flag names accumulate. An unknown token becomes the option string
/// only when it is the final token; unknown tokens elsewhere are dropped.
/// `wait` is only recognized when `allow_wait` is set.
pub fn parse_flags(tokens: &[String], allow_wait: bool) -> MountOptions {
    let mut parsed = MountOptions::default();

    for (i, token) in tokens.iter().enumerate() {
        if let Some(named) = MOUNT_FLAGS.iter().find(|f| f.name == token.as_str()) {
            parsed.flags.flags |= named.flags;
            parsed.flags.remount |= named.remount;
        } else if allow_wait && token == "wait" {
            parsed.wait = true;
        } else if i + 1 == tokens.len() {
            parsed.options = Some(token.clone());
        } else {
            debug!("ignoring mount token {:?}", token);
        }
    }

    parsed
}

/// A mount source as written in the boot script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source<'a> {
    /// `mtd@<partition name>`
    Mtd(&'a str),
    /// `loop@<backing file>`
    Loop(&'a str),
    /// Anything else is passed to mount(2) as is.
    Device(&'a str),
}

impl<'a> Source<'a> {
    pub fn parse(source: &'a str) -> Self {
        if let Some(name) = source.strip_prefix("mtd@") {
            Source::Mtd(name)
        } else if let Some(path) = source.strip_prefix("loop@") {
            Source::Loop(path)
        } else {
            Source::Device(source)
        }
    }
}

pub fn mtd_block_path(number: u32) -> String {
    format!("{}/mtdblock{}", DEV_BLOCK, number)
}

pub fn mtd_lookup(ctx: &Context, name: &str) -> Result<u32> {
    ctx.devices
        .mtd_number(name)
        .ok_or_else(|| BuiltinError::UnknownMtd(name.to_string()))
}

/// Resolve `source` to a device and mount it on `target`.
pub fn resolve_and_mount(
    ctx: &Context,
    fs_type: &str,
    source: &str,
    target: &str,
    opts: &MountOptions,
) -> Result<()> {
    let device = match Source::parse(source) {
        Source::Mtd(name) => {
            let device = mtd_block_path(mtd_lookup(ctx, name)?);
            wait_if_requested(ctx, &device, opts);
            mount_device(ctx, &request(&device, target, fs_type, opts))?;
            device
        }
        Source::Loop(backing) => mount_loop(ctx, backing, target, fs_type, opts)?,
        Source::Device(device) => {
            wait_if_requested(ctx, device, opts);
            let req = request(device, target, fs_type, opts);
            if let Err(e) = ctx.kernel.mount(&req) {
                crypto::fall_back_to_tmpfs(ctx, device, target, e)?;
            } else {
                info!("mounted {} on {} ({})", device, target, fs_type);
            }
            device.to_string()
        }
    };

    if target == DATA_MNT_POINT {
        crypto::record_data_mount(
            ctx.props.as_ref(),
            &DataMount {
                fs_type,
                device: &device,
                target,
                options: opts.options.as_deref(),
                flags: opts.flags,
            },
        );
        crypto::settle_state(ctx);
    }

    Ok(())
}

/// mount(2) with logging; errors carry source and target.
pub fn mount_device(ctx: &Context, req: &MountRequest<'_>) -> Result<()> {
    ctx.kernel
        .mount(req)
        .with_context(|| format!("mount {} on {}", req.source, req.target))?;
    info!("mounted {} on {} ({})", req.source, req.target, req.fs_type);
    Ok(())
}

fn request<'a>(
    source: &'a str,
    target: &'a str,
    fs_type: &'a str,
    opts: &'a MountOptions,
) -> MountRequest<'a> {
    MountRequest {
        source,
        target,
        fs_type,
        flags: opts.flags,
        data: opts.options.as_deref(),
    }
}

fn wait_if_requested(ctx: &Context, device: &str, opts: &MountOptions) {
    if !opts.wait {
        return;
    }
    if let Err(e) = ctx.devices.wait_for_file(device, COMMAND_RETRY_TIMEOUT) {
        warn!("{}", e);
    }
}

/// Bind `backing` to the first free loop device and mount it.
fn mount_loop(
    ctx: &Context,
    backing: &str,
    target: &str,
    fs_type: &str,
    opts: &MountOptions,
) -> Result<String> {
    let writable = !opts.flags.read_only();
    let file = OpenOptions::new()
        .read(true)
        .write(writable)
        .open(backing)
        .with_context(|| format!("open {}", backing))?;

    for index in 0u32.. {
        let dev = match ctx.kernel.open_loop(index, writable) {
            Ok(dev) => dev,
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(e) => return Err(BuiltinError::io(format!("open loop{}", index), e)),
        };

        match dev.is_unbound() {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                debug!("{}: status query failed: {}", dev.path(), e);
                continue;
            }
        }

        if let Err(e) = dev.bind(&file) {
            debug!("{}: bind failed: {}", dev.path(), e);
            continue;
        }

        let req = request(dev.path(), target, fs_type, opts);
        if let Err(e) = ctx.kernel.mount(&req) {
            if let Err(clear) = dev.unbind() {
                warn!("{}: clearing backing file failed: {}", dev.path(), clear);
            }
            return Err(BuiltinError::io(
                format!("mount {} ({}) on {}", dev.path(), backing, target),
                e,
            ));
        }

        info!("mounted {} via {} on {} ({})", backing, dev.path(), target, fs_type);
        return Ok(dev.path().to_string());
    }

    error!("out of loopback devices");
    Err(BuiltinError::OutOfLoopDevices)
}

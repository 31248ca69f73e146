//! Encrypted `/data` handling.
//!
//! When the real data partition cannot be mounted and it has not simply been
//! wiped, assume it is encrypted: put a tmpfs in its place and flag the
//! system so that a later stage asks for the password and mounts the real
//! filesystem. The move back from tmpfs is never made here.

use std::io;

use log::{info, warn};
use rustix::mount::MountFlags;

use crate::context::Context;
use crate::error::{BuiltinError, Result};
use crate::kernel::MountRequest;
use crate::mount::{FlagSet, DATA_MNT_POINT};
use crate::property::{
    PropertyStore, CRYPTO_FS_FLAGS, CRYPTO_FS_MNT_POINT, CRYPTO_FS_OPTIONS, CRYPTO_FS_REAL_BLKDEV,
    CRYPTO_FS_TYPE, CRYPTO_STATE, CRYPTO_TMPFS_OPTIONS, VOLD_DECRYPT,
};

pub const NONENCRYPTED_TRIGGER: &str = "nonencrypted";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoState {
    Unset,
    Unencrypted,
    Encrypted,
}

impl CryptoState {
    pub fn current(props: &dyn PropertyStore) -> Self {
        match props.get(CRYPTO_STATE).as_deref() {
            Some("encrypted") => CryptoState::Encrypted,
            Some("unencrypted") => CryptoState::Unencrypted,
            _ => CryptoState::Unset,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoState::Unset => "notset",
            CryptoState::Unencrypted => "unencrypted",
            CryptoState::Encrypted => "encrypted",
        }
    }
}

/// The real mount of `/data`, saved for the decryption stage.
#[derive(Debug, Clone, Copy)]
pub struct DataMount<'a> {
    pub fs_type: &'a str,
    pub device: &'a str,
    pub target: &'a str,
    pub options: Option<&'a str>,
    pub flags: FlagSet,
}

/// Called after the real mount of `source` on `target` failed with `cause`.
pub fn fall_back_to_tmpfs(ctx: &Context, source: &str, target: &str, cause: io::Error) -> Result<()> {
    if target != DATA_MNT_POINT || ctx.devices.partition_wiped(source) {
        return Err(BuiltinError::io(format!("mount {} on {}", source, target), cause));
    }

    warn!("mounting {} on {} failed ({}), assuming encrypted", source, target, cause);

    let tmpfs_options = ctx.props.get(CRYPTO_TMPFS_OPTIONS);
    let req = MountRequest {
        source: "tmpfs",
        target,
        fs_type: "tmpfs",
        flags: FlagSet {
            flags: MountFlags::NOATIME | MountFlags::NOSUID | MountFlags::NODEV,
            remount: false,
        },
        data: tmpfs_options.as_deref(),
    };
    ctx.kernel
        .mount(&req)
        .map_err(|source| BuiltinError::FallbackMount {
            target: target.to_string(),
            source,
        })?;

    ctx.props.set(CRYPTO_STATE, CryptoState::Encrypted.as_str());
    ctx.props.set(VOLD_DECRYPT, "1");
    info!("tmpfs mounted on {}, decryption pending", target);
    Ok(())
}

pub fn record_data_mount(props: &dyn PropertyStore, mount: &DataMount<'_>) {
    props.set(CRYPTO_FS_TYPE, mount.fs_type);
    props.set(CRYPTO_FS_REAL_BLKDEV, mount.device);
    props.set(CRYPTO_FS_MNT_POINT, mount.target);
    if let Some(options) = mount.options {
        props.set(CRYPTO_FS_OPTIONS, options);
    }
    props.set(CRYPTO_FS_FLAGS, &format!("0x{:08x}", mount.flags.bits()));
}

/// Mark the system unencrypted unless the fallback already ran.
pub fn settle_state(ctx: &Context) {
    if CryptoState::current(ctx.props.as_ref()) == CryptoState::Encrypted {
        return;
    }
    ctx.props.set(CRYPTO_STATE, CryptoState::Unencrypted.as_str());
    ctx.triggers.fire_all_for(NONENCRYPTED_TRIGGER);
}

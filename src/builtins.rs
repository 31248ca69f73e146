//! Builtin command handlers.
//!
//! Every handler receives the full command line, `args[0]` being the
//! command name, and checks the positions it reads even though the dispatch
//! table has already checked the count.

use std::ffi::CString;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{symlink as make_symlink, OpenOptionsExt};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn, LevelFilter};
use rustix::fs::Mode;
use rustix::io::Errno;
use rustix::ioctl::{ioctl, BadOpcode, RawOpcode, Setter, Updater};
use rustix::net::{AddressFamily, SocketType};
use rustix::process::{Resource, Rlimit};

use crate::async_job::{acquire_lock, run_async};
use crate::context::Context;
use crate::devices::COMMAND_RETRY_TIMEOUT;
use crate::error::{BuiltinError, IoContext, Result};
use crate::mount::{parse_flags, resolve_and_mount};
use crate::property::expand;
use crate::ubi::{self, VolumeNumber};

const KDSKBENT: RawOpcode = 0x4B47;
const SIOCGIFFLAGS: RawOpcode = 0x8913;
const SIOCSIFFLAGS: RawOpcode = 0x8914;

/// Well-known ids accepted wherever an owner or group is expected.
const NAMED_IDS: &[(&str, u32)] = &[
    ("root", 0),
    ("system", 1000),
    ("radio", 1001),
    ("bluetooth", 1002),
    ("graphics", 1003),
    ("input", 1004),
    ("audio", 1005),
    ("camera", 1006),
    ("log", 1007),
    ("compass", 1008),
    ("mount", 1009),
    ("wifi", 1010),
    ("adb", 1011),
    ("install", 1012),
    ("media", 1013),
    ("dhcp", 1014),
    ("sdcard_rw", 1015),
    ("vpn", 1016),
    ("keystore", 1017),
    ("usb", 1018),
    ("drm", 1019),
    ("shell", 2000),
    ("cache", 2001),
    ("diag", 2002),
    ("net_bt_admin", 3001),
    ("net_bt", 3002),
    ("inet", 3003),
    ("net_raw", 3004),
    ("net_admin", 3005),
    ("misc", 9998),
    ("nobody", 9999),
];

fn command(args: &[String]) -> &str {
    args.first().map_or("?", String::as_str)
}

fn arg(args: &[String], index: usize) -> Result<&str> {
    args.get(index).map(String::as_str).ok_or_else(|| {
        BuiltinError::bad_syntax(
            command(args),
            format!("at least {}", index),
            args.len().saturating_sub(1),
        )
    })
}

fn invalid(what: &str, value: &str) -> BuiltinError {
    BuiltinError::InvalidArgument(format!("{} {:?}", what, value))
}

/// Octal permission bits; anything but 0-7 digits is rejected.
pub fn parse_mode(s: &str) -> Result<u32> {
    if s.is_empty() || !s.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(invalid("mode", s));
    }
    u32::from_str_radix(s, 8).map_err(|_| invalid("mode", s))
}

/// Decimal, `0x` hex or leading-zero octal.
pub fn parse_number(s: &str) -> Result<u64> {
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u64::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    parsed.map_err(|_| invalid("number", s))
}

pub fn decode_uid(s: &str) -> Result<u32> {
    if let Some(&(_, id)) = NAMED_IDS.iter().find(|(name, _)| *name == s) {
        return Ok(id);
    }
    s.parse().map_err(|_| invalid("user", s))
}

fn write_file(path: &str, value: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .mode(0o622)
        .open(path)
        .with_context(|| format!("open {}", path))?;
    file.write_all(value.as_bytes())
        .with_context(|| format!("write {}", path))
}

pub fn chdir(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    rustix::process::chdir(path).with_context(|| format!("chdir {}", path))
}

pub fn chroot(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    rustix::process::chroot(path).with_context(|| format!("chroot {}", path))
}

/// Start every service of the class that is not explicitly disabled.
pub fn class_start(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let class = arg(args, 1)?;
    let services = &ctx.services;
    services.for_each_in_class(class, &mut |svc| {
        if services.is_disabled(svc) {
            debug!("class {}: {} is disabled", class, svc.name());
        } else {
            services.start(svc, &[]);
        }
    });
    Ok(())
}

pub fn class_stop(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let class = arg(args, 1)?;
    let services = &ctx.services;
    services.for_each_in_class(class, &mut |svc| services.stop(svc));
    Ok(())
}

pub fn class_reset(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let class = arg(args, 1)?;
    let services = &ctx.services;
    services.for_each_in_class(class, &mut |svc| services.reset(svc));
    Ok(())
}

pub fn domainname(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    write_file("/proc/sys/kernel/domainname", arg(args, 1)?)
}

pub fn exec(_ctx: &Arc<Context>, _args: &[String]) -> Result<()> {
    Err(BuiltinError::Unsupported("exec".to_string()))
}

pub fn export(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let (name, value) = (arg(args, 1)?, arg(args, 2)?);
    std::env::set_var(name, value);
    Ok(())
}

pub fn hostname(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    write_file("/proc/sys/kernel/hostname", arg(args, 1)?)
}

#[repr(C)]
#[derive(Clone, Copy)]
struct IfReq {
    name: [u8; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

pub fn ifup(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let interface = arg(args, 1)?;
    if interface.len() >= libc::IFNAMSIZ {
        return Err(invalid("interface", interface));
    }

    let mut req = IfReq {
        name: [0; libc::IFNAMSIZ],
        flags: 0,
        _pad: [0; 22],
    };
    req.name[..interface.len()].copy_from_slice(interface.as_bytes());

    let sock = rustix::net::socket(AddressFamily::INET, SocketType::DGRAM, None)
        .with_context(|| "socket")?;

    let get = unsafe { ioctl(&sock, Updater::<BadOpcode<SIOCGIFFLAGS>, IfReq>::new(&mut req)) };
    get.with_context(|| format!("get flags of {}", interface))?;
    req.flags |= libc::IFF_UP as libc::c_short;
    let set = unsafe { ioctl(&sock, Setter::<BadOpcode<SIOCSIFFLAGS>, IfReq>::new(req)) };
    set.with_context(|| format!("set flags of {}", interface))?;
    info!("{} is up", interface);
    Ok(())
}

/// `insmod <path> [options...]`; options are joined with spaces.
pub fn insmod(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    let options = CString::new(args[2..].join(" "))
        .map_err(|_| BuiltinError::MalformedOptions(path.to_string()))?;
    let image = fs::read(path).with_context(|| format!("read {}", path))?;

    ctx.modules
        .load(&image, &options)
        .with_context(|| format!("init_module {}", path))?;
    info!("loaded module {}", path);
    Ok(())
}

pub fn insmod_async(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let job = run_async(ctx, insmod, args)?;
    debug!("insmod detached, wait on {}", job.lock_path);
    Ok(())
}

pub fn mount_ubifs_async(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let job = run_async(ctx, mount_ubifs, args)?;
    debug!("mount_ubifs detached, wait on {}", job.lock_path);
    Ok(())
}

/// Block until nobody holds the lock, then remove the lock file.
pub fn waitlock(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    drop(acquire_lock(path)?);
    if let Err(e) = fs::remove_file(path) {
        warn!("remove {}: {}", path, e);
    }
    Ok(())
}

/// `mkdir <path> [mode] [owner] [group]`
pub fn mkdir(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    let mode = match args.get(2) {
        Some(mode) => parse_mode(mode)?,
        None => 0o755,
    };

    match rustix::fs::mkdir(path, Mode::from_raw_mode(mode)) {
        Ok(()) => {}
        // Already there: still apply the requested mode.
        Err(e) if e == Errno::EXIST => {
            rustix::fs::chmod(path, Mode::from_raw_mode(mode))
                .with_context(|| format!("chmod {}", path))?;
        }
        Err(e) => return Err(BuiltinError::io(format!("mkdir {}", path), e.into())),
    }

    if let Some(owner) = args.get(3) {
        let uid = decode_uid(owner)?;
        let gid = args.get(4).map(|g| decode_uid(g)).transpose()?;
        std::os::unix::fs::chown(path, Some(uid), gid)
            .with_context(|| format!("chown {}", path))?;
    }
    Ok(())
}

/// `mount <type> <device> <path> [flags...] [options]`
pub fn mount(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let (fs_type, source, target) = (arg(args, 1)?, arg(args, 2)?, arg(args, 3)?);
    let opts = parse_flags(&args[4..], true);
    resolve_and_mount(ctx, fs_type, source, target, &opts)
}

/// `mount_ubifs <ubi num> <volume> <device> <path> [flags...] [options]`
pub fn mount_ubifs(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let number = arg(args, 1)?;
    let (volume, source, target) = (arg(args, 2)?, arg(args, 3)?, arg(args, 4)?);
    let number = u32::try_from(parse_number(number)?).map_err(|_| invalid("ubi number", number))?;
    let opts = parse_flags(&args[5..], false);
    ubi::mount_ubifs(ctx, VolumeNumber::Fixed(number), volume, source, target, &opts)
}

/// `attach_ubifs <volume> <device> <path> [flags...] [options]`
pub fn attach_ubifs(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let (volume, source, target) = (arg(args, 1)?, arg(args, 2)?, arg(args, 3)?);
    let opts = parse_flags(&args[4..], false);
    ubi::mount_ubifs(ctx, VolumeNumber::Dynamic, volume, source, target, &opts)
}

#[repr(C)]
struct KbEntry {
    table: u8,
    index: u8,
    value: u16,
}

pub fn setkey(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let number = |i: usize| -> Result<u64> { parse_number(arg(args, i)?) };
    let entry = KbEntry {
        table: u8::try_from(number(1)?).map_err(|_| invalid("table", &args[1]))?,
        index: u8::try_from(number(2)?).map_err(|_| invalid("index", &args[2]))?,
        value: u16::try_from(number(3)?).map_err(|_| invalid("value", &args[3]))?,
    };

    let tty = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_SYNC)
        .open("/dev/tty0")
        .with_context(|| "open /dev/tty0")?;
    let res = unsafe { ioctl(&tty, Setter::<BadOpcode<KDSKBENT>, KbEntry>::new(entry)) };
    res.with_context(|| "KDSKBENT")
}

/// `setprop <name> <value>`; a `$name` value copies another property.
pub fn setprop(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let name = arg(args, 1)?;
    let value = expand(ctx.props.as_ref(), arg(args, 2)?)?;
    ctx.props.set(name, &value);
    Ok(())
}

fn resource(number: &str) -> Result<Resource> {
    let resource = match number.parse::<u32>() {
        Ok(0) => Resource::Cpu,
        Ok(1) => Resource::Fsize,
        Ok(2) => Resource::Data,
        Ok(3) => Resource::Stack,
        Ok(4) => Resource::Core,
        Ok(5) => Resource::Rss,
        Ok(6) => Resource::Nproc,
        Ok(7) => Resource::Nofile,
        Ok(8) => Resource::Memlock,
        Ok(9) => Resource::As,
        Ok(10) => Resource::Locks,
        Ok(11) => Resource::Sigpending,
        Ok(12) => Resource::Msgqueue,
        Ok(13) => Resource::Nice,
        Ok(14) => Resource::Rtprio,
        Ok(15) => Resource::Rttime,
        _ => return Err(invalid("resource", number)),
    };
    Ok(resource)
}

/// Negative limits mean unlimited.
fn limit(value: &str) -> Result<Option<u64>> {
    let value: i64 = value.parse().map_err(|_| invalid("limit", value))?;
    Ok(u64::try_from(value).ok())
}

pub fn setrlimit(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let which = arg(args, 1)?;
    let rlimit = Rlimit {
        current: limit(arg(args, 2)?)?,
        maximum: limit(arg(args, 3)?)?,
    };
    rustix::process::setrlimit(resource(which)?, rlimit)
        .with_context(|| format!("setrlimit {}", which))
}

pub fn start(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let name = arg(args, 1)?;
    match ctx.services.find_by_name(name) {
        Some(svc) => ctx.services.start(&svc, &[]),
        None => warn!("no such service {}", name),
    }
    Ok(())
}

pub fn stop(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let name = arg(args, 1)?;
    match ctx.services.find_by_name(name) {
        Some(svc) => ctx.services.stop(&svc),
        None => warn!("no such service {}", name),
    }
    Ok(())
}

pub fn restart(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let name = arg(args, 1)?;
    match ctx.services.find_by_name(name) {
        Some(svc) => {
            ctx.services.stop(&svc);
            ctx.services.start(&svc, &[]);
        }
        None => warn!("no such service {}", name),
    }
    Ok(())
}

pub fn trigger(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    ctx.triggers.fire_all_for(arg(args, 1)?);
    Ok(())
}

pub fn symlink(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let (target, link) = (arg(args, 1)?, arg(args, 2)?);
    make_symlink(target, link).with_context(|| format!("symlink {} -> {}", link, target))
}

pub fn rm(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    fs::remove_file(path).with_context(|| format!("rm {}", path))
}

pub fn rmdir(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    fs::remove_dir(path).with_context(|| format!("rmdir {}", path))
}

#[repr(C)]
struct TimeZone {
    minuteswest: libc::c_int,
    dsttime: libc::c_int,
}

/// Set the kernel's idea of the timezone, in minutes west of UTC.
pub fn sysclktz(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let minutes = arg(args, 1)?;
    let tz = TimeZone {
        minuteswest: minutes.parse().map_err(|_| invalid("minutes", minutes))?,
        dsttime: 0,
    };
    let ret = unsafe {
        libc::syscall(
            libc::SYS_settimeofday,
            std::ptr::null::<libc::timeval>(),
            &tz as *const TimeZone,
        )
    };
    if ret < 0 {
        return Err(BuiltinError::io("settimeofday", std::io::Error::last_os_error()));
    }
    Ok(())
}

/// `write <path> <value>`; a `$name` value writes another property.
pub fn write(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    let value = expand(ctx.props.as_ref(), arg(args, 2)?)?;
    write_file(path, &value)
}

pub fn copy(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let (from, to) = (arg(args, 1)?, arg(args, 2)?);
    let data = fs::read(from).with_context(|| format!("read {}", from))?;
    let mut out = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o660)
        .open(to)
        .with_context(|| format!("open {}", to))?;
    out.write_all(&data).with_context(|| format!("write {}", to))
}

/// `chown <owner> [group] <path>`
pub fn chown(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let (uid, gid, path) = match args.get(1..).unwrap_or_default() {
        [owner, path] => (decode_uid(owner)?, None, path),
        [owner, group, path] => (decode_uid(owner)?, Some(decode_uid(group)?), path),
        other => return Err(BuiltinError::bad_syntax(command(args), "2..=3", other.len())),
    };
    std::os::unix::fs::chown(path, Some(uid), gid).with_context(|| format!("chown {}", path))
}

/// `chmod <octal mode> <path>`
pub fn chmod(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let mode = parse_mode(arg(args, 1)?)?;
    let path = arg(args, 2)?;
    rustix::fs::chmod(path, Mode::from_raw_mode(mode)).with_context(|| format!("chmod {}", path))
}

/// Kernel log level numbering: 3 and below error, 4 warn, 5-6 info, 7 debug.
pub fn level_filter(level: u32) -> LevelFilter {
    match level {
        0..=3 => LevelFilter::Error,
        4 => LevelFilter::Warn,
        5 | 6 => LevelFilter::Info,
        7 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub fn loglevel(_ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let level = arg(args, 1)?;
    let level: u32 = level.parse().map_err(|_| invalid("log level", level))?;
    log::set_max_level(level_filter(level));
    Ok(())
}

pub fn load_persist_props(ctx: &Arc<Context>, _args: &[String]) -> Result<()> {
    ctx.props.load_persistent().map(|_| ())
}

/// `wait <path> [seconds]`
pub fn wait(ctx: &Arc<Context>, args: &[String]) -> Result<()> {
    let path = arg(args, 1)?;
    let timeout = match args.get(2) {
        Some(secs) => Duration::from_secs(secs.parse().map_err(|_| invalid("timeout", secs))?),
        None => COMMAND_RETRY_TIMEOUT,
    };
    ctx.devices
        .wait_for_file(path, timeout)
        .with_context(|| format!("wait {}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::PropertyStore;
    use crate::testutil::{args, TestBed};
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0755").unwrap(), 0o755);
        assert_eq!(parse_mode("600").unwrap(), 0o600);
        assert!(parse_mode("0758").is_err());
        assert!(parse_mode("").is_err());
        assert!(parse_mode("+644").is_err());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42").unwrap(), 42);
        assert_eq!(parse_number("0x1c").unwrap(), 28);
        assert_eq!(parse_number("017").unwrap(), 15);
        assert_eq!(parse_number("0").unwrap(), 0);
        assert!(parse_number("ten").is_err());
    }

    #[test]
    fn test_decode_uid() {
        assert_eq!(decode_uid("root").unwrap(), 0);
        assert_eq!(decode_uid("system").unwrap(), 1000);
        assert_eq!(decode_uid("sdcard_rw").unwrap(), 1015);
        assert_eq!(decode_uid("4321").unwrap(), 4321);
        assert!(decode_uid("nosuchuser").is_err());
    }

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter(0), LevelFilter::Error);
        assert_eq!(level_filter(4), LevelFilter::Warn);
        assert_eq!(level_filter(6), LevelFilter::Info);
        assert_eq!(level_filter(7), LevelFilter::Debug);
        assert_eq!(level_filter(8), LevelFilter::Trace);
    }

    #[test]
    fn test_handlers_check_positions() {
        let bed = TestBed::new();
        let err = symlink(&bed.ctx, &args(&["symlink", "/system/etc"])).unwrap_err();
        assert!(matches!(err, BuiltinError::BadSyntax { .. }));
        let err = mount(&bed.ctx, &args(&["mount", "ext4"])).unwrap_err();
        assert!(matches!(err, BuiltinError::BadSyntax { .. }));
        let err = chown(&bed.ctx, &args(&["chown", "root"])).unwrap_err();
        assert!(matches!(err, BuiltinError::BadSyntax { .. }));
    }

    #[test]
    fn test_mkdir_and_chmod_existing() {
        let bed = TestBed::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("misc");
        let path = path.to_str().unwrap();

        mkdir(&bed.ctx, &args(&["mkdir", path, "0700"])).unwrap();
        assert_eq!(fs::metadata(path).unwrap().permissions().mode() & 0o777, 0o700);

        mkdir(&bed.ctx, &args(&["mkdir", path, "0751"])).unwrap();
        assert_eq!(fs::metadata(path).unwrap().permissions().mode() & 0o777, 0o751);
    }

    #[test]
    fn test_mkdir_bad_mode() {
        let bed = TestBed::new();
        let err = mkdir(&bed.ctx, &args(&["mkdir", "/tmp/x", "rwx"])).unwrap_err();
        assert_eq!(err.code(), -libc::EINVAL);
    }

    #[test]
    fn test_write_expands_property() {
        let bed = TestBed::new();
        bed.props.set("ro.boot.serialno", "ABC123");
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serial");
        let path = path.to_str().unwrap();

        write(&bed.ctx, &args(&["write", path, "$ro.boot.serialno"])).unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "ABC123");
    }

    #[test]
    fn test_write_missing_property() {
        let bed = TestBed::new();
        let err = write(&bed.ctx, &args(&["write", "/tmp/never", "$ro.missing"])).unwrap_err();
        assert_eq!(err.code(), -libc::ENOENT);
    }

    #[test]
    fn test_setprop() {
        let bed = TestBed::new();
        bed.props.set("ro.product.model", "L32E");
        setprop(&bed.ctx, &args(&["setprop", "sys.model", "$ro.product.model"])).unwrap();
        setprop(&bed.ctx, &args(&["setprop", "sys.price", "$$5"])).unwrap();
        assert_eq!(bed.props.get("sys.model").as_deref(), Some("L32E"));
        assert_eq!(bed.props.get("sys.price").as_deref(), Some("$5"));
    }

    #[test]
    fn test_copy_symlink_rm() {
        let bed = TestBed::new();
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        let link = dir.path().join("link");
        fs::write(&src, "payload").unwrap();
        let (src, dst, link) = (src.to_str().unwrap(), dst.to_str().unwrap(), link.to_str().unwrap());

        copy(&bed.ctx, &args(&["copy", src, dst])).unwrap();
        assert_eq!(fs::read_to_string(dst).unwrap(), "payload");

        symlink(&bed.ctx, &args(&["symlink", dst, link])).unwrap();
        assert_eq!(fs::read_link(link).unwrap().to_str().unwrap(), dst);

        rm(&bed.ctx, &args(&["rm", link])).unwrap();
        assert!(fs::symlink_metadata(link).is_err());
        assert_eq!(rm(&bed.ctx, &args(&["rm", link])).unwrap_err().code(), -libc::ENOENT);
    }

    #[test]
    fn test_chmod() {
        let bed = TestBed::new();
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap();
        chmod(&bed.ctx, &args(&["chmod", "0640", path])).unwrap();
        assert_eq!(fs::metadata(path).unwrap().permissions().mode() & 0o777, 0o640);
    }

    #[test]
    fn test_insmod_options() {
        let bed = TestBed::new();
        let module = tempfile::NamedTempFile::new().unwrap();
        fs::write(module.path(), b"\x7fELF").unwrap();
        let path = module.path().to_str().unwrap();

        insmod(&bed.ctx, &args(&["insmod", path, "debug=1", "mode=fast"])).unwrap();
        insmod(&bed.ctx, &args(&["insmod", path])).unwrap();

        assert_eq!(
            bed.kernel.modules(),
            vec![
                (b"\x7fELF".to_vec(), "debug=1 mode=fast".to_string()),
                (b"\x7fELF".to_vec(), String::new()),
            ]
        );
    }

    #[test]
    fn test_insmod_malformed_options() {
        let bed = TestBed::new();
        let module = tempfile::NamedTempFile::new().unwrap();
        let path = module.path().to_str().unwrap();
        let err = insmod(&bed.ctx, &args(&["insmod", path, "bad\0opt"])).unwrap_err();
        assert!(matches!(err, BuiltinError::MalformedOptions(_)));
        assert!(bed.kernel.modules().is_empty());
    }

    #[test]
    fn test_insmod_load_failure() {
        let bed = TestBed::new();
        bed.kernel.fail_modules();
        let module = tempfile::NamedTempFile::new().unwrap();
        let path = module.path().to_str().unwrap();
        let err = insmod(&bed.ctx, &args(&["insmod", path])).unwrap_err();
        assert_eq!(err.code(), -libc::ENOEXEC);
    }

    #[test]
    fn test_insmod_async_then_waitlock() {
        let bed = TestBed::new();
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("wifi.lock");
        let lock = lock.to_str().unwrap();
        let module = dir.path().join("wifi.ko");
        fs::write(&module, b"ko").unwrap();
        let module = module.to_str().unwrap();

        insmod_async(&bed.ctx, &args(&["insmod_async", lock, module, "country=NO"])).unwrap();
        waitlock(&bed.ctx, &args(&["waitlock", lock])).unwrap();

        assert_eq!(bed.kernel.modules(), vec![(b"ko".to_vec(), "country=NO".to_string())]);
        assert!(!std::path::Path::new(lock).exists());
    }

    #[test]
    fn test_mount_ubifs_args() {
        let bed = TestBed::new();
        bed.devices.add_mtd("cache", 3);
        mount_ubifs(&bed.ctx, &args(&["mount_ubifs", "1", "vol0", "mtd@cache", "/cache"])).unwrap();
        attach_ubifs(&bed.ctx, &args(&["attach_ubifs", "sys", "ubi0:sys", "/system", "ro"])).unwrap();

        let mounts = bed.kernel.mounts();
        assert_eq!(mounts[0].source, "ubi1:vol0");
        assert_eq!(mounts[1].source, "ubi0:sys");
        assert!(mounts[1].flags.read_only());

        let err = mount_ubifs(&bed.ctx, &args(&["mount_ubifs", "one", "v", "mtd@cache", "/c"])).unwrap_err();
        assert_eq!(err.code(), -libc::EINVAL);
    }

    #[test]
    fn test_service_control() {
        let bed = TestBed::with_services(&[("vold", "core", false), ("adbd", "core", true), ("netd", "main", false)]);

        class_start(&bed.ctx, &args(&["class_start", "core"])).unwrap();
        start(&bed.ctx, &args(&["start", "netd"])).unwrap();
        stop(&bed.ctx, &args(&["stop", "vold"])).unwrap();
        restart(&bed.ctx, &args(&["restart", "adbd"])).unwrap();
        start(&bed.ctx, &args(&["start", "missing"])).unwrap();
        class_reset(&bed.ctx, &args(&["class_reset", "main"])).unwrap();
        class_stop(&bed.ctx, &args(&["class_stop", "core"])).unwrap();

        assert_eq!(
            bed.services.events(),
            vec![
                "start vold", "start netd", "stop vold", "stop adbd", "start adbd", "reset netd",
                "stop vold", "stop adbd",
            ]
        );
    }

    #[test]
    fn test_trigger() {
        let bed = TestBed::new();
        trigger(&bed.ctx, &args(&["trigger", "post-fs-data"])).unwrap();
        assert_eq!(bed.triggers.fired(), vec!["post-fs-data".to_string()]);
    }

    #[test]
    fn test_wait() {
        let bed = TestBed::new();
        wait(&bed.ctx, &args(&["wait", "/dev/block/mmcblk0", "3"])).unwrap();
        assert_eq!(bed.devices.waited(), vec!["/dev/block/mmcblk0".to_string()]);
        assert!(wait(&bed.ctx, &args(&["wait", "/dev/x", "soon"])).is_err());
    }

    #[test]
    fn test_ifup_unknown_interface() {
        let bed = TestBed::new();
        let err = ifup(&bed.ctx, &args(&["ifup", "nosuchif0"])).unwrap_err();
        assert_eq!(err.code(), -libc::ENODEV);
        let err = ifup(&bed.ctx, &args(&["ifup", "an-interface-name-too-long"])).unwrap_err();
        assert_eq!(err.code(), -libc::EINVAL);
    }

    #[test]
    fn test_exec_unsupported() {
        let bed = TestBed::new();
        assert_eq!(exec(&bed.ctx, &args(&["exec"])).unwrap_err().code(), -libc::ENOSYS);
    }

    #[test]
    fn test_setrlimit_arguments() {
        assert!(matches!(resource("7"), Ok(Resource::Nofile)));
        assert!(resource("16").is_err());
        assert!(resource("nofile").is_err());
        assert_eq!(limit("-1").unwrap(), None);
        assert_eq!(limit("4096").unwrap(), Some(4096));
    }
}

//! Kernel-facing primitives: mounts, loop devices, UBI attach, module insertion

use std::ffi::CStr;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;

use rustix::io::Errno;
use rustix::ioctl::{ioctl, BadOpcode, Getter, IntegerSetter, NoArg, RawOpcode, Updater};
use rustix::mount::{mount, mount_remount};

use crate::mount::FlagSet;
use crate::ubi::UbiAttachReq;

/// Directory holding `mtdblockN` and `loopN` nodes.
pub const DEV_BLOCK: &str = "/dev/block";

const LOOP_SET_FD: RawOpcode = 0x4C00;
const LOOP_CLR_FD: RawOpcode = 0x4C01;
const LOOP_GET_STATUS64: RawOpcode = 0x4C05;

/// `_IOW('o', 64, struct ubi_attach_req)`
const UBI_IOCATT: RawOpcode = 0x4018_6F40;

/// One mount(2) call, already resolved to a concrete device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountRequest<'a> {
    pub source: &'a str,
    pub target: &'a str,
    pub fs_type: &'a str,
    pub flags: FlagSet,
    pub data: Option<&'a str>,
}

pub trait Kernel: Send + Sync {
    fn mount(&self, req: &MountRequest<'_>) -> io::Result<()>;

    /// Open `/dev/block/loop<index>`. `NotFound` means the scan has run out of nodes.
    fn open_loop(&self, index: u32, writable: bool) -> io::Result<Box<dyn LoopDevice>>;

    /// Issue the attach request on `control`. The kernel writes the assigned
    /// device number back into `req.ubi_num`.
    fn ubi_attach(&self, control: &str, req: &mut UbiAttachReq) -> io::Result<()>;
}

pub trait LoopDevice {
    fn path(&self) -> &str;
    /// A node with no backing file answers a status query with ENXIO.
    fn is_unbound(&self) -> io::Result<bool>;
    fn bind(&self, backing: &File) -> io::Result<()>;
    fn unbind(&self) -> io::Result<()>;
}

pub trait ModuleLoader: Send + Sync {
    fn load(&self, image: &[u8], options: &CStr) -> io::Result<()>;
}

/// The running kernel, reached through rustix and raw ioctls.
#[derive(Debug, Default)]
pub struct LinuxKernel;

impl LinuxKernel {
    pub fn new() -> Self {
        LinuxKernel
    }
}

impl Kernel for LinuxKernel {
    fn mount(&self, req: &MountRequest<'_>) -> io::Result<()> {
        let data = req.data.unwrap_or("");
        let res = if req.flags.remount {
            mount_remount(req.target, req.flags.flags, data)
        } else {
            mount(req.source, req.target, req.fs_type, req.flags.flags, data)
        };
        res.map_err(io::Error::from)
    }

    fn open_loop(&self, index: u32, writable: bool) -> io::Result<Box<dyn LoopDevice>> {
        let path = format!("{}/loop{}", DEV_BLOCK, index);
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;
        Ok(Box::new(LinuxLoop { path, file }))
    }

    fn ubi_attach(&self, control: &str, req: &mut UbiAttachReq) -> io::Result<()> {
        let ctrl = File::open(control)?;
        unsafe {
            let attach = Updater::<BadOpcode<UBI_IOCATT>, UbiAttachReq>::new(req);
            ioctl(&ctrl, attach)?;
        }
        Ok(())
    }
}

impl ModuleLoader for LinuxKernel {
    fn load(&self, image: &[u8], options: &CStr) -> io::Result<()> {
        rustix::system::init_module(image, options).map_err(io::Error::from)
    }
}

/// Room for `struct loop_info64`, which is only ever written by the kernel.
#[allow(dead_code)]
#[repr(C, align(8))]
struct LoopInfo64([u8; 232]);

struct LinuxLoop {
    path: String,
    file: File,
}

impl LoopDevice for LinuxLoop {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_unbound(&self) -> io::Result<bool> {
        let status = unsafe {
            ioctl(&self.file, Getter::<BadOpcode<LOOP_GET_STATUS64>, LoopInfo64>::new())
        };
        match status {
            Ok(_) => Ok(false),
            Err(Errno::NXIO) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn bind(&self, backing: &File) -> io::Result<()> {
        let fd = usize::try_from(backing.as_raw_fd())
            .map_err(|_| io::Error::from(Errno::BADF))?;
        unsafe { ioctl(&self.file, IntegerSetter::<BadOpcode<LOOP_SET_FD>>::new(fd))? };
        Ok(())
    }

    fn unbind(&self) -> io::Result<()> {
        unsafe { ioctl(&self.file, NoArg::<BadOpcode<LOOP_CLR_FD>>::new())? };
        Ok(())
    }
}

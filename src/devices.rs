//! Block device lookups the mount builtins rely on

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use once_cell::sync::OnceCell;

/// How long `wait` and `mount ... wait` poll before giving up.
pub const COMMAND_RETRY_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const WIPE_CHECK_LEN: usize = 4096;

pub trait Devices: Send + Sync {
    /// Map an MTD partition name (as in `mtd@system`) to its number.
    fn mtd_number(&self, name: &str) -> Option<u32>;
    /// True when the partition holds no filesystem at all, only erased blocks.
    fn partition_wiped(&self, source: &str) -> bool;
    fn wait_for_file(&self, path: &str, timeout: Duration) -> io::Result<()>;
}

/// Devices as seen through `/proc/mtd` and the device nodes themselves.
#[derive(Debug)]
pub struct SysDevices {
    proc_mtd: PathBuf,
    mtd: OnceCell<HashMap<String, u32>>,
}

impl Default for SysDevices {
    fn default() -> Self {
        Self::new("/proc/mtd")
    }
}

impl SysDevices {
    pub fn new(proc_mtd: impl Into<PathBuf>) -> Self {
        SysDevices {
            proc_mtd: proc_mtd.into(),
            mtd: OnceCell::new(),
        }
    }

    fn mtd_table(&self) -> &HashMap<String, u32> {
        self.mtd.get_or_init(|| match std::fs::read_to_string(&self.proc_mtd) {
            Ok(text) => parse_proc_mtd(&text),
            Err(e) => {
                warn!("cannot read {}: {}", self.proc_mtd.display(), e);
                HashMap::new()
            }
        })
    }
}

impl Devices for SysDevices {
    fn mtd_number(&self, name: &str) -> Option<u32> {
        self.mtd_table().get(name).copied()
    }

    fn partition_wiped(&self, source: &str) -> bool {
        let mut buf = [0u8; WIPE_CHECK_LEN];
        let read = File::open(source).and_then(|mut f| f.read_exact(&mut buf));
        match read {
            Ok(()) => is_erased(&buf),
            Err(e) => {
                debug!("wipe check on {} skipped: {}", source, e);
                false
            }
        }
    }

    fn wait_for_file(&self, path: &str, timeout: Duration) -> io::Result<()> {
        wait_for_path(Path::new(path), timeout)
    }
}

/// Parse lines of the form `mtd3: 00800000 00020000 "cache"`.
pub fn parse_proc_mtd(text: &str) -> HashMap<String, u32> {
    let mut table = HashMap::new();

    for line in text.lines() {
        let Some((dev, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(number) = dev.strip_prefix("mtd").and_then(|n| n.parse().ok()) else {
            continue;
        };
        let Some(name) = rest.split('"').nth(1) else {
            continue;
        };
        table.insert(name.to_string(), number);
    }

    table
}

/// A block that is entirely 0x00 or entirely 0xff has never been written.
pub fn is_erased(block: &[u8]) -> bool {
    match block.first() {
        Some(&first @ (0x00 | 0xff)) => block.iter().all(|&b| b == first),
        _ => false,
    }
}

pub fn wait_for_path(path: &Path, timeout: Duration) -> io::Result<()> {
    let start = Instant::now();
    loop {
        if path.exists() {
            return Ok(());
        }
        if start.elapsed() >= timeout {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("timed out waiting for {}", path.display()),
            ));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

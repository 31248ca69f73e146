//! bootrc: init that runs an Android-style boot script

mod async_job;
mod builtins;
mod cmdline;
mod context;
mod crypto;
mod devices;
mod dispatch;
mod error;
mod kernel;
mod mount;
mod property;
mod script;
mod service;
mod system;
#[cfg(test)]
mod testutil;
mod trigger;
mod ubi;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, Result};
use log::{error, info, warn};

use crate::context::Context;
use crate::devices::SysDevices;
use crate::kernel::LinuxKernel;
use crate::property::MemoryProperties;
use crate::service::ProcessRegistry;
use crate::trigger::{ActionQueue, TriggerQueue};
use crate::ubi::UbiTable;

/// Triggers fired at startup, in order.
const BOOT_TRIGGERS: &[&str] = &[
    "early-init",
    "init",
    "early-fs",
    "fs",
    "post-fs",
    "post-fs-data",
    "early-boot",
    "boot",
];

const REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Run queued commands until the queue is empty. Failures are logged by
/// `dispatch` and do not stop the script.
fn drain(ctx: &Arc<Context>, queue: &ActionQueue) -> usize {
    let mut failed = 0;
    while let Some(cmd) = queue.next_command() {
        let Some(name) = cmd.first() else {
            continue;
        };
        if dispatch::dispatch(ctx, name, &cmd) != 0 {
            failed += 1;
        }
    }
    failed
}

fn run() -> Result<()> {
    system::mount_kernel_filesystems()?;

    let cmdline_str = cmdline::read_cmdline()?;
    info!("kernel cmdline: {}", cmdline_str);

    let config = cmdline::parse_cmdline(&cmdline_str)?;
    if let Some(level) = config.loglevel {
        log::set_max_level(builtins::level_filter(level));
    }

    for (key, value) in &config.env_vars {
        std::env::set_var(key, value);
    }

    let script = script::read_script(&config.script)?;
    info!(
        "{}: {} actions, {} services",
        config.script,
        script.actions.len(),
        script.services.len()
    );

    let queue = Arc::new(ActionQueue::new(script.actions));
    let services = Arc::new(ProcessRegistry::new(script.services));
    let kernel = Arc::new(LinuxKernel::new());

    let ctx = Arc::new(Context {
        props: Arc::new(MemoryProperties::with_persist_dir(&config.persist_dir)),
        services: services.clone(),
        triggers: queue.clone(),
        kernel: kernel.clone(),
        modules: kernel,
        devices: Arc::new(SysDevices::default()),
        ubi: UbiTable::new(),
        ubi_ctrl: config.ubi_ctrl,
    });

    for trigger in BOOT_TRIGGERS {
        queue.fire_all_for(trigger);
        let failed = drain(&ctx, &queue);
        if failed > 0 {
            warn!("{}: {} commands failed", trigger, failed);
        }
    }

    info!("boot complete, supervising services");
    loop {
        services.reap();
        drain(&ctx, &queue);
        thread::sleep(REAP_INTERVAL);
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    info!("starting");

    // Returning from init panics the kernel; keep pid 1 alive after reporting.
    if let Err(e) = run().context("boot failed") {
        error!("{:#}", e);
        loop {
            thread::sleep(Duration::from_secs(3600));
        }
    }
}

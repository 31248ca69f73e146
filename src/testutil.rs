//! In-memory stand-ins for the kernel and the other collaborators

use std::collections::{HashMap, HashSet};
use std::ffi::CStr;
use std::fs::File;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::Context;
use crate::devices::Devices;
use crate::kernel::{Kernel, LoopDevice, ModuleLoader, MountRequest, DEV_BLOCK};
use crate::mount::FlagSet;
use crate::property::MemoryProperties;
use crate::service::{ServiceHandle, ServiceRegistry};
use crate::trigger::TriggerQueue;
use crate::ubi::{UbiAttachReq, UbiTable, UBI_CTRL};

pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMount {
    pub source: String,
    pub target: String,
    pub fs_type: String,
    pub flags: FlagSet,
    pub data: Option<String>,
}

#[derive(Default)]
struct KernelState {
    mounts: Vec<RecordedMount>,
    failing: HashSet<String>,
    /// `true` for loop devices without a backing file.
    loops: Vec<bool>,
    bound: Vec<u32>,
    /// `(index, writable)` for every loop node opened.
    loop_opens: Vec<(u32, bool)>,
    attaches: Vec<(String, UbiAttachReq)>,
    attach_fails: bool,
    modules: Vec<(Vec<u8>, String)>,
    module_fails: bool,
}

#[derive(Default)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    fn state(&self) -> std::sync::MutexGuard<'_, KernelState> {
        self.state.lock().unwrap()
    }

    /// Mounts from `source` fail with ENODEV.
    pub fn fail_source(&self, source: &str) {
        self.state().failing.insert(source.to_string());
    }

    pub fn add_loops(&self, unbound: &[bool]) {
        self.state().loops.extend_from_slice(unbound);
    }

    pub fn fail_attach(&self) {
        self.state().attach_fails = true;
    }

    pub fn allow_attach(&self) {
        self.state().attach_fails = false;
    }

    pub fn fail_modules(&self) {
        self.state().module_fails = true;
    }

    pub fn mounts(&self) -> Vec<RecordedMount> {
        self.state().mounts.clone()
    }

    pub fn bound_loops(&self) -> Vec<u32> {
        self.state().bound.clone()
    }

    pub fn loop_opens(&self) -> Vec<(u32, bool)> {
        self.state().loop_opens.clone()
    }

    pub fn attaches(&self) -> Vec<(String, UbiAttachReq)> {
        self.state().attaches.clone()
    }

    pub fn modules(&self) -> Vec<(Vec<u8>, String)> {
        self.state().modules.clone()
    }
}

impl Kernel for FakeKernel {
    fn mount(&self, req: &MountRequest<'_>) -> io::Result<()> {
        let mut state = self.state();
        if state.failing.contains(req.source) {
            return Err(io::Error::from_raw_os_error(libc::ENODEV));
        }
        state.mounts.push(RecordedMount {
            source: req.source.to_string(),
            target: req.target.to_string(),
            fs_type: req.fs_type.to_string(),
            flags: req.flags,
            data: req.data.map(str::to_string),
        });
        Ok(())
    }

    fn open_loop(&self, index: u32, writable: bool) -> io::Result<Box<dyn LoopDevice>> {
        let mut state = self.state();
        if index as usize >= state.loops.len() {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        state.loop_opens.push((index, writable));
        drop(state);
        Ok(Box::new(FakeLoop {
            index,
            path: format!("{}/loop{}", DEV_BLOCK, index),
            state: Arc::clone(&self.state),
        }))
    }

    fn ubi_attach(&self, control: &str, req: &mut UbiAttachReq) -> io::Result<()> {
        let mut state = self.state();
        if state.attach_fails {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        state.attaches.push((control.to_string(), *req));
        Ok(())
    }
}

impl ModuleLoader for FakeKernel {
    fn load(&self, image: &[u8], options: &CStr) -> io::Result<()> {
        let mut state = self.state();
        if state.module_fails {
            return Err(io::Error::from_raw_os_error(libc::ENOEXEC));
        }
        let options = options.to_string_lossy().into_owned();
        state.modules.push((image.to_vec(), options));
        Ok(())
    }
}

struct FakeLoop {
    index: u32,
    path: String,
    state: Arc<Mutex<KernelState>>,
}

impl LoopDevice for FakeLoop {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_unbound(&self) -> io::Result<bool> {
        Ok(self.state.lock().unwrap().loops[self.index as usize])
    }

    fn bind(&self, _backing: &File) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.loops[self.index as usize] = false;
        state.bound.push(self.index);
        Ok(())
    }

    fn unbind(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.loops[self.index as usize] = true;
        state.bound.retain(|&i| i != self.index);
        Ok(())
    }
}

#[derive(Default)]
struct DeviceState {
    mtd: HashMap<String, u32>,
    wiped: HashSet<String>,
    waited: Vec<String>,
}

#[derive(Default)]
pub struct FakeDevices {
    state: Mutex<DeviceState>,
}

impl FakeDevices {
    pub fn add_mtd(&self, name: &str, number: u32) {
        self.state.lock().unwrap().mtd.insert(name.to_string(), number);
    }

    pub fn mark_wiped(&self, source: &str) {
        self.state.lock().unwrap().wiped.insert(source.to_string());
    }

    pub fn waited(&self) -> Vec<String> {
        self.state.lock().unwrap().waited.clone()
    }
}

impl Devices for FakeDevices {
    fn mtd_number(&self, name: &str) -> Option<u32> {
        self.state.lock().unwrap().mtd.get(name).copied()
    }

    fn partition_wiped(&self, source: &str) -> bool {
        self.state.lock().unwrap().wiped.contains(source)
    }

    fn wait_for_file(&self, path: &str, _timeout: Duration) -> io::Result<()> {
        self.state.lock().unwrap().waited.push(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTriggers {
    fired: Mutex<Vec<String>>,
}

impl RecordingTriggers {
    pub fn fired(&self) -> Vec<String> {
        self.fired.lock().unwrap().clone()
    }
}

impl TriggerQueue for RecordingTriggers {
    fn fire_all_for(&self, trigger: &str) {
        self.fired.lock().unwrap().push(trigger.to_string());
    }
}

#[derive(Default)]
struct ServiceState {
    /// name, class, disabled
    services: Vec<(String, String, bool)>,
    events: Vec<String>,
}

#[derive(Default)]
pub struct FakeServices {
    state: Mutex<ServiceState>,
}

impl FakeServices {
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    fn set_disabled(&self, svc: &ServiceHandle, disabled: bool, event: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.services.iter_mut().find(|s| s.0 == svc.name()) {
            entry.2 = disabled;
        }
        state.events.push(format!("{} {}", event, svc.name()));
    }
}

impl ServiceRegistry for FakeServices {
    fn find_by_name(&self, name: &str) -> Option<ServiceHandle> {
        let state = self.state.lock().unwrap();
        state
            .services
            .iter()
            .any(|s| s.0 == name)
            .then(|| ServiceHandle::new(name))
    }

    fn start(&self, svc: &ServiceHandle, _extra_args: &[String]) {
        self.set_disabled(svc, false, "start");
    }

    fn stop(&self, svc: &ServiceHandle) {
        self.set_disabled(svc, true, "stop");
    }

    fn reset(&self, svc: &ServiceHandle) {
        let mut state = self.state.lock().unwrap();
        state.events.push(format!("reset {}", svc.name()));
    }

    fn is_disabled(&self, svc: &ServiceHandle) -> bool {
        let state = self.state.lock().unwrap();
        state
            .services
            .iter()
            .find(|s| s.0 == svc.name())
            .map_or(true, |s| s.2)
    }

    fn for_each_in_class(&self, class: &str, f: &mut dyn FnMut(&ServiceHandle)) {
        let handles: Vec<ServiceHandle> = {
            let state = self.state.lock().unwrap();
            state
                .services
                .iter()
                .filter(|s| s.1 == class)
                .map(|s| ServiceHandle::new(s.0.as_str()))
                .collect()
        };
        for handle in &handles {
            f(handle);
        }
    }
}

/// A context wired to fakes, with handles kept for inspection.
pub struct TestBed {
    pub ctx: Arc<Context>,
    pub kernel: Arc<FakeKernel>,
    pub devices: Arc<FakeDevices>,
    pub props: Arc<MemoryProperties>,
    pub triggers: Arc<RecordingTriggers>,
    pub services: Arc<FakeServices>,
}

impl TestBed {
    pub fn new() -> Self {
        Self::with_services(&[])
    }

    pub fn with_services(services: &[(&str, &str, bool)]) -> Self {
        let kernel = Arc::new(FakeKernel::default());
        let devices = Arc::new(FakeDevices::default());
        let props = Arc::new(MemoryProperties::new());
        let triggers = Arc::new(RecordingTriggers::default());
        let fake_services = Arc::new(FakeServices::default());
        fake_services.state.lock().unwrap().services = services
            .iter()
            .map(|(name, class, disabled)| (name.to_string(), class.to_string(), *disabled))
            .collect();

        let ctx = Arc::new(Context {
            props: props.clone(),
            services: fake_services.clone(),
            triggers: triggers.clone(),
            kernel: kernel.clone(),
            modules: kernel.clone(),
            devices: devices.clone(),
            ubi: UbiTable::new(),
            ubi_ctrl: UBI_CTRL.to_string(),
        });

        TestBed {
            ctx,
            kernel,
            devices,
            props,
            triggers,
            services: fake_services,
        }
    }
}

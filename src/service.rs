//! Services declared by the boot script, run as child processes

use std::process::{Child, Command};
use std::sync::Mutex;

use log::{error, info, warn};

use crate::script::ServiceDef;

/// Opaque reference to a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle(String);

impl ServiceHandle {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceHandle(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

pub trait ServiceRegistry: Send + Sync {
    fn find_by_name(&self, name: &str) -> Option<ServiceHandle>;
    fn start(&self, svc: &ServiceHandle, extra_args: &[String]);
    /// Stop the service and keep it from being started by its class.
    fn stop(&self, svc: &ServiceHandle);
    /// Stop the service without disabling it.
    fn reset(&self, svc: &ServiceHandle);
    fn is_disabled(&self, svc: &ServiceHandle) -> bool;
    /// Call `f` for every service in `class`. `f` may call back into the registry.
    fn for_each_in_class(&self, class: &str, f: &mut dyn FnMut(&ServiceHandle));
}

struct Service {
    def: ServiceDef,
    disabled: bool,
    child: Option<Child>,
}

impl Service {
    fn stop_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill() {
            warn!("service {}: kill failed: {}", self.def.name, e);
        }
        match child.wait() {
            Ok(status) => info!("service {} stopped ({})", self.def.name, status),
            Err(e) => warn!("service {}: wait failed: {}", self.def.name, e),
        }
    }
}

#[derive(Default)]
pub struct ProcessRegistry {
    services: Mutex<Vec<Service>>,
}

impl ProcessRegistry {
    pub fn new(defs: Vec<ServiceDef>) -> Self {
        let services = defs
            .into_iter()
            .map(|def| Service {
                disabled: def.disabled,
                def,
                child: None,
            })
            .collect();
        ProcessRegistry {
            services: Mutex::new(services),
        }
    }

    fn with_service<R>(&self, svc: &ServiceHandle, f: impl FnOnce(&mut Service) -> R) -> Option<R> {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services.iter_mut().find(|s| s.def.name == svc.0).map(f)
    }

    /// Collect exited children; restart the ones that should keep running.
    pub fn reap(&self) {
        let mut services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        for svc in services.iter_mut() {
            let Some(child) = svc.child.as_mut() else {
                continue;
            };
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("service {} exited ({})", svc.def.name, status);
                    svc.child = None;
                    if svc.def.oneshot {
                        svc.disabled = true;
                    } else if !svc.disabled {
                        spawn(svc, &[]);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("service {}: wait failed: {}", svc.def.name, e),
            }
        }
    }
}

fn spawn(svc: &mut Service, extra_args: &[String]) {
    match Command::new(&svc.def.path)
        .args(&svc.def.args)
        .args(extra_args)
        .spawn()
    {
        Ok(child) => {
            info!("service {} started (pid {})", svc.def.name, child.id());
            svc.child = Some(child);
        }
        Err(e) => error!("service {}: cannot exec {}: {}", svc.def.name, svc.def.path, e),
    }
}

impl ServiceRegistry for ProcessRegistry {
    fn find_by_name(&self, name: &str) -> Option<ServiceHandle> {
        let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
        services
            .iter()
            .find(|s| s.def.name == name)
            .map(|s| ServiceHandle::new(s.def.name.as_str()))
    }

    fn start(&self, svc: &ServiceHandle, extra_args: &[String]) {
        self.with_service(svc, |s| {
            s.disabled = false;
            if s.child.is_none() {
                spawn(s, extra_args);
            }
        });
    }

    fn stop(&self, svc: &ServiceHandle) {
        self.with_service(svc, |s| {
            s.disabled = true;
            s.stop_child();
        });
    }

    fn reset(&self, svc: &ServiceHandle) {
        self.with_service(svc, Service::stop_child);
    }

    fn is_disabled(&self, svc: &ServiceHandle) -> bool {
        self.with_service(svc, |s| s.disabled).unwrap_or(true)
    }

    fn for_each_in_class(&self, class: &str, f: &mut dyn FnMut(&ServiceHandle)) {
        let handles: Vec<ServiceHandle> = {
            let services = self.services.lock().unwrap_or_else(|e| e.into_inner());
            services
                .iter()
                .filter(|s| s.def.class == class)
                .map(|s| ServiceHandle::new(s.def.name.as_str()))
                .collect()
        };
        for handle in &handles {
            f(handle);
        }
    }
}

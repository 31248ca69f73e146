//! State shared by every builtin

use std::sync::Arc;

use crate::devices::Devices;
use crate::kernel::{Kernel, ModuleLoader};
use crate::property::PropertyStore;
use crate::service::ServiceRegistry;
use crate::trigger::TriggerQueue;
use crate::ubi::UbiTable;

/// Collaborators and long-lived state the builtins act on.
///
/// Shared as `Arc<Context>` so async jobs can carry it onto their thread.
pub struct Context {
    pub props: Arc<dyn PropertyStore>,
    pub services: Arc<dyn ServiceRegistry>,
    pub triggers: Arc<dyn TriggerQueue>,
    pub kernel: Arc<dyn Kernel>,
    pub modules: Arc<dyn ModuleLoader>,
    pub devices: Arc<dyn Devices>,
    pub ubi: UbiTable,
    /// UBI control node used for attach requests.
    pub ubi_ctrl: String,
}

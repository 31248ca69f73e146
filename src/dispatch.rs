//! Command name to handler table

use std::sync::Arc;

use log::{debug, warn};

use crate::builtins;
use crate::context::Context;
use crate::error::{BuiltinError, Result};

/// A builtin. `args[0]` is the command name.
pub type Handler = fn(&Arc<Context>, &[String]) -> Result<()>;

const UNBOUNDED: usize = usize::MAX;

pub struct Builtin {
    pub name: &'static str,
    pub handler: Handler,
    /// Bounds on the number of arguments after the command name.
    pub min_args: usize,
    pub max_args: usize,
}

impl Builtin {
    const fn new(name: &'static str, handler: Handler, min_args: usize, max_args: usize) -> Self {
        Builtin {
            name,
            handler,
            min_args,
            max_args,
        }
    }

    fn arity(&self) -> String {
        match (self.min_args, self.max_args) {
            (min, UNBOUNDED) => format!("at least {}", min),
            (min, max) if min == max => min.to_string(),
            (min, max) => format!("{}..={}", min, max),
        }
    }
}

pub const BUILTINS: &[Builtin] = &[
    Builtin::new("attach_ubifs", builtins::attach_ubifs, 3, UNBOUNDED),
    Builtin::new("chdir", builtins::chdir, 1, 1),
    Builtin::new("chmod", builtins::chmod, 2, 2),
    Builtin::new("chown", builtins::chown, 2, 3),
    Builtin::new("chroot", builtins::chroot, 1, 1),
    Builtin::new("class_reset", builtins::class_reset, 1, 1),
    Builtin::new("class_start", builtins::class_start, 1, 1),
    Builtin::new("class_stop", builtins::class_stop, 1, 1),
    Builtin::new("copy", builtins::copy, 2, 2),
    Builtin::new("domainname", builtins::domainname, 1, 1),
    Builtin::new("exec", builtins::exec, 0, UNBOUNDED),
    Builtin::new("export", builtins::export, 2, 2),
    Builtin::new("hostname", builtins::hostname, 1, 1),
    Builtin::new("ifup", builtins::ifup, 1, 1),
    Builtin::new("insmod", builtins::insmod, 1, UNBOUNDED),
    Builtin::new("insmod_async", builtins::insmod_async, 2, UNBOUNDED),
    Builtin::new("load_persist_props", builtins::load_persist_props, 0, 0),
    Builtin::new("loglevel", builtins::loglevel, 1, 1),
    Builtin::new("mkdir", builtins::mkdir, 1, 4),
    Builtin::new("mount", builtins::mount, 3, UNBOUNDED),
    Builtin::new("mount_ubifs", builtins::mount_ubifs, 4, UNBOUNDED),
    Builtin::new("mount_ubifs_async", builtins::mount_ubifs_async, 5, UNBOUNDED),
    Builtin::new("restart", builtins::restart, 1, 1),
    Builtin::new("rm", builtins::rm, 1, 1),
    Builtin::new("rmdir", builtins::rmdir, 1, 1),
    Builtin::new("setkey", builtins::setkey, 3, 3),
    Builtin::new("setprop", builtins::setprop, 2, 2),
    Builtin::new("setrlimit", builtins::setrlimit, 3, 3),
    Builtin::new("start", builtins::start, 1, 1),
    Builtin::new("stop", builtins::stop, 1, 1),
    Builtin::new("symlink", builtins::symlink, 2, 2),
    Builtin::new("sysclktz", builtins::sysclktz, 1, 1),
    Builtin::new("trigger", builtins::trigger, 1, 1),
    Builtin::new("wait", builtins::wait, 1, 2),
    Builtin::new("waitlock", builtins::waitlock, 1, 1),
    Builtin::new("write", builtins::write, 2, 2),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

fn run(ctx: &Arc<Context>, name: &str, args: &[String]) -> Result<()> {
    let builtin = lookup(name).ok_or_else(|| BuiltinError::UnknownCommand(name.to_string()))?;
    let nargs = args.len().saturating_sub(1);
    if nargs < builtin.min_args || nargs > builtin.max_args {
        return Err(BuiltinError::bad_syntax(name, builtin.arity(), nargs));
    }
    (builtin.handler)(ctx, args)
}

/// Run one command. `args[0]` must be `name`.
///
/// Returns 0 on success and a negative errno-style code otherwise.
pub fn dispatch(ctx: &Arc<Context>, name: &str, args: &[String]) -> i32 {
    debug!("exec: {}", args.join(" "));
    match run(ctx, name, args) {
        Ok(()) => 0,
        Err(e) => {
            warn!("command '{}' failed: {}", args.join(" "), e);
            e.code()
        }
    }
}

//! Fire-and-forget builtins serialized by lock files.
//!
//! `insmod_async <lock> ...` takes an exclusive flock on `<lock>` on the
//! calling thread, then runs the wrapped builtin on a detached thread that
//! owns the locked file. Closing that file when the builtin returns, however
//! it returns, is what lets the next job on the same lock proceed. The
//! builtin's result is logged and otherwise discarded.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;
use std::thread;

use log::{debug, warn};
use rustix::fs::{flock, FlockOperation};

use crate::context::Context;
use crate::dispatch::Handler;
use crate::error::{BuiltinError, IoContext, Result};

/// A job that is running on its own thread. It has no result to collect;
/// callers that care about the outcome must look at state the job sets.
#[derive(Debug)]
pub struct Detached {
    pub lock_path: String,
}

struct AsyncJob {
    lock: File,
    handler: Handler,
    args: Box<[String]>,
    ctx: Arc<Context>,
}

impl AsyncJob {
    fn run(self) {
        let AsyncJob {
            lock,
            handler,
            args,
            ctx,
        } = self;

        match handler(&ctx, &args) {
            Ok(()) => debug!("async {} finished", args.join(" ")),
            Err(e) => warn!("async {}: {}", args.join(" "), e),
        }

        drop(lock);
    }
}

/// Open (creating if needed) and exclusively lock `path`, blocking until free.
pub fn acquire_lock(path: &str) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("open lock {}", path))?;
    flock(&file, FlockOperation::LockExclusive).with_context(|| format!("lock {}", path))?;
    Ok(file)
}

/// Run `handler` on a detached thread with `args` minus the lock path.
///
/// `args` is `[name, lock_path, rest...]`; the handler sees `[name, rest...]`.
pub fn run_async(ctx: &Arc<Context>, handler: Handler, args: &[String]) -> Result<Detached> {
    let [name, lock_path, rest @ ..] = args else {
        return Err(BuiltinError::bad_syntax(
            args.first().map_or("async", String::as_str),
            "at least 1",
            args.len().saturating_sub(1),
        ));
    };

    let lock = acquire_lock(lock_path)?;
    let packed: Box<[String]> = std::iter::once(name).chain(rest).cloned().collect();

    let job = AsyncJob {
        lock,
        handler,
        args: packed,
        ctx: Arc::clone(ctx),
    };
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || job.run())
        .map_err(BuiltinError::CannotStart)?;

    debug!("{} running under {}", name, lock_path);
    Ok(Detached {
        lock_path: lock_path.clone(),
    })
}

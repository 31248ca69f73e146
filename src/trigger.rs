//! Trigger queue: `on <trigger>` blocks waiting to run

use std::collections::VecDeque;
use std::sync::Mutex;

use log::debug;

use crate::script::Action;

pub trait TriggerQueue: Send + Sync {
    /// Queue every action bound to `trigger` behind the ones already queued.
    fn fire_all_for(&self, trigger: &str);
}

/// Actions from the boot script plus the commands queued to run.
#[derive(Debug, Default)]
pub struct ActionQueue {
    actions: Vec<Action>,
    pending: Mutex<VecDeque<Vec<String>>>,
}

impl ActionQueue {
    pub fn new(actions: Vec<Action>) -> Self {
        ActionQueue {
            actions,
            pending: Mutex::default(),
        }
    }

    /// Next command in queue order, if any.
    pub fn next_command(&self) -> Option<Vec<String>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.pop_front()
    }
}

impl TriggerQueue for ActionQueue {
    fn fire_all_for(&self, trigger: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        for action in self.actions.iter().filter(|a| a.trigger == trigger) {
            debug!("queueing {} commands for {}", action.commands.len(), trigger);
            pending.extend(action.commands.iter().cloned());
        }
    }
}

//! Scripted target for session tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::target::{Liveness, Target, TargetError};

/// A target that stays alive until the test says otherwise.
#[derive(Debug, Clone)]
pub struct ScriptedTarget {
    pid: u32,
    alive: Arc<AtomicBool>,
    probes: Arc<AtomicU32>,
}

impl ScriptedTarget {
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            alive: Arc::new(AtomicBool::new(true)),
            probes: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn probes(&self) -> u32 {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Target for ScriptedTarget {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn probe(&mut self) -> Result<Liveness, TargetError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(if self.alive.load(Ordering::SeqCst) {
            Liveness::Alive
        } else {
            Liveness::Exited(Some(0))
        })
    }

    fn describe(&self) -> String {
        format!("scripted pid {}", self.pid)
    }
}

//! Shadow registry: long-lived in-memory stand-ins for traced threads, locks
//! and variables.
//!
//! Each shadow object is created the first time its trace id is seen and is
//! addressed afterwards by a small copyable handle, so every event referring to
//! the same trace id resolves to the same object. The registry is owned by one
//! replay run and dropped with it.

use std::collections::HashMap;
use std::fmt;

use crate::trace::{ReferenceId, ReferenceRecord, StorageClass, ThreadId};

macro_rules! shadow_handle {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "@{}"), self.0)
            }
        }
    };
}

shadow_handle!(
    /// Handle of a [`ShadowThread`].
    ThreadHandle,
    "thread"
);
shadow_handle!(
    /// Handle of a [`ShadowLock`].
    LockHandle,
    "lock"
);
shadow_handle!(
    /// Handle of a [`ShadowVar`].
    VarHandle,
    "var"
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowThread {
    pub id: ThreadId,
    pub parent: Option<ThreadHandle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowLock {
    pub reference: ReferenceId,
    pub acquire_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowVar {
    pub reference: ReferenceId,
    pub name: String,
    pub size: u64,
    pub storage: StorageClass,
}

/// Per-run interning tables for shadow objects.
#[derive(Debug, Default)]
pub struct ShadowRegistry {
    threads: Vec<ShadowThread>,
    thread_ids: HashMap<ThreadId, ThreadHandle>,

    locks: Vec<ShadowLock>,
    lock_ids: HashMap<ReferenceId, LockHandle>,

    vars: Vec<ShadowVar>,
    var_ids: HashMap<ReferenceId, VarHandle>,
}

impl ShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the shadow thread for `id`.
    ///
    /// `parent` is only recorded when the thread is created.
    pub fn get_or_create_thread(
        &mut self,
        id: ThreadId,
        parent: Option<ThreadHandle>,
    ) -> ThreadHandle {
        if let Some(&handle) = self.thread_ids.get(&id) {
            return handle;
        }
        let handle = ThreadHandle(self.threads.len());
        self.threads.push(ShadowThread { id, parent });
        self.thread_ids.insert(id, handle);
        handle
    }

    /// Get the handle for a thread id if it exists, without creating one.
    pub fn thread_handle(&self, id: ThreadId) -> Option<ThreadHandle> {
        self.thread_ids.get(&id).copied()
    }

    pub fn thread(&self, handle: ThreadHandle) -> Option<&ShadowThread> {
        self.threads.get(handle.0)
    }

    /// Get or create the shadow lock guarding the object `reference`.
    pub fn get_or_create_lock(&mut self, reference: ReferenceId) -> LockHandle {
        if let Some(&handle) = self.lock_ids.get(&reference) {
            return handle;
        }
        let handle = LockHandle(self.locks.len());
        self.locks.push(ShadowLock {
            reference,
            acquire_count: 0,
        });
        self.lock_ids.insert(reference, handle);
        handle
    }

    pub fn lock(&self, handle: LockHandle) -> Option<&ShadowLock> {
        self.locks.get(handle.0)
    }

    pub fn record_acquire(&mut self, handle: LockHandle) {
        if let Some(lock) = self.locks.get_mut(handle.0) {
            lock.acquire_count += 1;
        }
    }

    /// Get or create the shadow variable of a reference row.
    pub fn get_or_create_var(&mut self, reference: &ReferenceRecord) -> VarHandle {
        if let Some(&handle) = self.var_ids.get(&reference.id) {
            return handle;
        }
        let handle = VarHandle(self.vars.len());
        self.vars.push(ShadowVar {
            reference: reference.id,
            name: reference.name.clone(),
            size: reference.size,
            storage: reference.storage,
        });
        self.var_ids.insert(reference.id, handle);
        handle
    }

    pub fn var(&self, handle: VarHandle) -> Option<&ShadowVar> {
        self.vars.get(handle.0)
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Acquires recorded over every lock.
    pub fn acquire_total(&self) -> u64 {
        self.locks.iter().map(|l| l.acquire_count).sum()
    }
}

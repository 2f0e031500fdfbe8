//! Thread registry.
//! - ThreadRegistry: id and native-handle indices behind one lock
//! - RuntimeThread: per-thread phase, stop reason and exception record

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::control::StopReason;
use crate::runtime::NativeHandle;

/// Per-thread execution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    /// Executing freely.
    Running,
    /// Executing toward a step target.
    Stepping,
    /// Parked in a hook and serviced by the adapter.
    Stopped,
    /// Parked in a hook while another thread is stopped.
    Suspended,
}

/// Exception details kept for `exceptionInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionRecord {
    pub kind: String,
    pub message: String,
    pub fatal: bool,
}

#[derive(Debug)]
struct ThreadStatus {
    phase: ThreadPhase,
    stop_reason: Option<StopReason>,
    exception: Option<ExceptionRecord>,
}

/// One interpreter execution context under observation.
#[derive(Debug)]
pub struct RuntimeThread {
    id: u32,
    handle: NativeHandle,
    status: Mutex<ThreadStatus>,
}

impl RuntimeThread {
    fn new(id: u32, handle: NativeHandle) -> Self {
        Self {
            id,
            handle,
            status: Mutex::new(ThreadStatus {
                phase: ThreadPhase::Running,
                stop_reason: None,
                exception: None,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    #[must_use]
    pub fn name(&self) -> String {
        format!("Thread {}", self.id)
    }

    #[must_use]
    pub fn phase(&self) -> ThreadPhase {
        self.status.lock().phase
    }

    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        self.status.lock().stop_reason
    }

    #[must_use]
    pub fn exception(&self) -> Option<ExceptionRecord> {
        self.status.lock().exception.clone()
    }

    pub(crate) fn set_running(&self, stepping: bool) {
        let mut status = self.status.lock();
        status.phase = if stepping {
            ThreadPhase::Stepping
        } else {
            ThreadPhase::Running
        };
        status.exception = None;
    }

    pub(crate) fn set_stopped(&self, reason: StopReason, exception: Option<ExceptionRecord>) {
        let mut status = self.status.lock();
        status.phase = ThreadPhase::Stopped;
        status.stop_reason = Some(reason);
        status.exception = exception;
    }

    pub(crate) fn set_suspended(&self) {
        self.status.lock().phase = ThreadPhase::Suspended;
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: FxHashMap<u32, Arc<RuntimeThread>>,
    by_handle: FxHashMap<NativeHandle, u32>,
    next_id: u32,
}

/// Registry of known threads; ids are assigned from 1 and never reused.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    inner: RwLock<RegistryInner>,
}

impl ThreadRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the thread for `handle`, creating it on first sight.
    ///
    /// The flag is `true` when the thread was created by this call.
    pub fn attach(&self, handle: NativeHandle) -> (Arc<RuntimeThread>, bool) {
        if let Some(thread) = self.find_by_handle(handle) {
            return (thread, false);
        }
        let mut inner = self.inner.write();
        // Another hook may have attached the handle between the locks.
        if let Some(thread) = inner
            .by_handle
            .get(&handle)
            .and_then(|id| inner.by_id.get(id))
        {
            return (Arc::clone(thread), false);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let thread = Arc::new(RuntimeThread::new(id, handle));
        inner.by_id.insert(id, Arc::clone(&thread));
        inner.by_handle.insert(handle, id);
        debug!(thread = id, handle = handle.raw(), "thread attached");
        (thread, true)
    }

    /// Remove the thread for `handle`.
    pub fn detach(&self, handle: NativeHandle) -> Option<Arc<RuntimeThread>> {
        let mut inner = self.inner.write();
        let id = inner.by_handle.remove(&handle)?;
        let thread = inner.by_id.remove(&id);
        debug!(thread = id, "thread detached");
        thread
    }

    /// Remove every thread, returning them in id order.
    pub fn detach_all(&self) -> Vec<Arc<RuntimeThread>> {
        let mut inner = self.inner.write();
        inner.by_handle.clear();
        let mut threads = inner.by_id.drain().map(|(_, thread)| thread).collect::<Vec<_>>();
        threads.sort_by_key(|thread| thread.id);
        threads
    }

    #[must_use]
    pub fn find(&self, id: u32) -> Option<Arc<RuntimeThread>> {
        self.inner.read().by_id.get(&id).cloned()
    }

    #[must_use]
    pub fn find_by_handle(&self, handle: NativeHandle) -> Option<Arc<RuntimeThread>> {
        let inner = self.inner.read();
        inner
            .by_handle
            .get(&handle)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    /// Live threads in id order.
    #[must_use]
    pub fn threads(&self) -> Vec<Arc<RuntimeThread>> {
        let inner = self.inner.read();
        let mut threads = inner.by_id.values().cloned().collect::<Vec<_>>();
        threads.sort_by_key(|thread| thread.id);
        threads
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn indices_agree(&self) -> bool {
        let inner = self.inner.read();
        inner.by_id.len() == inner.by_handle.len()
            && inner.by_handle.iter().all(|(handle, id)| {
                inner
                    .by_id
                    .get(id)
                    .is_some_and(|thread| thread.handle == *handle && thread.id == *id)
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    use super::{ThreadPhase, ThreadRegistry};
    use crate::control::StopReason;
    use crate::runtime::NativeHandle;

    #[test]
    fn ids_are_assigned_once_and_never_reused() {
        let registry = ThreadRegistry::new();
        let (first, created) = registry.attach(NativeHandle::new(0x10));
        assert!(created);
        let (again, created) = registry.attach(NativeHandle::new(0x10));
        assert!(!created);
        assert_eq!(first.id(), again.id());
        assert!(registry.detach(NativeHandle::new(0x10)).is_some());
        let (reattached, created) = registry.attach(NativeHandle::new(0x10));
        assert!(created);
        assert_ne!(reattached.id(), first.id());
        assert!(registry.find(first.id()).is_none());
    }

    #[test]
    fn lookups_miss_cleanly() {
        let registry = ThreadRegistry::new();
        assert!(registry.find(7).is_none());
        assert!(registry.find_by_handle(NativeHandle::new(7)).is_none());
        assert!(registry.detach(NativeHandle::new(7)).is_none());
    }

    #[test]
    fn indices_stay_consistent_under_random_sequences() {
        let registry = ThreadRegistry::new();
        let mut live = BTreeSet::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for _ in 0..2_000 {
            seed = seed
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let handle = NativeHandle::new((seed >> 33) % 16);
            match (seed >> 20) % 3 {
                0 | 1 => {
                    registry.attach(handle);
                    live.insert(handle);
                }
                _ => {
                    registry.detach(handle);
                    live.remove(&handle);
                }
            }
            assert!(registry.indices_agree());
            assert_eq!(registry.len(), live.len());
            for handle in &live {
                let thread = registry.find_by_handle(*handle).expect("live handle");
                let by_id = registry.find(thread.id()).expect("live id");
                assert!(Arc::ptr_eq(&thread, &by_id));
            }
        }
        registry.detach_all();
        assert!(registry.is_empty());
        assert!(registry.indices_agree());
    }

    #[test]
    fn concurrent_attach_yields_one_thread_per_handle() {
        let registry = Arc::new(ThreadRegistry::new());
        let workers = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..32)
                        .map(|raw| registry.attach(NativeHandle::new(raw)).0.id())
                        .collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let results = workers
            .into_iter()
            .map(|worker| worker.join().expect("worker"))
            .collect::<Vec<_>>();
        assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(registry.len(), 32);
        assert!(registry.indices_agree());
    }

    #[test]
    fn thread_status_tracks_stops() {
        let registry = ThreadRegistry::new();
        let (thread, _) = registry.attach(NativeHandle::new(1));
        assert_eq!(thread.phase(), ThreadPhase::Running);
        thread.set_stopped(StopReason::Breakpoint, None);
        assert_eq!(thread.phase(), ThreadPhase::Stopped);
        assert_eq!(thread.stop_reason(), Some(StopReason::Breakpoint));
        thread.set_running(true);
        assert_eq!(thread.phase(), ThreadPhase::Stepping);
        assert_eq!(thread.name(), "Thread 1");
    }
}

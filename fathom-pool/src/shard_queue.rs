//! Per-endpoint queue of reusable shard handles with the replication
//! state machine.
//!
//! States: `Free` (ready for any checkout), `Lock` (a writable
//! checkout is in flight), `Switch` (an atomic database swap is in
//! progress; both reads and writes wait). Every transition broadcasts
//! `switch_cond`.

use crate::shard::{OpenFlags, Shard};
use fathom_core::{BackendFactory, Endpoints, Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;

/// Replication state of a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplicaState {
    /// Ready for any checkout
    Free,
    /// A writable checkout is in flight
    Lock,
    /// An atomic database switch is in progress
    Switch,
}

struct Inner {
    queue: VecDeque<Shard>,
    state: ReplicaState,
    /// Live handles: parked in the queue plus checked out
    count: usize,
    /// Maximum live handles (1 for writable queues)
    max: usize,
    switch_requested: bool,
    finished: bool,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// Ordered reusable pool of open shard handles for one endpoint set.
pub struct ShardQueue {
    /// The endpoint set this queue serves
    pub endpoints: Endpoints,
    /// Fingerprint of the endpoint set
    pub hash: u64,
    writable: bool,
    persistent: bool,
    inner: Mutex<Inner>,
    switch_cond: Condvar,
}

impl ShardQueue {
    /// Create an empty queue.
    pub fn new(endpoints: Endpoints, writable: bool, persistent: bool, max: usize) -> Self {
        let max = if writable { 1 } else { max.max(1) };
        ShardQueue {
            hash: endpoints.hash(),
            endpoints,
            writable,
            persistent,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                state: ReplicaState::Free,
                count: 0,
                max,
                switch_requested: false,
                finished: false,
                callbacks: Vec::new(),
            }),
            switch_cond: Condvar::new(),
        }
    }

    /// Whether this queue serves writable checkouts
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Whether LRU pressure must never drop this queue
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Current replication state
    pub fn state(&self) -> ReplicaState {
        self.inner.lock().state
    }

    /// Parked handles
    pub fn size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Live handles (parked plus checked out)
    pub fn count(&self) -> usize {
        self.inner.lock().count
    }

    /// Whether the LRU may drop this queue: nothing checked out, no
    /// switch pending, not persistent.
    pub fn droppable(&self) -> bool {
        if self.persistent {
            return false;
        }
        let inner = self.inner.lock();
        inner.state == ReplicaState::Free
            && !inner.switch_requested
            && inner.queue.len() == inner.count
    }

    /// Enqueue a callback fired on the next checkin.
    pub fn on_checkin(&self, callback: Box<dyn FnOnce() + Send>) {
        self.inner.lock().callbacks.push(callback);
    }

    /// Pop a free handle, opening a fresh one while below capacity.
    ///
    /// Writable checkouts transition `Free -> Lock`; expiry of
    /// `deadline` returns a timeout and leaves the state clean.
    pub fn checkout<F>(&self, deadline: Instant, open: F) -> Result<Shard>
    where
        F: FnOnce() -> Result<Shard>,
    {
        let mut inner = self.inner.lock();
        loop {
            if inner.finished {
                return Err(Error::conflict(format!(
                    "{}: pool is shutting down",
                    self.endpoints
                )));
            }
            let blocked = inner.switch_requested
                || match inner.state {
                    ReplicaState::Switch => true,
                    ReplicaState::Lock => self.writable,
                    ReplicaState::Free => false,
                };
            if !blocked {
                if let Some(mut shard) = inner.queue.pop_front() {
                    if self.writable {
                        inner.state = ReplicaState::Lock;
                    }
                    self.switch_cond.notify_all();
                    shard.access_time = Instant::now();
                    return Ok(shard);
                }
                if inner.count < inner.max {
                    inner.count += 1;
                    if self.writable {
                        inner.state = ReplicaState::Lock;
                    }
                    drop(inner);
                    match open() {
                        Ok(shard) => {
                            self.switch_cond.notify_all();
                            return Ok(shard);
                        }
                        Err(e) => {
                            let mut inner = self.inner.lock();
                            inner.count -= 1;
                            if self.writable && inner.state == ReplicaState::Lock {
                                inner.state = ReplicaState::Free;
                            }
                            self.switch_cond.notify_all();
                            return Err(e);
                        }
                    }
                }
            }
            if self.switch_cond.wait_until(&mut inner, deadline).timed_out() {
                return Err(Error::timeout(format!(
                    "{}: no shard handle available",
                    self.endpoints
                )));
            }
        }
    }

    /// Return a handle; `Lock -> Free` (or `-> Switch` when a switch
    /// was requested meanwhile), waiters notified, pending checkin
    /// callbacks fired.
    pub fn checkin(&self, shard: Shard) {
        let callbacks = {
            let mut inner = self.inner.lock();
            if shard.flags().contains(OpenFlags::VOLATILE) || inner.finished {
                inner.count -= 1;
            } else {
                inner.queue.push_back(shard);
            }
            if self.writable {
                inner.state = if inner.switch_requested {
                    ReplicaState::Switch
                } else {
                    ReplicaState::Free
                };
            }
            self.switch_cond.notify_all();
            std::mem::take(&mut inner.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Atomically swap the underlying databases.
    ///
    /// Blocks new checkouts, waits for every outstanding handle to be
    /// checked in, reopens every parked handle through `factory`, then
    /// returns the queue to `Free`.
    pub fn switch(&self, factory: &dyn BackendFactory, deadline: Instant) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.switch_requested = true;
        while inner.queue.len() != inner.count {
            if self
                .switch_cond
                .wait_until(&mut inner, deadline)
                .timed_out()
            {
                inner.switch_requested = false;
                if inner.state == ReplicaState::Switch {
                    inner.state = ReplicaState::Free;
                }
                self.switch_cond.notify_all();
                return Err(Error::timeout(format!(
                    "{}: switch timed out waiting for checkins",
                    self.endpoints
                )));
            }
        }
        inner.state = ReplicaState::Switch;

        let result = (|| {
            for shard in inner.queue.iter_mut() {
                shard.reopen(factory)?;
            }
            Ok(())
        })();

        inner.switch_requested = false;
        inner.state = ReplicaState::Free;
        self.switch_cond.notify_all();
        result
    }

    /// Shutdown gate: fail pending and future checkouts.
    pub fn finish(&self) {
        let mut inner = self.inner.lock();
        inner.finished = true;
        self.switch_cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fathom_core::{Endpoint, MemoryBackendFactory};
    use std::sync::Arc;
    use std::time::Duration;

    fn queue(writable: bool, max: usize) -> (Arc<ShardQueue>, Arc<MemoryBackendFactory>) {
        let factory = Arc::new(MemoryBackendFactory::new());
        let eps = Endpoints::single(Endpoint::new("idx"));
        (
            Arc::new(ShardQueue::new(eps, writable, false, max)),
            factory,
        )
    }

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(200)
    }

    fn open_flags(writable: bool) -> OpenFlags {
        if writable {
            OpenFlags::WRITABLE | OpenFlags::SPAWN
        } else {
            OpenFlags::SPAWN
        }
    }

    #[test]
    fn test_writable_checkout_locks() {
        let (q, f) = queue(true, 1);
        let eps = q.endpoints.clone();
        let shard = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(true)))
            .unwrap();
        assert_eq!(q.state(), ReplicaState::Lock);

        // A second writable checkout times out while locked
        let err = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(true)))
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        q.checkin(shard);
        assert_eq!(q.state(), ReplicaState::Free);
        assert_eq!(q.size(), 1);
    }

    #[test]
    fn test_handles_are_reused() {
        let (q, f) = queue(false, 4);
        let eps = q.endpoints.clone();
        let shard = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(false)))
            .unwrap();
        q.checkin(shard);
        assert_eq!(q.count(), 1);
        let _again = q
            .checkout(soon(), || panic!("should reuse the parked handle"))
            .unwrap();
        assert_eq!(q.count(), 1);
    }

    #[test]
    fn test_queue_conservation() {
        let (q, f) = queue(false, 3);
        let eps = q.endpoints.clone();
        let a = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(false)))
            .unwrap();
        let b = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(false)))
            .unwrap();
        // pool_size + checked_out == count
        assert_eq!(q.size() + 2, q.count());
        q.checkin(a);
        q.checkin(b);
        assert_eq!(q.size(), q.count());
    }

    #[test]
    fn test_volatile_checkin_drops() {
        let (q, f) = queue(false, 2);
        let eps = q.endpoints.clone();
        let shard = q
            .checkout(soon(), || {
                Shard::open(&*f, &eps, OpenFlags::SPAWN | OpenFlags::VOLATILE)
            })
            .unwrap();
        q.checkin(shard);
        assert_eq!(q.size(), 0);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn test_checkin_callback_fires() {
        let (q, f) = queue(true, 1);
        let eps = q.endpoints.clone();
        let shard = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(true)))
            .unwrap();
        let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = fired.clone();
        q.on_checkin(Box::new(move || {
            flag.store(true, std::sync::atomic::Ordering::SeqCst)
        }));
        q.checkin(shard);
        assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_switch_waits_for_checkins() {
        let (q, f) = queue(true, 1);
        let eps = q.endpoints.clone();
        let shard = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(true)))
            .unwrap();

        let q2 = q.clone();
        let f2 = f.clone();
        let switcher = std::thread::spawn(move || {
            q2.switch(&*f2, Instant::now() + Duration::from_secs(5))
        });

        // The switch cannot complete while the writer is out
        std::thread::sleep(Duration::from_millis(50));
        assert!(!switcher.is_finished());

        q.checkin(shard);
        switcher.join().unwrap().unwrap();
        assert_eq!(q.state(), ReplicaState::Free);

        // Queue is usable again after the swap
        let shard = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(true)))
            .unwrap();
        q.checkin(shard);
    }

    #[test]
    fn test_finish_fails_checkouts() {
        let (q, f) = queue(false, 1);
        let eps = q.endpoints.clone();
        q.finish();
        let err = q
            .checkout(soon(), || Shard::open(&*f, &eps, open_flags(false)))
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}

//! The wait queue of blocked callers.
//!
//! The queue is a chain of heap allocated nodes linked from the tail towards
//! the head through `prev` pointers. The head is a sentinel: it is either the
//! initial dummy node or the node of the last caller that acquired from the
//! queue. A node whose predecessor is the head is next in line.
//!
//! There are no `next` pointers. A releasing thread never dereferences a
//! node: it resumes the successor of the head by unparking the threads
//! parked on the head's address, since every waiter parks on the address of
//! its own predecessor. This makes memory reclamation local: the *effective
//! successor* of a node (the one node whose `prev` designates it) is the only
//! party that may free it, which happens when it skips the node after a
//! cancellation, or when it replaces the node as head. A node that cancels
//! while it is still the tail has no successor, so it unlinks and frees
//! itself.
//!
//! Every release bumps the `signals` sequence number before unparking. A
//! waiter samples it before retrying its acquisition and refuses to park if it
//! moved, so a release that races with a failed attempt is never lost.

use core::ptr;
use core::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::time::Instant;

use log::{debug, trace};

use crate::cfg::atomic::{AtomicPtr, AtomicU8, AtomicUsize};
use crate::cfg::hint;
use crate::context::Context;
use crate::parker::{Parker, ParkerT, Wake};

/// The way a queued node competes for the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Exclusive,
    Shared,
}

const WAITING: u8 = 0;
const CANCELLED: u8 = 1;

/// A record describing one blocked caller.
pub(crate) struct Node {
    prev: AtomicPtr<Node>,
    status: AtomicU8,
    mode: Mode,
}

impl Node {
    /// Allocates a new, unlinked node.
    pub(crate) fn alloc(mode: Mode) -> *mut Self {
        let prev = AtomicPtr::new(ptr::null_mut());
        let status = AtomicU8::new(WAITING);
        Box::into_raw(Box::new(Self { prev, status, mode }))
    }

    /// Frees a node returned by [`alloc`].
    ///
    /// # Safety
    ///
    /// Caller must own `node`, either because it was never linked or because
    /// it is its effective successor, and `node` must not be used again.
    ///
    /// [`alloc`]: Node::alloc
    pub(crate) unsafe fn free(node: *mut Self) {
        drop(unsafe { Box::from_raw(node) });
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    fn is_cancelled(&self) -> bool {
        self.status.load(SeqCst) == CANCELLED
    }

    /// The parking key of the successor of `node`.
    fn key(node: *const Self) -> usize {
        node as usize
    }
}

/// A FIFO of [`Node`]s with lock-free enqueue.
pub(crate) struct WaitQueue {
    head: AtomicPtr<Node>,
    tail: AtomicPtr<Node>,
    signals: AtomicUsize,
}

impl WaitQueue {
    /// Creates an empty queue, the sentinel is installed lazily.
    #[cfg(not(all(loom, test)))]
    pub(crate) const fn new() -> Self {
        let head = AtomicPtr::new(ptr::null_mut());
        let tail = AtomicPtr::new(ptr::null_mut());
        let signals = AtomicUsize::new(0);
        Self { head, tail, signals }
    }

    /// Creates an empty queue with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub(crate) fn new() -> Self {
        let head = AtomicPtr::new(ptr::null_mut());
        let tail = AtomicPtr::new(ptr::null_mut());
        let signals = AtomicUsize::new(0);
        Self { head, tail, signals }
    }

    /// Returns the current release sequence number.
    pub(crate) fn signals(&self) -> usize {
        self.signals.load(SeqCst)
    }

    /// Returns `true` if some node is linked behind the head.
    ///
    /// Cancelled nodes that were not yet skipped are counted as well.
    pub(crate) fn has_queued_threads(&self) -> bool {
        let head = self.head.load(SeqCst);
        !head.is_null() && head != self.tail.load(SeqCst)
    }

    /// Returns `true` if any caller ever had to enqueue.
    pub(crate) fn has_contended(&self) -> bool {
        !self.head.load(SeqCst).is_null()
    }

    /// Returns `true` if `node` is the current head.
    pub(crate) fn is_head(&self, node: *const Node) -> bool {
        ptr::eq(self.head.load(SeqCst), node)
    }

    /// Appends `node` to the tail of the queue, returning its predecessor.
    ///
    /// # Safety
    ///
    /// `node` must come from [`Node::alloc`], must not be linked into any
    /// queue and must not be freed by the caller from now on.
    pub(crate) unsafe fn enqueue(&self, node: *mut Node) -> *mut Node {
        // SAFETY: Caller guarantees `node` is valid and not shared yet.
        let node_ref = unsafe { &*node };
        loop {
            let tail = self.tail.load(SeqCst);
            if tail.is_null() {
                self.install_sentinel();
                continue;
            }
            // The tail is never dereferenced here, it may be freed by a
            // concurrent cancellation, and then the exchange below fails.
            node_ref.prev.store(tail, Relaxed);
            if self.tail.compare_exchange(tail, node, SeqCst, Relaxed).is_ok() {
                trace!("enqueued {:?} node {node:p} behind {tail:p}", node_ref.mode);
                return tail;
            }
        }
    }

    /// Installs the initial sentinel, or waits for a racing thread to finish
    /// installing it.
    #[cold]
    fn install_sentinel(&self) {
        if self.head.load(SeqCst).is_null() {
            let sentinel = Node::alloc(Mode::Exclusive);
            let null = ptr::null_mut();
            if self.head.compare_exchange(null, sentinel, SeqCst, SeqCst).is_ok() {
                self.tail.store(sentinel, SeqCst);
                debug!("installed wait queue sentinel {sentinel:p}");
                return;
            }
            // SAFETY: The sentinel lost the race and was never published.
            unsafe { Node::free(sentinel) };
        }
        hint::spin_loop();
    }

    /// Returns the nearest predecessor of `node` that is not cancelled.
    ///
    /// Cancelled predecessors are spliced out and freed, the order of the
    /// remaining nodes is left untouched.
    ///
    /// # Safety
    ///
    /// `node` must be linked, not yet promoted to head, and the calling thread
    /// must be the one driving it.
    pub(crate) unsafe fn skip_cancelled(&self, node: *mut Node) -> *mut Node {
        // SAFETY: Caller guarantees `node` is valid.
        let node = unsafe { &*node };
        let mut pred = node.prev.load(Relaxed);
        // SAFETY: We are the effective successor of `pred`, nobody else frees
        // it. A cancelled node never writes its `prev` after its status.
        while unsafe { &*pred }.is_cancelled() {
            let skipped = pred;
            pred = unsafe { &*skipped }.prev.load(Relaxed);
            node.prev.store(pred, Relaxed);
            trace!("skipped cancelled node {skipped:p}");
            // SAFETY: `skipped` is now unreachable from the queue.
            unsafe { Node::free(skipped) };
        }
        pred
    }

    /// Promotes `node` to head after it acquired, freeing its predecessor.
    ///
    /// # Safety
    ///
    /// `pred` must be the current head and the predecessor of `node`, as
    /// returned by [`skip_cancelled`] on the calling thread.
    ///
    /// [`skip_cancelled`]: WaitQueue::skip_cancelled
    pub(crate) unsafe fn set_head(&self, node: *mut Node, pred: *mut Node) {
        // SAFETY: Caller guarantees `node` is valid.
        unsafe { &*node }.prev.store(ptr::null_mut(), Relaxed);
        self.head.store(node, SeqCst);
        // SAFETY: `node` was the only successor of the old head.
        unsafe { Node::free(pred) };
    }

    /// Gives up on `node`, the caller will not acquire through it.
    ///
    /// The node unlinks itself if it is the tail. Otherwise it is marked as
    /// cancelled and left for its successor to splice out, which is woken up
    /// so that the queue never stalls behind a dead node.
    ///
    /// # Safety
    ///
    /// `node` must be linked, not yet promoted to head, and the calling thread
    /// must be the one driving it. `node` must not be used again.
    pub(crate) unsafe fn cancel(&self, node: *mut Node) {
        // SAFETY: Caller upholds the contract of `skip_cancelled`.
        let pred = unsafe { self.skip_cancelled(node) };
        if self.tail.compare_exchange(node, pred, SeqCst, Relaxed).is_ok() {
            trace!("unlinked cancelled tail node {node:p}");
            // SAFETY: `node` had no successor and is no longer reachable.
            unsafe { Node::free(node) };
            return;
        }
        trace!("cancelled node {node:p}");
        // SAFETY: Caller guarantees `node` is valid.
        unsafe { &*node }.status.store(CANCELLED, SeqCst);
        // `node` belongs to its successor from now on, only use its address.
        Self::unpark_successor(node);
    }

    /// Resumes the successor of `node`, if any is parked.
    fn unpark_successor(node: *const Node) {
        Parker::unpark_all(Node::key(node));
    }

    /// Announces a successful release and resumes the successor of the head.
    pub(crate) fn signal(&self) {
        self.signals.fetch_add(1, SeqCst);
        let head = self.head.load(SeqCst);
        if !head.is_null() && head != self.tail.load(SeqCst) {
            Self::unpark_successor(head);
        }
    }

    /// Parks the calling thread until the predecessor of its node is released
    /// or cancelled.
    ///
    /// Parking is refused if `pred` is already cancelled or if the release
    /// sequence moved past `seq`.
    ///
    /// # Safety
    ///
    /// The calling thread must be the effective successor of `pred`, and `ctx`
    /// must be its own context.
    pub(crate) unsafe fn park(
        &self,
        ctx: &Context,
        pred: *mut Node,
        seq: usize,
        interruptible: bool,
        deadline: Option<Instant>,
    ) -> Wake {
        // SAFETY: We are the effective successor of `pred`, so it stays alive.
        let pred_ref = unsafe { &*pred };
        let validate = || !pred_ref.is_cancelled() && self.signals.load(SeqCst) == seq;
        // SAFETY: `validate` only runs atomic loads.
        unsafe { ctx.park(Node::key(pred), interruptible, validate, deadline) }
    }

    /// Counts the live nodes linked behind the head.
    ///
    /// # Safety
    ///
    /// No node may be freed while this runs: no waiter may acquire through
    /// the queue nor cancel.
    #[cfg(all(not(loom), test))]
    pub(crate) unsafe fn len(&self) -> usize {
        let head = self.head.load(SeqCst);
        let mut node = self.tail.load(SeqCst);
        let mut len = 0;
        while !node.is_null() && node != head {
            // SAFETY: Caller guarantees no concurrent frees.
            let node_ref = unsafe { &*node };
            if !node_ref.is_cancelled() {
                len += 1;
            }
            node = node_ref.prev.load(Relaxed);
        }
        len
    }
}

impl Drop for WaitQueue {
    fn drop(&mut self) {
        let mut node = self.tail.load(Relaxed);
        while !node.is_null() {
            // SAFETY: We have exclusive access. Every node still allocated is
            // reachable exactly once from the tail, and the head ends the chain.
            let prev = unsafe { &*node }.prev.load(Relaxed);
            unsafe { Node::free(node) };
            node = prev;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Mode, Node, WaitQueue};

    #[test]
    fn first_enqueue_installs_sentinel() {
        let queue = WaitQueue::new();
        assert!(!queue.has_queued_threads());
        assert!(!queue.has_contended());
        let node = Node::alloc(Mode::Exclusive);
        let pred = unsafe { queue.enqueue(node) };
        assert!(queue.is_head(pred));
        assert!(queue.has_queued_threads());
        assert!(queue.has_contended());
        assert_eq!(unsafe { queue.len() }, 1);
    }

    #[test]
    fn enqueue_preserves_order() {
        let queue = WaitQueue::new();
        let first = Node::alloc(Mode::Exclusive);
        let second = Node::alloc(Mode::Shared);
        unsafe { queue.enqueue(first) };
        let pred = unsafe { queue.enqueue(second) };
        assert_eq!(pred, first);
        assert_eq!(unsafe { queue.len() }, 2);
    }

    #[test]
    fn cancelled_tail_unlinks_itself() {
        let queue = WaitQueue::new();
        let node = Node::alloc(Mode::Exclusive);
        unsafe { queue.enqueue(node) };
        unsafe { queue.cancel(node) };
        assert!(!queue.has_queued_threads());
        assert_eq!(unsafe { queue.len() }, 0);
    }

    #[test]
    fn successor_skips_cancelled_nodes() {
        let queue = WaitQueue::new();
        let first = Node::alloc(Mode::Exclusive);
        let second = Node::alloc(Mode::Exclusive);
        let third = Node::alloc(Mode::Exclusive);
        let head = unsafe { queue.enqueue(first) };
        unsafe { queue.enqueue(second) };
        unsafe { queue.enqueue(third) };
        unsafe { queue.cancel(first) };
        unsafe { queue.cancel(second) };
        assert_eq!(unsafe { queue.len() }, 1);
        let pred = unsafe { queue.skip_cancelled(third) };
        assert_eq!(pred, head);
        assert!(queue.is_head(pred));
    }

    #[test]
    fn set_head_promotes_node() {
        let queue = WaitQueue::new();
        let node = Node::alloc(Mode::Exclusive);
        let pred = unsafe { queue.enqueue(node) };
        unsafe { queue.set_head(node, pred) };
        assert!(queue.is_head(node));
        assert!(!queue.has_queued_threads());
    }

    #[test]
    fn signal_bumps_sequence() {
        let queue = WaitQueue::new();
        let seq = queue.signals();
        queue.signal();
        assert_eq!(queue.signals(), seq.wrapping_add(1));
    }
}

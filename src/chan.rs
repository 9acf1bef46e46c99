//! Typed channels and multi-way select.
//!
//! A channel is a fixed-capacity ring plus two unordered lists of pending
//! operations: parked senders and parked receivers. A capacity of 0 makes
//! every transfer a rendezvous between one sender and one receiver.
//!
//! [`Alt`] runs exactly one of several send/receive arms. If any arm can
//! complete right away, one of those is picked uniformly at random and run.
//! Otherwise every arm is queued on its channel and the task parks until a
//! counterpart completes one of them; the others are withdrawn at that moment.

use crate::error::{TryRecvError, TrySendError, WouldBlock, fatal};
use crate::runtime::core::with_core;
use crate::runtime::scheduler::{current, need_stack, park, set_state, unpark};
use crate::task::TaskRef;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Op {
    Send,
    Recv,
}

impl Op {
    fn counterpart(self) -> Op {
        match self {
            Op::Send => Op::Recv,
            Op::Recv => Op::Send,
        }
    }
}

/// Uniform pick in `0..n`. Does not touch the runtime when there is no
/// choice to make.
fn random(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        with_core(|core| core.random(n))
    }
}

/// Shared by every arm of one parked alt.
struct Selector {
    task: TaskRef,
    /// Index of the arm a counterpart completed.
    fired: Cell<Option<usize>>,
    /// How to withdraw each queued arm.
    queued: RefCell<Vec<Box<dyn Queued>>>,
}

impl Selector {
    /// Record that arm `index` completed, withdraw its siblings, wake the
    /// owner. The completed arm was already removed by the caller.
    fn fire(&self, index: usize) {
        self.fired.set(Some(index));

        let queued = self.queued.take();
        for arm in queued.iter().filter(|arm| arm.index() != index) {
            arm.dequeue(self);
        }

        unpark(self.task);
    }
}

/// A queued arm, with its element type erased.
trait Queued {
    fn index(&self) -> usize;
    fn dequeue(&self, sel: &Selector);
}

struct QueuedArm<T> {
    chan: Weak<RefCell<Chan<T>>>,
    op: Op,
    index: usize,
}

impl<T> Queued for QueuedArm<T> {
    fn index(&self) -> usize {
        self.index
    }

    fn dequeue(&self, sel: &Selector) {
        let Some(chan) = self.chan.upgrade() else {
            return;
        };

        let mut chan = chan.borrow_mut();
        let pending = chan.pending_mut(self.op);
        let found = pending
            .iter()
            .position(|p| p.index == self.index && std::ptr::eq(Rc::as_ptr(&p.sel), sel));

        match found {
            Some(i) => {
                pending.swap_remove(i);
            }
            None => fatal("cannot find self in alt dequeue"),
        }
    }
}

/// An operation parked on a channel.
struct Pending<T> {
    sel: Rc<Selector>,
    index: usize,
    /// The value to send, or where a received value is stored.
    slot: Rc<RefCell<Option<T>>>,
}

struct Chan<T> {
    buf: Box<[Option<T>]>,
    nbuf: usize,
    off: usize,
    senders: Vec<Pending<T>>,
    receivers: Vec<Pending<T>>,
}

impl<T> Chan<T> {
    fn new(capacity: usize) -> Self {
        Chan {
            buf: (0..capacity).map(|_| None).collect(),
            nbuf: 0,
            off: 0,
            senders: Vec::new(),
            receivers: Vec::new(),
        }
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }

    fn pending(&self, op: Op) -> &Vec<Pending<T>> {
        match op {
            Op::Send => &self.senders,
            Op::Recv => &self.receivers,
        }
    }

    fn pending_mut(&mut self, op: Op) -> &mut Vec<Pending<T>> {
        match op {
            Op::Send => &mut self.senders,
            Op::Recv => &mut self.receivers,
        }
    }

    /// Whether `op` can complete without parking.
    fn can_exec(&self, op: Op) -> bool {
        if self.capacity() == 0 {
            return !self.pending(op.counterpart()).is_empty();
        }

        match op {
            Op::Send => self.nbuf < self.capacity(),
            Op::Recv => self.nbuf > 0,
        }
    }

    /// Move one value from `send` to `recv`.
    ///
    /// With both sides present and an empty ring the value goes straight
    /// across. Otherwise the receiver takes the ring head and the sender
    /// appends at the tail, which keeps a full ring in FIFO order.
    fn transfer(&mut self, send: Option<&RefCell<Option<T>>>, recv: Option<&RefCell<Option<T>>>) {
        if let (Some(s), Some(r)) = (send, recv)
            && self.nbuf == 0
        {
            *r.borrow_mut() = s.borrow_mut().take();
            return;
        }

        if let Some(r) = recv {
            *r.borrow_mut() = self.buf[self.off].take();
            self.nbuf -= 1;
            self.off = (self.off + 1) % self.capacity();
        }

        if let Some(s) = send {
            let tail = (self.off + self.nbuf) % self.capacity();
            self.buf[tail] = s.borrow_mut().take();
            self.nbuf += 1;
        }
    }
}

/// Complete `op` for the running task, whose value (or destination) is
/// `slot`. The caller has checked `can_exec`.
fn exec<T>(chan: &RefCell<Chan<T>>, op: Op, slot: &RefCell<Option<T>>) {
    let partner = {
        let mut ch = chan.borrow_mut();
        let n = ch.pending(op.counterpart()).len();

        if n > 0 {
            let partner = ch.pending_mut(op.counterpart()).swap_remove(random(n));
            match op {
                Op::Send => ch.transfer(Some(slot), Some(&*partner.slot)),
                Op::Recv => ch.transfer(Some(&*partner.slot), Some(slot)),
            }
            Some(partner)
        } else {
            match op {
                Op::Send => ch.transfer(Some(slot), None),
                Op::Recv => ch.transfer(None, Some(slot)),
            }
            None
        }
    };

    // Siblings may sit on this same channel, so it must not be borrowed here.
    if let Some(partner) = partner {
        partner.sel.fire(partner.index);
    }
}

/// A channel carrying values of type `T`.
///
/// Cloning yields another handle to the same channel. Channels belong to the
/// thread that created them.
pub struct Channel<T> {
    inner: Rc<RefCell<Chan<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chan = self.inner.borrow();
        f.debug_struct("Channel")
            .field("capacity", &chan.capacity())
            .field("len", &chan.nbuf)
            .field("senders", &chan.senders.len())
            .field("receivers", &chan.receivers.len())
            .finish()
    }
}

impl<T: 'static> Channel<T> {
    /// Create a channel buffering up to `capacity` values.
    pub fn new(capacity: usize) -> Self {
        Channel {
            inner: Rc::new(RefCell::new(Chan::new(capacity))),
        }
    }

    /// Send `value`, parking until there is room or a receiver.
    pub fn send(&self, value: T) {
        Alt::new().send(self, value).select();
    }

    /// Receive a value, parking until one is available.
    pub fn recv(&self) -> T {
        let mut value = None;
        Alt::new().recv(self, &mut value).select();

        match value {
            Some(value) => value,
            None => fatal("channel receive completed without a value"),
        }
    }

    /// Send without parking. The value is handed back when no receiver is
    /// waiting and the buffer is full.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        if !self.inner.borrow().can_exec(Op::Send) {
            return Err(TrySendError::WouldBlock(value));
        }

        exec(&self.inner, Op::Send, &RefCell::new(Some(value)));
        Ok(())
    }

    /// Receive without parking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut value = None;
        Alt::new()
            .recv(self, &mut value)
            .try_select()
            .map_err(|_| TryRecvError::WouldBlock)?;

        value.ok_or(TryRecvError::WouldBlock)
    }
}

impl<T> Channel<T> {
    /// Values currently buffered.
    pub fn len(&self) -> usize {
        self.inner.borrow().nbuf
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity()
    }
}

/// One arm of an alt, with its element type erased.
trait Arm {
    fn can_exec(&self) -> bool;

    /// Complete the arm as the initiating side.
    fn exec(&mut self);

    /// Park the arm on its channel. `None` for arms that never complete.
    fn enqueue(&self, sel: &Rc<Selector>, index: usize) -> Option<Box<dyn Queued>>;

    /// Deliver the outcome once this arm was the one chosen.
    fn finish(self: Box<Self>);
}

struct SendArm<'a, T> {
    chan: &'a Channel<T>,
    slot: Rc<RefCell<Option<T>>>,
}

impl<T: 'static> Arm for SendArm<'_, T> {
    fn can_exec(&self) -> bool {
        self.chan.inner.borrow().can_exec(Op::Send)
    }

    fn exec(&mut self) {
        exec(&self.chan.inner, Op::Send, &self.slot);
    }

    fn enqueue(&self, sel: &Rc<Selector>, index: usize) -> Option<Box<dyn Queued>> {
        self.chan.inner.borrow_mut().senders.push(Pending {
            sel: sel.clone(),
            index,
            slot: self.slot.clone(),
        });

        Some(Box::new(QueuedArm {
            chan: Rc::downgrade(&self.chan.inner),
            op: Op::Send,
            index,
        }))
    }

    fn finish(self: Box<Self>) {}
}

struct RecvArm<'a, T> {
    chan: &'a Channel<T>,
    slot: Rc<RefCell<Option<T>>>,
    /// `None` discards the received value.
    dst: Option<&'a mut Option<T>>,
}

impl<T: 'static> Arm for RecvArm<'_, T> {
    fn can_exec(&self) -> bool {
        self.chan.inner.borrow().can_exec(Op::Recv)
    }

    fn exec(&mut self) {
        exec(&self.chan.inner, Op::Recv, &self.slot);
    }

    fn enqueue(&self, sel: &Rc<Selector>, index: usize) -> Option<Box<dyn Queued>> {
        self.chan.inner.borrow_mut().receivers.push(Pending {
            sel: sel.clone(),
            index,
            slot: self.slot.clone(),
        });

        Some(Box::new(QueuedArm {
            chan: Rc::downgrade(&self.chan.inner),
            op: Op::Recv,
            index,
        }))
    }

    fn finish(self: Box<Self>) {
        let RecvArm { slot, dst, .. } = *self;
        let value = slot.take();
        if let Some(dst) = dst {
            *dst = value;
        }
    }
}

/// Placeholder arm that is never executable.
struct NopArm;

impl Arm for NopArm {
    fn can_exec(&self) -> bool {
        false
    }

    fn exec(&mut self) {
        fatal("no-op alt arm executed");
    }

    fn enqueue(&self, _: &Rc<Selector>, _: usize) -> Option<Box<dyn Queued>> {
        None
    }

    fn finish(self: Box<Self>) {}
}

/// A multi-way select over channel operations.
///
/// Arms are numbered in the order they are added; `select` and `try_select`
/// return the number of the arm that ran. Values of send arms that did not
/// run are dropped.
///
/// ```no_run
/// use cotask::chan::{Alt, Channel};
///
/// cotask::block_on(|| {
///     let (a, b) = (Channel::<u32>::new(0), Channel::<u32>::new(1));
///     let mut got = None;
///     match Alt::new().recv(&a, &mut got).send(&b, 7).select() {
///         0 => println!("received {got:?}"),
///         _ => println!("sent"),
///     }
/// })
/// .unwrap();
/// ```
#[derive(Default)]
pub struct Alt<'a> {
    arms: Vec<Box<dyn Arm + 'a>>,
}

impl<'a> Alt<'a> {
    pub fn new() -> Self {
        Alt { arms: Vec::new() }
    }

    /// Add an arm sending `value` on `chan`.
    pub fn send<T: 'static>(mut self, chan: &'a Channel<T>, value: T) -> Self {
        self.arms.push(Box::new(SendArm {
            chan,
            slot: Rc::new(RefCell::new(Some(value))),
        }));
        self
    }

    /// Add an arm receiving from `chan` into `dst`.
    pub fn recv<T: 'static>(mut self, chan: &'a Channel<T>, dst: &'a mut Option<T>) -> Self {
        self.arms.push(Box::new(RecvArm {
            chan,
            slot: Rc::new(RefCell::new(None)),
            dst: Some(dst),
        }));
        self
    }

    /// Add an arm receiving from `chan` and dropping the value.
    pub fn recv_discard<T: 'static>(mut self, chan: &'a Channel<T>) -> Self {
        self.arms.push(Box::new(RecvArm {
            chan,
            slot: Rc::new(RefCell::new(None)),
            dst: None,
        }));
        self
    }

    /// Add an arm that never runs. Keeps arm numbering stable when an
    /// operation is conditionally disabled.
    pub fn nop(mut self) -> Self {
        self.arms.push(Box::new(NopArm));
        self
    }

    pub fn len(&self) -> usize {
        self.arms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Run one arm, parking until one can run.
    ///
    /// Aborts if no arm could ever run (every arm is a no-op).
    pub fn select(self) -> usize {
        match self.run(true) {
            Some(index) => index,
            None => fatal("alt returned without running an arm"),
        }
    }

    /// Run one arm if any can run right now.
    pub fn try_select(self) -> Result<usize, WouldBlock> {
        self.run(false).ok_or(WouldBlock)
    }

    fn run(mut self, can_block: bool) -> Option<usize> {
        need_stack(512);

        let ready: Vec<usize> = self
            .arms
            .iter()
            .enumerate()
            .filter(|(_, arm)| arm.can_exec())
            .map(|(i, _)| i)
            .collect();

        if !ready.is_empty() {
            let index = ready[random(ready.len())];
            let mut arm = self.arms.swap_remove(index);
            arm.exec();
            arm.finish();
            return Some(index);
        }

        if !can_block {
            return None;
        }

        let sel = Rc::new(Selector {
            task: current(),
            fired: Cell::new(None),
            queued: RefCell::new(Vec::new()),
        });

        let queued: Vec<_> = self
            .arms
            .iter()
            .enumerate()
            .filter_map(|(i, arm)| arm.enqueue(&sel, i))
            .collect();
        if queued.is_empty() {
            fatal("alt has no channel operations and would block forever");
        }
        *sel.queued.borrow_mut() = queued;

        set_state("chan");
        park();

        let Some(index) = sel.fired.get() else {
            fatal("alt resumed without a completed arm");
        };
        self.arms.swap_remove(index).finish();
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Builder, block_on, spawn, yield_now};
    use anyhow::Result;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    #[case(16)]
    fn test_single_producer_fifo(#[case] capacity: usize) -> Result<()> {
        let got = Rc::new(RefCell::new(Vec::new()));

        let g = got.clone();
        block_on(move || {
            let chan = Channel::new(capacity);

            let tx = chan.clone();
            spawn(move || {
                for i in 0..100 {
                    tx.send(i);
                }
            });

            for _ in 0..100 {
                g.borrow_mut().push(chan.recv());
            }
            assert!(chan.is_empty());
        })?;

        assert_eq!(*got.borrow(), (0..100).collect::<Vec<_>>());
        Ok(())
    }

    #[test]
    fn test_capacity_two_collects_in_order() -> Result<()> {
        let got = Rc::new(RefCell::new(Vec::new()));

        let g = got.clone();
        block_on(move || {
            let chan = Channel::new(2);

            let tx = chan.clone();
            spawn(move || {
                for i in 1..=5 {
                    tx.send(i);
                }
            });

            let rx = chan.clone();
            spawn(move || {
                for _ in 0..5 {
                    g.borrow_mut().push(rx.recv());
                }
            });
        })?;

        assert_eq!(*got.borrow(), vec![1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn test_many_senders_deliver_everything() -> Result<()> {
        let got = Rc::new(RefCell::new(Vec::new()));

        let g = got.clone();
        Builder::new().rng_seed(3).build().block_on(move || {
            let chan = Channel::new(1);
            for base in [0, 100, 200] {
                let tx = chan.clone();
                spawn(move || {
                    for i in base..base + 10 {
                        tx.send(i);
                    }
                });
            }
            for _ in 0..30 {
                g.borrow_mut().push(chan.recv());
            }
        })?;

        let mut got = got.take();
        got.sort();
        let want: Vec<_> = (0..10).chain(100..110).chain(200..210).collect();
        assert_eq!(got, want);
        Ok(())
    }

    #[test]
    fn test_try_ops_on_rendezvous_channel_would_block() -> Result<()> {
        block_on(|| {
            let chan = Channel::new(0);

            assert_eq!(chan.try_recv(), Err(TryRecvError::WouldBlock));
            let err = chan.try_send(5).expect_err("no receiver is waiting");
            assert_eq!(err.into_inner(), 5);

            assert!(chan.is_empty());
            assert_eq!(chan.capacity(), 0);
        })?;
        Ok(())
    }

    #[test]
    fn test_try_ops_outside_runtime() {
        let chan = Channel::new(1);

        assert!(chan.try_send("a").is_ok());
        assert_eq!(chan.len(), 1);
        assert!(matches!(chan.try_send("b"), Err(TrySendError::WouldBlock("b"))));
        assert_eq!(chan.try_recv(), Ok("a"));
        assert_eq!(chan.try_recv(), Err(TryRecvError::WouldBlock));
    }

    #[test]
    fn test_rendezvous_send_waits_for_receiver() -> Result<()> {
        let log = Rc::new(RefCell::new(Vec::new()));

        let l = log.clone();
        block_on(move || {
            let chan = Channel::new(0);

            let (tx, l2) = (chan.clone(), l.clone());
            spawn(move || {
                l2.borrow_mut().push("send");
                tx.send(());
                l2.borrow_mut().push("sent");
            });

            for _ in 0..3 {
                yield_now();
            }
            l.borrow_mut().push("recv");
            chan.recv();
        })?;

        assert_eq!(*log.borrow(), vec!["send", "recv", "sent"]);
        Ok(())
    }

    #[test]
    fn test_try_send_hands_off_to_parked_receiver() -> Result<()> {
        let got = Rc::new(Cell::new(0));

        let g = got.clone();
        block_on(move || {
            let chan = Channel::new(0);

            let rx = chan.clone();
            spawn(move || g.set(rx.recv()));
            yield_now();

            assert!(chan.try_send(9).is_ok());
        })?;

        assert_eq!(got.get(), 9);
        Ok(())
    }

    #[rstest]
    #[case(1)]
    #[case(42)]
    #[case(0xdead_beef)]
    fn test_alt_picks_every_ready_arm(#[case] seed: u64) -> Result<()> {
        let counts = Rc::new(RefCell::new([0usize; 2]));

        let c = counts.clone();
        Builder::new().rng_seed(seed).build().block_on(move || {
            let (a, b) = (Channel::new(1), Channel::new(1));
            for _ in 0..200 {
                let index = Alt::new().send(&a, 1).send(&b, 2).select();
                c.borrow_mut()[index] += 1;

                // Drain so both arms stay ready.
                a.try_recv().ok();
                b.try_recv().ok();
            }
        })?;

        let counts = counts.borrow();
        assert_eq!(counts[0] + counts[1], 200);
        assert!(counts.iter().all(|&n| n > 20), "unfair split {counts:?}");
        Ok(())
    }

    #[test]
    fn test_alt_with_nothing_ready_would_block() -> Result<()> {
        block_on(|| {
            let (a, b) = (Channel::<u8>::new(0), Channel::<u8>::new(1));
            let mut got = None;

            let res = Alt::new().recv(&a, &mut got).recv_discard(&b).nop().try_select();
            assert_eq!(res, Err(WouldBlock));
            assert!(got.is_none());
        })?;
        Ok(())
    }

    #[test]
    fn test_blocked_alt_withdraws_other_arms() -> Result<()> {
        let result = Rc::new(RefCell::new(None));

        let r = result.clone();
        block_on(move || {
            let (a, b) = (Channel::<u32>::new(0), Channel::<u32>::new(0));

            let (a2, b2) = (a.clone(), b.clone());
            spawn(move || {
                let mut from_a = None;
                let mut from_b = None;
                let index = Alt::new().recv(&a2, &mut from_a).recv(&b2, &mut from_b).select();
                *r.borrow_mut() = Some((index, from_a, from_b));
            });
            yield_now();

            assert_eq!(a.inner.borrow().receivers.len(), 1);
            assert_eq!(b.inner.borrow().receivers.len(), 1);

            b.send(11);
            assert!(a.inner.borrow().receivers.is_empty());
            assert!(b.inner.borrow().receivers.is_empty());

            // The withdrawn arm no longer counts as a receiver.
            assert!(a.try_send(1).is_err());
        })?;

        assert_eq!(*result.borrow(), Some((1, None, Some(11))));
        Ok(())
    }

    #[test]
    fn test_full_channel_keeps_order_with_parked_sender() -> Result<()> {
        let got = Rc::new(RefCell::new(Vec::new()));

        let g = got.clone();
        block_on(move || {
            let chan = Channel::new(2);
            chan.send(1);
            chan.send(2);

            let tx = chan.clone();
            spawn(move || tx.send(3));
            yield_now();
            assert_eq!(chan.inner.borrow().senders.len(), 1);

            // Taking the head lets the parked sender append at the tail.
            g.borrow_mut().push(chan.recv());
            assert_eq!(chan.len(), 2);
            g.borrow_mut().push(chan.recv());
            g.borrow_mut().push(chan.recv());
        })?;

        assert_eq!(*got.borrow(), vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_recv_discard_drops_value() -> Result<()> {
        block_on(|| {
            let chan = Channel::new(1);
            chan.send(String::from("gone"));

            assert_eq!(Alt::new().recv_discard(&chan).select(), 0);
            assert!(chan.is_empty());
        })?;
        Ok(())
    }

    #[test]
    fn test_blocked_receivers_deadlock() {
        let res = block_on(|| {
            let chan = Channel::<()>::new(0);
            chan.recv();
        });

        assert_eq!(res, Err(crate::error::RuntimeError::Deadlock { stalled: 1 }));
    }

    #[test]
    fn test_blocking_alt_of_only_nops_aborts() {
        crate::error::assert_fatal(
            concat!(module_path!(), "::test_blocking_alt_of_only_nops_aborts"),
            "alt has no channel operations",
            || {
                let _ = block_on(|| {
                    Alt::new().nop().nop().select();
                });
            },
        );
    }
}

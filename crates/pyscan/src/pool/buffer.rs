//! Bounded per-worker ring buffer.
//!
//! 256 slots indexed by monotonically increasing modular counters: `tail` is
//! written only by the owning worker, `head` is CASed by the owner and by
//! stealers. `tail - head` (wrapping) is the live size and never exceeds the
//! capacity. On overflow, the owner migrates half of the buffer into its
//! overflow queue as one linked list so older work keeps FIFO-ish fairness.
//!
//! Slot stores and loads use relaxed atomics; publication happens through
//! the Release store of `tail` (for stealers) and the Acquire CAS of `head`
//! (for claiming), matching the Chase-Lev-style deques this follows.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

use crossbeam_utils::Backoff;

use super::queue::{AcquireError, Queue};
use super::task::{Task, TaskList};

pub(crate) const CAPACITY: usize = 256;
const MASK: u32 = CAPACITY as u32 - 1;

// Power-of-two capacity turns `index % capacity` into a mask.
const _: () = assert!(CAPACITY.is_power_of_two());

/// Result of taking work into this buffer from elsewhere.
pub(crate) struct Stole {
    pub task: NonNull<Task>,
    /// True when the operation also left extra tasks in this buffer, i.e.
    /// other workers now have something to steal here.
    pub pushed: bool,
}

pub(crate) struct Buffer {
    head: AtomicU32,
    tail: AtomicU32,
    slots: [AtomicPtr<Task>; CAPACITY],
}

impl Buffer {
    pub fn new() -> Buffer {
        Buffer {
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            slots: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
        }
    }

    fn slot(&self, index: u32) -> &AtomicPtr<Task> {
        &self.slots[(index & MASK) as usize]
    }

    /// Owner-only: push a chain into the buffer.
    ///
    /// On overflow, half of the buffer is claimed and linked in front of the
    /// remaining `batch` chain; the caller pushes the combined list to the
    /// overflow queue. `batch` is left empty on success.
    pub fn push(&self, batch: &mut TaskListBuilder) -> Result<(), Overflow> {
        let mut head = self.head.load(Ordering::Relaxed);
        // Owner-only counter; no other thread writes tail.
        let mut tail = self.tail.load(Ordering::Relaxed);
        let backoff = Backoff::new();

        loop {
            let size = tail.wrapping_sub(head);
            debug_assert!(size <= CAPACITY as u32);

            if size < CAPACITY as u32 {
                // Fill free slots from the chain.
                let mut next = batch.head;
                while tail.wrapping_sub(head) < CAPACITY as u32 {
                    let Some(task) = next else { break };
                    // Safety: the chain is ours until the task is published
                    // via the tail store below.
                    next = unsafe { task.as_ref().next.get() };
                    self.slot(tail).store(task.as_ptr(), Ordering::Relaxed);
                    tail = tail.wrapping_add(1);
                }

                // Release publishes the slot writes to stealers.
                self.tail.store(tail, Ordering::Release);

                match next {
                    None => {
                        batch.clear();
                        return Ok(());
                    }
                    Some(rest) => {
                        // More chain than free slots: re-read head and retry.
                        batch.head = Some(rest);
                        backoff.spin();
                        head = self.head.load(Ordering::Relaxed);
                        continue;
                    }
                }
            }

            // Buffer full: claim half for migration. Acquire so the linking
            // below happens strictly after the claim.
            let migrate = size / 2;
            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(migrate),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Err(updated) => {
                    head = updated;
                    continue;
                }
                Ok(_) => {
                    // Link the claimed slots into one chain, then append the
                    // unpushed remainder of the batch behind them.
                    let first = self.slot(head).load(Ordering::Relaxed);
                    let mut remaining = migrate;
                    while remaining > 0 {
                        remaining -= 1;
                        let prev = self.slot(head).load(Ordering::Relaxed);
                        head = head.wrapping_add(1);
                        let link = self.slot(head).load(Ordering::Relaxed);
                        // Safety: claimed slots are exclusively ours now.
                        unsafe { (*prev).next.set(NonNull::new(link)) };
                    }

                    let last = self.slot(head.wrapping_sub(1)).load(Ordering::Relaxed);
                    // Safety: `last` is the final claimed task; `batch.tail`
                    // terminates the combined chain.
                    unsafe {
                        (*last).next.set(batch.head);
                        if let Some(tail_task) = batch.tail {
                            tail_task.as_ref().next.set(None);
                        }
                    }

                    batch.head = NonNull::new(first);
                    return Err(Overflow);
                }
            }
        }
    }

    /// Owner-only: pop the oldest task.
    pub fn pop(&self) -> Option<NonNull<Task>> {
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        loop {
            let size = tail.wrapping_sub(head);
            debug_assert!(size <= CAPACITY as u32);
            if size == 0 {
                return None;
            }

            // Acquire so the claimed task is read only after the claim.
            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return NonNull::new(self.slot(head).load(Ordering::Relaxed)),
                Err(updated) => head = updated,
            }
        }
    }

    /// Owner-only, and only while this buffer is empty: drain up to a
    /// buffer's worth of tasks from `queue` into this buffer, returning one
    /// of them. `pushed` reports whether any tasks were left in the buffer.
    pub fn consume(&self, queue: &Queue) -> Option<Stole> {
        let mut consumer = match queue.try_acquire_consumer() {
            Ok(consumer) => consumer,
            Err(AcquireError::Empty | AcquireError::Contended) => return None,
        };

        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        debug_assert_eq!(tail.wrapping_sub(head), 0, "consume requires an empty buffer");

        let mut pushed: u32 = 0;
        while (pushed as usize) < CAPACITY {
            let Some(task) = consumer.pop() else { break };
            self.slot(tail.wrapping_add(pushed))
                .store(task.as_ptr(), Ordering::Relaxed);
            pushed = pushed.wrapping_add(1);
        }

        // Return one extra task; fall back to the newest buffered one.
        let task = match consumer.pop() {
            Some(task) => Some(task),
            None => {
                if pushed == 0 {
                    return None;
                }
                pushed -= 1;
                NonNull::new(self.slot(tail.wrapping_add(pushed)).load(Ordering::Relaxed))
            }
        }?;

        // Publish the drained tasks to stealers.
        if pushed > 0 {
            self.tail
                .store(tail.wrapping_add(pushed), Ordering::Release);
        }
        Some(Stole {
            task,
            pushed: pushed > 0,
        })
    }

    /// Only while this buffer is empty: steal half of `victim`'s tasks into
    /// this buffer, returning one of them.
    pub fn steal(&self, victim: &Buffer) -> Option<Stole> {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        debug_assert_eq!(tail.wrapping_sub(head), 0, "steal requires an empty buffer");

        let backoff = Backoff::new();
        loop {
            let victim_head = victim.head.load(Ordering::Acquire);
            let victim_tail = victim.tail.load(Ordering::Acquire);

            // A torn read (tail raced far ahead of the loaded head) shows up
            // as an impossible size; reload and retry.
            let victim_size = victim_tail.wrapping_sub(victim_head);
            if victim_size > CAPACITY as u32 {
                backoff.spin();
                continue;
            }

            // Take the larger half.
            let steal_size = victim_size - (victim_size / 2);
            if steal_size == 0 {
                return None;
            }

            // Copy before committing; the CAS below validates that the
            // copied range was still live.
            for offset in 0..steal_size {
                let task = victim
                    .slot(victim_head.wrapping_add(offset))
                    .load(Ordering::Relaxed);
                self.slot(tail.wrapping_add(offset))
                    .store(task, Ordering::Relaxed);
            }

            // AcqRel: the copies above must precede the commit, and the
            // stolen tasks are touched only after it succeeds.
            match victim.head.compare_exchange(
                victim_head,
                victim_head.wrapping_add(steal_size),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Err(_) => {
                    backoff.spin();
                    continue;
                }
                Ok(_) => {
                    let pushed = steal_size - 1;
                    let task =
                        NonNull::new(self.slot(tail.wrapping_add(pushed)).load(Ordering::Relaxed))?;
                    if pushed > 0 {
                        self.tail
                            .store(tail.wrapping_add(pushed), Ordering::Release);
                    }
                    return Some(Stole {
                        task,
                        pushed: pushed > 0,
                    });
                }
            }
        }
    }
}

/// A detachable task chain under construction: the ring's mutable view of a
/// batch during push/migration.
pub(crate) struct TaskListBuilder {
    pub head: Option<NonNull<Task>>,
    pub tail: Option<NonNull<Task>>,
}

impl TaskListBuilder {
    pub fn from_list(list: TaskList) -> TaskListBuilder {
        TaskListBuilder {
            head: Some(list.head),
            tail: Some(list.tail),
        }
    }

    pub fn take_list(&mut self) -> Option<TaskList> {
        let head = self.head.take()?;
        let tail = self.tail.take()?;
        Some(TaskList { head, tail })
    }

    fn clear(&mut self) {
        self.head = None;
        self.tail = None;
    }
}

/// The buffer was full; the migrated chain now lives in the builder.
#[derive(Debug)]
pub(crate) struct Overflow;

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn nop(_task: NonNull<Task>) {}

    fn builder_of(tasks: &[Task]) -> TaskListBuilder {
        for window in tasks.windows(2) {
            window[0].next.set(Some(NonNull::from(&window[1])));
        }
        tasks.last().expect("non-empty").next.set(None);
        TaskListBuilder {
            head: Some(NonNull::from(&tasks[0])),
            tail: Some(NonNull::from(&tasks[tasks.len() - 1])),
        }
    }

    fn chain_len(mut node: Option<NonNull<Task>>) -> usize {
        let mut len = 0;
        while let Some(task) = node {
            len += 1;
            node = unsafe { task.as_ref() }.next.get();
        }
        len
    }

    #[test]
    fn test_push_then_pop_fifo() {
        let buffer = Buffer::new();
        let tasks: Vec<Task> = (0..3).map(|_| Task::new(nop)).collect();
        let mut batch = builder_of(&tasks);
        buffer.push(&mut batch).expect("fits");
        assert!(batch.head.is_none());

        for expected in &tasks {
            let popped = buffer.pop().expect("task available");
            assert!(std::ptr::eq(popped.as_ptr(), expected));
        }
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let buffer = Buffer::new();
        let tasks: Vec<Task> = (0..CAPACITY).map(|_| Task::new(nop)).collect();
        let mut batch = builder_of(&tasks);
        buffer.push(&mut batch).expect("exactly capacity fits");

        let head = buffer.head.load(Ordering::Relaxed);
        let tail = buffer.tail.load(Ordering::Relaxed);
        assert_eq!(tail.wrapping_sub(head), CAPACITY as u32);
    }

    #[test]
    fn test_overflow_migrates_half_plus_batch() {
        let buffer = Buffer::new();
        let fill: Vec<Task> = (0..CAPACITY).map(|_| Task::new(nop)).collect();
        let mut batch = builder_of(&fill);
        buffer.push(&mut batch).expect("fits");

        let extra: Vec<Task> = (0..4).map(|_| Task::new(nop)).collect();
        let mut overflow_batch = builder_of(&extra);
        assert!(buffer.push(&mut overflow_batch).is_err(), "buffer was full");

        // The overflow chain holds half the buffer plus the new tasks, and
        // the oldest buffered task leads it.
        let list = overflow_batch.take_list().expect("chain present");
        assert_eq!(chain_len(Some(list.head)), CAPACITY / 2 + 4);
        assert!(std::ptr::eq(list.head.as_ptr(), &fill[0]));
        assert!(std::ptr::eq(list.tail.as_ptr(), &extra[3]));

        // The buffer kept the newer half.
        let head = buffer.head.load(Ordering::Relaxed);
        let tail = buffer.tail.load(Ordering::Relaxed);
        assert_eq!(tail.wrapping_sub(head), (CAPACITY / 2) as u32);
    }

    #[test]
    fn test_steal_takes_larger_half() {
        let victim = Buffer::new();
        let tasks: Vec<Task> = (0..5).map(|_| Task::new(nop)).collect();
        let mut batch = builder_of(&tasks);
        victim.push(&mut batch).expect("fits");

        let thief = Buffer::new();
        let stole = thief.steal(&victim).expect("victim has tasks");
        // ceil(5 / 2) = 3 stolen: one returned, two buffered.
        assert!(stole.pushed);
        assert!(std::ptr::eq(stole.task.as_ptr(), &tasks[2]));
        assert!(thief.pop().is_some());
        assert!(thief.pop().is_some());
        assert!(thief.pop().is_none());

        // Victim keeps the rest.
        assert!(victim.pop().is_some());
        assert!(victim.pop().is_some());
        assert!(victim.pop().is_none());
    }

    #[test]
    fn test_steal_from_empty_victim() {
        let victim = Buffer::new();
        let thief = Buffer::new();
        assert!(thief.steal(&victim).is_none());
    }

    #[test]
    fn test_steal_single_task_does_not_set_pushed() {
        let victim = Buffer::new();
        let task = Task::new(nop);
        let mut batch = builder_of(std::slice::from_ref(&task));
        victim.push(&mut batch).expect("fits");

        let thief = Buffer::new();
        let stole = thief.steal(&victim).expect("one task");
        assert!(!stole.pushed);
        assert!(std::ptr::eq(stole.task.as_ptr(), &task));
        assert!(victim.pop().is_none());
    }

    #[test]
    fn test_consume_drains_queue_into_buffer() {
        let queue = Queue::new();
        let tasks: Vec<Task> = (0..10).map(|_| Task::new(nop)).collect();
        let mut batch = builder_of(&tasks);
        queue.push(batch.take_list().expect("list"));

        let buffer = Buffer::new();
        let stole = buffer.consume(&queue).expect("queue has tasks");
        assert!(stole.pushed);

        let mut total = 1;
        while buffer.pop().is_some() {
            total += 1;
        }
        assert_eq!(total, 10);
        assert!(buffer.consume(&queue).is_none(), "queue fully drained");
    }

    #[test]
    fn test_consume_single_task_not_pushed() {
        let queue = Queue::new();
        let task = Task::new(nop);
        let mut batch = builder_of(std::slice::from_ref(&task));
        queue.push(batch.take_list().expect("list"));

        let buffer = Buffer::new();
        let stole = buffer.consume(&queue).expect("one task");
        assert!(!stole.pushed);
        assert!(buffer.pop().is_none());
    }
}

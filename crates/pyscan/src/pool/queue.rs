//! Unbounded multi-producer, single-consumer intrusive task queue.
//!
//! One atomic word encodes everything: the head pointer of a Treiber-style
//! push stack in the upper bits, plus two low flag bits. `IS_CONSUMING`
//! grants its holder exclusive consumer access; `HAS_CACHE` records that a
//! previous consumer left a privately detached chain in `cache`. When a
//! consumer acquires the queue and the cache is empty, it adopts the entire
//! push stack as its cache in the same CAS.
//!
//! Ordering: producers push LIFO onto the stack; a consumer drains its
//! adopted cache in the stack's reversed (FIFO-ish) order only to the extent
//! the pushers linked whole lists — per-queue consumption order is exactly
//! the order links were adopted, which the pool treats as unordered anyway.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::task::{Task, TaskList};

const HAS_CACHE: usize = 0b01;
const IS_CONSUMING: usize = 0b10;
const PTR_MASK: usize = !(HAS_CACHE | IS_CONSUMING);

// Task addresses must leave the two flag bits clear.
const _: () = assert!(std::mem::align_of::<Task>() > (HAS_CACHE | IS_CONSUMING));

pub(crate) struct Queue {
    stack: AtomicUsize,
    /// Consumer-private chain; guarded by the `IS_CONSUMING` bit.
    cache: UnsafeCell<Option<NonNull<Task>>>,
}

// Safety: `cache` is only accessed by the thread holding the consumer bit.
unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

pub(crate) enum AcquireError {
    /// Nothing cached and nothing pushed.
    Empty,
    /// Another consumer currently holds the queue.
    Contended,
}

impl Queue {
    pub const fn new() -> Queue {
        Queue {
            stack: AtomicUsize::new(0),
            cache: UnsafeCell::new(None),
        }
    }

    /// Push a linked chain. Callable from any thread.
    pub fn push(&self, list: TaskList) {
        let mut stack = self.stack.load(Ordering::Relaxed);
        loop {
            // Attach the current stack behind the new list, then swing the
            // head to the list while preserving the consumer flag bits.
            // Safety: the submitter keeps list members alive; the tail's
            // link is ours to write until the push CAS succeeds.
            unsafe {
                list.tail
                    .as_ref()
                    .next
                    .set(NonNull::new((stack & PTR_MASK) as *mut Task));
            }

            let new_stack = (list.head.as_ptr() as usize) | (stack & !PTR_MASK);
            debug_assert_eq!(list.head.as_ptr() as usize & !PTR_MASK, 0);

            // Release pairs with the Acquire in try_acquire_consumer()/pop()
            // so the consumer observes the links just written.
            match self.stack.compare_exchange_weak(
                stack,
                new_stack,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(updated) => stack = updated,
            }
        }
    }

    /// Acquire exclusive consumer access, adopting the pushed stack as the
    /// cache when no cache exists yet. Released by dropping the guard.
    pub fn try_acquire_consumer(&self) -> Result<Consumer<'_>, AcquireError> {
        let mut stack = self.stack.load(Ordering::Relaxed);
        loop {
            if stack & IS_CONSUMING != 0 {
                return Err(AcquireError::Contended);
            }
            if stack & (HAS_CACHE | PTR_MASK) == 0 {
                return Err(AcquireError::Empty);
            }

            let mut new_stack = stack | HAS_CACHE | IS_CONSUMING;
            if stack & HAS_CACHE == 0 {
                debug_assert_ne!(stack & PTR_MASK, 0);
                new_stack &= !PTR_MASK;
            }

            // Acquire pairs with the previous consumer's Release so the
            // cache write (and pushed links) are visible.
            match self.stack.compare_exchange_weak(
                stack,
                new_stack,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // Safety: we now hold the consumer bit.
                    let cached = unsafe { *self.cache.get() };
                    let current = match cached {
                        Some(task) => Some(task),
                        None => NonNull::new((stack & PTR_MASK) as *mut Task),
                    };
                    return Ok(Consumer {
                        queue: self,
                        current,
                    });
                }
                Err(updated) => stack = updated,
            }
        }
    }
}

/// Exclusive consumer guard; releases the consumer bit on drop.
pub(crate) struct Consumer<'a> {
    queue: &'a Queue,
    current: Option<NonNull<Task>>,
}

impl Consumer<'_> {
    /// Pop one task: first from the private chain, then by grabbing
    /// everything pushed since acquisition.
    pub fn pop(&mut self) -> Option<NonNull<Task>> {
        if let Some(task) = self.current {
            // Safety: tasks in the consumer chain are exclusively ours.
            self.current = unsafe { task.as_ref().next.get() };
            return Some(task);
        }

        let stack = self.queue.stack.load(Ordering::Relaxed);
        debug_assert_ne!(stack & IS_CONSUMING, 0);
        if stack & PTR_MASK == 0 {
            return None;
        }

        // Take the whole pushed stack; Acquire pairs with push()'s Release.
        let stack = self
            .queue
            .stack
            .swap(HAS_CACHE | IS_CONSUMING, Ordering::Acquire);
        debug_assert_ne!(stack & IS_CONSUMING, 0);
        debug_assert_ne!(stack & PTR_MASK, 0);

        let task = NonNull::new((stack & PTR_MASK) as *mut Task)?;
        // Safety: the swapped-out chain is exclusively ours.
        self.current = unsafe { task.as_ref().next.get() };
        Some(task)
    }
}

impl Drop for Consumer<'_> {
    fn drop(&mut self) {
        // Leave the remaining chain for the next consumer; clear HAS_CACHE
        // when nothing remains so the next acquisition adopts the stack.
        let mut remove = IS_CONSUMING;
        if self.current.is_none() {
            remove |= HAS_CACHE;
        }

        // Safety: we still hold the consumer bit until the fetch_sub below.
        unsafe { *self.queue.cache.get() = self.current };

        // Release pairs with the next consumer's Acquire.
        let stack = self.queue.stack.fetch_sub(remove, Ordering::Release);
        debug_assert_ne!(stack & remove, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    unsafe fn nop(_task: NonNull<Task>) {}

    fn list_of(tasks: &[Task]) -> TaskList {
        for window in tasks.windows(2) {
            window[0].next.set(Some(NonNull::from(&window[1])));
        }
        tasks.last().expect("non-empty").next.set(None);
        TaskList {
            head: NonNull::from(&tasks[0]),
            tail: NonNull::from(&tasks[tasks.len() - 1]),
        }
    }

    #[test]
    fn test_empty_queue_reports_empty() {
        let queue = Queue::new();
        assert!(matches!(
            queue.try_acquire_consumer().err(),
            Some(AcquireError::Empty)
        ));
    }

    #[test]
    fn test_push_then_drain() {
        let queue = Queue::new();
        let tasks: Vec<Task> = (0..3).map(|_| Task::new(nop)).collect();
        queue.push(list_of(&tasks));

        let mut consumer = queue.try_acquire_consumer().ok().expect("acquire");
        let mut popped = Vec::new();
        while let Some(task) = consumer.pop() {
            popped.push(task.as_ptr() as *const Task);
        }
        assert_eq!(popped.len(), 3);
        // A single pushed list is adopted in its own order.
        assert_eq!(popped[0], &tasks[0] as *const Task);
        assert_eq!(popped[2], &tasks[2] as *const Task);
        drop(consumer);
        assert!(matches!(
            queue.try_acquire_consumer().err(),
            Some(AcquireError::Empty)
        ));
    }

    #[test]
    fn test_consumer_bit_is_exclusive() {
        let queue = Queue::new();
        let tasks: Vec<Task> = (0..2).map(|_| Task::new(nop)).collect();
        queue.push(list_of(&tasks));

        let consumer = queue.try_acquire_consumer().ok().expect("first consumer");
        assert!(matches!(
            queue.try_acquire_consumer().err(),
            Some(AcquireError::Contended)
        ));
        drop(consumer);
        // Releasing with tasks still cached keeps the queue non-empty.
        assert!(queue.try_acquire_consumer().is_ok());
    }

    #[test]
    fn test_partial_drain_leaves_cache_for_next_consumer() {
        let queue = Queue::new();
        let tasks: Vec<Task> = (0..4).map(|_| Task::new(nop)).collect();
        queue.push(list_of(&tasks));

        let mut consumer = queue.try_acquire_consumer().ok().expect("acquire");
        let first = consumer.pop().expect("first");
        drop(consumer);

        let mut consumer = queue.try_acquire_consumer().ok().expect("reacquire");
        let mut rest = 0;
        while consumer.pop().is_some() {
            rest += 1;
        }
        assert_eq!(rest, 3);
        assert_ne!(first.as_ptr() as *const Task, std::ptr::null());
    }

    #[test]
    fn test_pushes_during_consumption_are_picked_up() {
        let queue = Queue::new();
        let first: Vec<Task> = (0..2).map(|_| Task::new(nop)).collect();
        let second: Vec<Task> = (0..2).map(|_| Task::new(nop)).collect();
        queue.push(list_of(&first));

        let mut consumer = queue.try_acquire_consumer().ok().expect("acquire");
        assert!(consumer.pop().is_some());
        // Producers may push while a consumer holds the bit.
        queue.push(list_of(&second));
        let mut drained = 1;
        while consumer.pop().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 4);
    }
}

//! Task & scheduler (C6).
//!
//! A fixed arena of [`MAX_TASKS`] slots (no heap allocation on the task
//! path), a single FIFO ready queue, and round-robin dispatch with a
//! per-task time slice. Priority is accepted and stored but does not yet
//! affect dispatch order, per the spec's deferred-extension note.

use spin::Mutex;

use crate::arch::context::Context;
use crate::error::{KernelError, KernelResult};
use crate::sync::once_lock::GlobalState;

pub const MAX_TASKS: usize = 64;
const KERNEL_STACK_SIZE: usize = 16 * 1024;
const DEFAULT_TIME_SLICE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unused,
    Ready,
    Running,
    Blocked,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Priority(pub u8);

impl Priority {
    pub const NORMAL: Self = Self(100);
}

struct TaskSlot {
    state: TaskState,
    context: Context,
    stack: [u8; KERNEL_STACK_SIZE],
    name: [u8; 32],
    name_len: usize,
    priority: Priority,
    time_slice: u32,
    exit_code: i32,
    /// Generation counter, bumped on every reuse, folded into the public
    /// [`TaskId`] so a stale id from a terminated task can't address its
    /// slot's next occupant.
    generation: u32,
}

impl TaskSlot {
    const fn unused() -> Self {
        Self {
            state: TaskState::Unused,
            context: Context::empty(),
            stack: [0; KERNEL_STACK_SIZE],
            name: [0; 32],
            name_len: 0,
            priority: Priority::NORMAL,
            time_slice: DEFAULT_TIME_SLICE,
            exit_code: 0,
            generation: 0,
        }
    }
}

fn encode_id(slot: usize, generation: u32) -> TaskId {
    TaskId(((generation & 0x00FF_FFFF) << 8) | slot as u32)
}

fn decode_id(id: TaskId) -> (usize, u32) {
    ((id.0 & 0xFF) as usize, id.0 >> 8)
}

struct Scheduler {
    tasks: [TaskSlot; MAX_TASKS],
    ready: [usize; MAX_TASKS],
    ready_head: usize,
    ready_len: usize,
    current: Option<usize>,
}

impl Scheduler {
    fn new() -> Self {
        const UNUSED: TaskSlot = TaskSlot::unused();
        Self {
            tasks: [UNUSED; MAX_TASKS],
            ready: [0; MAX_TASKS],
            ready_head: 0,
            ready_len: 0,
            current: None,
        }
    }

    fn enqueue_ready(&mut self, slot: usize) {
        let idx = (self.ready_head + self.ready_len) % MAX_TASKS;
        self.ready[idx] = slot;
        self.ready_len += 1;
    }

    fn dequeue_ready(&mut self) -> Option<usize> {
        if self.ready_len == 0 {
            return None;
        }
        let slot = self.ready[self.ready_head];
        self.ready_head = (self.ready_head + 1) % MAX_TASKS;
        self.ready_len -= 1;
        Some(slot)
    }

    fn spawn(
        &mut self,
        entry: fn(usize) -> i32,
        arg: usize,
        name: &str,
        priority: Priority,
    ) -> KernelResult<TaskId> {
        let slot = self
            .tasks
            .iter()
            .position(|t| t.state == TaskState::Unused)
            .ok_or(KernelError::ResourceExhausted { resource: "task_table" })?;

        let task = &mut self.tasks[slot];
        task.generation = task.generation.wrapping_add(1);
        task.state = TaskState::Ready;
        task.priority = priority;
        task.time_slice = DEFAULT_TIME_SLICE;
        task.exit_code = 0;
        let bytes = name.as_bytes();
        task.name_len = bytes.len().min(task.name.len());
        task.name[..task.name_len].copy_from_slice(&bytes[..task.name_len]);

        let stack_top = task.stack.as_ptr() as usize + KERNEL_STACK_SIZE;
        task.context = Context::new(stack_top, entry as usize, arg);

        self.enqueue_ready(slot);
        Ok(encode_id(slot, task.generation))
    }

    fn slot_for(&self, id: TaskId) -> Option<usize> {
        let (slot, generation) = decode_id(id);
        let task = self.tasks.get(slot)?;
        if task.generation == generation && task.state != TaskState::Unused {
            Some(slot)
        } else {
            None
        }
    }

    /// Pick the next ready task to dispatch. `None` means nothing is
    /// runnable.
    fn pick_next(&mut self) -> Option<usize> {
        let next = self.dequeue_ready()?;
        self.current = Some(next);
        self.tasks[next].state = TaskState::Running;
        Some(next)
    }
}

static SCHEDULER: GlobalState<Mutex<Scheduler>> = GlobalState::new();

pub fn init() -> KernelResult<()> {
    SCHEDULER
        .init(Mutex::new(Scheduler::new()))
        .map_err(|_| KernelError::AlreadyExists { resource: "scheduler", id: 0 })?;
    crate::kprintln!("[SCHED] scheduler initialized, {} task slots", MAX_TASKS);
    Ok(())
}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> KernelResult<R> {
    SCHEDULER
        .with_mut(f)
        .ok_or(KernelError::NotInitialized { subsystem: "scheduler" })
}

/// Create a task, allocate its kernel stack, and enqueue it ready to run.
pub fn spawn(
    entry: fn(usize) -> i32,
    arg: usize,
    name: &str,
    priority: Priority,
) -> KernelResult<TaskId> {
    let _guard = crate::sync::CriticalSection::enter();
    with_scheduler(|s| s.spawn(entry, arg, name, priority))?
}

/// Switch execution from `from_ctx` to whichever task's context `to_ctx`
/// points at. Callers hold no lock across the switch itself: the scheduler
/// lock is released before the architecture context switch happens, since
/// the outgoing task won't run again until it's rescheduled.
unsafe fn switch(from_ctx: *mut Context, to_ctx: *const Context) {
    // SAFETY: both contexts belong to live task slots in the fixed arena;
    // the caller has arranged for interrupts to be masked for the duration.
    #[cfg(target_arch = "x86_64")]
    unsafe {
        crate::arch::x86_64::context::context_switch(from_ctx, to_ctx);
    }
    #[cfg(target_arch = "aarch64")]
    unsafe {
        crate::arch::aarch64::context::context_switch(from_ctx, to_ctx);
    }
}

/// Voluntarily cede the CPU. The current task moves to the tail of the
/// ready queue and the next task (possibly the same one, if it's alone) is
/// dispatched.
pub fn yield_now() {
    let _guard = crate::sync::CriticalSection::enter();
    reschedule(false);
}

/// Terminate the current task, release its stack (by marking the slot
/// reusable), and dispatch the next runnable task. Never returns.
pub fn exit(code: i32) -> ! {
    {
        let _guard = crate::sync::CriticalSection::enter();
        let _ = with_scheduler(|s| {
            if let Some(cur) = s.current {
                s.tasks[cur].exit_code = code;
                s.tasks[cur].state = TaskState::Terminated;
            }
        });
    }
    reschedule(true);
    unreachable!("exit: no task left to resume onto");
}

/// Move the current task to `Blocked` and dispatch the next runnable task.
pub fn block() {
    let _guard = crate::sync::CriticalSection::enter();
    let _ = with_scheduler(|s| {
        if let Some(cur) = s.current {
            s.tasks[cur].state = TaskState::Blocked;
        }
    });
    reschedule(false);
}

/// Move a blocked task back to `Ready` and onto the tail of the queue.
pub fn wake(id: TaskId) -> KernelResult<()> {
    let _guard = crate::sync::CriticalSection::enter();
    with_scheduler(|s| {
        let slot = s.slot_for(id).ok_or(KernelError::TaskNotFound { id: id.0 as u64 })?;
        if s.tasks[slot].state == TaskState::Blocked {
            s.tasks[slot].state = TaskState::Ready;
            s.enqueue_ready(slot);
        }
        Ok(())
    })?
}

pub fn current() -> Option<TaskId> {
    with_scheduler(|s| s.current.map(|slot| encode_id(slot, s.tasks[slot].generation))).ok()?
}

/// Block the caller until task `id` has exited, then return its exit code
/// and return its slot to the free arena. Polls rather than parking on a
/// wait list, since a terminated task's slot already carries everything a
/// waiter needs.
pub fn wait(id: TaskId) -> KernelResult<i32> {
    loop {
        let outcome = with_scheduler(|s| -> KernelResult<Option<i32>> {
            let slot = s.slot_for(id).ok_or(KernelError::TaskNotFound { id: id.0 as u64 })?;
            if s.tasks[slot].state == TaskState::Terminated {
                let code = s.tasks[slot].exit_code;
                s.tasks[slot].state = TaskState::Unused;
                Ok(Some(code))
            } else {
                Ok(None)
            }
        })??;
        if let Some(code) = outcome {
            return Ok(code);
        }
        yield_now();
    }
}

/// Called from the timer IRQ handler on every tick: decrements the current
/// task's slice and rotates the ready queue on expiry.
pub fn on_tick() {
    let expired = with_scheduler(|s| {
        if let Some(cur) = s.current {
            if s.tasks[cur].state == TaskState::Running {
                s.tasks[cur].time_slice = s.tasks[cur].time_slice.saturating_sub(1);
                return s.tasks[cur].time_slice == 0;
            }
        }
        false
    })
    .unwrap_or(false);
    if expired {
        yield_now();
    }
}

/// Put the outgoing task back on the ready queue (unless it just exited or
/// blocked) and dispatch the next one, context-switching into it.
fn reschedule(outgoing_terminated_or_blocked: bool) {
    let outgoing = with_scheduler(|s| s.current).unwrap_or(None);

    let next = with_scheduler(|s| {
        if !outgoing_terminated_or_blocked {
            if let Some(cur) = outgoing {
                if s.tasks[cur].state == TaskState::Running {
                    s.tasks[cur].state = TaskState::Ready;
                    s.tasks[cur].time_slice = DEFAULT_TIME_SLICE;
                    s.enqueue_ready(cur);
                }
            }
        }
        s.pick_next()
    });

    let Ok(Some(next_slot)) = next else {
        if outgoing_terminated_or_blocked {
            crate::arch::idle();
        }
        return;
    };

    if Some(next_slot) == outgoing && !outgoing_terminated_or_blocked {
        // Only one runnable task: nothing to switch.
        return;
    }

    let from_ptr: *mut Context = match outgoing {
        Some(slot) if !outgoing_terminated_or_blocked => {
            with_scheduler(|s| &mut s.tasks[slot].context as *mut Context).unwrap_or(core::ptr::null_mut())
        }
        _ => core::ptr::null_mut(),
    };
    let to_ptr: *const Context =
        with_scheduler(|s| &s.tasks[next_slot].context as *const Context).unwrap_or(core::ptr::null());

    if from_ptr.is_null() {
        // No valid outgoing context to save into (first dispatch, or the
        // outgoing task is gone): load the incoming task directly.
        let mut scratch = Context::empty();
        unsafe { switch(&mut scratch as *mut Context, to_ptr) };
    } else {
        unsafe { switch(from_ptr, to_ptr) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrips_through_encoding() {
        let id = encode_id(5, 3);
        assert_eq!(decode_id(id), (5, 3));
    }
}

//! End-to-end kernel scenarios

use coop_rtos::config::MAX_TASKS;
use coop_rtos::{
    Error, Kernel, KernelConfig, Priority, QueueId, SemaphoreId, TaskId, TaskState, WakeReason, WAIT_FOREVER,
};

const INBOX: QueueId = QueueId(0);
const OUTBOX: QueueId = QueueId(1);
const LOCK: SemaphoreId = SemaphoreId(0);

fn kernel() -> Kernel {
    Kernel::new(KernelConfig::default().with_integrity_checks(true)).unwrap()
}

fn noop(_: &mut Kernel, _: TaskId) {}

fn spawn(kernel: &mut Kernel, priority: Priority) -> TaskId {
    kernel.task_create(noop, "worker", priority, 256).unwrap()
}

/// Make `id` the running task so blocking calls are made on its behalf
fn act_as(kernel: &mut Kernel, id: TaskId) {
    kernel.set_task_state(id, TaskState::Running).unwrap();
}

#[test]
fn dispatch_rounds_visit_levels_high_to_low() {
    let mut k = kernel();
    let low = spawn(&mut k, Priority::LOW);
    let high = spawn(&mut k, Priority::HIGH);
    let medium = spawn(&mut k, Priority::MEDIUM);
    k.start().unwrap();

    let order: Vec<TaskId> = (0..6).map(|_| k.run_next().unwrap()).collect();
    assert_eq!(order, [high, medium, low, high, medium, low]);

    // Selection itself stays strictly priority ordered
    assert_eq!(k.next_ready(), Some(high));
}

#[test]
fn equal_priority_tasks_take_turns_in_join_order() {
    let mut k = kernel();
    let ids: Vec<TaskId> = (0..4).map(|_| spawn(&mut k, Priority::MEDIUM)).collect();
    k.start().unwrap();

    for _ in 0..3 {
        let turn: Vec<TaskId> = (0..ids.len()).map(|_| k.run_next().unwrap()).collect();
        assert_eq!(turn, ids);
    }
    for &id in &ids {
        assert_eq!(k.task(id).unwrap().stats.runs, 3);
    }
}

#[test]
fn higher_level_always_selected_first() {
    let mut k = kernel();
    let lows: Vec<TaskId> = (0..3).map(|_| spawn(&mut k, Priority::LOW)).collect();
    let critical = spawn(&mut k, Priority::CRITICAL);
    assert_eq!(k.next_ready(), Some(critical));

    k.task_suspend(critical).unwrap();
    assert_eq!(k.next_ready(), Some(lows[0]));
}

#[test]
fn queue_of_two_reports_full_then_drains_in_order() {
    let mut k = kernel();
    k.queue_create(INBOX, 2).unwrap();

    assert_eq!(k.queue_send(INBOX, 0xA, 0), Ok(()));
    assert_eq!(k.queue_send(INBOX, 0xB, 0), Ok(()));
    assert_eq!(k.queue_send(INBOX, 0xC, 0), Err(Error::Full));
    assert_eq!(k.queue_count(INBOX), Ok(2));
    assert_eq!(k.queue_is_full(INBOX), Ok(true));

    assert_eq!(k.queue_receive(INBOX, 0), Ok(0xA));
    assert_eq!(k.queue_receive(INBOX, 0), Ok(0xB));
    assert_eq!(k.queue_receive(INBOX, 0), Err(Error::Empty));
    assert_eq!(k.queue_is_empty(INBOX), Ok(true));
}

#[test]
fn semaphore_as_mutex_hands_unit_to_waiter() {
    let mut k = kernel();
    k.semaphore_create(LOCK, 1, 1).unwrap();
    let t1 = spawn(&mut k, Priority::MEDIUM);
    let t2 = spawn(&mut k, Priority::MEDIUM);

    act_as(&mut k, t1);
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
    assert_eq!(k.semaphore_count(LOCK), Ok(0));

    act_as(&mut k, t2);
    assert_eq!(k.semaphore_take(LOCK, 0), Err(Error::Timeout));
    assert_eq!(k.semaphore_take(LOCK, WAIT_FOREVER), Err(Error::Timeout));
    assert_eq!(k.task_state(t2), Ok(TaskState::Blocked));
    assert_eq!(k.semaphore_waiting(LOCK), Ok(1));

    act_as(&mut k, t1);
    assert_eq!(k.semaphore_give(LOCK), Ok(()));
    assert_eq!(k.task_state(t2), Ok(TaskState::Ready));
    assert_eq!(k.semaphore_count(LOCK), Ok(0));
    assert_eq!(k.wake_reason(t2), Some(WakeReason::Granted));

    act_as(&mut k, t2);
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
    assert_eq!(k.semaphore_count(LOCK), Ok(0));
    k.check_integrity().unwrap();
}

fn consumer(k: &mut Kernel, _: TaskId) {
    if let Ok(item) = k.queue_receive(INBOX, WAIT_FOREVER) {
        k.queue_send(OUTBOX, item, 0).unwrap();
    }
}

fn producer(k: &mut Kernel, id: TaskId) {
    let n = k.task(id).unwrap().stats.runs;
    k.queue_send(INBOX, n, 0).unwrap();
}

#[test]
fn blocked_receiver_gets_items_from_producer() {
    let mut k = kernel();
    k.queue_create(INBOX, 4).unwrap();
    k.queue_create(OUTBOX, 4).unwrap();
    let c = k.task_create(consumer, "consumer", Priority::HIGH, 256).unwrap();
    let p = k.task_create(producer, "producer", Priority::LOW, 256).unwrap();
    k.start().unwrap();

    assert_eq!(k.run_next(), Ok(c));
    assert_eq!(k.task_state(c), Ok(TaskState::Blocked));
    assert_eq!(k.run_next(), Ok(p));
    assert_eq!(k.wake_reason(c), Some(WakeReason::Received(0)));
    assert_eq!(k.queue_count(INBOX), Ok(0));

    for expected in [c, p, c, p] {
        assert_eq!(k.run_next(), Ok(expected));
    }

    assert_eq!(k.queue_receive(OUTBOX, 0), Ok(0));
    assert_eq!(k.queue_receive(OUTBOX, 0), Ok(1));
    assert_eq!(k.queue_receive(OUTBOX, 0), Err(Error::Empty));
    assert_eq!(k.queue_peek(INBOX), Ok(2));
}

#[test]
fn blocked_sender_item_moves_in_when_slot_frees() {
    let mut k = kernel();
    k.queue_create(INBOX, 1).unwrap();
    let sender = spawn(&mut k, Priority::LOW);

    act_as(&mut k, sender);
    assert_eq!(k.queue_send(INBOX, 1, 0), Ok(()));
    assert_eq!(k.queue_send(INBOX, 2, 5), Err(Error::Timeout));
    assert_eq!(k.task_state(sender), Ok(TaskState::Blocked));

    // Receive from outside any task
    assert_eq!(k.queue_receive(INBOX, 0), Ok(1));
    assert_eq!(k.task_state(sender), Ok(TaskState::Ready));
    assert_eq!(k.queue_peek(INBOX), Ok(2));

    act_as(&mut k, sender);
    assert_eq!(k.queue_send(INBOX, 2, 5), Ok(()));
    assert_eq!(k.queue_count(INBOX), Ok(1));
}

#[test]
fn deleting_queue_wakes_every_waiter_with_error() {
    let mut k = kernel();
    k.queue_create(INBOX, 2).unwrap();
    let waiters: Vec<TaskId> = (0..3).map(|_| spawn(&mut k, Priority::MEDIUM)).collect();
    for &id in &waiters {
        act_as(&mut k, id);
        assert_eq!(k.queue_receive(INBOX, WAIT_FOREVER), Err(Error::Timeout));
    }

    assert_eq!(k.queue_delete(INBOX), Ok(3));
    for &id in &waiters {
        assert_eq!(k.task_state(id), Ok(TaskState::Ready));
        act_as(&mut k, id);
        assert_eq!(k.queue_receive(INBOX, 0), Err(Error::ResourceError));
    }
    k.check_integrity().unwrap();
}

#[test]
fn deleting_semaphore_wakes_every_waiter_with_error() {
    let mut k = kernel();
    k.semaphore_create(LOCK, 0, 1).unwrap();
    let a = spawn(&mut k, Priority::LOW);
    let b = spawn(&mut k, Priority::HIGH);
    for id in [a, b] {
        act_as(&mut k, id);
        assert_eq!(k.semaphore_take(LOCK, 50), Err(Error::Timeout));
    }

    assert_eq!(k.semaphore_delete(LOCK), Ok(2));
    assert_eq!(k.task_state(a), Ok(TaskState::Ready));
    assert_eq!(k.task_state(b), Ok(TaskState::Ready));

    // The outcome is reported once; a recreated semaphore starts clean
    act_as(&mut k, a);
    assert_eq!(k.semaphore_take(LOCK, 0), Err(Error::ResourceError));
    k.semaphore_create(LOCK, 1, 1).unwrap();
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
}

#[test]
fn ids_reused_only_after_deletion() {
    let mut k = kernel();
    let ids: Vec<TaskId> = (1..MAX_TASKS).map(|_| spawn(&mut k, Priority::LOW)).collect();
    assert_eq!(k.task_count(), MAX_TASKS);
    assert_eq!(
        k.task_create(noop, "extra", Priority::LOW, 256),
        Err(Error::Exhausted)
    );

    let victim = ids[2];
    k.task_delete(victim).unwrap();
    assert_eq!(k.task_state(victim), Err(Error::ResourceError));
    let reborn = spawn(&mut k, Priority::HIGH);
    assert_eq!(reborn, victim);
    assert_eq!(k.task(reborn).unwrap().priority, Priority::HIGH);
}

#[test]
fn delay_expiry_preempts_at_tick_boundary() {
    let mut k = kernel();
    let high = spawn(&mut k, Priority::HIGH);
    let low = spawn(&mut k, Priority::LOW);
    assert_eq!(k.start(), Ok(Some(high)));

    k.task_delay(3).unwrap();
    assert_eq!(k.task_state(high), Ok(TaskState::Blocked));
    assert_eq!(k.switch_context(), Ok(Some(low)));

    k.tick().unwrap();
    k.tick().unwrap();
    assert_eq!(k.current_task(), Some(low));

    k.tick().unwrap();
    assert_eq!(k.current_task(), Some(high));
    assert_eq!(k.task_state(low), Ok(TaskState::Ready));
}

#[test]
fn wait_expiry_reports_timeout_on_retry() {
    let mut k = kernel();
    k.queue_create(INBOX, 2).unwrap();
    let t = spawn(&mut k, Priority::MEDIUM);
    k.start().unwrap();

    assert_eq!(k.queue_receive(INBOX, 2), Err(Error::Timeout));
    k.tick().unwrap();
    assert_eq!(k.task_state(t), Ok(TaskState::Blocked));
    k.tick().unwrap();
    assert_eq!(k.task_state(t), Ok(TaskState::Ready));
    assert_eq!(k.wake_reason(t), Some(WakeReason::TimedOut));
    assert!(k.queue(INBOX).unwrap().receivers().is_empty());

    assert_eq!(k.switch_context(), Ok(Some(t)));
    assert_eq!(k.queue_receive(INBOX, 0), Err(Error::Timeout));
    assert_eq!(k.queue_receive(INBOX, 0), Err(Error::Empty));
}

#[test]
fn suspending_a_waiter_aborts_its_wait() {
    let mut k = kernel();
    k.semaphore_create(LOCK, 0, 1).unwrap();
    let t = spawn(&mut k, Priority::MEDIUM);

    act_as(&mut k, t);
    assert_eq!(k.semaphore_take(LOCK, WAIT_FOREVER), Err(Error::Timeout));
    k.task_suspend(t).unwrap();
    assert_eq!(k.semaphore_waiting(LOCK), Ok(0));

    // Nobody waits any more, so the unit lands in the count
    k.semaphore_give(LOCK).unwrap();
    assert_eq!(k.semaphore_count(LOCK), Ok(1));

    k.task_resume(t).unwrap();
    act_as(&mut k, t);
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
    assert_eq!(k.semaphore_count(LOCK), Ok(0));
    k.check_integrity().unwrap();
}

#[test]
fn lock_defers_preemption_until_unlock() {
    let mut k = kernel();
    let low = spawn(&mut k, Priority::LOW);
    k.start().unwrap();
    k.lock();

    let high = spawn(&mut k, Priority::HIGH);
    k.tick().unwrap();
    assert_eq!(k.current_task(), Some(low));
    assert_eq!(k.next_ready(), Some(low));
    assert_eq!(k.run_next(), Ok(low));

    assert_eq!(k.unlock(), Ok(Some(high)));
    assert_eq!(k.task_state(low), Ok(TaskState::Ready));
}

#[test]
fn deleting_a_waiting_task_unlinks_it() {
    let mut k = kernel();
    k.queue_create(INBOX, 1).unwrap();
    let t = spawn(&mut k, Priority::LOW);
    act_as(&mut k, t);
    assert_eq!(k.queue_receive(INBOX, WAIT_FOREVER), Err(Error::Timeout));

    k.task_delete(t).unwrap();
    assert!(k.queue(INBOX).unwrap().receivers().is_empty());
    assert_eq!(k.queue_send(INBOX, 9, 0), Ok(()));
    assert_eq!(k.queue_count(INBOX), Ok(1));
    assert_eq!(k.allocator().live_allocations(), 2);
    k.check_integrity().unwrap();
}

#[test]
fn deleting_a_task_passes_on_its_granted_unit() {
    let mut k = kernel();
    k.semaphore_create(LOCK, 0, 1).unwrap();
    let a = spawn(&mut k, Priority::MEDIUM);
    let b = spawn(&mut k, Priority::MEDIUM);

    act_as(&mut k, a);
    assert_eq!(k.semaphore_take(LOCK, WAIT_FOREVER), Err(Error::Timeout));
    k.semaphore_give(LOCK).unwrap();
    assert_eq!(k.wake_reason(a), Some(WakeReason::Granted));

    k.task_delete(a).unwrap();
    assert_eq!(k.semaphore_count(LOCK), Ok(1));
    act_as(&mut k, b);
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
    k.check_integrity().unwrap();
}

#[test]
fn granted_unit_of_deleted_task_goes_to_next_waiter() {
    let mut k = kernel();
    k.semaphore_create(LOCK, 0, 1).unwrap();
    let a = spawn(&mut k, Priority::MEDIUM);
    let b = spawn(&mut k, Priority::MEDIUM);
    for id in [a, b] {
        act_as(&mut k, id);
        assert_eq!(k.semaphore_take(LOCK, WAIT_FOREVER), Err(Error::Timeout));
    }
    k.semaphore_give(LOCK).unwrap();

    k.task_delete(a).unwrap();
    assert_eq!(k.task_state(b), Ok(TaskState::Ready));
    assert_eq!(k.semaphore_count(LOCK), Ok(0));
    act_as(&mut k, b);
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
}

#[test]
fn deleting_a_task_returns_its_received_item() {
    let mut k = kernel();
    k.queue_create(INBOX, 2).unwrap();
    let r = spawn(&mut k, Priority::LOW);
    act_as(&mut k, r);
    assert_eq!(k.queue_receive(INBOX, WAIT_FOREVER), Err(Error::Timeout));
    k.queue_send(INBOX, 7, 0).unwrap();
    k.queue_send(INBOX, 8, 0).unwrap();
    assert_eq!(k.queue_count(INBOX), Ok(1));

    k.task_delete(r).unwrap();
    assert_eq!(k.queue_count(INBOX), Ok(2));
    assert_eq!(k.queue_receive(INBOX, 0), Ok(7));
    assert_eq!(k.queue_receive(INBOX, 0), Ok(8));
}

#[test]
fn received_item_of_deleted_task_goes_to_next_receiver() {
    let mut k = kernel();
    k.queue_create(INBOX, 2).unwrap();
    let r1 = spawn(&mut k, Priority::LOW);
    let r2 = spawn(&mut k, Priority::LOW);
    for id in [r1, r2] {
        act_as(&mut k, id);
        assert_eq!(k.queue_receive(INBOX, WAIT_FOREVER), Err(Error::Timeout));
    }
    k.queue_send(INBOX, 7, 0).unwrap();

    k.task_delete(r1).unwrap();
    assert_eq!(k.wake_reason(r2), Some(WakeReason::Received(7)));
    act_as(&mut k, r2);
    assert_eq!(k.queue_receive(INBOX, 0), Ok(7));
    assert_eq!(k.queue_count(INBOX), Ok(0));
}

#[test]
fn blocking_elsewhere_hands_back_an_uncollected_unit() {
    const OTHER: SemaphoreId = SemaphoreId(1);
    let mut k = kernel();
    k.semaphore_create(LOCK, 0, 1).unwrap();
    k.semaphore_create(OTHER, 0, 1).unwrap();
    let a = spawn(&mut k, Priority::MEDIUM);

    act_as(&mut k, a);
    assert_eq!(k.semaphore_take(LOCK, WAIT_FOREVER), Err(Error::Timeout));
    k.semaphore_give(LOCK).unwrap();

    // Waits on OTHER before collecting LOCK: the LOCK unit goes back
    act_as(&mut k, a);
    assert_eq!(k.semaphore_take(OTHER, 5), Err(Error::Timeout));
    assert_eq!(k.semaphore_count(LOCK), Ok(1));

    k.semaphore_give(OTHER).unwrap();
    act_as(&mut k, a);
    assert_eq!(k.semaphore_take(OTHER, 5), Ok(()));
    assert_eq!(k.semaphore_take(LOCK, 0), Ok(()));
    assert_eq!(k.semaphore_count(LOCK), Ok(0));
    k.check_integrity().unwrap();
}

#[test]
fn delaying_hands_back_an_uncollected_item() {
    let mut k = kernel();
    k.queue_create(INBOX, 2).unwrap();
    let r = spawn(&mut k, Priority::LOW);
    act_as(&mut k, r);
    assert_eq!(k.queue_receive(INBOX, WAIT_FOREVER), Err(Error::Timeout));
    k.queue_send(INBOX, 5, 0).unwrap();

    act_as(&mut k, r);
    k.task_delay(3).unwrap();
    assert_eq!(k.wake_reason(r), None);
    assert_eq!(k.queue_peek(INBOX), Ok(5));
}

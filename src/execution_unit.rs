
/// Returns the ID of the calling thread's execution unit.
///
/// The ID is never 0, so 0 can be used as the "no owner" marker in the ownership
/// fields of [`EntityLock`](crate::EntityLock) and the global lock.
///
/// The ID is the address of a thread-local. Two threads observe the same ID only if
/// the termination of one happens before the start of the other. A lock recorded as
/// owned by a thread that exited without releasing it could therefore be re-entered
/// by a later thread that reuses the slot. Ownership is only ever recorded by guards
/// that cannot outlive their thread, so this does not arise through the public API.
#[inline(always)]
pub(crate) fn execution_unit_id() -> usize {
    thread_local!(static EXECUTION_UNIT_ID: u8 = const { 0 });
    EXECUTION_UNIT_ID.with(|id| {
        let id: *const u8 = id;
        id as usize
    })
}

//! Process-wide Ctrl+C handling.
//!
//! The handler only sets a flag and wakes waiters; whoever runs the
//! current task decides what cancellation means. A second Ctrl+C while the
//! flag is still set force-exits with status 130.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static INTERRUPT_NOTIFY: OnceLock<Notify> = OnceLock::new();

/// Installs the Ctrl+C handler.
///
/// # Panics
/// Panics if the handler cannot be registered.
pub fn init() {
    ctrlc::set_handler(trigger).expect("Error setting Ctrl+C handler");
}

/// Triggers an interrupt, force-exiting on the second trigger.
pub fn trigger() {
    if INTERRUPTED.swap(true, Ordering::SeqCst) {
        std::process::exit(130);
    }
    INTERRUPT_NOTIFY.get_or_init(Notify::new).notify_waiters();
}

/// Whether an interrupt has been requested since the last reset.
pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Waits until an interrupt is triggered.
pub async fn wait_for_interrupt() {
    loop {
        if is_interrupted() {
            return;
        }
        INTERRUPT_NOTIFY.get_or_init(Notify::new).notified().await;
    }
}

/// Clears the interrupt flag so the next Ctrl+C interrupts again instead
/// of force-exiting.
pub fn reset() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Interrupt state is process-global, so this stays a single test.
    #[tokio::test]
    async fn trigger_wakes_waiters_and_reset_clears() {
        assert!(!is_interrupted());
        trigger();
        assert!(is_interrupted());
        // Already-interrupted waiters return immediately.
        wait_for_interrupt().await;
        reset();
        assert!(!is_interrupted());
    }
}

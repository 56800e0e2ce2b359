use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::console;

static ATTACHED: AtomicUsize = AtomicUsize::new(0);

/// Installs the process-wide Ctrl+C handler.
///
/// While a child owns the terminal the signal is left to the child.
/// Otherwise the waiting prompt fails with [`console::Interrupted`], which
/// ends the shell loop.
pub fn install() -> Result<()> {
    ctrlc::set_handler(|| {
        if Passthrough::active() {
            log::debug!("interrupt forwarded to attached child");
            return;
        }
        console::interrupt();
    })
    .context("Failed to install interrupt handler")
}

/// Marks the span during which an attached child runs.
pub struct Passthrough(());

impl Passthrough {
    pub fn enter() -> Self {
        ATTACHED.fetch_add(1, Ordering::SeqCst);
        Passthrough(())
    }

    pub fn active() -> bool {
        ATTACHED.load(Ordering::SeqCst) > 0
    }
}

impl Drop for Passthrough {
    fn drop(&mut self) {
        ATTACHED.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_guard_is_scoped() {
        {
            let _outer = Passthrough::enter();
            assert!(Passthrough::active());
            {
                let _inner = Passthrough::enter();
                assert!(Passthrough::active());
            }
            assert!(Passthrough::active());
        }
    }
}

//! Sleep, initialization and normal operation of the controller
//!
//! Every transition is a read-modify-poll sequence on CCCR. The sequences are
//! serialized through one thread level lock so concurrent callers never
//! interleave their writes to the control register. Interrupt handlers never
//! take this lock, so they keep running while a caller polls.

use crate::error::Error;
use crate::reg::{Access as _, Cccr};
use crate::time::{poll_until, Timeout, MODE_TRANSITION_TIMEOUT};
use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use mcan_driver_core::Dependencies;

/// Scoped register transactions on CCCR
pub(crate) struct ModeControl<M: RawMutex> {
    lock: Mutex<M, ()>,
}

impl<M: RawMutex> ModeControl<M> {
    pub(crate) const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// Runs `f` while holding the mode lock
    ///
    /// The lock is released on every exit path of `f`, early errors included.
    pub(crate) fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock.lock(|_| f())
    }

    /// Takes the controller out of power down
    ///
    /// Gives up after the fixed mode transition timeout and requests sleep
    /// again in that case.
    pub(crate) fn exit_sleep<D: Dependencies>(&self, deps: &D) -> Result<(), Error<D::Error>> {
        self.transaction(|| -> Result<(), Error<D::Error>> {
            deps.update::<Cccr>(|r| r.set_csr(false))?;
            let acknowledged = poll_until(deps, MODE_TRANSITION_TIMEOUT, || {
                match deps.load::<Cccr>()?.csa() {
                    true => Err(nb::Error::WouldBlock),
                    false => Ok(()),
                }
            });
            match acknowledged {
                Ok(()) => Ok(()),
                Err(nb::Error::Other(e)) => Err(e),
                Err(nb::Error::WouldBlock) => {
                    warn!("controller did not leave sleep");
                    deps.update::<Cccr>(|r| r.set_csr(true))?;
                    Err(Error::WouldBlock)
                }
            }
        })
    }

    /// Requests init mode and waits for the controller to confirm
    ///
    /// The request is withdrawn if it is not confirmed in time.
    pub(crate) fn enter_init<D: Dependencies>(
        &self,
        deps: &D,
        timeout: Timeout,
    ) -> Result<(), Error<D::Error>> {
        self.transaction(|| -> Result<(), Error<D::Error>> {
            deps.update::<Cccr>(|r| r.set_init(true))?;
            match wait_for_init(deps, timeout, true) {
                Err(Error::WouldBlock) => {
                    warn!("controller did not enter init mode");
                    deps.update::<Cccr>(|r| r.set_init(false))?;
                    Err(Error::WouldBlock)
                }
                result => result,
            }
        })
    }

    /// Releases init mode and waits for the controller to confirm
    ///
    /// Unlike [`Self::enter_init`] the request is left in place on timeout;
    /// the controller may still complete the transition later, for example
    /// once bus integration finished.
    pub(crate) fn leave_init<D: Dependencies>(
        &self,
        deps: &D,
        timeout: Timeout,
    ) -> Result<(), Error<D::Error>> {
        self.transaction(|| -> Result<(), Error<D::Error>> {
            deps.update::<Cccr>(|r| r.set_init(false))?;
            wait_for_init(deps, timeout, false)
        })
    }

    /// Unlocks the protected configuration registers
    ///
    /// Only has an effect while in init mode.
    pub(crate) fn enable_configuration_change<D: Dependencies>(
        &self,
        deps: &D,
    ) -> Result<(), Error<D::Error>> {
        self.transaction(|| deps.update::<Cccr>(|r| r.set_cce(true)).map(|_| ()))
    }
}

fn wait_for_init<D: Dependencies>(
    deps: &D,
    timeout: Timeout,
    init: bool,
) -> Result<(), Error<D::Error>> {
    poll_until(deps, timeout, || {
        if deps.load::<Cccr>()?.init() == init {
            Ok(())
        } else {
            Err(nb::Error::WouldBlock)
        }
    })
    .map_err(|e| match e {
        nb::Error::Other(e) => e,
        nb::Error::WouldBlock => Error::WouldBlock,
    })
}

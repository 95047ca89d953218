use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{in_flight_error, Error};

/// Refuses a second user action while one is still waiting on the network.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

#[derive(Debug)]
pub struct InFlightGuard<'a> {
    busy: &'a AtomicBool,
}

impl InFlight {
    pub fn try_acquire(&self) -> Result<InFlightGuard<'_>, Error> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| in_flight_error())?;

        Ok(InFlightGuard { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[test]
fn second_acquire_is_refused_until_release() {
    let in_flight = InFlight::default();

    let guard = in_flight.try_acquire().unwrap();
    assert!(in_flight.is_busy());
    assert!(in_flight.try_acquire().unwrap_err().is_in_flight_error());

    drop(guard);
    assert!(!in_flight.is_busy());
    assert!(in_flight.try_acquire().is_ok());
}

//! Register transport for the charge regulator: a shared-bus client with
//! a bounded mutex wait and a per-transfer retry budget driven by the
//! core retry policy.

use charge_core::bus::{AttemptError, RetryPolicy, Verdict};
use charge_core::fault::Faults;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::{with_timeout, Instant};
use embedded_hal_async::i2c::{Error as I2cError, ErrorKind, I2c};

use crate::config;
use crate::shared_state;

#[derive(Debug, Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum Error<E> {
    /// Lost the race for the bus mutex; the transfer was skipped, not
    /// failed. Callers drop the cycle and try again next tick.
    Busy,
    /// The per-transfer time budget ran out. The communication fault has
    /// already been raised.
    Timeout,
    /// Non-retryable bus error.
    Bus(E),
}

pub struct RegulatorBus<BUS: 'static> {
    bus: &'static Mutex<CriticalSectionRawMutex, BUS>,
    addr: u8,
}

fn classify(kind: ErrorKind) -> AttemptError {
    match kind {
        ErrorKind::NoAcknowledge(_) => AttemptError::Nack,
        ErrorKind::ArbitrationLoss => AttemptError::ArbitrationLost,
        _ => AttemptError::Other,
    }
}

impl<BUS, E> RegulatorBus<BUS>
where
    BUS: I2c<Error = E>,
    E: I2cError,
{
    pub fn new(bus: &'static Mutex<CriticalSectionRawMutex, BUS>, addr: u8) -> Self {
        RegulatorBus { bus, addr }
    }

    /// One guarded transfer: write `tx`, then (if `rx` is non-empty) read
    /// into `rx` without releasing the bus in between. Nacks and
    /// arbitration loss are retried; the deadline covers the whole
    /// transfer no matter how many retries it takes, and exhausting it
    /// raises the communication fault once.
    pub async fn transact(&self, tx: &[u8], rx: &mut [u8]) -> Result<(), Error<E>> {
        let mut bus = with_timeout(config::BUS_MUTEX_WAIT, self.bus.lock())
            .await
            .map_err(|_| Error::Busy)?;

        let started = Instant::now();
        let deadline = started + config::BUS_TRANSFER_BUDGET;
        let policy = RetryPolicy {
            budget_ms: config::BUS_TRANSFER_BUDGET.as_millis(),
        };
        loop {
            let attempt = async {
                bus.write(self.addr, tx).await?;
                if !rx.is_empty() {
                    bus.read(self.addr, rx).await?;
                }
                Ok(())
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match with_timeout(remaining, attempt).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    match policy.verdict(classify(e.kind()), started.elapsed().as_millis()) {
                        Verdict::Retry => {}
                        Verdict::RaiseFault => {
                            shared_state::set_fault(Faults::COMMUNICATION);
                            return Err(Error::Timeout);
                        }
                        Verdict::Abort => return Err(Error::Bus(e)),
                    }
                }
                Err(_) => {
                    shared_state::set_fault(Faults::COMMUNICATION);
                    return Err(Error::Timeout);
                }
            }
        }
    }

    pub async fn write_reg(&self, reg: u8, value: u8) -> Result<(), Error<E>> {
        self.transact(&[reg, value], &mut []).await
    }

    /// Write a 16-bit register, LSB first as the IC expects.
    pub async fn write_reg16(&self, reg: u8, lsb: u8, msb: u8) -> Result<(), Error<E>> {
        self.transact(&[reg, lsb, msb], &mut []).await
    }

    pub async fn read_reg(&self, reg: u8) -> Result<u8, Error<E>> {
        let mut buf = [0u8; 1];
        self.transact(&[reg], &mut buf).await?;
        Ok(buf[0])
    }

    pub async fn read_reg16(&self, reg: u8) -> Result<[u8; 2], Error<E>> {
        let mut buf = [0u8; 2];
        self.transact(&[reg], &mut buf).await?;
        Ok(buf)
    }
}

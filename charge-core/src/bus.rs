//! Retry and deadline policy for the regulator register bus.
//!
//! The firmware transport classifies each failed bus attempt and asks
//! this policy what to do next, with the elapsed transfer time injected,
//! so the retry-until-budget behavior is host-testable like the rest of
//! the decision logic.

/// Coarse class of one failed bus attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttemptError {
    /// Address or data byte not acknowledged. A regulator held in reset
    /// or browning out stops acking; retrying inside the budget rides
    /// through the short cases, and a persistent nack becomes a fault
    /// when the budget runs out.
    Nack,
    /// Lost a multi-master arbitration round.
    ArbitrationLost,
    /// Bus-level failure (stuck lines, overrun): not worth retrying.
    Other,
}

/// What the transport should do after a failed attempt.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    Retry,
    /// Budget exhausted: raise the communication fault and abort.
    RaiseFault,
    /// Abort immediately without touching the fault registry.
    Abort,
}

/// Per-transfer retry budget. The budget covers the whole transfer, not
/// each attempt, so retries cannot extend it.
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub budget_ms: u64,
}

impl RetryPolicy {
    pub fn verdict(self, error: AttemptError, elapsed_ms: u64) -> Verdict {
        match error {
            AttemptError::Nack | AttemptError::ArbitrationLost => {
                if elapsed_ms >= self.budget_ms {
                    Verdict::RaiseFault
                } else {
                    Verdict::Retry
                }
            }
            AttemptError::Other => Verdict::Abort,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: RetryPolicy = RetryPolicy { budget_ms: 200 };

    #[test]
    fn nack_is_retried_until_the_budget_runs_out() {
        // A regulator that stops acking mid-run is retried, then faulted
        // when the budget expires; it must never be a silent abort.
        assert_eq!(POLICY.verdict(AttemptError::Nack, 0), Verdict::Retry);
        assert_eq!(POLICY.verdict(AttemptError::Nack, 199), Verdict::Retry);
        assert_eq!(POLICY.verdict(AttemptError::Nack, 200), Verdict::RaiseFault);
    }

    #[test]
    fn arbitration_loss_is_retried_like_a_nack() {
        assert_eq!(
            POLICY.verdict(AttemptError::ArbitrationLost, 10),
            Verdict::Retry
        );
        assert_eq!(
            POLICY.verdict(AttemptError::ArbitrationLost, 500),
            Verdict::RaiseFault
        );
    }

    #[test]
    fn other_errors_abort_without_a_fault() {
        assert_eq!(POLICY.verdict(AttemptError::Other, 0), Verdict::Abort);
        assert_eq!(POLICY.verdict(AttemptError::Other, 10_000), Verdict::Abort);
    }

    #[test]
    fn unplugged_regulator_faults_exactly_once_per_transfer() {
        // Walk a whole transfer the way the transport drives it: every
        // attempt nacks, each costs some bus time, and the transfer ends
        // in a single fault-and-abort.
        let mut elapsed_ms = 0;
        let mut faults = 0;
        loop {
            match POLICY.verdict(AttemptError::Nack, elapsed_ms) {
                Verdict::Retry => elapsed_ms += 35,
                Verdict::RaiseFault => {
                    faults += 1;
                    break;
                }
                Verdict::Abort => unreachable!("nacks are never a plain abort"),
            }
        }
        assert_eq!(faults, 1);
        assert!(elapsed_ms >= POLICY.budget_ms);
    }
}

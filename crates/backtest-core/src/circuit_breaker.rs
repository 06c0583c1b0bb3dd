/// Halts a simulation once drawdown exceeds a threshold. Latches: once
/// tripped it stays tripped for the rest of the run.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    max_drawdown_pct: f64,
    halted: bool,
}

impl CircuitBreaker {
    pub fn new(max_drawdown_percent: f64) -> Self {
        Self {
            max_drawdown_pct: max_drawdown_percent,
            halted: false,
        }
    }

    /// Check the current drawdown (percent below peak). Returns true when
    /// trading must stop.
    pub fn check(&mut self, drawdown_pct: f64) -> bool {
        if self.halted {
            return true;
        }
        if drawdown_pct > self.max_drawdown_pct {
            self.halted = true;
        }
        self.halted
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }
}

//! Per-target error budgets for one scheduler run.

use ripple_core::enums::ErrorKind;

/// A budget that was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetBreach {
    pub kind: ErrorKind,
    pub count: u32,
    pub max: u32,
}

/// Counts validation and infrastructure errors against their maxima.
///
/// A maximum of 0 disables that budget. Unknown errors count as infrastructure;
/// data errors count against neither.
#[derive(Debug, Clone, Default)]
pub struct ErrorBudget {
    max_validation: u32,
    max_infrastructure: u32,
    validation: u32,
    infrastructure: u32,
}

impl ErrorBudget {
    #[must_use]
    pub const fn new(max_validation: u32, max_infrastructure: u32) -> Self {
        Self {
            max_validation,
            max_infrastructure,
            validation: 0,
            infrastructure: 0,
        }
    }

    /// Count one error. Returns the breach if this error exhausted a budget.
    pub const fn record(&mut self, kind: ErrorKind) -> Option<BudgetBreach> {
        let (count, max) = if kind.counts_toward_infrastructure() {
            self.infrastructure += 1;
            (self.infrastructure, self.max_infrastructure)
        } else if matches!(kind, ErrorKind::Validation) {
            self.validation += 1;
            (self.validation, self.max_validation)
        } else {
            return None;
        };

        if max > 0 && count > max {
            Some(BudgetBreach { kind, count, max })
        } else {
            None
        }
    }

    #[must_use]
    pub const fn counts(&self) -> (u32, u32) {
        (self.validation, self.infrastructure)
    }
}

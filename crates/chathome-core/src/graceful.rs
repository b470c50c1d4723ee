//! Results for pipeline stages that must never fail the exchange.
//!
//! Search, classification, title generation, and extraction all degrade to a
//! safe default instead of erroring. [`Graceful`] makes that degradation a
//! value the caller has to look at, rather than a swallowed exception.

/// Outcome of a non-essential stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Graceful<T> {
    /// The stage ran and produced its real output.
    Produced(T),
    /// The stage failed or was skipped; `value` is the substitute.
    Defaulted { value: T, reason: String },
}

impl<T> Graceful<T> {
    pub fn defaulted(value: T, reason: impl Into<String>) -> Self {
        Graceful::Defaulted {
            value,
            reason: reason.into(),
        }
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Graceful::Defaulted { .. })
    }

    pub fn value(&self) -> &T {
        match self {
            Graceful::Produced(v) | Graceful::Defaulted { value: v, .. } => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Graceful::Produced(v) | Graceful::Defaulted { value: v, .. } => v,
        }
    }

    /// Why the stage defaulted, if it did.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Graceful::Produced(_) => None,
            Graceful::Defaulted { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Graceful<U> {
        match self {
            Graceful::Produced(v) => Graceful::Produced(f(v)),
            Graceful::Defaulted { value, reason } => Graceful::Defaulted {
                value: f(value),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaulted_keeps_reason_through_map() {
        let g: Graceful<&str> = Graceful::defaulted("", "classifier timed out");
        let mapped = g.map(|s| s.len());
        assert!(mapped.is_defaulted());
        assert_eq!(mapped.reason(), Some("classifier timed out"));
        assert_eq!(mapped.into_value(), 0);
    }

    #[test]
    fn produced_has_no_reason() {
        let g = Graceful::Produced(3);
        assert!(!g.is_defaulted());
        assert_eq!(g.reason(), None);
        assert_eq!(*g.value(), 3);
    }
}

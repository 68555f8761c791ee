//! Decoy-account policy.

pub const MIN_SEVERITY: i16 = 1;
pub const MAX_SEVERITY: i16 = 5;

/// Decides whether a honeypot hit blocks the source IP, and for how long.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HoneypotPolicy {
    pub auto_block: bool,
    pub min_severity: i16,
}

impl Default for HoneypotPolicy {
    fn default() -> Self {
        Self {
            auto_block: true,
            min_severity: 4,
        }
    }
}

impl HoneypotPolicy {
    #[must_use]
    pub fn should_block(&self, severity: i16) -> bool {
        self.auto_block && severity >= self.min_severity
    }

    /// Only the highest severity earns a permanent block.
    #[must_use]
    pub fn is_permanent(&self, severity: i16) -> bool {
        self.should_block(severity) && severity >= MAX_SEVERITY
    }
}

#[must_use]
pub fn valid_severity(severity: i16) -> bool {
    (MIN_SEVERITY..=MAX_SEVERITY).contains(&severity)
}

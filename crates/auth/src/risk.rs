use serde::{Deserialize, Serialize};

/// Risk classification for permissions and lifecycle actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    None,
    #[default]
    Low,
    Medium,
    High,
    Critical,
    Extreme,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 6] = [
        RiskLevel::None,
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
        RiskLevel::Extreme,
    ];

    pub fn level(self) -> u8 {
        match self {
            RiskLevel::None => 0,
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High => 3,
            RiskLevel::Critical => 4,
            RiskLevel::Extreme => 5,
        }
    }

    /// Unknown levels fall back to `None`.
    pub fn from_level(level: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|r| r.level() == level)
            .unwrap_or(RiskLevel::None)
    }

    pub fn is_at_least(self, other: RiskLevel) -> bool {
        self.level() >= other.level()
    }

    pub fn requires_approval(self) -> bool {
        self.is_at_least(RiskLevel::Medium)
    }

    pub fn requires_mfa(self) -> bool {
        self.is_at_least(RiskLevel::High)
    }

    pub fn requires_admin_review(self) -> bool {
        self.is_at_least(RiskLevel::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert!(!RiskLevel::Low.requires_approval());
        assert!(RiskLevel::Medium.requires_approval());
        assert!(!RiskLevel::Medium.requires_mfa());
        assert!(RiskLevel::High.requires_mfa());
        assert!(!RiskLevel::High.requires_admin_review());
        assert!(RiskLevel::Extreme.requires_admin_review());
    }

    #[test]
    fn from_level_falls_back_to_none() {
        assert_eq!(RiskLevel::from_level(3), RiskLevel::High);
        assert_eq!(RiskLevel::from_level(42), RiskLevel::None);
    }

    #[test]
    fn ordering_follows_level() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert_eq!(serde_json::to_string(&RiskLevel::Critical).unwrap(), "\"CRITICAL\"");
    }
}

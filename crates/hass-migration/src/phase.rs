use serde::{Deserialize, Serialize};
use std::fmt;

/// 迁移阶段，只能按顺序前进
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Preparation,
    DualWrite,
    Validation,
    SwitchOver,
    Cleanup,
    Complete,
}

impl MigrationPhase {
    pub const SEQUENCE: [MigrationPhase; 6] = [
        MigrationPhase::Preparation,
        MigrationPhase::DualWrite,
        MigrationPhase::Validation,
        MigrationPhase::SwitchOver,
        MigrationPhase::Cleanup,
        MigrationPhase::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::Preparation => "preparation",
            MigrationPhase::DualWrite => "dual_write",
            MigrationPhase::Validation => "validation",
            MigrationPhase::SwitchOver => "switch_over",
            MigrationPhase::Cleanup => "cleanup",
            MigrationPhase::Complete => "complete",
        }
    }

    /// 下一个阶段；`Complete` 之后没有阶段
    pub fn next(&self) -> Option<MigrationPhase> {
        let index = Self::SEQUENCE.iter().position(|p| p == self)?;
        Self::SEQUENCE.get(index + 1).copied()
    }

    /// 判断观察到的阶段序列是否为合法前缀
    pub fn is_valid_prefix(history: &[MigrationPhase]) -> bool {
        history.len() <= Self::SEQUENCE.len()
            && history.iter().zip(Self::SEQUENCE.iter()).all(|(a, b)| a == b)
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use crate::error::CoreError;

/// Upper bound on table capacity: the slot index lives in the low 8 bits of a [`TaskId`].
pub const MAX_TASK_CAPACITY: usize = 1 << TaskId::SLOT_BITS;

pub const MAX_NAME_BYTES: usize = 63;
pub const MAX_DESCRIPTION_BYTES: usize = 255;

/// Task handle: a global creation sequence number in the high bits, the table slot in the low
/// bits. Ids grow monotonically, are never zero, and a stale id never matches a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    const SLOT_BITS: u32 = 8;

    pub(crate) fn new(seq: u64, slot: usize) -> Self {
        debug_assert!(slot < MAX_TASK_CAPACITY);
        TaskId((seq << Self::SLOT_BITS) | slot as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        TaskId(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub fn seq(&self) -> u64 {
        self.0 >> Self::SLOT_BITS
    }

    pub(crate) fn slot(&self) -> usize {
        (self.0 & ((1 << Self::SLOT_BITS) - 1)) as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    CodeGeneration,
    CodeOptimization,
    CodeAnalysis,
    NaturalLanguage,
    SystemMonitoring,
    SystemOptimization,
    NetworkAnalysis,
    /// Input is a JSON `ExecutionRequest`.
    CodeExecution,
    /// No built-in handler; callers register their own.
    Custom,
}

impl TaskType {
    pub const ALL: [TaskType; 9] = [
        TaskType::CodeGeneration,
        TaskType::CodeOptimization,
        TaskType::CodeAnalysis,
        TaskType::NaturalLanguage,
        TaskType::SystemMonitoring,
        TaskType::SystemOptimization,
        TaskType::NetworkAnalysis,
        TaskType::CodeExecution,
        TaskType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "code-generation",
            TaskType::CodeOptimization => "code-optimization",
            TaskType::CodeAnalysis => "code-analysis",
            TaskType::NaturalLanguage => "natural-language",
            TaskType::SystemMonitoring => "system-monitoring",
            TaskType::SystemOptimization => "system-optimization",
            TaskType::NetworkAnalysis => "network-analysis",
            TaskType::CodeExecution => "code-execution",
            TaskType::Custom => "custom",
        }
    }

    /// Monitoring-style tasks accept an empty input; everything else needs a payload.
    pub fn requires_input(&self) -> bool {
        !matches!(
            self,
            TaskType::SystemMonitoring
                | TaskType::SystemOptimization
                | TaskType::NetworkAnalysis
                | TaskType::Custom
        )
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        match wanted.as_str() {
            "nlp" => return Ok(TaskType::NaturalLanguage),
            "exec" => return Ok(TaskType::CodeExecution),
            _ => {}
        }
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| CoreError::InvalidArgument(format!("unknown task type '{}'", s)))
    }
}

/// Informational only; tasks are never preempted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl FromStr for TaskPriority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            other => Err(CoreError::InvalidArgument(format!(
                "unknown priority '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskFlags(u32);

impl TaskFlags {
    pub const NONE: TaskFlags = TaskFlags(0);
    pub const SANDBOX: TaskFlags = TaskFlags(1 << 0);
    pub const BACKGROUND: TaskFlags = TaskFlags(1 << 1);
    pub const PERSISTENT: TaskFlags = TaskFlags(1 << 2);
    pub const SYSTEM: TaskFlags = TaskFlags(1 << 3);
    pub const USER: TaskFlags = TaskFlags(1 << 4);
    pub const NETWORK: TaskFlags = TaskFlags(1 << 5);

    // NLP sub-kinds
    pub const SENTIMENT: TaskFlags = TaskFlags(1 << 8);
    pub const ENTITY: TaskFlags = TaskFlags(1 << 9);
    pub const SUMMARIZATION: TaskFlags = TaskFlags(1 << 10);
    pub const TRANSLATION: TaskFlags = TaskFlags(1 << 11);
    pub const QUESTION_ANSWERING: TaskFlags = TaskFlags(1 << 12);

    const NAMED: [(&'static str, TaskFlags); 11] = [
        ("sandbox", TaskFlags::SANDBOX),
        ("background", TaskFlags::BACKGROUND),
        ("persistent", TaskFlags::PERSISTENT),
        ("system", TaskFlags::SYSTEM),
        ("user", TaskFlags::USER),
        ("network", TaskFlags::NETWORK),
        ("sentiment", TaskFlags::SENTIMENT),
        ("entity", TaskFlags::ENTITY),
        ("summarization", TaskFlags::SUMMARIZATION),
        ("translation", TaskFlags::TRANSLATION),
        ("question-answering", TaskFlags::QUESTION_ANSWERING),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        TaskFlags(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub const fn contains(&self, other: TaskFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: TaskFlags) {
        self.0 |= other.0;
    }

    /// Parses a comma-separated list of flag names.
    pub fn parse_list(list: &str) -> Result<Self, CoreError> {
        let mut flags = TaskFlags::NONE;
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let flag = Self::NAMED
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, f)| *f)
                .ok_or_else(|| CoreError::InvalidArgument(format!("unknown flag '{}'", name)))?;
            flags.insert(flag);
        }
        Ok(flags)
    }
}

impl BitOr for TaskFlags {
    type Output = TaskFlags;

    fn bitor(self, rhs: TaskFlags) -> TaskFlags {
        TaskFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for TaskFlags {
    fn bitor_assign(&mut self, rhs: TaskFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TaskFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join(","))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Created => "created",
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Per-task ceilings enforced by the manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskLimits {
    pub capacity: usize,
    pub max_wall_clock_ms: u64,
    pub max_input_bytes: usize,
    /// Fallback re-check interval while waiting for a task.
    pub wait_poll_interval_ms: u64,
}

impl Default for TaskLimits {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_wall_clock_ms: 60_000,          // 60 seconds
            max_input_bytes: 10 * 1024 * 1024, // 10 MiB
            wait_poll_interval_ms: 10,
        }
    }
}

/// Read-only view of a task, detached from the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub task_type: TaskType,
    pub name: String,
    pub description: String,
    pub priority: TaskPriority,
    pub flags: TaskFlags,
    pub state: TaskState,
    pub created_ms: u64,
    pub started_ms: Option<u64>,
    pub completed_ms: Option<u64>,
    pub input_size: usize,
    pub output_size: usize,
    pub exit_code: i32,
    pub error_message: Option<String>,
}

/// Cuts `text` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_to(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_id_packs_seq_and_slot() {
        let id = TaskId::new(5, 17);
        assert_eq!(id.seq(), 5);
        assert_eq!(id.slot(), 17);
        assert!(TaskId::new(6, 0) > TaskId::new(5, 255));
    }

    #[test]
    fn test_flags_compose_and_parse() {
        let flags = TaskFlags::SANDBOX | TaskFlags::SENTIMENT;
        assert!(flags.contains(TaskFlags::SENTIMENT));
        assert!(!flags.contains(TaskFlags::TRANSLATION));
        assert_eq!(flags.bits(), 0x101);
        assert_eq!(TaskFlags::parse_list("sandbox, sentiment").unwrap(), flags);
        assert_eq!(flags.to_string(), "sandbox,sentiment");
        assert!(TaskFlags::parse_list("turbo").is_err());
    }

    #[test]
    fn test_task_type_names_round_trip() {
        for ty in TaskType::ALL {
            assert_eq!(ty.as_str().parse::<TaskType>().unwrap(), ty);
        }
        assert_eq!("nlp".parse::<TaskType>().unwrap(), TaskType::NaturalLanguage);
        assert_eq!(
            "CODE_ANALYSIS".parse::<TaskType>().unwrap(),
            TaskType::CodeAnalysis
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_to("héllo", 2), "h");
        assert_eq!(truncate_to("abc", 10), "abc");
    }
}

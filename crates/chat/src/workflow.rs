//! Workflow vocabulary: chat kinds, per-kind status tables, priority and
//! severity scales, participant roles.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use flowra_core::DomainError;

/// Kind of a chat. Every chat starts as a discussion and may convert once to
/// a typed work item; it never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Discussion,
    Task,
    Bug,
    Epic,
}

impl ChatType {
    /// True for work-item kinds (everything except `discussion`).
    pub fn is_typed(&self) -> bool {
        !matches!(self, ChatType::Discussion)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Discussion => "discussion",
            ChatType::Task => "task",
            ChatType::Bug => "bug",
            ChatType::Epic => "epic",
        }
    }
}

impl core::fmt::Display for ChatType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discussion" => Ok(ChatType::Discussion),
            "task" => Ok(ChatType::Task),
            "bug" => Ok(ChatType::Bug),
            "epic" => Ok(ChatType::Epic),
            other => Err(DomainError::validation(format!("unknown chat type: {other}"))),
        }
    }
}

/// Status a typed chat enters right after conversion.
pub fn default_status(chat_type: ChatType) -> &'static str {
    match chat_type {
        ChatType::Discussion => "",
        ChatType::Task => "To Do",
        ChatType::Bug => "New",
        ChatType::Epic => "Planned",
    }
}

/// Statuses a chat of the given kind may take. Empty for discussions.
pub fn valid_statuses(chat_type: ChatType) -> &'static [&'static str] {
    match chat_type {
        ChatType::Discussion => &[],
        ChatType::Task => &["To Do", "In Progress", "Done"],
        ChatType::Bug => &["New", "Investigating", "Fixed", "Verified"],
        ChatType::Epic => &["Planned", "In Progress", "Completed"],
    }
}

pub fn is_valid_status(chat_type: ChatType, status: &str) -> bool {
    valid_statuses(chat_type).contains(&status)
}

/// Priority scale for typed chats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl core::fmt::Display for Priority {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl FromStr for Priority {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(DomainError::validation(format!("unknown priority: {other}"))),
        }
    }
}

/// Severity scale; only meaningful for bugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Major,
    Critical,
    Blocker,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
            Severity::Blocker => "blocker",
        };
        f.write_str(s)
    }
}

impl FromStr for Severity {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            "blocker" => Ok(Severity::Blocker),
            other => Err(DomainError::validation(format!("unknown severity: {other}"))),
        }
    }
}

/// Role of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    Admin,
    Member,
}

impl core::fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            ParticipantRole::Admin => "admin",
            ParticipantRole::Member => "member",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_statuses_match_workflow_tables() {
        assert_eq!(default_status(ChatType::Task), "To Do");
        assert_eq!(default_status(ChatType::Bug), "New");
        assert_eq!(default_status(ChatType::Epic), "Planned");
        assert_eq!(default_status(ChatType::Discussion), "");
    }

    #[test]
    fn default_status_is_always_valid_for_typed_kinds() {
        for t in [ChatType::Task, ChatType::Bug, ChatType::Epic] {
            assert!(is_valid_status(t, default_status(t)));
        }
    }

    #[test]
    fn statuses_do_not_cross_kinds() {
        assert!(is_valid_status(ChatType::Task, "Done"));
        assert!(!is_valid_status(ChatType::Bug, "Done"));
        assert!(!is_valid_status(ChatType::Discussion, "Done"));
    }

    #[test]
    fn chat_type_parses_stable_strings() {
        assert_eq!("task".parse::<ChatType>().unwrap(), ChatType::Task);
        assert!("project".parse::<ChatType>().is_err());
        assert_eq!(ChatType::Epic.to_string(), "epic");
    }

    #[test]
    fn priority_and_severity_round_trip() {
        for p in ["low", "medium", "high", "critical"] {
            assert_eq!(p.parse::<Priority>().unwrap().to_string(), p);
        }
        for s in ["minor", "major", "critical", "blocker"] {
            assert_eq!(s.parse::<Severity>().unwrap().to_string(), s);
        }
    }
}

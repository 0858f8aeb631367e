use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Status of a single task inside a plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn mark(&self) -> &'static str {
        match self {
            TaskStatus::Completed => "[✓]",
            TaskStatus::InProgress => "[→]",
            TaskStatus::Blocked => "[!]",
            TaskStatus::NotStarted => "[ ]",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "not_started",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }

    /// A task is resolved once it can no longer be scheduled.
    pub fn is_resolved(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Blocked)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanTask {
    pub content: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub result: Option<String>,
}

impl PlanTask {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: TaskStatus::NotStarted,
            notes: String::new(),
            result: None,
        }
    }
}

/// An ordered list of tasks with per-task status, notes and result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    pub plan_id: String,
    pub title: String,
    pub tasks: Vec<PlanTask>,
}

impl Plan {
    pub fn new(plan_id: impl Into<String>, title: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            title: title.into(),
            tasks: steps.into_iter().map(PlanTask::new).collect(),
        }
    }

    pub fn completed_count(&self) -> usize {
        self.count(TaskStatus::Completed)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }

    /// All tasks are either completed or blocked.
    pub fn is_resolved(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.iter().all(|t| t.status.is_resolved())
    }

    /// Replace the ordered step list, preserving status/notes/result for
    /// every step whose text is unchanged at the same index. Everything
    /// else resets to `NOT_STARTED`.
    pub fn apply_steps(&mut self, steps: Vec<String>) {
        let old = std::mem::take(&mut self.tasks);
        self.tasks = steps
            .into_iter()
            .enumerate()
            .map(|(i, content)| match old.get(i) {
                Some(existing) if existing.content == content => existing.clone(),
                _ => PlanTask::new(content),
            })
            .collect();
    }

    /// Render the plan as structured text: header, progress percentage,
    /// status legend and one line per step with optional notes/result.
    pub fn render(&self, with_results: bool) -> String {
        let completed = self.completed_count();
        let total = self.tasks.len();
        let progress = if total > 0 {
            (completed as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        let header = format!("Plan: {} (ID: {})\n", self.title, self.plan_id);
        let mut text = header.clone();
        text.push_str(&"=".repeat(header.len()));
        text.push_str("\n\n");
        text.push_str(&format!(
            "Progress: {}/{} steps completed ({:.1}%)\n",
            completed, total, progress
        ));
        text.push_str(&format!(
            "Status: {} completed, {} in progress, {} blocked, {} not started\n\n",
            completed,
            self.count(TaskStatus::InProgress),
            self.count(TaskStatus::Blocked),
            self.count(TaskStatus::NotStarted),
        ));
        text.push_str("Steps:\n");

        for (i, task) in self.tasks.iter().enumerate() {
            text.push_str(&format!("{}. {} {}\n", i, task.status.mark(), task.content));
            if !task.notes.is_empty() {
                text.push_str(&format!("   Notes: {}\n", task.notes));
            }
            if with_results {
                if let Some(result) = &task.result {
                    if !result.is_empty() {
                        text.push_str(&format!("   Result: {}\n", result));
                    }
                }
            }
        }

        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan::new(
            "plan_1",
            "Build a TODO CLI",
            vec![
                "Design data model".to_string(),
                "Implement CLI".to_string(),
                "Write README".to_string(),
            ],
        )
    }

    #[test]
    fn render_counts_completed_steps() {
        let mut p = plan();
        p.tasks[0].status = TaskStatus::Completed;
        p.tasks[1].status = TaskStatus::InProgress;
        let text = p.render(false);
        assert!(text.contains("Progress: 1/3 steps completed (33.3%)"));
        assert!(text.contains("0. [✓] Design data model"));
        assert!(text.contains("1. [→] Implement CLI"));
        assert!(text.contains("2. [ ] Write README"));
    }

    #[test]
    fn apply_steps_preserves_unchanged_positions() {
        let mut p = plan();
        p.tasks[0].status = TaskStatus::Completed;
        p.tasks[0].result = Some("done".to_string());
        p.tasks[1].notes = "tricky".to_string();

        p.apply_steps(vec![
            "Design data model".to_string(),
            "Implement TUI".to_string(),
            "Write README".to_string(),
        ]);

        assert_eq!(p.tasks[0].status, TaskStatus::Completed);
        assert_eq!(p.tasks[0].result.as_deref(), Some("done"));
        // changed text at index 1 resets everything
        assert_eq!(p.tasks[1].status, TaskStatus::NotStarted);
        assert!(p.tasks[1].notes.is_empty());
        assert_eq!(p.tasks[2].status, TaskStatus::NotStarted);
    }

    #[test]
    fn resolved_requires_every_task_terminal() {
        let mut p = plan();
        assert!(!p.is_resolved());
        for task in &mut p.tasks {
            task.status = TaskStatus::Completed;
        }
        assert!(p.is_resolved());
        p.tasks[2].status = TaskStatus::Blocked;
        assert!(p.is_resolved());
    }
}

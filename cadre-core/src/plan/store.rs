use std::collections::HashMap;

use cadre_types::{AgentError, Plan, TaskStatus};

/// In-memory mapping of plan id to plan, with one active plan.
///
/// Command methods return the human-readable output that is fed back to
/// the LLM as the tool result.
#[derive(Debug, Default)]
pub struct PlanStore {
    plans: HashMap<String, Plan>,
    active_plan_id: Option<String>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_plan_id(&self) -> Option<&str> {
        self.active_plan_id.as_deref()
    }

    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.contains_key(plan_id)
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    fn resolve_plan_id(&self, plan_id: Option<&str>) -> Result<String, AgentError> {
        let id = plan_id
            .map(str::to_string)
            .or_else(|| self.active_plan_id.clone())
            .ok_or_else(|| AgentError::Planning("No active plan. Create a plan first.".into()))?;
        if !self.plans.contains_key(&id) {
            return Err(AgentError::Planning(format!("Plan not found with ID: {}", id)));
        }
        Ok(id)
    }

    pub fn create(
        &mut self,
        plan_id: &str,
        title: &str,
        steps: Vec<String>,
    ) -> Result<String, AgentError> {
        if plan_id.is_empty() {
            return Err(AgentError::Planning(
                "The `plan_id` parameter is required for command: create".into(),
            ));
        }
        if self.plans.contains_key(plan_id) {
            return Err(AgentError::Planning(format!(
                "Plan with ID '{}' already exists. Use 'update' to modify the existing plan.",
                plan_id
            )));
        }
        if title.is_empty() {
            return Err(AgentError::Planning(
                "The `title` parameter is required for command: create".into(),
            ));
        }
        if steps.is_empty() || steps.iter().any(|s| s.trim().is_empty()) {
            return Err(AgentError::Planning(
                "The `steps` parameter must be a non-empty list of strings for command: create"
                    .into(),
            ));
        }

        let plan = Plan::new(plan_id, title, steps);
        let rendered = plan.render(true);
        self.plans.insert(plan_id.to_string(), plan);
        self.active_plan_id = Some(plan_id.to_string());
        Ok(format!(
            "Plan created successfully with ID: {}\n\n{}",
            plan_id, rendered
        ))
    }

    pub fn update(
        &mut self,
        plan_id: Option<&str>,
        title: Option<&str>,
        steps: Option<Vec<String>>,
    ) -> Result<String, AgentError> {
        let id = self.resolve_plan_id(plan_id)?;
        let plan = self.plans.get_mut(&id).ok_or_else(|| {
            AgentError::Planning(format!("Plan not found with ID: {}", id))
        })?;
        if let Some(title) = title {
            if !title.is_empty() {
                plan.title = title.to_string();
            }
        }
        if let Some(steps) = steps {
            // An empty list leaves the existing steps untouched.
            if !steps.is_empty() {
                if steps.iter().any(|s| s.trim().is_empty()) {
                    return Err(AgentError::Planning(
                        "The `steps` parameter must be a list of non-empty strings for command: update"
                            .into(),
                    ));
                }
                plan.apply_steps(steps);
            }
        }
        Ok(format!(
            "Plan updated successfully: {}\n\n{}",
            id,
            plan.render(true)
        ))
    }

    pub fn list(&self) -> String {
        if self.plans.is_empty() {
            return "No plans found. Create a plan using the 'create' command.".to_string();
        }
        let mut ids: Vec<&String> = self.plans.keys().collect();
        ids.sort();
        let mut output = String::from("Available plans:\n");
        for id in ids {
            let plan = &self.plans[id];
            let marker = if self.active_plan_id.as_deref() == Some(id) {
                " (active)"
            } else {
                ""
            };
            output.push_str(&format!(
                "• {}{}: {} - {}/{} steps completed\n",
                id,
                marker,
                plan.title,
                plan.completed_count(),
                plan.tasks.len()
            ));
        }
        output
    }

    pub fn get_rendered(&self, plan_id: Option<&str>) -> Result<String, AgentError> {
        let id = self.resolve_plan_id(plan_id)?;
        Ok(self.plans[&id].render(true))
    }

    pub fn set_active(&mut self, plan_id: &str) -> Result<String, AgentError> {
        if plan_id.is_empty() {
            return Err(AgentError::Planning(
                "The `plan_id` parameter is required for command: set_active".into(),
            ));
        }
        if !self.plans.contains_key(plan_id) {
            return Err(AgentError::Planning(format!(
                "Plan not found with ID: {}",
                plan_id
            )));
        }
        self.active_plan_id = Some(plan_id.to_string());
        Ok(format!("The active plan is now set to: {}", plan_id))
    }

    pub fn mark_step(
        &mut self,
        plan_id: Option<&str>,
        step_index: usize,
        step_status: Option<TaskStatus>,
        step_notes: Option<&str>,
    ) -> Result<String, AgentError> {
        let id = self.resolve_plan_id(plan_id)?;
        let plan = self.plans.get_mut(&id).ok_or_else(|| {
            AgentError::Planning(format!("Plan not found with ID: {}", id))
        })?;
        let len = plan.tasks.len();
        let task = plan.tasks.get_mut(step_index).ok_or_else(|| {
            AgentError::Planning(format!(
                "Invalid step_index: {}. Valid indices are 0 to {}.",
                step_index,
                len.saturating_sub(1)
            ))
        })?;
        if let Some(status) = step_status {
            task.status = status;
        }
        if let Some(notes) = step_notes {
            if !notes.is_empty() {
                task.notes = notes.to_string();
            }
        }
        Ok(format!(
            "Step {} updated in plan '{}'.\n\n{}",
            step_index,
            id,
            plan.render(true)
        ))
    }

    pub fn delete(&mut self, plan_id: &str) -> Result<String, AgentError> {
        if plan_id.is_empty() {
            return Err(AgentError::Planning(
                "The `plan_id` parameter is required for command: delete".into(),
            ));
        }
        if self.plans.remove(plan_id).is_none() {
            return Err(AgentError::Planning(format!(
                "Plan not found with ID: {}",
                plan_id
            )));
        }
        if self.active_plan_id.as_deref() == Some(plan_id) {
            self.active_plan_id = self.plans.keys().next().cloned();
        }
        Ok(format!(
            "Plan with ID '{}' has been deleted successfully.",
            plan_id
        ))
    }

    pub fn add_result(
        &mut self,
        plan_id: Option<&str>,
        step_index: usize,
        step_result: &str,
    ) -> Result<String, AgentError> {
        let id = self.resolve_plan_id(plan_id)?;
        let plan = self.plans.get_mut(&id).ok_or_else(|| {
            AgentError::Planning(format!("Plan not found with ID: {}", id))
        })?;
        let len = plan.tasks.len();
        let task = plan.tasks.get_mut(step_index).ok_or_else(|| {
            AgentError::Planning(format!(
                "Invalid step_index: {}. Valid indices are 0 to {}.",
                step_index,
                len.saturating_sub(1)
            ))
        })?;
        task.result = Some(step_result.to_string());
        Ok(format!(
            "Result added to step {} in plan '{}'.\n\n{}",
            step_index,
            id,
            plan.render(true)
        ))
    }
}

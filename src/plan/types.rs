//! 计划与步骤的数据类型
//!
//! ExecutionPlan 由 PlanExecutor 独占修改；PlanStep 创建后原地更新状态，从不单独删除。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PlanId = String;

/// 计划状态：planning -> executing -> completed / failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planning,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Planning => "planning",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤状态：pending -> executing -> completed / failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// 计划中的一个步骤（子任务结构相同）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// 分解得到的子任务；非空时 result 由子任务结果合成
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<PlanStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub needs_subtasks: Option<bool>,
}

impl PlanStep {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: description.into(),
            status: StepStatus::Pending,
            result: None,
            error: None,
            timestamp: Utc::now(),
            subtasks: Vec::new(),
            needs_subtasks: None,
        }
    }

    pub fn mark_executing(&mut self) {
        self.status = StepStatus::Executing;
        self.timestamp = Utc::now();
    }

    pub fn mark_completed(&mut self, result: String) {
        self.status = StepStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.timestamp = Utc::now();
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.timestamp = Utc::now();
    }

    pub fn is_completed(&self) -> bool {
        self.status == StepStatus::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

/// 执行计划
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub id: PlanId,
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub status: PlanStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionPlan {
    pub fn new(goal: impl Into<String>, descriptions: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            goal: goal.into(),
            steps: descriptions.into_iter().map(PlanStep::new).collect(),
            status: PlanStatus::Planning,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_completed()).count()
    }

    pub fn failed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.is_failed()).count()
    }

    /// 终态判定：只要有一个步骤完成即视为 completed，全部未完成才是 failed
    pub fn final_status(&self) -> PlanStatus {
        let completed = self.completed_steps();
        if completed == self.steps.len() || completed > 0 {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        }
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            id: self.id.clone(),
            goal: self.goal.clone(),
            status: self.status,
            step_count: self.steps.len(),
            completed_steps: self.completed_steps(),
            created_at: self.created_at,
        }
    }
}

/// 计划列表摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSummary {
    pub id: PlanId,
    pub goal: String,
    pub status: PlanStatus,
    pub step_count: usize,
    pub completed_steps: usize,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with(statuses: &[StepStatus]) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new(
            "goal",
            statuses.iter().map(|_| "s".to_string()).collect(),
        );
        for (step, status) in plan.steps.iter_mut().zip(statuses) {
            step.status = *status;
        }
        plan
    }

    #[test]
    fn test_partial_success_counts_as_completed() {
        let plan = plan_with(&[StepStatus::Completed, StepStatus::Failed, StepStatus::Failed]);
        assert_eq!(plan.final_status(), PlanStatus::Completed);
    }

    #[test]
    fn test_no_completed_step_is_failed() {
        let plan = plan_with(&[StepStatus::Failed, StepStatus::Pending]);
        assert_eq!(plan.final_status(), PlanStatus::Failed);
    }

    #[test]
    fn test_empty_plan_is_completed() {
        // 0 == 0：没有步骤也算全部完成
        let plan = plan_with(&[]);
        assert_eq!(plan.final_status(), PlanStatus::Completed);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&PlanStatus::Executing).unwrap();
        assert_eq!(json, "\"executing\"");
    }
}

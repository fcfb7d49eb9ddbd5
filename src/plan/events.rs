//! 计划执行过程事件：用于 CLI 打印与 SSE 推送

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::types::{PlanId, PlanStatus, PlanStep};

/// 执行过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanEvent {
    /// 步骤或子任务状态变化（携带完整快照）；子任务的 parent_id 为所属步骤 id
    StepUpdate {
        step: PlanStep,
        #[serde(skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
    },
    /// 步骤执行中的增量文本（仅在 stream_step_output 开启时）
    StepDelta { step_id: String, text: String },
    /// 重规划：after_index 之后的剩余步骤被替换为 steps
    Replanned {
        after_index: usize,
        steps: Vec<PlanStep>,
    },
    /// 执行被取消，剩余步骤保持 pending
    Cancelled,
    /// 计划执行结束
    PlanFinished { plan_id: PlanId, status: PlanStatus },
}

/// 事件通道发送端；接收方已关闭时静默丢弃
pub type EventSender = UnboundedSender<PlanEvent>;

pub(crate) fn send_event(tx: Option<&EventSender>, ev: PlanEvent) {
    if let Some(tx) = tx {
        let _ = tx.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_shape() {
        let ev = PlanEvent::PlanFinished {
            plan_id: "p1".to_string(),
            status: PlanStatus::Completed,
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "plan_finished");
        assert_eq!(v["status"], "completed");

        let step = PlanStep::new("写一段话");
        let v = serde_json::to_value(PlanEvent::StepUpdate {
            step,
            parent_id: None,
        })
        .unwrap();
        assert_eq!(v["type"], "step_update");
        assert_eq!(v["step"]["status"], "pending");
        assert!(v.get("parent_id").is_none());
    }
}

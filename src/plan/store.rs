//! 内存中的计划存储（按 id 索引）

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::types::{ExecutionPlan, PlanId, PlanSummary};

#[derive(Default)]
pub struct PlanStore {
    plans: RwLock<HashMap<PlanId, ExecutionPlan>>,
}

impl PlanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖
    pub async fn put(&self, plan: ExecutionPlan) {
        self.plans.write().await.insert(plan.id.clone(), plan);
    }

    /// 仅在 id 仍存在时覆盖；返回是否写入
    pub async fn update(&self, plan: ExecutionPlan) -> bool {
        match self.plans.write().await.get_mut(&plan.id) {
            Some(slot) => {
                *slot = plan;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: &str) -> Option<ExecutionPlan> {
        self.plans.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.plans.write().await.remove(id).is_some()
    }

    /// 摘要列表，按创建时间倒序
    pub async fn summaries(&self) -> Vec<PlanSummary> {
        let mut list: Vec<PlanSummary> = self
            .plans
            .read()
            .await
            .values()
            .map(ExecutionPlan::summary)
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    pub async fn len(&self) -> usize {
        self.plans.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_update_skips_removed_plan() {
        let store = PlanStore::new();
        let plan = ExecutionPlan::new("目标", vec!["a".to_string()]);
        store.put(plan.clone()).await;
        assert!(store.update(plan.clone()).await);

        store.remove(&plan.id).await;
        assert!(!store.update(plan.clone()).await);
        assert!(store.get(&plan.id).await.is_none());
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let store = PlanStore::new();
        let plan = ExecutionPlan::new("目标", vec!["a".to_string()]);
        let id = plan.id.clone();
        store.put(plan).await;

        assert_eq!(store.get(&id).await.map(|p| p.goal), Some("目标".to_string()));
        assert!(store.remove(&id).await);
        assert!(!store.remove(&id).await);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_summaries_newest_first() {
        let store = PlanStore::new();
        let mut old = ExecutionPlan::new("old", vec![]);
        old.created_at = old.created_at - Duration::minutes(5);
        let new = ExecutionPlan::new("new", vec!["x".to_string()]);
        store.put(old).await;
        store.put(new).await;

        let list = store.summaries().await;
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].goal, "new");
        assert_eq!(list[0].step_count, 1);
        assert_eq!(list[1].goal, "old");
    }
}

//! Keyed mutex registry serialising propagations per project.
//!
//! Unrelated projects never contend. Idle entries are pruned on the next
//! acquisition so the table stays bounded by the number of in-flight projects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

#[derive(Default)]
pub struct ProjectLocks {
    slots: Mutex<HashMap<i64, Slot>>,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProjectLocks {
    fn slot(&self, project_id: i64) -> Slot {
        let mut slots = lock_or_recover(&self.slots);
        // Only the table holds an idle slot; nobody can be waiting on it.
        slots.retain(|id, slot| *id == project_id || Arc::strong_count(slot) > 1);
        slots.entry(project_id).or_default().clone()
    }

    /// Wait for exclusive access to `project_id`.
    pub async fn lock(&self, project_id: i64) -> OwnedMutexGuard<()> {
        self.slot(project_id).lock_owned().await
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_project_is_serialised() {
        let locks = Arc::new(ProjectLocks::default());
        let guard = locks.lock(1).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.lock(1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn different_projects_do_not_block() {
        let locks = ProjectLocks::default();
        let _a = locks.lock(1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(2)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let locks = ProjectLocks::default();
        for id in 0..10 {
            let _g = locks.lock(id).await;
        }
        let _g = locks.lock(99).await;
        assert_eq!(locks.len(), 1);
    }
}

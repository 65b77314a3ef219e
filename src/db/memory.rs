//! In-process [`CicdStore`].
//!
//! Mirrors the SQL semantics of [`Database`](super::Database): the same
//! uniqueness keys, `GREATEST` on `last_attempt_number`, the monotone log
//! state guard and the compare-and-set settle. Used by the integration tests
//! and by embedders that do not want a PostgreSQL dependency.

use super::{
    AgentLogRow, AgentRow, CicdStore, NewAgentLog, NewProjectLog, NewWorkflowLog, ParameterRow,
    ProjectLogRow, ProjectRow, RunState, WorkflowLogRow, WorkflowRow, WorkflowUpsert,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Tables {
    projects: Vec<ProjectRow>,
    agents: Vec<AgentRow>,
    parameters: Vec<ParameterRow>,
    workflows: Vec<WorkflowRow>,
    workflow_logs: Vec<WorkflowLogRow>,
    agent_logs: Vec<AgentLogRow>,
    project_logs: Vec<ProjectLogRow>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn workflow_index(&self, project_id: i64, provider_workflow_id: i64) -> Option<usize> {
        self.workflows.iter().position(|w| {
            w.project_id == project_id && w.provider_workflow_id == provider_workflow_id
        })
    }

    fn has_open_logs(&self, project_id: i64, provider_workflow_id: i64) -> bool {
        self.workflow_logs.iter().any(|l| {
            l.project_id == project_id
                && l.provider_workflow_id == provider_workflow_id
                && l.run_state() != Some(RunState::Completed)
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_project(
        &self,
        name: &str,
        repo_coordinate: Option<&str>,
        repo_api_token: Option<&str>,
    ) -> ProjectRow {
        let mut t = self.lock();
        let row = ProjectRow {
            id: t.next_id(),
            name: name.to_string(),
            repo_coordinate: repo_coordinate.map(str::to_string),
            repo_api_token: repo_api_token.map(str::to_string),
            is_archived: false,
        };
        t.projects.push(row.clone());
        row
    }

    pub fn archive_project(&self, id: i64) {
        let mut t = self.lock();
        if let Some(p) = t.projects.iter_mut().find(|p| p.id == id) {
            p.is_archived = true;
        }
    }

    pub fn insert_agent(&self, project_id: i64, name: &str, workflow_name: Option<&str>) -> AgentRow {
        let mut t = self.lock();
        let row = AgentRow {
            id: t.next_id(),
            project_id,
            name: name.to_string(),
            workflow_name: workflow_name.map(str::to_string),
            stage_id: None,
            environment_id: None,
            api_token: String::new(),
            is_archived: false,
        };
        t.agents.push(row.clone());
        row
    }

    pub fn insert_parameter(
        &self,
        project_id: i64,
        stage_id: i64,
        environment_id: i64,
        name: &str,
        value: &str,
        is_applied: bool,
    ) -> ParameterRow {
        let mut t = self.lock();
        let row = ParameterRow {
            id: t.next_id(),
            project_id,
            stage_id,
            environment_id,
            name: name.to_string(),
            value: value.to_string(),
            is_applied,
            is_archived: false,
        };
        t.parameters.push(row.clone());
        row
    }

    /// Every workflow log of a project in insertion order.
    pub fn workflow_logs(&self, project_id: i64) -> Vec<WorkflowLogRow> {
        self.lock()
            .workflow_logs
            .iter()
            .filter(|l| l.project_id == project_id)
            .cloned()
            .collect()
    }

    pub fn agent_log_count(&self) -> usize {
        self.lock().agent_logs.len()
    }

    pub fn project_log_count(&self) -> usize {
        self.lock().project_logs.len()
    }
}

#[async_trait]
impl CicdStore for MemoryStore {
    async fn get_project(&self, id: i64) -> Result<Option<ProjectRow>> {
        Ok(self.lock().projects.iter().find(|p| p.id == id).cloned())
    }

    async fn get_active_projects(&self) -> Result<Vec<ProjectRow>> {
        Ok(self
            .lock()
            .projects
            .iter()
            .filter(|p| !p.is_archived)
            .cloned()
            .collect())
    }

    async fn get_agent(&self, id: i64) -> Result<Option<AgentRow>> {
        Ok(self.lock().agents.iter().find(|a| a.id == id).cloned())
    }

    async fn get_applied_parameters(&self, project_id: i64) -> Result<Vec<ParameterRow>> {
        let mut rows: Vec<ParameterRow> = self
            .lock()
            .parameters
            .iter()
            .filter(|p| p.project_id == project_id && p.is_applied && !p.is_archived)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (a.stage_id, a.environment_id, &a.name).cmp(&(b.stage_id, b.environment_id, &b.name))
        });
        Ok(rows)
    }

    async fn upsert_workflow(&self, w: &WorkflowUpsert) -> Result<WorkflowRow> {
        let mut t = self.lock();
        let now = Utc::now();
        if let Some(row) = t
            .workflows
            .iter_mut()
            .find(|r| r.project_id == w.project_id && r.provider_workflow_id == w.provider_workflow_id)
        {
            row.name = w.name.clone();
            row.path = w.path.clone();
            row.state = w.state.clone();
            row.last_attempt_number = row.last_attempt_number.max(w.last_attempt_number);
            row.updated_at = now;
            return Ok(row.clone());
        }
        let row = WorkflowRow {
            id: t.next_id(),
            project_id: w.project_id,
            provider_workflow_id: w.provider_workflow_id,
            name: w.name.clone(),
            path: w.path.clone(),
            state: w.state.clone(),
            last_attempt_number: w.last_attempt_number,
            is_up_to_date: true,
            updated_at: now,
        };
        t.workflows.push(row.clone());
        Ok(row)
    }

    async fn get_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>> {
        let mut rows: Vec<WorkflowRow> = self
            .lock()
            .workflows
            .iter()
            .filter(|w| w.project_id == project_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            (&a.name, a.provider_workflow_id).cmp(&(&b.name, b.provider_workflow_id))
        });
        Ok(rows)
    }

    async fn get_workflow(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Option<WorkflowRow>> {
        Ok(self
            .lock()
            .workflows
            .iter()
            .find(|w| w.project_id == project_id && w.provider_workflow_id == provider_workflow_id)
            .cloned())
    }

    async fn get_outdated_workflows(&self, project_id: i64) -> Result<Vec<WorkflowRow>> {
        Ok(self
            .lock()
            .workflows
            .iter()
            .filter(|w| w.project_id == project_id && !w.is_up_to_date)
            .cloned()
            .collect())
    }

    async fn record_dispatch(&self, log: &NewWorkflowLog) -> Result<Option<WorkflowLogRow>> {
        let mut t = self.lock();
        let now = Utc::now();
        let wf_idx = match t.workflow_index(log.project_id, log.provider_workflow_id) {
            Some(idx) => idx,
            None => {
                let id = t.next_id();
                t.workflows.push(WorkflowRow {
                    id,
                    project_id: log.project_id,
                    provider_workflow_id: log.provider_workflow_id,
                    name: log.workflow_name.clone(),
                    path: String::new(),
                    state: "active".to_string(),
                    last_attempt_number: 0,
                    is_up_to_date: true,
                    updated_at: now,
                });
                t.workflows.len() - 1
            }
        };

        if t.workflow_logs.iter().any(|l| {
            l.workflow_run_id == log.workflow_run_id && l.attempt_number == log.attempt_number
        }) {
            return Ok(None);
        }
        let row = WorkflowLogRow {
            id: t.next_id(),
            project_id: log.project_id,
            provider_workflow_id: log.provider_workflow_id,
            workflow_run_id: log.workflow_run_id,
            attempt_number: log.attempt_number,
            state: RunState::Queued.as_str().to_string(),
            started_at: None,
            duration_ms: None,
            created_at: now,
            updated_at: now,
        };
        t.workflow_logs.push(row.clone());

        let wf = &mut t.workflows[wf_idx];
        wf.last_attempt_number = wf.last_attempt_number.max(log.attempt_number);
        wf.is_up_to_date = false;
        wf.updated_at = now;
        Ok(Some(row))
    }

    async fn get_open_workflow_logs(
        &self,
        project_id: i64,
        provider_workflow_id: i64,
    ) -> Result<Vec<WorkflowLogRow>> {
        Ok(self
            .lock()
            .workflow_logs
            .iter()
            .filter(|l| {
                l.project_id == project_id
                    && l.provider_workflow_id == provider_workflow_id
                    && l.run_state() != Some(RunState::Completed)
            })
            .cloned()
            .collect())
    }

    async fn advance_workflow_log(
        &self,
        id: i64,
        state: RunState,
        started_at: Option<DateTime<Utc>>,
        duration_ms: Option<i64>,
    ) -> Result<bool> {
        let mut t = self.lock();
        let Some(log) = t.workflow_logs.iter_mut().find(|l| l.id == id) else {
            return Ok(false);
        };
        let current = log.run_state().unwrap_or(RunState::Queued);
        if current >= state {
            return Ok(false);
        }
        log.state = state.as_str().to_string();
        if started_at.is_some() {
            log.started_at = started_at;
        }
        if duration_ms.is_some() {
            log.duration_ms = duration_ms;
        }
        log.updated_at = Utc::now();
        Ok(true)
    }

    async fn settle_workflow(&self, project_id: i64, provider_workflow_id: i64) -> Result<bool> {
        let mut t = self.lock();
        let Some(idx) = t.workflow_index(project_id, provider_workflow_id) else {
            return Ok(false);
        };
        if t.workflows[idx].is_up_to_date || t.has_open_logs(project_id, provider_workflow_id) {
            return Ok(false);
        }
        let wf = &mut t.workflows[idx];
        wf.is_up_to_date = true;
        wf.updated_at = Utc::now();
        Ok(true)
    }

    async fn insert_agent_log(&self, log: &NewAgentLog) -> Result<AgentLogRow> {
        let mut t = self.lock();
        let row = AgentLogRow {
            id: t.next_id(),
            agent_id: log.agent_id,
            project_id: log.project_id,
            action: log.action.clone(),
            response_status: log.response_status,
            latency_ms: log.latency_ms,
            message: log.message.clone(),
            created_at: Utc::now(),
        };
        t.agent_logs.push(row.clone());
        Ok(row)
    }

    async fn insert_project_log(&self, log: &NewProjectLog) -> Result<ProjectLogRow> {
        let mut t = self.lock();
        let row = ProjectLogRow {
            id: t.next_id(),
            project_id: log.project_id,
            user_id: log.user_id,
            action: log.action.clone(),
            response_status: log.response_status,
            latency_ms: log.latency_ms,
            message: log.message.clone(),
            created_at: Utc::now(),
        };
        t.project_logs.push(row.clone());
        Ok(row)
    }

    async fn get_agent_logs(&self, agent_id: i64, limit: i64) -> Result<Vec<AgentLogRow>> {
        Ok(self
            .lock()
            .agent_logs
            .iter()
            .rev()
            .filter(|l| l.agent_id == agent_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_project_logs(&self, project_id: i64, limit: i64) -> Result<Vec<ProjectLogRow>> {
        Ok(self
            .lock()
            .project_logs
            .iter()
            .rev()
            .filter(|l| l.project_id == project_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_workflow_logs(&self, project_id: i64, limit: i64) -> Result<Vec<WorkflowLogRow>> {
        Ok(self
            .lock()
            .workflow_logs
            .iter()
            .rev()
            .filter(|l| l.project_id == project_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatch(project_id: i64, wf: i64, run: i64, attempt: i32) -> NewWorkflowLog {
        NewWorkflowLog {
            project_id,
            provider_workflow_id: wf,
            workflow_name: "deploy".into(),
            workflow_run_id: run,
            attempt_number: attempt,
        }
    }

    fn upsert(project_id: i64, wf: i64, attempt: i32) -> WorkflowUpsert {
        WorkflowUpsert {
            project_id,
            provider_workflow_id: wf,
            name: "deploy".into(),
            path: ".github/workflows/deploy.yml".into(),
            state: "active".into(),
            last_attempt_number: attempt,
        }
    }

    #[tokio::test]
    async fn applied_parameters_are_filtered_and_ordered() {
        let store = MemoryStore::new();
        let p = store.insert_project("p", None, None);
        store.insert_parameter(p.id, 2, 1, "B", "b", true);
        store.insert_parameter(p.id, 1, 2, "A", "a", true);
        store.insert_parameter(p.id, 1, 1, "Z", "z", true);
        store.insert_parameter(p.id, 1, 1, "C", "c", true);
        store.insert_parameter(p.id, 1, 1, "UNAPPLIED", "x", false);

        let names: Vec<String> = store
            .get_applied_parameters(p.id)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["C", "Z", "A", "B"]);
    }

    #[tokio::test]
    async fn upsert_never_lowers_attempt_number() {
        let store = MemoryStore::new();
        let p = store.insert_project("p", None, None);
        store.upsert_workflow(&upsert(p.id, 10, 5)).await.unwrap();
        let row = store.upsert_workflow(&upsert(p.id, 10, 2)).await.unwrap();
        assert_eq!(row.last_attempt_number, 5);
        assert_eq!(store.get_workflows(p.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_dispatch_is_ignored() {
        let store = MemoryStore::new();
        let p = store.insert_project("p", None, None);
        assert!(store.record_dispatch(&dispatch(p.id, 10, 77, 2)).await.unwrap().is_some());
        assert!(store.record_dispatch(&dispatch(p.id, 10, 77, 2)).await.unwrap().is_none());
        assert_eq!(store.workflow_logs(p.id).len(), 1);

        let wf = store.get_workflow(p.id, 10).await.unwrap().unwrap();
        assert!(!wf.is_up_to_date);
        assert_eq!(wf.last_attempt_number, 2);
        assert_eq!(wf.path, "");
    }

    #[tokio::test]
    async fn completed_logs_never_move() {
        let store = MemoryStore::new();
        let p = store.insert_project("p", None, None);
        let log = store
            .record_dispatch(&dispatch(p.id, 10, 77, 2))
            .await
            .unwrap()
            .unwrap();
        assert!(store
            .advance_workflow_log(log.id, RunState::Completed, None, Some(1500))
            .await
            .unwrap());
        assert!(!store
            .advance_workflow_log(log.id, RunState::InProgress, None, None)
            .await
            .unwrap());
        assert!(!store
            .advance_workflow_log(log.id, RunState::Completed, None, Some(9))
            .await
            .unwrap());
        let logs = store.workflow_logs(p.id);
        assert_eq!(logs[0].duration_ms, Some(1500));
    }

    #[tokio::test]
    async fn settle_requires_no_open_logs() {
        let store = MemoryStore::new();
        let p = store.insert_project("p", None, None);
        let a = store.record_dispatch(&dispatch(p.id, 10, 77, 2)).await.unwrap().unwrap();
        let b = store.record_dispatch(&dispatch(p.id, 10, 78, 1)).await.unwrap().unwrap();

        store
            .advance_workflow_log(a.id, RunState::Completed, None, Some(1))
            .await
            .unwrap();
        assert!(!store.settle_workflow(p.id, 10).await.unwrap());

        store
            .advance_workflow_log(b.id, RunState::Completed, None, Some(1))
            .await
            .unwrap();
        assert!(store.settle_workflow(p.id, 10).await.unwrap());
        assert!(!store.settle_workflow(p.id, 10).await.unwrap());
        assert!(store.get_outdated_workflows(p.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn archived_projects_are_not_active() {
        let store = MemoryStore::new();
        let a = store.insert_project("a", None, None);
        let b = store.insert_project("b", None, None);
        store.archive_project(a.id);
        let active = store.get_active_projects().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn audit_reads_are_newest_first() {
        let store = MemoryStore::new();
        let p = store.insert_project("p", None, None);
        for status in [201, 202, 404] {
            store
                .insert_project_log(&NewProjectLog {
                    project_id: p.id,
                    user_id: None,
                    action: "Rerun Workflow".into(),
                    response_status: status,
                    latency_ms: 1,
                    message: String::new(),
                })
                .await
                .unwrap();
        }
        let logs = store.get_project_logs(p.id, 2).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].response_status, 404);
        assert_eq!(logs[1].response_status, 202);
    }
}

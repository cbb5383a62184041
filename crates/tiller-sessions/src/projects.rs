use tiller_store::Store;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::types::Project;

/// Ownership-scoped project storage.
#[derive(Clone)]
pub struct ProjectStore {
    store: Store,
}

impl ProjectStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    #[instrument(skip(self, description), fields(user_id, name))]
    pub fn create(&self, user_id: &str, name: &str, description: &str) -> Result<Project> {
        let id = Uuid::now_v7().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        let conn = self.store.lock();
        conn.execute(
            "INSERT INTO projects (id, user_id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            rusqlite::params![id, user_id, name, description, now],
        )?;
        debug!(project_id = %id, "project created");

        Ok(Project {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            is_active: true,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_owned(&self, project_id: &str, user_id: &str) -> Result<Project> {
        let conn = self.store.lock();
        let project = conn
            .query_row(
                "SELECT id, user_id, name, description, is_active, created_at, updated_at
                 FROM projects WHERE id = ?1",
                [project_id],
                row_to_project,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    SessionError::NotFound(format!("project {project_id}"))
                }
                other => other.into(),
            })?;

        if project.user_id != user_id {
            return Err(SessionError::Forbidden(format!("project {project_id}")));
        }
        Ok(project)
    }

    /// Active projects for a user, most recently updated first.
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Project>> {
        let conn = self.store.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, name, description, is_active, created_at, updated_at
             FROM projects
             WHERE user_id = ?1 AND is_active = 1
             ORDER BY updated_at DESC",
        )?;
        let rows = stmt.query_map([user_id], row_to_project)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn update(
        &self,
        project_id: &str,
        user_id: &str,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Project> {
        let current = self.get_owned(project_id, user_id)?;
        let now = chrono::Utc::now().to_rfc3339();
        let name = name.unwrap_or(&current.name);
        let description = description.unwrap_or(&current.description);

        {
            let conn = self.store.lock();
            conn.execute(
                "UPDATE projects SET name = ?1, description = ?2, updated_at = ?3 WHERE id = ?4",
                rusqlite::params![name, description, now, project_id],
            )?;
        }
        self.get_owned(project_id, user_id)
    }

    /// Delete a project. Sessions are detached (`project_id` set NULL by the
    /// schema), never deleted.
    #[instrument(skip(self), fields(project_id, user_id))]
    pub fn delete(&self, project_id: &str, user_id: &str) -> Result<()> {
        self.get_owned(project_id, user_id)?;
        let conn = self.store.lock();
        conn.execute("DELETE FROM projects WHERE id = ?1", [project_id])?;
        debug!("project deleted, sessions detached");
        Ok(())
    }
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        is_active: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

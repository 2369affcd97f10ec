//! Postgres-backed credential store.
//!
//! One `PgPool` is built at startup and shared by reference; every query runs
//! on its own pooled connection, so each statement sees read-committed data.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;

use super::traits::*;
use crate::error::StoreError;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS rbac_users (
        id TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        password TEXT NOT NULL,
        activated BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE UNIQUE INDEX IF NOT EXISTS rbac_users_email_idx ON rbac_users (lower(email))"#,
    r#"CREATE TABLE IF NOT EXISTS rbac_roles (
        id BIGSERIAL PRIMARY KEY,
        public_id TEXT NOT NULL,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rbac_permissions (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rbac_user_roles (
        user_id TEXT NOT NULL REFERENCES rbac_users(id) ON DELETE CASCADE,
        role_id BIGINT NOT NULL REFERENCES rbac_roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS rbac_role_permissions (
        role_id BIGINT NOT NULL REFERENCES rbac_roles(id) ON DELETE CASCADE,
        permission_id BIGINT NOT NULL REFERENCES rbac_permissions(id) ON DELETE CASCADE,
        PRIMARY KEY (role_id, permission_id)
    )"#,
];

fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn identity_from_row(row: &PgRow) -> Result<Identity, sqlx::Error> {
    Ok(Identity {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        password_hash: row.try_get("password")?,
        activated: row.try_get("activated")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

/// Postgres credential store
pub struct PostgresCredentialStore {
    pool: PgPool,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens the shared connection pool
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Self::new(pool))
    }

    /// Creates the RBAC tables when missing
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    async fn find_by_email(&self, email: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query("SELECT * FROM rbac_users WHERE lower(email) = lower($1) LIMIT 1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref()
            .map(identity_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query("SELECT * FROM rbac_users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref()
            .map(identity_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn roles_of(&self, identity_id: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"SELECT r.name
               FROM rbac_roles r
               JOIN rbac_user_roles ur ON ur.role_id = r.id
               WHERE ur.user_id = $1
               ORDER BY r.name"#,
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx_error)
    }

    async fn permissions_of(&self, role: &str) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"SELECT p.name
               FROM rbac_permissions p
               JOIN rbac_role_permissions rp ON rp.permission_id = p.id
               JOIN rbac_roles r ON r.id = rp.role_id
               WHERE r.name = $1
               ORDER BY p.name"#,
        )
        .bind(role)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()
            .map_err(map_sqlx_error)
    }

    async fn create_identity(&self, new_identity: NewIdentity) -> StoreResult<Identity> {
        let row = sqlx::query(
            r#"INSERT INTO rbac_users (id, email, name, password, activated)
               VALUES ($1, $2, $3, $4, FALSE)
               RETURNING *"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&new_identity.email)
        .bind(&new_identity.name)
        .bind(&new_identity.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        identity_from_row(&row).map_err(map_sqlx_error)
    }

    async fn update_password_hash(
        &self,
        id: &str,
        expected_hash: &str,
        new_hash: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"UPDATE rbac_users
               SET password = $3, activated = TRUE, updated_at = now()
               WHERE id = $1 AND password = $2"#,
        )
        .bind(id)
        .bind(expected_hash)
        .bind(new_hash)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(
                "password hash changed concurrently or identity missing".to_string(),
            ));
        }
        Ok(())
    }

    async fn rename_identity(&self, id: &str, name: &str) -> StoreResult<Option<Identity>> {
        let row = sqlx::query(
            "UPDATE rbac_users SET name = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        row.as_ref()
            .map(identity_from_row)
            .transpose()
            .map_err(map_sqlx_error)
    }

    async fn delete_identity(&self, id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM rbac_users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn assign_role(&self, identity_id: &str, role: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO rbac_user_roles (user_id, role_id)
               SELECT $1, id FROM rbac_roles WHERE name = $2
               ON CONFLICT DO NOTHING"#,
        )
        .bind(identity_id)
        .bind(role)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM rbac_roles WHERE name = $1")
                .bind(role)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            if exists.is_none() {
                return Err(StoreError::Query(format!("role {} does not exist", role)));
            }
        }
        Ok(())
    }

    async fn revoke_role(&self, identity_id: &str, role: &str) -> StoreResult<()> {
        sqlx::query(
            r#"DELETE FROM rbac_user_roles
               WHERE user_id = $1
                 AND role_id IN (SELECT id FROM rbac_roles WHERE name = $2)"#,
        )
        .bind(identity_id)
        .bind(role)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn list_identities(&self) -> StoreResult<Vec<Identity>> {
        let rows = sqlx::query("SELECT * FROM rbac_users ORDER BY email")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(identity_from_row)
            .collect::<Result<_, _>>()
            .map_err(map_sqlx_error)
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query("SELECT id, public_id, name, description FROM rbac_roles ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter()
            .map(role_from_row)
            .collect::<Result<_, _>>()
            .map_err(map_sqlx_error)
    }

    async fn upsert_role(&self, name: &str, description: &str) -> StoreResult<Role> {
        sqlx::query(
            r#"INSERT INTO rbac_roles (public_id, name, description)
               VALUES ($1, $2, $3)
               ON CONFLICT (name) DO NOTHING"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query("SELECT id, public_id, name, description FROM rbac_roles WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        role_from_row(&row).map_err(map_sqlx_error)
    }

    async fn upsert_permission(&self, name: &str, description: &str) -> StoreResult<Permission> {
        sqlx::query(
            r#"INSERT INTO rbac_permissions (name, description)
               VALUES ($1, $2)
               ON CONFLICT (name) DO NOTHING"#,
        )
        .bind(name)
        .bind(description)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let row = sqlx::query("SELECT id, name, description FROM rbac_permissions WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(Permission {
            id: row.try_get("id").map_err(map_sqlx_error)?,
            name: row.try_get("name").map_err(map_sqlx_error)?,
            description: row.try_get("description").map_err(map_sqlx_error)?,
        })
    }

    async fn grant_permission(&self, role: &str, permission: &str) -> StoreResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO rbac_role_permissions (role_id, permission_id)
               SELECT r.id, p.id
               FROM rbac_roles r, rbac_permissions p
               WHERE r.name = $1 AND p.name = $2
               ON CONFLICT DO NOTHING"#,
        )
        .bind(role)
        .bind(permission)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        log::debug!(
            "grant {} -> {}: {} row(s) inserted",
            role,
            permission,
            result.rows_affected()
        );
        Ok(())
    }
}

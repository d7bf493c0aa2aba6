//! SQLite-backed user account storage.

use crate::auth::models::User;
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

pub struct UserStore {
    db_path: String,
}

impl UserStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                display_name TEXT,
                photo_url TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub fn create_user(&self, username: &str, password: &str, display_name: Option<&str>) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("failed to hash password")?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            display_name: display_name.map(|s| s.to_string()),
            photo_url: None,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO users (id, username, password_hash, display_name, photo_url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.username,
                user.password_hash,
                user.display_name,
                user.photo_url,
                user.created_at,
            ],
        )
        .context("failed to insert user")?;

        info!("created user: {}", user.username);

        Ok(user)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, display_name, photo_url, created_at
             FROM users WHERE username = ?1",
        )?;

        let user_result = stmt.query_row(params![username], row_to_user);

        match user_result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, display_name, photo_url, created_at
             FROM users WHERE id = ?1",
        )?;

        let user_result = stmt.query_row(params![user_id], row_to_user);

        match user_result {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_user_by_username(username)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("failed to verify password")?;
                Ok(valid)
            }
            None => Ok(false),
        }
    }

    /// Update profile fields. `None` fields are left unchanged.
    pub fn update_profile(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<Option<User>> {
        let conn = Connection::open(&self.db_path)?;

        let changed = conn.execute(
            "UPDATE users SET
                display_name = COALESCE(?1, display_name),
                photo_url = COALESCE(?2, photo_url)
             WHERE id = ?3",
            params![display_name, photo_url, user_id],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        self.get_user_by_id(user_id)
    }

    /// Display names keyed by user id, for leaderboard annotation. Users
    /// without a display name fall back to their username.
    pub fn display_names(&self) -> Result<HashMap<String, String>> {
        let conn = Connection::open(&self.db_path)?;

        let mut stmt = conn.prepare("SELECT id, username, display_name FROM users")?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let username: String = row.get(1)?;
                let display_name: Option<String> = row.get(2)?;
                Ok((id, display_name.unwrap_or(username)))
            })?
            .collect::<Result<HashMap<_, _>, _>>()?;

        Ok(rows)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(User {
        id,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        display_name: row.get(3)?,
        photo_url: row.get(4)?,
        created_at: row.get(5)?,
    })
}

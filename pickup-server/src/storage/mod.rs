pub mod models;
pub mod schema;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use models::{
    AttendanceEntry, ChildAccount, DayEntry, Identity, NewAttendanceEntry, NewChildAccount,
    NewStaffAccount, StaffAccount,
};
use pickup_shared::auth::StaffRole;
use tracing::{debug, trace};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input, or a stored row no longer parses.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The username already exists in the staff or the child table.
    #[error("username already taken: {0}")]
    UsernameTaken(String),
}

/// Owned input for a new child account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct ChildInput {
    pub name: String,
    pub parent_mail: String,
    pub parent_contact: String,
    pub username: String,
    pub password_hash: String,
}

/// Owned input for a new staff account; the password is already hashed.
#[derive(Debug, Clone)]
pub struct StaffInput {
    pub name: String,
    pub email: String,
    pub contact: String,
    pub username: String,
    pub password_hash: String,
    pub role: StaffRole,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str, max_size: u32) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(max_size.max(1)).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Runs `f` on a pooled connection off the async executor.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<T, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            f(&mut *conn)
        })
        .await?
    }

    /// Inserts the configured admin unless the username is already used anywhere.
    /// Returns whether a row was created.
    pub async fn seed_admin(&self, input: StaffInput) -> Result<bool, StorageError> {
        match self.create_staff(input).await {
            Ok(_) => Ok(true),
            Err(StorageError::UsernameTaken(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn username_exists(&self, name: &str) -> Result<bool, StorageError> {
        let name = name.to_string();
        self.blocking(move |conn| Ok(username_taken(conn, &name)?))
            .await
    }

    /// Resolves a username against the staff table first, then the child table.
    pub async fn lookup_identity(&self, name: &str) -> Result<Option<Identity>, StorageError> {
        use schema::child_accounts::dsl as ca;
        use schema::staff_accounts::dsl as sa;
        let name = name.to_string();
        self.blocking(move |conn| {
            let staff = sa::staff_accounts
                .filter(sa::username.eq(&name))
                .select(StaffAccount::as_select())
                .first(conn)
                .optional()?;
            if let Some(account) = staff {
                let role = account.staff_role().ok_or_else(|| {
                    StorageError::InvalidInput(format!("unknown staff role: {}", account.role))
                })?;
                return Ok(Some(Identity::Staff { account, role }));
            }
            let child = ca::child_accounts
                .filter(ca::username.eq(&name))
                .select(ChildAccount::as_select())
                .first(conn)
                .optional()?;
            Ok(child.map(Identity::Child))
        })
        .await
    }

    pub async fn find_staff_by_username(
        &self,
        name: &str,
    ) -> Result<Option<StaffAccount>, StorageError> {
        use schema::staff_accounts::dsl as sa;
        let name = name.to_string();
        self.blocking(move |conn| {
            Ok(sa::staff_accounts
                .filter(sa::username.eq(&name))
                .select(StaffAccount::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn find_child_by_username(
        &self,
        name: &str,
    ) -> Result<Option<ChildAccount>, StorageError> {
        use schema::child_accounts::dsl as ca;
        let name = name.to_string();
        self.blocking(move |conn| {
            Ok(ca::child_accounts
                .filter(ca::username.eq(&name))
                .select(ChildAccount::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn find_child_by_id(&self, child: i32) -> Result<Option<ChildAccount>, StorageError> {
        use schema::child_accounts::dsl::*;
        self.blocking(move |conn| {
            Ok(child_accounts
                .filter(id.eq(child))
                .select(ChildAccount::as_select())
                .first(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list_children(&self) -> Result<Vec<ChildAccount>, StorageError> {
        use schema::child_accounts::dsl::*;
        self.blocking(move |conn| {
            Ok(child_accounts
                .order((name.asc(), id.asc()))
                .select(ChildAccount::as_select())
                .load(conn)?)
        })
        .await
    }

    pub async fn list_staff(
        &self,
        role_filter: Option<StaffRole>,
    ) -> Result<Vec<StaffAccount>, StorageError> {
        use schema::staff_accounts::dsl::*;
        self.blocking(move |conn| {
            let mut query = staff_accounts
                .order((name.asc(), id.asc()))
                .select(StaffAccount::as_select())
                .into_boxed();
            if let Some(r) = role_filter {
                query = query.filter(role.eq(r.as_str()));
            }
            Ok(query.load(conn)?)
        })
        .await
    }

    /// Creates a child account. Username uniqueness is checked against both
    /// tables inside one IMMEDIATE transaction.
    pub async fn create_child(&self, input: ChildInput) -> Result<ChildAccount, StorageError> {
        use schema::child_accounts;
        trace!(username = %input.username, "create_child starting");
        self.blocking(move |conn| {
            conn.immediate_transaction(|conn| -> Result<ChildAccount, StorageError> {
                if username_taken(conn, &input.username)? {
                    return Err(StorageError::UsernameTaken(input.username.clone()));
                }
                let row = NewChildAccount {
                    name: &input.name,
                    parent_mail: &input.parent_mail,
                    parent_contact: &input.parent_contact,
                    username: &input.username,
                    password_hash: &input.password_hash,
                    device_token: None,
                    qr_code: Some(&input.username),
                };
                Ok(diesel::insert_into(child_accounts::table)
                    .values(&row)
                    .returning(ChildAccount::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    pub async fn create_staff(&self, input: StaffInput) -> Result<StaffAccount, StorageError> {
        use schema::staff_accounts;
        trace!(username = %input.username, role = %input.role, "create_staff starting");
        self.blocking(move |conn| {
            conn.immediate_transaction(|conn| -> Result<StaffAccount, StorageError> {
                if username_taken(conn, &input.username)? {
                    return Err(StorageError::UsernameTaken(input.username.clone()));
                }
                let row = NewStaffAccount {
                    name: &input.name,
                    email: &input.email,
                    contact: &input.contact,
                    username: &input.username,
                    password_hash: &input.password_hash,
                    role: input.role.as_str(),
                };
                Ok(diesel::insert_into(staff_accounts::table)
                    .values(&row)
                    .returning(StaffAccount::as_returning())
                    .get_result(conn)?)
            })
        })
        .await
    }

    /// Overwrites (or clears) the push endpoint of a child. Last writer wins.
    pub async fn set_device_token(
        &self,
        child: i32,
        token: Option<&str>,
    ) -> Result<bool, StorageError> {
        use schema::child_accounts::dsl::*;
        let token = token.map(|s| s.to_string());
        self.blocking(move |conn| {
            let updated = diesel::update(child_accounts.filter(id.eq(child)))
                .set(device_token.eq(token))
                .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn update_child_password(
        &self,
        name: &str,
        new_hash: &str,
    ) -> Result<bool, StorageError> {
        use schema::child_accounts::dsl as ca;
        let name = name.to_string();
        let new_hash = new_hash.to_string();
        self.blocking(move |conn| {
            let updated = diesel::update(ca::child_accounts.filter(ca::username.eq(&name)))
                .set(ca::password_hash.eq(&new_hash))
                .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    /// Appends one immutable attendance row.
    pub async fn append_attendance(
        &self,
        child: i32,
        checkin: bool,
        at: NaiveDateTime,
    ) -> Result<AttendanceEntry, StorageError> {
        use schema::attendance_log;
        self.blocking(move |conn| {
            let row = NewAttendanceEntry {
                child_id: child,
                is_checkin: checkin,
                recorded_at: at,
            };
            let entry = diesel::insert_into(attendance_log::table)
                .values(&row)
                .returning(AttendanceEntry::as_returning())
                .get_result(conn)?;
            debug!(child_id = child, is_checkin = checkin, "attendance appended");
            Ok(entry)
        })
        .await
    }

    /// History of one child, newest first; ties resolved by insertion order.
    pub async fn list_attendance_for_child(
        &self,
        child: i32,
    ) -> Result<Vec<AttendanceEntry>, StorageError> {
        use schema::attendance_log::dsl::*;
        self.blocking(move |conn| {
            Ok(attendance_log
                .filter(child_id.eq(child))
                .order((recorded_at.desc(), id.desc()))
                .select(AttendanceEntry::as_select())
                .load(conn)?)
        })
        .await
    }

    /// All entries with `from <= recorded_at < to`, oldest first.
    pub async fn list_attendance_between(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<DayEntry>, StorageError> {
        use schema::{attendance_log as al, child_accounts as ca};
        if to <= from {
            return Ok(Vec::new());
        }
        self.blocking(move |conn| {
            let rows = al::table
                .inner_join(ca::table)
                .filter(al::recorded_at.ge(from))
                .filter(al::recorded_at.lt(to))
                .order((al::recorded_at.asc(), al::id.asc()))
                .select((
                    al::id,
                    al::child_id,
                    ca::name,
                    al::is_checkin,
                    al::recorded_at,
                ))
                .load::<(i32, i32, String, bool, NaiveDateTime)>(conn)?;
            Ok(rows
                .into_iter()
                .map(
                    |(entry_id, child_id, child_name, is_checkin, recorded_at)| DayEntry {
                        id: entry_id,
                        child_id,
                        child_name,
                        is_checkin,
                        recorded_at,
                    },
                )
                .collect())
        })
        .await
    }
}

fn username_taken(conn: &mut SqliteConnection, name: &str) -> Result<bool, diesel::result::Error> {
    use schema::{child_accounts as ca, staff_accounts as sa};
    let staff: i64 = sa::table
        .filter(sa::username.eq(name))
        .count()
        .get_result(conn)?;
    if staff > 0 {
        return Ok(true);
    }
    let children: i64 = ca::table
        .filter(ca::username.eq(name))
        .count()
        .get_result(conn)?;
    Ok(children > 0)
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}

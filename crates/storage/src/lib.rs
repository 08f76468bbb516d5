use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Executor, Pool, QueryBuilder, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{Lead, LeadId, LeadStatus, Principal, Role, Seller, SellerId, UserId},
    protocol::{
        CandidatePoolResponse, DistributionCriteria, LeadSortField, LeadStats, ProvinceCount,
        SellerAssignmentCount, SortDirection, UpdateLeadRequest,
    },
};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub region: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub principal: Principal,
    pub password_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewLead {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub province: Option<String>,
    pub city: Option<String>,
    pub notes: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SellerFilter {
    #[default]
    Any,
    Unassigned,
    Seller(SellerId),
}

#[derive(Debug, Clone, Default)]
pub struct LeadFilter {
    pub status: Option<LeadStatus>,
    pub province: Option<String>,
    pub seller: SellerFilter,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LeadSort {
    pub field: LeadSortField,
    pub direction: SortDirection,
}

/// How many leads one seller should receive, and how many of those should
/// come from `preferred_region` when it is set.
#[derive(Debug, Clone)]
pub struct AssignmentQuota {
    pub seller: SellerId,
    pub count: u64,
    pub preferred_region: Option<String>,
    pub preferred: u64,
}

const LEAD_COLUMNS: &str = concat!(
    "id, name, phone, email, province, city, status, assigned_to, ",
    "assigned_at, notes, last_contact, next_action, created_at",
);

const SELLER_COLUMNS: &str = concat!(
    "id, name, username, region, ",
    "total_leads, total_contacted, total_converted, last_access",
);

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Returns `None` when the username is already taken.
    pub async fn create_user(&self, user: &NewUser) -> Result<Option<UserId>> {
        let row = sqlx::query(
            "INSERT INTO users (username, name, password_hash, role, region) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(username) DO NOTHING RETURNING id",
        )
        .bind(user.username.trim())
        .bind(user.name.trim())
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(user.region.as_deref().map(str::trim))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| UserId(row.get::<i64, _>(0))))
    }

    pub async fn find_credentials(&self, username: &str) -> Result<Option<UserCredentials>> {
        let row = sqlx::query("SELECT id, name, role, password_hash FROM users WHERE username = ?")
            .bind(username.trim())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<UserCredentials> {
            Ok(UserCredentials {
                principal: Principal {
                    id: UserId(row.get::<i64, _>(0)),
                    name: row.get::<String, _>(1),
                    role: parse_column(&row.get::<String, _>(2))?,
                },
                password_hash: row.get::<String, _>(3),
            })
        })
        .transpose()
    }

    pub async fn get_principal(&self, user_id: UserId) -> Result<Option<Principal>> {
        let row = sqlx::query("SELECT id, name, role FROM users WHERE id = ?")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| -> Result<Principal> {
            Ok(Principal {
                id: UserId(row.get::<i64, _>(0)),
                name: row.get::<String, _>(1),
                role: parse_column(&row.get::<String, _>(2))?,
            })
        })
        .transpose()
    }

    pub async fn count_admins(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'admin'")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    pub async fn list_sellers(&self) -> Result<Vec<Seller>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELLER_COLUMNS} FROM users WHERE role = 'seller' ORDER BY name, id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(seller_from_row).collect())
    }

    pub async fn get_seller(&self, seller_id: SellerId) -> Result<Option<Seller>> {
        let row = sqlx::query(&format!(
            "SELECT {SELLER_COLUMNS} FROM users WHERE id = ? AND role = 'seller'"
        ))
        .bind(seller_id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(seller_from_row))
    }

    /// Returns false when the user does not exist.
    pub async fn touch_last_access(&self, user_id: UserId, at: DateTime<Utc>) -> Result<bool> {
        let updated = sqlx::query("UPDATE users SET last_access = ? WHERE id = ?")
            .bind(at)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated == 1)
    }

    pub async fn recompute_counters(&self) -> Result<u64> {
        recompute_counters_with(&self.pool).await
    }

    /// Inserts leads one by one inside a transaction. Rows colliding with an
    /// existing phone or email are skipped and counted as duplicates.
    pub async fn insert_leads(&self, leads: &[NewLead]) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        let mut duplicates = 0u64;
        for lead in leads {
            let affected = sqlx::query(
                "INSERT INTO leads (name, phone, email, province, city, notes) VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT DO NOTHING",
            )
            .bind(&lead.name)
            .bind(&lead.phone)
            .bind(&lead.email)
            .bind(&lead.province)
            .bind(&lead.city)
            .bind(&lead.notes)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if affected == 1 {
                inserted += 1;
            } else {
                duplicates += 1;
            }
        }
        tx.commit().await?;
        debug!(inserted, duplicates, "leads inserted");
        Ok((inserted, duplicates))
    }

    pub async fn get_lead(&self, lead_id: LeadId) -> Result<Option<Lead>> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
            .bind(lead_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_row).transpose()
    }

    /// One page of leads plus the number of leads matching `filter` overall.
    /// `page` is 1-based.
    pub async fn list_leads(
        &self,
        filter: &LeadFilter,
        page: u32,
        limit: u32,
        sort: LeadSort,
    ) -> Result<(Vec<Lead>, u64)> {
        let mut count_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM leads WHERE 1 = 1");
        push_lead_filter(&mut count_query, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut query =
            QueryBuilder::<Sqlite>::new(format!("SELECT {LEAD_COLUMNS} FROM leads WHERE 1 = 1"));
        push_lead_filter(&mut query, filter);
        let direction = match sort.direction {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        };
        query.push(format!(
            " ORDER BY {} {direction}, id {direction}",
            sort_column(sort.field)
        ));
        let offset = u64::from(page.max(1) - 1) * u64::from(limit);
        query.push(" LIMIT ");
        query.push_bind(i64::from(limit));
        query.push(" OFFSET ");
        query.push_bind(offset as i64);

        let rows = query.build().fetch_all(&self.pool).await?;
        let leads = rows.iter().map(lead_from_row).collect::<Result<Vec<_>>>()?;
        Ok((leads, total as u64))
    }

    /// Counts for the dashboard. With `scope` set only that seller's leads
    /// are counted, so `unassigned` is always zero.
    pub async fn lead_stats(&self, scope: Option<SellerId>) -> Result<LeadStats> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'uncontacted' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('contacted', 'interested', 'meeting') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'won' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN assigned_to IS NULL THEN 1 ELSE 0 END), 0)
             FROM leads",
        );
        if let Some(seller) = scope {
            query.push(" WHERE assigned_to = ");
            query.push_bind(seller.0);
        }
        let row = query.build().fetch_one(&self.pool).await?;
        Ok(LeadStats {
            total: row.get::<i64, _>(0) as u64,
            new: row.get::<i64, _>(1) as u64,
            contacted: row.get::<i64, _>(2) as u64,
            converted: row.get::<i64, _>(3) as u64,
            unassigned: row.get::<i64, _>(4) as u64,
        })
    }

    pub async fn provinces_with_unassigned(&self) -> Result<Vec<ProvinceCount>> {
        let rows = sqlx::query(
            "SELECT province, COUNT(*) FROM leads
             WHERE assigned_to IS NULL AND province IS NOT NULL AND trim(province) <> ''
             GROUP BY province ORDER BY COUNT(*) DESC, province",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(province_count_from_row).collect())
    }

    pub async fn candidate_pool(
        &self,
        criteria: &DistributionCriteria,
    ) -> Result<CandidatePoolResponse> {
        let mut total_query = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM leads WHERE 1 = 1");
        push_criteria(&mut total_query, criteria);
        let total: i64 = total_query
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut province_query = QueryBuilder::<Sqlite>::new(
            "SELECT province, COUNT(*) FROM leads WHERE province IS NOT NULL AND trim(province) <> ''",
        );
        push_criteria(&mut province_query, criteria);
        province_query.push(" GROUP BY province ORDER BY COUNT(*) DESC, province");
        let rows = province_query.build().fetch_all(&self.pool).await?;

        Ok(CandidatePoolResponse {
            total: total as u64,
            by_province: rows.iter().map(province_count_from_row).collect(),
        })
    }

    /// Assigns leads matching `criteria` to each quota's seller in one
    /// transaction. Preferred-region picks for every quota run first, then
    /// each quota is topped up from the general pool in order. A lead is
    /// never picked twice, oldest leads go first, and seller counters are
    /// recomputed before commit.
    pub async fn assign_quotas(
        &self,
        criteria: &DistributionCriteria,
        quotas: &[AssignmentQuota],
        at: DateTime<Utc>,
    ) -> Result<Vec<SellerAssignmentCount>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "CREATE TEMP TABLE IF NOT EXISTS assignment_run (
                lead_id INTEGER PRIMARY KEY,
                seller_id INTEGER NOT NULL
            )",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM temp.assignment_run")
            .execute(&mut *tx)
            .await?;
        let mut granted = vec![0u64; quotas.len()];

        for (idx, quota) in quotas.iter().enumerate() {
            let Some(region) = quota.preferred_region.as_deref() else {
                continue;
            };
            let want = quota.preferred.min(quota.count);
            if want == 0 {
                continue;
            }
            granted[idx] +=
                pick_candidates(&mut *tx, criteria, quota.seller, Some(region), want).await?;
        }

        for (idx, quota) in quotas.iter().enumerate() {
            let want = quota.count.saturating_sub(granted[idx]);
            if want == 0 {
                continue;
            }
            granted[idx] +=
                pick_candidates(&mut *tx, criteria, quota.seller, None, want).await?;
        }

        let applied = apply_picks(&mut *tx, criteria, at).await?;
        debug!(applied, "leads assigned");
        sqlx::query("DROP TABLE temp.assignment_run")
            .execute(&mut *tx)
            .await?;
        recompute_counters_with(&mut *tx).await?;
        tx.commit().await?;

        Ok(quotas
            .iter()
            .zip(granted)
            .map(|(quota, count)| SellerAssignmentCount {
                user_id: quota.seller,
                count,
            })
            .collect())
    }

    /// Applies the provided fields and returns the updated lead, or `None`
    /// when the lead does not exist. A status change also stamps
    /// `last_contact` and refreshes the owner's counters.
    pub async fn update_lead(
        &self,
        lead_id: LeadId,
        update: &UpdateLeadRequest,
        now: DateTime<Utc>,
    ) -> Result<Option<Lead>> {
        let mut tx = self.pool.begin().await?;
        if !update.is_empty() {
            let mut query = QueryBuilder::<Sqlite>::new("UPDATE leads SET ");
            let mut fields = query.separated(", ");
            if let Some(status) = update.status {
                fields.push("status = ");
                fields.push_bind_unseparated(status.as_str());
                fields.push("last_contact = ");
                fields.push_bind_unseparated(now);
            }
            if let Some(notes) = &update.notes {
                fields.push("notes = ");
                fields.push_bind_unseparated(notes.clone());
            }
            if let Some(next_action) = update.next_action {
                fields.push("next_action = ");
                fields.push_bind_unseparated(next_action);
            }
            query.push(" WHERE id = ");
            query.push_bind(lead_id.0);
            let updated = query.build().execute(&mut *tx).await?.rows_affected();
            if updated == 0 {
                return Ok(None);
            }
            if update.status.is_some() {
                recompute_counters_with(&mut *tx).await?;
            }
        }

        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?"))
            .bind(lead_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        tx.commit().await?;
        row.as_ref().map(lead_from_row).transpose()
    }
}

async fn recompute_counters_with<'e, E>(executor: E) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let updated = executor
        .execute(
            "UPDATE users SET
                total_leads = (SELECT COUNT(*) FROM leads WHERE leads.assigned_to = users.id),
                total_contacted = (SELECT COUNT(*) FROM leads
                    WHERE leads.assigned_to = users.id AND leads.status <> 'uncontacted'),
                total_converted = (SELECT COUNT(*) FROM leads
                    WHERE leads.assigned_to = users.id AND leads.status = 'won')
             WHERE role = 'seller'",
        )
        .await?
        .rows_affected();
    Ok(updated)
}

/// Reserves up to `limit` matching leads for `seller` in the run table and
/// returns how many were reserved. Leads already reserved in this run are
/// skipped.
async fn pick_candidates<'e, E>(
    executor: E,
    criteria: &DistributionCriteria,
    seller: SellerId,
    region: Option<&str>,
    limit: u64,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut query = QueryBuilder::<Sqlite>::new(
        "INSERT INTO temp.assignment_run (lead_id, seller_id) SELECT id, ",
    );
    query.push_bind(seller.0);
    query.push(" FROM leads WHERE id NOT IN (SELECT lead_id FROM temp.assignment_run)");
    push_criteria(&mut query, criteria);
    if let Some(region) = region {
        query.push(" AND lower(trim(province)) = lower(trim(");
        query.push_bind(region.to_string());
        query.push("))");
    }
    query.push(" ORDER BY created_at ASC, id ASC LIMIT ");
    query.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

    Ok(query.build().execute(executor).await?.rows_affected())
}

async fn apply_picks<'e, E>(
    executor: E,
    criteria: &DistributionCriteria,
    at: DateTime<Utc>,
) -> Result<u64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let mut sql = String::from(
        "UPDATE leads SET
            assigned_to = (SELECT seller_id FROM temp.assignment_run WHERE lead_id = leads.id),
            assigned_at = ?
         WHERE id IN (SELECT lead_id FROM temp.assignment_run)",
    );
    if criteria.unassigned_only {
        sql.push_str(" AND assigned_to IS NULL");
    }
    Ok(sqlx::query(&sql).bind(at).execute(executor).await?.rows_affected())
}

fn push_criteria(query: &mut QueryBuilder<'_, Sqlite>, criteria: &DistributionCriteria) {
    if criteria.unassigned_only {
        query.push(" AND assigned_to IS NULL");
    }
    if let Some(status) = criteria.status {
        query.push(" AND status = ");
        query.push_bind(status.as_str());
    }
    if let Some(province) = criteria.province.as_deref().map(str::trim) {
        if !province.is_empty() {
            query.push(" AND lower(trim(province)) = lower(");
            query.push_bind(province.to_string());
            query.push(")");
        }
    }
}

fn push_lead_filter(query: &mut QueryBuilder<'_, Sqlite>, filter: &LeadFilter) {
    if let Some(status) = filter.status {
        query.push(" AND status = ");
        query.push_bind(status.as_str());
    }
    if let Some(province) = filter.province.as_deref().map(str::trim) {
        if !province.is_empty() {
            query.push(" AND lower(trim(province)) = lower(");
            query.push_bind(province.to_string());
            query.push(")");
        }
    }
    match filter.seller {
        SellerFilter::Any => {}
        SellerFilter::Unassigned => {
            query.push(" AND assigned_to IS NULL");
        }
        SellerFilter::Seller(seller) => {
            query.push(" AND assigned_to = ");
            query.push_bind(seller.0);
        }
    }
    if let Some(search) = filter.search.as_deref().map(str::trim) {
        if !search.is_empty() {
            let pattern = format!("%{}%", search.to_lowercase());
            query.push(" AND (lower(name) LIKE ");
            query.push_bind(pattern.clone());
            query.push(" OR phone LIKE ");
            query.push_bind(pattern.clone());
            query.push(" OR lower(email) LIKE ");
            query.push_bind(pattern.clone());
            query.push(" OR lower(city) LIKE ");
            query.push_bind(pattern);
            query.push(")");
        }
    }
}

fn sort_column(field: LeadSortField) -> &'static str {
    match field {
        LeadSortField::Name => "name",
        LeadSortField::Status => "status",
        LeadSortField::Province => "province",
        LeadSortField::CreatedAt => "created_at",
        LeadSortField::AssignedAt => "assigned_at",
        LeadSortField::LastContact => "last_contact",
        LeadSortField::NextAction => "next_action",
    }
}

fn parse_column<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err: T::Err| anyhow!("corrupt column value '{value}': {err}"))
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead> {
    Ok(Lead {
        id: LeadId(row.get::<i64, _>("id")),
        name: row.get::<String, _>("name"),
        phone: row.get::<Option<String>, _>("phone"),
        email: row.get::<Option<String>, _>("email"),
        province: row.get::<Option<String>, _>("province"),
        city: row.get::<Option<String>, _>("city"),
        status: parse_column(&row.get::<String, _>("status"))?,
        assigned_to: row.get::<Option<i64>, _>("assigned_to").map(UserId),
        assigned_at: row.get::<Option<DateTime<Utc>>, _>("assigned_at"),
        notes: row.get::<String, _>("notes"),
        last_contact: row.get::<Option<DateTime<Utc>>, _>("last_contact"),
        next_action: row.get::<Option<DateTime<Utc>>, _>("next_action"),
        created_at: row.get::<DateTime<Utc>, _>("created_at"),
    })
}

fn seller_from_row(row: &SqliteRow) -> Seller {
    Seller {
        id: UserId(row.get::<i64, _>("id")),
        name: row.get::<String, _>("name"),
        username: row.get::<String, _>("username"),
        region: row.get::<Option<String>, _>("region"),
        total_leads: row.get::<i64, _>("total_leads") as u64,
        total_contacted: row.get::<i64, _>("total_contacted") as u64,
        total_converted: row.get::<i64, _>("total_converted") as u64,
        last_access: row.get::<Option<DateTime<Utc>>, _>("last_access"),
    }
}

fn province_count_from_row(row: &SqliteRow) -> ProvinceCount {
    ProvinceCount {
        province: row.get::<String, _>(0),
        count: row.get::<i64, _>(1) as u64,
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

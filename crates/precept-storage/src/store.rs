//! SQLite implementation of the core's store port.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{query, query_as, Sqlite, SqlitePool, Transaction};

use precept_core::{
    Assignment, AuditRecord, Availability, BlackoutDate, CapacityRule, Clerkship,
    ClerkshipConfigOverride, Elective, Enrollment, EntityBundle, HealthSystem, MutationBatch,
    Preceptor, SchedulingDefaults, SchedulingPeriod, SchedulingStore, Site, StoreBusy, Student,
    Team, TeamMember,
};

use crate::error::{is_busy, StorageError};
use crate::models::{
    AssignmentRow, AuditRow, AvailabilityRow, BlackoutRow, CapacityRuleRow, ClerkshipRow,
    ConfigOverrideRow, ElectiveRow, EnrollmentRow, HealthSystemRow, PeriodRow, PreceptorRow,
    SiteRow, StudentRow, TeamMemberRow, TeamRow,
};

pub struct SqliteSchedulingStore {
    pool: SqlitePool,
}

/// Wrap an sqlx error, surfacing transient contention as `StoreBusy` so the
/// core's backoff wrapper can retry it.
fn store_err(err: sqlx::Error) -> anyhow::Error {
    if is_busy(&err) {
        anyhow::Error::new(StoreBusy(err.to_string()))
    } else {
        anyhow::Error::new(StorageError::from(err))
    }
}

impl SqliteSchedulingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the underlying pool for ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Most recent audit records, newest first.
    pub async fn load_audit_log(&self, limit: u32) -> anyhow::Result<Vec<AuditRecord>> {
        let rows = query_as::<_, AuditRow>(
            "SELECT id, timestamp, strategy, cutoff_date, end_date, past_count,
                    deleted_count, preserved_count, affected_count, generated_count,
                    success, reason, notes, bypassed_constraints
             FROM audit_logs ORDER BY timestamp DESC, id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    // ========================================================================
    // Seeding helpers (used by tests and the CLI import path)
    // ========================================================================

    pub async fn insert_period(&self, period: &SchedulingPeriod) -> anyhow::Result<()> {
        query("INSERT INTO scheduling_periods (id, start_date, end_date, is_active) VALUES (?, ?, ?, ?)")
            .bind(&period.id)
            .bind(period.start_date.to_string())
            .bind(period.end_date.to_string())
            .bind(period.is_active as i64)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_health_system(&self, hs: &HealthSystem) -> anyhow::Result<()> {
        query("INSERT INTO health_systems (id, name) VALUES (?, ?)")
            .bind(&hs.id)
            .bind(&hs.name)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_site(&self, site: &Site) -> anyhow::Result<()> {
        query("INSERT INTO sites (id, name, health_system_id) VALUES (?, ?, ?)")
            .bind(&site.id)
            .bind(&site.name)
            .bind(&site.health_system_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_clerkship(&self, clerkship: &Clerkship) -> anyhow::Result<()> {
        query(
            "INSERT INTO clerkships (id, name, clerkship_type, required_days, specialty)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&clerkship.id)
        .bind(&clerkship.name)
        .bind(clerkship.clerkship_type.as_str())
        .bind(clerkship.required_days as i64)
        .bind(&clerkship.specialty)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_elective(&self, elective: &Elective) -> anyhow::Result<()> {
        query(
            "INSERT INTO electives (id, parent_clerkship_id, name, minimum_days, specialty, is_required)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&elective.id)
        .bind(&elective.parent_clerkship_id)
        .bind(&elective.name)
        .bind(elective.minimum_days as i64)
        .bind(&elective.specialty)
        .bind(elective.is_required as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        for preceptor_id in &elective.allowed_preceptor_ids {
            query("INSERT INTO elective_preceptors (elective_id, preceptor_id) VALUES (?, ?)")
                .bind(&elective.id)
                .bind(preceptor_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    pub async fn insert_student(&self, student: &Student) -> anyhow::Result<()> {
        query("INSERT INTO students (id, name) VALUES (?, ?)")
            .bind(&student.id)
            .bind(&student.name)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        for hs in &student.onboarded_health_systems {
            query("INSERT INTO student_health_systems (student_id, health_system_id) VALUES (?, ?)")
                .bind(&student.id)
                .bind(hs)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    pub async fn insert_preceptor(&self, preceptor: &Preceptor) -> anyhow::Result<()> {
        query(
            "INSERT INTO preceptors (id, name, specialty, health_system_id, max_students, is_global_fallback_only)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&preceptor.id)
        .bind(&preceptor.name)
        .bind(&preceptor.specialty)
        .bind(&preceptor.health_system_id)
        .bind(preceptor.max_students as i64)
        .bind(preceptor.is_global_fallback_only as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        for site_id in &preceptor.site_ids {
            query("INSERT INTO preceptor_sites (preceptor_id, site_id) VALUES (?, ?)")
                .bind(&preceptor.id)
                .bind(site_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    pub async fn insert_team(&self, team: &Team) -> anyhow::Result<()> {
        query(
            "INSERT INTO teams (id, clerkship_id, require_same_health_system, require_same_site, require_same_specialty)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&team.id)
        .bind(&team.clerkship_id)
        .bind(team.require_same_health_system as i64)
        .bind(team.require_same_site as i64)
        .bind(team.require_same_specialty as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        for site_id in &team.site_ids {
            query("INSERT INTO team_sites (team_id, site_id) VALUES (?, ?)")
                .bind(&team.id)
                .bind(site_id)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        for member in &team.members {
            query("INSERT INTO team_members (team_id, preceptor_id, priority) VALUES (?, ?, ?)")
                .bind(&team.id)
                .bind(&member.preceptor_id)
                .bind(member.priority as i64)
                .execute(&self.pool)
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    pub async fn insert_availability(&self, rows: &[Availability]) -> anyhow::Result<()> {
        for row in rows {
            query(
                "INSERT INTO availability (preceptor_id, site_id, date, is_available)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(preceptor_id, site_id, date) DO UPDATE SET
                    is_available = excluded.is_available",
            )
            .bind(&row.preceptor_id)
            .bind(&row.site_id)
            .bind(row.date.to_string())
            .bind(row.is_available as i64)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        }
        Ok(())
    }

    pub async fn delete_availability(
        &self,
        preceptor_id: &str,
        date: NaiveDate,
    ) -> anyhow::Result<()> {
        query("DELETE FROM availability WHERE preceptor_id = ? AND date = ?")
            .bind(preceptor_id)
            .bind(date.to_string())
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_blackout(&self, blackout: &BlackoutDate) -> anyhow::Result<()> {
        query("INSERT INTO blackout_dates (date, reason) VALUES (?, ?)")
            .bind(blackout.date.to_string())
            .bind(&blackout.reason)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_capacity_rule(&self, rule: &CapacityRule) -> anyhow::Result<()> {
        query(
            "INSERT INTO capacity_rules
             (preceptor_id, clerkship_id, requirement_type, max_per_day, max_per_year, max_blocks_per_year)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&rule.preceptor_id)
        .bind(&rule.clerkship_id)
        .bind(rule.requirement_type.map(|t| t.as_str()))
        .bind(rule.max_per_day.map(|v| v as i64))
        .bind(rule.max_per_year.map(|v| v as i64))
        .bind(rule.max_blocks_per_year.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_enrollment(&self, enrollment: &Enrollment) -> anyhow::Result<()> {
        query("INSERT INTO enrollments (student_id, clerkship_id, elective_id) VALUES (?, ?, ?)")
            .bind(&enrollment.student_id)
            .bind(&enrollment.clerkship_id)
            .bind(&enrollment.elective_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    pub async fn insert_config_override(
        &self,
        ov: &ClerkshipConfigOverride,
    ) -> anyhow::Result<()> {
        query(
            "INSERT INTO clerkship_config_overrides
             (clerkship_id, strategy, health_system_rule, max_per_day, max_per_year,
              allow_teams, allow_fallbacks, fallback_requires_approval,
              fallback_allow_cross_system, block_size_days, allow_partial_blocks,
              prefer_continuous_blocks, team_size_min, team_size_max, max_blocks_per_year)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ov.clerkship_id)
        .bind(ov.strategy.map(|s| s.as_str()))
        .bind(ov.health_system_rule.map(|r| r.as_str()))
        .bind(ov.max_per_day.map(|v| v as i64))
        .bind(ov.max_per_year.map(|v| v as i64))
        .bind(ov.allow_teams.map(|v| v as i64))
        .bind(ov.allow_fallbacks.map(|v| v as i64))
        .bind(ov.fallback_requires_approval.map(|v| v as i64))
        .bind(ov.fallback_allow_cross_system.map(|v| v as i64))
        .bind(ov.block_size_days.map(|v| v as i64))
        .bind(ov.allow_partial_blocks.map(|v| v as i64))
        .bind(ov.prefer_continuous_blocks.map(|v| v as i64))
        .bind(ov.team_size_min.map(|v| v as i64))
        .bind(ov.team_size_max.map(|v| v as i64))
        .bind(ov.max_blocks_per_year.map(|v| v as i64))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn insert_assignment_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        a: &Assignment,
    ) -> sqlx::Result<()> {
        query(
            "INSERT INTO assignments
             (id, student_id, preceptor_id, clerkship_id, site_id, elective_id, date, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&a.id)
        .bind(&a.student_id)
        .bind(&a.preceptor_id)
        .bind(&a.clerkship_id)
        .bind(&a.site_id)
        .bind(&a.elective_id)
        .bind(a.date.to_string())
        .bind(a.status.as_str())
        .bind(a.created_at.timestamp_millis())
        .bind(a.updated_at.timestamp_millis())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SchedulingStore for SqliteSchedulingStore {
    async fn load_period(&self, period_id: &str) -> anyhow::Result<Option<SchedulingPeriod>> {
        let row = query_as::<_, PeriodRow>(
            "SELECT id, start_date, end_date, is_active FROM scheduling_periods WHERE id = ?",
        )
        .bind(period_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(row.map(PeriodRow::into_domain).transpose()?)
    }

    async fn load_entities(&self, _period: &SchedulingPeriod) -> anyhow::Result<EntityBundle> {
        let health_systems: Vec<HealthSystem> =
            query_as::<_, HealthSystemRow>("SELECT id, name FROM health_systems ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?
                .into_iter()
                .map(Into::into)
                .collect();

        let sites: Vec<Site> = query_as::<_, SiteRow>(
            "SELECT id, name, health_system_id FROM sites ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(Into::into)
        .collect();

        let clerkships: Vec<Clerkship> = query_as::<_, ClerkshipRow>(
            "SELECT id, name, clerkship_type, required_days, specialty FROM clerkships ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| r.into_domain())
        .collect::<Result<_, _>>()?;

        // Electives with their allow-lists.
        let mut allowed: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let allow_rows = query_as::<_, (String, String)>(
            "SELECT elective_id, preceptor_id FROM elective_preceptors ORDER BY elective_id, preceptor_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        for (elective_id, preceptor_id) in allow_rows {
            allowed.entry(elective_id).or_default().push(preceptor_id);
        }
        let electives: Vec<Elective> = query_as::<_, ElectiveRow>(
            "SELECT id, parent_clerkship_id, name, minimum_days, specialty, is_required
             FROM electives ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| {
            let list = allowed.remove(&r.id).unwrap_or_default();
            r.into_domain(list)
        })
        .collect();

        // Students with onboarded health systems.
        let mut onboarded: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let onboard_rows = query_as::<_, (String, String)>(
            "SELECT student_id, health_system_id FROM student_health_systems ORDER BY student_id, health_system_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        for (student_id, hs) in onboard_rows {
            onboarded.entry(student_id).or_default().push(hs);
        }
        let students: Vec<Student> =
            query_as::<_, StudentRow>("SELECT id, name FROM students ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(store_err)?
                .into_iter()
                .map(|r| {
                    let systems = onboarded.remove(&r.id).unwrap_or_default();
                    r.into_domain(systems)
                })
                .collect();

        // Preceptors with their sites.
        let mut preceptor_sites: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let site_rows = query_as::<_, (String, String)>(
            "SELECT preceptor_id, site_id FROM preceptor_sites ORDER BY preceptor_id, site_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        for (preceptor_id, site_id) in site_rows {
            preceptor_sites
                .entry(preceptor_id)
                .or_default()
                .push(site_id);
        }
        let preceptors: Vec<Preceptor> = query_as::<_, PreceptorRow>(
            "SELECT id, name, specialty, health_system_id, max_students, is_global_fallback_only
             FROM preceptors ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| {
            let sites = preceptor_sites.remove(&r.id).unwrap_or_default();
            r.into_domain(sites)
        })
        .collect();

        // Teams with sites and members.
        let mut team_sites: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let ts_rows = query_as::<_, (String, String)>(
            "SELECT team_id, site_id FROM team_sites ORDER BY team_id, site_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        for (team_id, site_id) in ts_rows {
            team_sites.entry(team_id).or_default().push(site_id);
        }
        let mut team_members: BTreeMap<String, Vec<TeamMember>> = BTreeMap::new();
        let member_rows = query_as::<_, TeamMemberRow>(
            "SELECT team_id, preceptor_id, priority FROM team_members ORDER BY team_id, priority, preceptor_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        for row in member_rows {
            team_members.entry(row.team_id.clone()).or_default().push(TeamMember {
                preceptor_id: row.preceptor_id,
                priority: row.priority as u32,
            });
        }
        let teams: Vec<Team> = query_as::<_, TeamRow>(
            "SELECT id, clerkship_id, require_same_health_system, require_same_site, require_same_specialty
             FROM teams ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| {
            let sites = team_sites.remove(&r.id).unwrap_or_default();
            let members = team_members.remove(&r.id).unwrap_or_default();
            r.into_domain(sites, members)
        })
        .collect();

        let capacity_rules: Vec<CapacityRule> = query_as::<_, CapacityRuleRow>(
            "SELECT preceptor_id, clerkship_id, requirement_type, max_per_day, max_per_year, max_blocks_per_year
             FROM capacity_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| r.into_domain())
        .collect::<Result<_, _>>()?;

        let availability: Vec<Availability> = query_as::<_, AvailabilityRow>(
            "SELECT preceptor_id, site_id, date, is_available FROM availability
             ORDER BY preceptor_id, site_id, date",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| r.into_domain())
        .collect::<Result<_, _>>()?;

        let blackouts: Vec<BlackoutDate> = query_as::<_, BlackoutRow>(
            "SELECT date, reason FROM blackout_dates ORDER BY date",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| r.into_domain())
        .collect::<Result<_, _>>()?;

        let enrollments: Vec<Enrollment> = query_as::<_, EnrollmentRow>(
            "SELECT student_id, clerkship_id, elective_id FROM enrollments
             ORDER BY student_id, clerkship_id, elective_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(Into::into)
        .collect();

        let config_overrides: Vec<ClerkshipConfigOverride> = query_as::<_, ConfigOverrideRow>(
            "SELECT clerkship_id, strategy, health_system_rule, max_per_day, max_per_year,
                    allow_teams, allow_fallbacks, fallback_requires_approval,
                    fallback_allow_cross_system, block_size_days, allow_partial_blocks,
                    prefer_continuous_blocks, team_size_min, team_size_max, max_blocks_per_year
             FROM clerkship_config_overrides ORDER BY clerkship_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?
        .into_iter()
        .map(|r| r.into_domain())
        .collect::<Result<_, _>>()?;

        Ok(EntityBundle {
            health_systems,
            sites,
            clerkships,
            electives,
            students,
            preceptors,
            teams,
            capacity_rules,
            availability,
            blackouts,
            enrollments,
            defaults: SchedulingDefaults::default(),
            config_overrides,
        })
    }

    async fn load_assignments(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> anyhow::Result<Vec<Assignment>> {
        let rows = query_as::<_, AssignmentRow>(
            "SELECT id, student_id, preceptor_id, clerkship_id, site_id, elective_id,
                    date, status, created_at, updated_at
             FROM assignments WHERE date >= ? AND date <= ?
             ORDER BY date, student_id, id",
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;
        rows.into_iter()
            .map(|r| r.into_domain().map_err(Into::into))
            .collect()
    }

    async fn apply_mutations(&self, batch: MutationBatch) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        for id in &batch.delete_assignment_ids {
            query("DELETE FROM assignments WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        for assignment in &batch.insert_assignments {
            Self::insert_assignment_in_tx(&mut tx, assignment)
                .await
                .map_err(store_err)?;
        }
        for assignment in &batch.update_assignments {
            query(
                "UPDATE assignments SET preceptor_id = ?, site_id = ?, date = ?, status = ?, updated_at = ?
                 WHERE id = ?",
            )
            .bind(&assignment.preceptor_id)
            .bind(&assignment.site_id)
            .bind(assignment.date.to_string())
            .bind(assignment.status.as_str())
            .bind(assignment.updated_at.timestamp_millis())
            .bind(&assignment.id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        if let Some(audit) = &batch.audit {
            query(
                "INSERT INTO audit_logs
                 (id, timestamp, strategy, cutoff_date, end_date, past_count, deleted_count,
                  preserved_count, affected_count, generated_count, success, reason, notes,
                  bypassed_constraints)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&audit.id)
            .bind(audit.timestamp.timestamp_millis())
            .bind(&audit.strategy)
            .bind(audit.cutoff_date.to_string())
            .bind(audit.end_date.to_string())
            .bind(audit.past_count as i64)
            .bind(audit.deleted_count as i64)
            .bind(audit.preserved_count as i64)
            .bind(audit.affected_count as i64)
            .bind(audit.generated_count as i64)
            .bind(audit.success as i64)
            .bind(&audit.reason)
            .bind(&audit.notes)
            .bind(
                serde_json::to_string(&audit.bypassed_constraints)
                    .unwrap_or_else(|_| "[]".to_string()),
            )
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }

        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn acquire_period_lock(&self, period_id: &str) -> anyhow::Result<()> {
        let result = query("INSERT INTO period_locks (period_id, acquired_at) VALUES (?, ?)")
            .bind(period_id)
            .bind(chrono::Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.message().contains("UNIQUE constraint failed") => {
                Err(anyhow::Error::new(StoreBusy(format!(
                    "period {} is locked by another regeneration",
                    period_id
                ))))
            }
            Err(err) => Err(store_err(err)),
        }
    }

    async fn release_period_lock(&self, period_id: &str) -> anyhow::Result<()> {
        query("DELETE FROM period_locks WHERE period_id = ?")
            .bind(period_id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(())
    }
}

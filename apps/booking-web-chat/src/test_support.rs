//! Banco temporário e cadastros de apoio para os testes

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use common_db::models::{AppointmentStatus, Professional};
use common_db::{init_db_pool, DbConfig, SqliteDirectory, SqliteSessionStore};
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use crate::clock::MockClock;
use crate::config::EngineSettings;
use crate::dialogue::BookingEngine;
use crate::schedule::{format_hhmm, parse_hhmm};

pub const CLINIC: &str = "clinica-1";

pub struct Fixture {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub directory: Arc<SqliteDirectory>,
    pub sessions: Arc<SqliteSessionStore>,
}

impl Fixture {
    pub async fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let config = DbConfig {
            db_path: dir.path().join("booking.db").to_string_lossy().to_string(),
            max_connections: 2,
        };
        let pool = init_db_pool(&config).await?;

        Ok(Self {
            _dir: dir,
            directory: Arc::new(SqliteDirectory::new(pool.clone())),
            sessions: Arc::new(SqliteSessionStore::new(pool.clone())),
            pool,
        })
    }

    /// Motor com o relógio parado em `now`
    pub fn engine(&self, now: DateTime<Utc>) -> BookingEngine {
        let mut clock = MockClock::new();
        clock.expect_now().return_const(now);
        BookingEngine::new(
            self.sessions.clone(),
            self.directory.clone(),
            Arc::new(clock),
            EngineSettings::default(),
        )
    }

    pub async fn professional(
        &self,
        name: &str,
        schedule: Option<Value>,
        duration: Option<u32>,
    ) -> Result<Professional> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO professionals (id, clinic_id, name, specialty, appointment_duration, schedule) VALUES (?, ?, ?, 'Clínico Geral', ?, ?)",
        )
        .bind(id.to_string())
        .bind(CLINIC)
        .bind(name)
        .bind(duration)
        .bind(schedule.map(|s| s.to_string()))
        .execute(&self.pool)
        .await?;

        let professional = sqlx::query_as::<_, Professional>("SELECT * FROM professionals WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(professional)
    }

    pub async fn set_monthly_limit(&self, professional_id: Uuid, limit: u32) -> Result<()> {
        sqlx::query("UPDATE professionals SET monthly_booking_limit = ? WHERE id = ?")
            .bind(limit)
            .bind(professional_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Titular com uma carteirinha válida até 2099
    pub async fn patient(&self, name: &str, cpf: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO patients (id, clinic_id, name, cpf) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(CLINIC)
            .bind(name)
            .bind(cpf)
            .execute(&self.pool)
            .await?;

        let suffix: String = cpf.chars().filter(|c| c.is_ascii_digit()).take(8).collect();
        let expires_at = NaiveDate::from_ymd_opt(2099, 12, 31);
        self.card(id, None, &format!("TIT-{}", suffix), expires_at).await?;
        Ok(id)
    }

    /// Altera colunas do titular, ex.: `"active = 0"`
    pub async fn set_patient(&self, patient_id: Uuid, assignment: &str) -> Result<()> {
        sqlx::query(&format!("UPDATE patients SET {} WHERE id = ?", assignment))
            .bind(patient_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_cards(&self, patient_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM member_cards WHERE patient_id = ?")
            .bind(patient_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn dependent(&self, patient_id: Uuid, name: &str) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO patient_dependents (id, patient_id, name, relationship) VALUES (?, ?, ?, 'filho')")
            .bind(id.to_string())
            .bind(patient_id.to_string())
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn deactivate_dependent(&self, dependent_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE patient_dependents SET active = 0 WHERE id = ?")
            .bind(dependent_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn card(
        &self,
        patient_id: Uuid,
        dependent_id: Option<Uuid>,
        number: &str,
        expires_at: Option<NaiveDate>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO member_cards (id, clinic_id, patient_id, dependent_id, card_number, expires_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(CLINIC)
        .bind(patient_id.to_string())
        .bind(dependent_id.map(|id| id.to_string()))
        .bind(number)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Agendamento de 30 minutos inserido direto na tabela
    pub async fn appointment(
        &self,
        patient_id: Uuid,
        professional_id: Uuid,
        date: NaiveDate,
        time: &str,
        status: AppointmentStatus,
    ) -> Result<()> {
        let end = parse_hhmm(time).map(|start| format_hhmm(start + 30)).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO appointments (
                id, clinic_id, patient_id, professional_id,
                appointment_date, start_time, end_time, status, source
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'web_chat')
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(CLINIC)
        .bind(patient_id.to_string())
        .bind(professional_id.to_string())
        .bind(date)
        .bind(time)
        .bind(end)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn appointment_count(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM appointments")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn holiday(&self, date: NaiveDate) -> Result<()> {
        sqlx::query("INSERT INTO holidays (clinic_id, date, name) VALUES (?, ?, 'Feriado municipal')")
            .bind(CLINIC)
            .bind(date)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn exception(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        day_off: bool,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO schedule_exceptions (professional_id, date, day_off, start_time, end_time) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(professional_id.to_string())
        .bind(date)
        .bind(day_off)
        .bind(start)
        .bind(end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

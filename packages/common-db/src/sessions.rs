//! Repositório de sessões de conversa
//!
//! Uma sessão por (clínica, telefone). A expiração é decidida por quem lê
//! (o motor da conversa), este módulo só persiste.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbError;
use crate::models::BookingSession;

/// Persistência das sessões de agendamento
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Busca a sessão da chave (clínica, telefone), expirada ou não
    async fn get(&self, clinic_id: &str, phone: &str) -> Result<Option<BookingSession>, DbError>;

    /// Insere ou substitui a sessão da chave
    async fn upsert(&self, session: &BookingSession) -> Result<(), DbError>;

    /// Remove a sessão da chave (não falha se não existir)
    async fn delete(&self, clinic_id: &str, phone: &str) -> Result<(), DbError>;

    /// Remove sessões vencidas; devolve quantas foram apagadas
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError>;
}

/// Implementação SQLite do repositório de sessões
#[derive(Debug, Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, clinic_id: &str, phone: &str) -> Result<Option<BookingSession>, DbError> {
        let session = sqlx::query_as::<_, BookingSession>(
            "SELECT * FROM booking_sessions WHERE clinic_id = ? AND phone = ?",
        )
        .bind(clinic_id)
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn upsert(&self, session: &BookingSession) -> Result<(), DbError> {
        let available_dependents = serde_json::to_string(&session.available_dependents)?;
        let available_professionals = serde_json::to_string(&session.available_professionals)?;
        let available_dates = serde_json::to_string(&session.available_dates)?;
        let available_times = serde_json::to_string(&session.available_times)?;

        sqlx::query(
            r#"
            INSERT INTO booking_sessions (
                clinic_id, phone, state, patient_id, patient_name, booking_for,
                selected_dependent_id, selected_dependent_name,
                available_dependents, available_professionals, available_dates, available_times,
                selected_professional_id, selected_professional_name, selected_date, selected_time,
                expires_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT (clinic_id, phone) DO UPDATE SET
                state = excluded.state,
                patient_id = excluded.patient_id,
                patient_name = excluded.patient_name,
                booking_for = excluded.booking_for,
                selected_dependent_id = excluded.selected_dependent_id,
                selected_dependent_name = excluded.selected_dependent_name,
                available_dependents = excluded.available_dependents,
                available_professionals = excluded.available_professionals,
                available_dates = excluded.available_dates,
                available_times = excluded.available_times,
                selected_professional_id = excluded.selected_professional_id,
                selected_professional_name = excluded.selected_professional_name,
                selected_date = excluded.selected_date,
                selected_time = excluded.selected_time,
                expires_at = excluded.expires_at,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&session.clinic_id)
        .bind(&session.phone)
        .bind(session.state.as_str())
        .bind(session.patient_id.map(|id| id.to_string()))
        .bind(&session.patient_name)
        .bind(session.booking_for.map(|b| b.as_str()))
        .bind(session.selected_dependent_id.map(|id| id.to_string()))
        .bind(&session.selected_dependent_name)
        .bind(available_dependents)
        .bind(available_professionals)
        .bind(available_dates)
        .bind(available_times)
        .bind(session.selected_professional_id.map(|id| id.to_string()))
        .bind(&session.selected_professional_name)
        .bind(session.selected_date)
        .bind(&session.selected_time)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        debug!(
            clinic_id = %session.clinic_id,
            state = %session.state,
            "Sessão gravada"
        );
        Ok(())
    }

    async fn delete(&self, clinic_id: &str, phone: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM booking_sessions WHERE clinic_id = ? AND phone = ?")
            .bind(clinic_id)
            .bind(phone)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, DbError> {
        let result = sqlx::query("DELETE FROM booking_sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookingState, DependentOption};
    use crate::test_support::temp_pool;
    use chrono::{Duration, NaiveDate, TimeZone};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_session_upsert_and_get() -> anyhow::Result<()> {
        let (_dir, pool) = temp_pool().await?;
        let store = SqliteSessionStore::new(pool);
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();

        let mut session = BookingSession::new("clinica-1", "5511999990000", now + Duration::minutes(30));
        store.upsert(&session).await?;

        let dependent_id = Uuid::new_v4();
        session.state = BookingState::SelectDependent;
        session.patient_id = Some(Uuid::new_v4());
        session.patient_name = Some("Maria Souza".to_string());
        session.available_dependents = vec![DependentOption {
            id: dependent_id,
            name: "João Souza".to_string(),
            document: None,
        }];
        session.available_dates = vec![NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()];
        session.select_dependent(dependent_id, "João Souza");
        store.upsert(&session).await?;

        let loaded = store.get("clinica-1", "5511999990000").await?.expect("sessão gravada");
        assert_eq!(loaded, session);

        assert!(store.get("clinica-2", "5511999990000").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_and_purge() -> anyhow::Result<()> {
        let (_dir, pool) = temp_pool().await?;
        let store = SqliteSessionStore::new(pool);
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap();

        store
            .upsert(&BookingSession::new("c", "1", now - Duration::minutes(1)))
            .await?;
        store
            .upsert(&BookingSession::new("c", "2", now + Duration::minutes(30)))
            .await?;

        assert_eq!(store.purge_expired(now).await?, 1);
        assert!(store.get("c", "1").await?.is_none());

        store.delete("c", "2").await?;
        store.delete("c", "2").await?;
        assert!(store.get("c", "2").await?.is_none());
        Ok(())
    }
}

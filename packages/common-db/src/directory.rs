//! Diretório de consultas usado pelo fluxo de agendamento
//!
//! Reúne as leituras de cadastro (titulares, dependentes, carteirinhas),
//! agenda (profissionais, exceções, feriados, horários ocupados) e a inserção
//! do agendamento, cuja validação final fica nos triggers do banco.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DbError;
use crate::models::{
    AppointmentStatus, CardValidity, Dependent, MemberCard, NewAppointment, Patient, Professional,
    ScheduleException,
};

/// Consultas de cadastro e agenda de uma clínica
#[async_trait]
pub trait BookingDirectory: Send + Sync {
    /// Titular pelo CPF, aceitando a forma pontuada ou só dígitos
    async fn find_patient_by_cpf(
        &self,
        clinic_id: &str,
        digits: &str,
        formatted: &str,
    ) -> Result<Option<Patient>, DbError>;

    async fn find_patient(&self, clinic_id: &str, patient_id: Uuid) -> Result<Option<Patient>, DbError>;

    /// Carteirinha ativa de titular cujo número é `digits` ou termina em `-digits`
    async fn find_member_card(&self, clinic_id: &str, digits: &str) -> Result<Option<MemberCard>, DbError>;

    /// Mesma busca restrita a carteirinhas de dependentes
    async fn find_dependent_card(&self, clinic_id: &str, digits: &str) -> Result<Option<MemberCard>, DbError>;

    /// Existência e validade da carteirinha do titular
    async fn card_validity(
        &self,
        clinic_id: &str,
        patient_id: Uuid,
        today: NaiveDate,
    ) -> Result<CardValidity, DbError>;

    async fn find_dependent(&self, dependent_id: Uuid) -> Result<Option<Dependent>, DbError>;

    /// Dependentes ativos do titular, em ordem alfabética
    async fn active_dependents(&self, patient_id: Uuid) -> Result<Vec<Dependent>, DbError>;

    /// Profissionais ativos da clínica, em ordem alfabética
    async fn active_professionals(&self, clinic_id: &str) -> Result<Vec<Professional>, DbError>;

    async fn find_professional(
        &self,
        clinic_id: &str,
        professional_id: Uuid,
    ) -> Result<Option<Professional>, DbError>;

    async fn schedule_exception(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<ScheduleException>, DbError>;

    async fn is_holiday(&self, clinic_id: &str, date: NaiveDate) -> Result<bool, DbError>;

    /// Horários de início ("HH:MM") já ocupados por agendamentos marcados ou confirmados
    async fn booked_start_times(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<String>, DbError>;

    /// Insere o agendamento; violações de regra voltam como [`DbError::RuleViolation`]
    async fn insert_appointment(&self, appointment: &NewAppointment) -> Result<Uuid, DbError>;
}

/// Implementação SQLite do diretório
#[derive(Debug, Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn find_card(
        &self,
        clinic_id: &str,
        digits: &str,
        dependent_cards: bool,
    ) -> Result<Option<MemberCard>, DbError> {
        let sql = if dependent_cards {
            r#"
            SELECT * FROM member_cards
            WHERE clinic_id = ? AND active = 1 AND dependent_id IS NOT NULL
              AND (card_number = ? OR card_number LIKE '%-' || ?)
            ORDER BY expires_at IS NULL DESC, expires_at DESC
            LIMIT 1
            "#
        } else {
            r#"
            SELECT * FROM member_cards
            WHERE clinic_id = ? AND active = 1 AND dependent_id IS NULL
              AND (card_number = ? OR card_number LIKE '%-' || ?)
            ORDER BY expires_at IS NULL DESC, expires_at DESC
            LIMIT 1
            "#
        };

        let card = sqlx::query_as::<_, MemberCard>(sql)
            .bind(clinic_id)
            .bind(digits)
            .bind(digits)
            .fetch_optional(&self.pool)
            .await?;
        Ok(card)
    }
}

#[async_trait]
impl BookingDirectory for SqliteDirectory {
    async fn find_patient_by_cpf(
        &self,
        clinic_id: &str,
        digits: &str,
        formatted: &str,
    ) -> Result<Option<Patient>, DbError> {
        let patient = sqlx::query_as::<_, Patient>(
            "SELECT * FROM patients WHERE clinic_id = ? AND (cpf = ? OR cpf = ?) LIMIT 1",
        )
        .bind(clinic_id)
        .bind(digits)
        .bind(formatted)
        .fetch_optional(&self.pool)
        .await?;
        Ok(patient)
    }

    async fn find_patient(&self, clinic_id: &str, patient_id: Uuid) -> Result<Option<Patient>, DbError> {
        let patient =
            sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE clinic_id = ? AND id = ?")
                .bind(clinic_id)
                .bind(patient_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        Ok(patient)
    }

    async fn find_member_card(&self, clinic_id: &str, digits: &str) -> Result<Option<MemberCard>, DbError> {
        self.find_card(clinic_id, digits, false).await
    }

    async fn find_dependent_card(&self, clinic_id: &str, digits: &str) -> Result<Option<MemberCard>, DbError> {
        self.find_card(clinic_id, digits, true).await
    }

    async fn card_validity(
        &self,
        clinic_id: &str,
        patient_id: Uuid,
        today: NaiveDate,
    ) -> Result<CardValidity, DbError> {
        let cards = sqlx::query_as::<_, MemberCard>(
            r#"
            SELECT * FROM member_cards
            WHERE clinic_id = ? AND patient_id = ? AND dependent_id IS NULL AND active = 1
            ORDER BY expires_at IS NULL DESC, expires_at DESC
            "#,
        )
        .bind(clinic_id)
        .bind(patient_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        if cards.iter().any(|card| !card.is_expired_on(today)) {
            return Ok(CardValidity::Valid);
        }

        // Todas vencidas: informa a de vencimento mais recente
        let validity = cards
            .into_iter()
            .find_map(|card| {
                card.expires_at.map(|expires_at| CardValidity::Expired {
                    card_number: card.card_number,
                    expires_at,
                })
            })
            .unwrap_or(CardValidity::Missing);
        Ok(validity)
    }

    async fn find_dependent(&self, dependent_id: Uuid) -> Result<Option<Dependent>, DbError> {
        let dependent = sqlx::query_as::<_, Dependent>("SELECT * FROM patient_dependents WHERE id = ?")
            .bind(dependent_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(dependent)
    }

    async fn active_dependents(&self, patient_id: Uuid) -> Result<Vec<Dependent>, DbError> {
        let dependents = sqlx::query_as::<_, Dependent>(
            "SELECT * FROM patient_dependents WHERE patient_id = ? AND active = 1 ORDER BY name",
        )
        .bind(patient_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(dependents)
    }

    async fn active_professionals(&self, clinic_id: &str) -> Result<Vec<Professional>, DbError> {
        let professionals = sqlx::query_as::<_, Professional>(
            "SELECT * FROM professionals WHERE clinic_id = ? AND active = 1 ORDER BY name",
        )
        .bind(clinic_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(professionals)
    }

    async fn find_professional(
        &self,
        clinic_id: &str,
        professional_id: Uuid,
    ) -> Result<Option<Professional>, DbError> {
        let professional = sqlx::query_as::<_, Professional>(
            "SELECT * FROM professionals WHERE clinic_id = ? AND id = ?",
        )
        .bind(clinic_id)
        .bind(professional_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(professional)
    }

    async fn schedule_exception(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<ScheduleException>, DbError> {
        let exception = sqlx::query_as::<_, ScheduleException>(
            r#"
            SELECT * FROM schedule_exceptions
            WHERE professional_id = ? AND date = ?
            ORDER BY day_off DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(professional_id.to_string())
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exception)
    }

    async fn is_holiday(&self, clinic_id: &str, date: NaiveDate) -> Result<bool, DbError> {
        let holiday: Option<String> = sqlx::query_scalar(
            "SELECT name FROM holidays WHERE date = ? AND (clinic_id IS NULL OR clinic_id = ?) LIMIT 1",
        )
        .bind(date)
        .bind(clinic_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(name) = &holiday {
            debug!(clinic_id, %date, holiday = %name, "Data é feriado");
        }
        Ok(holiday.is_some())
    }

    async fn booked_start_times(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<String>, DbError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT start_time, status FROM appointments
            WHERE professional_id = ? AND appointment_date = ?
            ORDER BY start_time
            "#,
        )
        .bind(professional_id.to_string())
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        let times = rows
            .into_iter()
            .filter(|(_, status)| {
                status
                    .parse::<AppointmentStatus>()
                    .map(|status| status.occupies_slot())
                    .unwrap_or(false)
            })
            .map(|(start_time, _)| start_time)
            .collect();
        Ok(times)
    }

    async fn insert_appointment(&self, appointment: &NewAppointment) -> Result<Uuid, DbError> {
        let id = Uuid::new_v4();
        let mut transaction = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO appointments (
                id, clinic_id, patient_id, dependent_id, professional_id,
                appointment_date, start_time, end_time, status, source
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&appointment.clinic_id)
        .bind(appointment.patient_id.to_string())
        .bind(appointment.dependent_id.map(|id| id.to_string()))
        .bind(appointment.professional_id.to_string())
        .bind(appointment.appointment_date)
        .bind(&appointment.start_time)
        .bind(&appointment.end_time)
        .bind(AppointmentStatus::Scheduled.as_str())
        .bind(&appointment.source)
        .execute(&mut *transaction)
        .await?;

        transaction.commit().await?;

        info!(
            appointment_id = %id,
            professional_id = %appointment.professional_id,
            date = %appointment.appointment_date,
            time = %appointment.start_time,
            "Agendamento criado"
        );
        Ok(id)
    }
}

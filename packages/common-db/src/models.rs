//! Modelos de dados compartilhados entre aplicações
//!
//! Este módulo define as estruturas usadas pelo fluxo de agendamento por chat:
//! cadastro de titulares e dependentes, carteirinhas, profissionais e a sessão
//! de conversa persistida.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;
use uuid::Uuid;

/// Duração padrão da consulta quando o profissional não define uma
pub const DEFAULT_APPOINTMENT_DURATION: u32 = 30;
/// Duração maior que um dia é truncada; nenhuma janela a comporta
pub const MAX_APPOINTMENT_DURATION: u32 = 24 * 60;

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    }
}

/// Lê uma coluna TEXT contendo um UUID
pub(crate) fn uuid_column(row: &SqliteRow, column: &str) -> sqlx::Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| decode_error(column, e.to_string()))
}

pub(crate) fn optional_uuid_column(row: &SqliteRow, column: &str) -> sqlx::Result<Option<Uuid>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|value| Uuid::parse_str(&value).map_err(|e| decode_error(column, e.to_string())))
        .transpose()
}

/// Status possíveis de um agendamento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Agendamento inicial, pendente de confirmação
    Scheduled,
    /// Confirmado pelo paciente
    Confirmed,
    /// Consulta em andamento
    InProgress,
    /// Consulta concluída
    Completed,
    /// Cancelado
    Canceled,
    /// Paciente não compareceu
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Canceled => "canceled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// Status que ocupam o horário na agenda do profissional
    pub fn occupies_slot(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(status: &str) -> Result<Self, Self::Err> {
        match status {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "in_progress" => Ok(AppointmentStatus::InProgress),
            "completed" => Ok(AppointmentStatus::Completed),
            "canceled" => Ok(AppointmentStatus::Canceled),
            "no_show" => Ok(AppointmentStatus::NoShow),
            _ => Err(format!("Valor de status inválido: {}", status)),
        }
    }
}

/// Titular (associado principal)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub clinic_id: String,
    pub name: String,
    /// CPF como cadastrado (com ou sem pontuação)
    pub cpf: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
    /// Data até a qual o paciente está bloqueado por faltas
    pub no_show_block_until: Option<NaiveDate>,
    /// Bloqueio retirado administrativamente
    pub no_show_block_lifted: bool,
}

impl Patient {
    /// Bloqueio ativo: existe data, é hoje ou futura e não foi retirado
    pub fn is_blocked_on(&self, today: NaiveDate) -> bool {
        match self.no_show_block_until {
            Some(until) => until >= today && !self.no_show_block_lifted,
            None => false,
        }
    }
}

impl FromRow<'_, SqliteRow> for Patient {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            clinic_id: row.try_get("clinic_id")?,
            name: row.try_get("name")?,
            cpf: row.try_get("cpf")?,
            phone: row.try_get("phone")?,
            active: row.try_get("active")?,
            no_show_block_until: row.try_get("no_show_block_until")?,
            no_show_block_lifted: row.try_get("no_show_block_lifted")?,
        })
    }
}

/// Dependente vinculado a um titular
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependent {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub name: String,
    pub cpf: Option<String>,
    pub relationship: Option<String>,
    pub active: bool,
}

impl FromRow<'_, SqliteRow> for Dependent {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            patient_id: uuid_column(row, "patient_id")?,
            name: row.try_get("name")?,
            cpf: row.try_get("cpf")?,
            relationship: row.try_get("relationship")?,
            active: row.try_get("active")?,
        })
    }
}

/// Carteirinha de titular ou de dependente
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberCard {
    pub id: Uuid,
    pub clinic_id: String,
    /// Titular dono da carteirinha (ou responsável pelo dependente)
    pub patient_id: Uuid,
    /// Preenchido apenas em carteirinhas de dependente
    pub dependent_id: Option<Uuid>,
    pub card_number: String,
    pub active: bool,
    pub expires_at: Option<NaiveDate>,
}

impl MemberCard {
    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at < today)
    }
}

impl FromRow<'_, SqliteRow> for MemberCard {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            id: uuid_column(row, "id")?,
            clinic_id: row.try_get("clinic_id")?,
            patient_id: uuid_column(row, "patient_id")?,
            dependent_id: optional_uuid_column(row, "dependent_id")?,
            card_number: row.try_get("card_number")?,
            active: row.try_get("active")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

/// Resultado da verificação de validade da carteirinha de um titular
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardValidity {
    Valid,
    Missing,
    Expired {
        card_number: String,
        expires_at: NaiveDate,
    },
}

/// Profissional com agenda configurável
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Professional {
    pub id: Uuid,
    pub clinic_id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub active: bool,
    pub appointment_duration: Option<u32>,
    pub monthly_booking_limit: Option<u32>,
    /// Agenda em JSON (modelo semanal e/ou lista de blocos)
    pub schedule: Option<serde_json::Value>,
}

impl Professional {
    pub fn duration_minutes(&self) -> u32 {
        match self.appointment_duration {
            Some(minutes) if minutes > 0 => minutes.min(MAX_APPOINTMENT_DURATION),
            _ => DEFAULT_APPOINTMENT_DURATION,
        }
    }
}

impl FromRow<'_, SqliteRow> for Professional {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let schedule: Option<String> = row.try_get("schedule")?;
        let schedule = schedule
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| decode_error("schedule", e.to_string()))?;
        let duration: Option<i64> = row.try_get("appointment_duration")?;
        let limit: Option<i64> = row.try_get("monthly_booking_limit")?;

        Ok(Self {
            id: uuid_column(row, "id")?,
            clinic_id: row.try_get("clinic_id")?,
            name: row.try_get("name")?,
            specialty: row.try_get("specialty")?,
            active: row.try_get("active")?,
            appointment_duration: duration.and_then(|d| u32::try_from(d).ok()),
            monthly_booking_limit: limit.and_then(|l| u32::try_from(l).ok()),
            schedule,
        })
    }
}

/// Exceção de agenda para uma data específica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleException {
    pub professional_id: Uuid,
    pub date: NaiveDate,
    pub day_off: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl FromRow<'_, SqliteRow> for ScheduleException {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        Ok(Self {
            professional_id: uuid_column(row, "professional_id")?,
            date: row.try_get("date")?,
            day_off: row.try_get("day_off")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
        })
    }
}

/// Dados para inserir um agendamento; os triggers do banco validam as regras
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAppointment {
    pub clinic_id: String,
    pub patient_id: Uuid,
    pub dependent_id: Option<Uuid>,
    pub professional_id: Uuid,
    pub appointment_date: NaiveDate,
    pub start_time: String,
    pub end_time: String,
    /// Origem do agendamento (WhatsApp, site)
    pub source: String,
}

/// Estados da conversa de agendamento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingState {
    WaitingCpf,
    ConfirmIdentity,
    SelectBookingFor,
    SelectDependent,
    SelectProfessional,
    SelectDate,
    SelectTime,
    ConfirmAppointment,
    Finished,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::WaitingCpf => "WAITING_CPF",
            BookingState::ConfirmIdentity => "CONFIRM_IDENTITY",
            BookingState::SelectBookingFor => "SELECT_BOOKING_FOR",
            BookingState::SelectDependent => "SELECT_DEPENDENT",
            BookingState::SelectProfessional => "SELECT_PROFESSIONAL",
            BookingState::SelectDate => "SELECT_DATE",
            BookingState::SelectTime => "SELECT_TIME",
            BookingState::ConfirmAppointment => "CONFIRM_APPOINTMENT",
            BookingState::Finished => "FINISHED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingState::Finished)
    }
}

impl std::fmt::Display for BookingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingState {
    type Err = String;

    fn from_str(state: &str) -> Result<Self, Self::Err> {
        match state {
            "WAITING_CPF" => Ok(BookingState::WaitingCpf),
            "CONFIRM_IDENTITY" => Ok(BookingState::ConfirmIdentity),
            "SELECT_BOOKING_FOR" => Ok(BookingState::SelectBookingFor),
            "SELECT_DEPENDENT" => Ok(BookingState::SelectDependent),
            "SELECT_PROFESSIONAL" => Ok(BookingState::SelectProfessional),
            "SELECT_DATE" => Ok(BookingState::SelectDate),
            "SELECT_TIME" => Ok(BookingState::SelectTime),
            "CONFIRM_APPOINTMENT" => Ok(BookingState::ConfirmAppointment),
            "FINISHED" => Ok(BookingState::Finished),
            _ => Err(format!("Estado de sessão inválido: {}", state)),
        }
    }
}

/// Para quem é o agendamento
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingFor {
    #[serde(rename = "self")]
    Myself,
    Dependent,
}

impl BookingFor {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingFor::Myself => "self",
            BookingFor::Dependent => "dependent",
        }
    }
}

impl FromStr for BookingFor {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "self" => Ok(BookingFor::Myself),
            "dependent" => Ok(BookingFor::Dependent),
            _ => Err(format!("Valor de booking_for inválido: {}", value)),
        }
    }
}

/// Dependente apresentado na lista numerada
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentOption {
    pub id: Uuid,
    pub name: String,
    pub document: Option<String>,
}

/// Profissional apresentado na lista numerada
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfessionalOption {
    pub id: Uuid,
    pub name: String,
    pub specialty: Option<String>,
}

/// Sessão de conversa, uma por (clínica, telefone)
///
/// As listas `available_*` são fotografias do que foi enviado ao usuário: a
/// escolha numérica digitada sempre é resolvida contra a última lista enviada.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingSession {
    pub clinic_id: String,
    pub phone: String,
    pub state: BookingState,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub booking_for: Option<BookingFor>,
    pub selected_dependent_id: Option<Uuid>,
    pub selected_dependent_name: Option<String>,
    pub available_dependents: Vec<DependentOption>,
    pub available_professionals: Vec<ProfessionalOption>,
    pub available_dates: Vec<NaiveDate>,
    pub available_times: Vec<String>,
    pub selected_professional_id: Option<Uuid>,
    pub selected_professional_name: Option<String>,
    pub selected_date: Option<NaiveDate>,
    pub selected_time: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl BookingSession {
    /// Nova sessão no estado inicial
    pub fn new(clinic_id: &str, phone: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            clinic_id: clinic_id.to_string(),
            phone: phone.to_string(),
            state: BookingState::WaitingCpf,
            patient_id: None,
            patient_name: None,
            booking_for: None,
            selected_dependent_id: None,
            selected_dependent_name: None,
            available_dependents: Vec::new(),
            available_professionals: Vec::new(),
            available_dates: Vec::new(),
            available_times: Vec::new(),
            selected_professional_id: None,
            selected_professional_name: None,
            selected_date: None,
            selected_time: None,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Expiração deslizante: toda leitura/escrita empurra o prazo
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = now + ttl;
    }

    pub fn select_self(&mut self) {
        self.booking_for = Some(BookingFor::Myself);
        self.selected_dependent_id = None;
        self.selected_dependent_name = None;
    }

    pub fn select_dependent(&mut self, id: Uuid, name: &str) {
        self.booking_for = Some(BookingFor::Dependent);
        self.selected_dependent_id = Some(id);
        self.selected_dependent_name = Some(name.to_string());
    }

    pub fn is_for_dependent(&self) -> bool {
        self.booking_for == Some(BookingFor::Dependent) && self.selected_dependent_id.is_some()
    }
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> sqlx::Result<Vec<T>> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).map_err(|e| decode_error(column, e.to_string()))
        }
        _ => Ok(Vec::new()),
    }
}

impl FromRow<'_, SqliteRow> for BookingSession {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        let state: String = row.try_get("state")?;
        let booking_for: Option<String> = row.try_get("booking_for")?;

        Ok(Self {
            clinic_id: row.try_get("clinic_id")?,
            phone: row.try_get("phone")?,
            state: BookingState::from_str(&state).map_err(|e| decode_error("state", e))?,
            patient_id: optional_uuid_column(row, "patient_id")?,
            patient_name: row.try_get("patient_name")?,
            booking_for: booking_for
                .map(|value| BookingFor::from_str(&value))
                .transpose()
                .map_err(|e| decode_error("booking_for", e))?,
            selected_dependent_id: optional_uuid_column(row, "selected_dependent_id")?,
            selected_dependent_name: row.try_get("selected_dependent_name")?,
            available_dependents: json_column(row, "available_dependents")?,
            available_professionals: json_column(row, "available_professionals")?,
            available_dates: json_column(row, "available_dates")?,
            available_times: json_column(row, "available_times")?,
            selected_professional_id: optional_uuid_column(row, "selected_professional_id")?,
            selected_professional_name: row.try_get("selected_professional_name")?,
            selected_date: row.try_get("selected_date")?,
            selected_time: row.try_get("selected_time")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

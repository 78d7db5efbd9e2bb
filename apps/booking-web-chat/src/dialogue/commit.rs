//! Gravação do agendamento escolhido na conversa
//!
//! Os triggers do banco são a validação final; aqui só traduzimos o resultado.

use chrono::NaiveDate;
use common_db::models::{NewAppointment, Professional};
use common_db::{BookingDirectory, DbError, RuleViolation};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::schedule::{format_hhmm, Minutes};

pub const SOURCE: &str = "web_chat";

/// Horário escolhido, já validado contra a sessão
#[derive(Debug, Clone)]
pub struct BookingRequest<'a> {
    pub clinic_id: &'a str,
    pub patient_id: Uuid,
    pub dependent_id: Option<Uuid>,
    pub professional: &'a Professional,
    pub date: NaiveDate,
    pub start: Minutes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Booked(Uuid),
    Rejected(RuleViolation),
    Failed,
}

pub async fn commit(directory: &dyn BookingDirectory, request: &BookingRequest<'_>) -> CommitOutcome {
    let appointment = NewAppointment {
        clinic_id: request.clinic_id.to_string(),
        patient_id: request.patient_id,
        dependent_id: request.dependent_id,
        professional_id: request.professional.id,
        appointment_date: request.date,
        start_time: format_hhmm(request.start),
        end_time: format_hhmm(request.start.saturating_add(request.professional.duration_minutes())),
        source: SOURCE.to_string(),
    };

    match directory.insert_appointment(&appointment).await {
        Ok(id) => {
            info!(appointment_id = %id, clinic_id = request.clinic_id, "Agendamento gravado pela conversa");
            CommitOutcome::Booked(id)
        }
        Err(DbError::RuleViolation(rule)) => {
            warn!(code = rule.code(), professional_id = %request.professional.id, "Agendamento recusado pelo banco");
            CommitOutcome::Rejected(rule)
        }
        Err(e) => {
            error!(error = %e, professional_id = %request.professional.id, "Falha ao gravar agendamento");
            CommitOutcome::Failed
        }
    }
}

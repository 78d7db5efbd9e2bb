//! Identificação do paciente por CPF ou número de carteirinha
//!
//! O resultado é um titular (e, quando a carteirinha é de dependente, o
//! dependente já escolhido) ou uma recusa específica que mantém a conversa no
//! estado de identificação.

use chrono::NaiveDate;
use common_db::models::{CardValidity, Dependent, MemberCard, Patient};
use common_db::{BookingDirectory, DbError};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::cpf;

static CARD_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Z]+-)?(\d{5,10})$").expect("regex de carteirinha válida"));

/// Forma reconhecida do texto digitado
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityToken {
    /// Dígitos da carteirinha, sem prefixo
    Card(String),
    /// CPF com 11 dígitos, sem pontuação
    Document(String),
}

/// Classifica o texto: carteirinha (`ABC-000123` ou `000123`) ou CPF (11 dígitos)
pub fn classify(raw: &str) -> Option<IdentityToken> {
    let token: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if let Some(captures) = CARD_TOKEN.captures(&token) {
        return Some(IdentityToken::Card(captures[1].to_string()));
    }

    if !token.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '/')) {
        return None;
    }
    let digits = cpf::digits(&token);
    (digits.len() == 11).then_some(IdentityToken::Document(digits))
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub patient: Patient,
    /// Dependente pré-selecionado pela carteirinha
    pub dependent: Option<Dependent>,
}

/// Motivos de recusa na identificação
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRejection {
    Malformed,
    InvalidCpf,
    CardNotFound,
    DocumentNotFound,
    ExpiredCard { card_number: String, expires_at: NaiveDate },
    MissingCard,
    Inactive { name: String },
    InactiveDependent { name: String },
    Blocked { until: NaiveDate },
}

#[derive(Debug, Clone)]
pub enum IdentityOutcome {
    Resolved(ResolvedIdentity),
    Rejected(IdentityRejection),
}

pub struct IdentityResolver<'a> {
    directory: &'a dyn BookingDirectory,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(directory: &'a dyn BookingDirectory) -> Self {
        Self { directory }
    }

    pub async fn resolve(
        &self,
        clinic_id: &str,
        raw: &str,
        today: NaiveDate,
    ) -> Result<IdentityOutcome, DbError> {
        let outcome = match classify(raw) {
            Some(IdentityToken::Card(digits)) => self.resolve_card(clinic_id, &digits, today).await?,
            Some(IdentityToken::Document(digits)) => {
                self.resolve_document(clinic_id, &digits, today).await?
            }
            None => IdentityOutcome::Rejected(IdentityRejection::Malformed),
        };

        match &outcome {
            IdentityOutcome::Resolved(identity) => info!(
                clinic_id,
                patient_id = %identity.patient.id,
                dependent = identity.dependent.is_some(),
                "Paciente identificado"
            ),
            IdentityOutcome::Rejected(reason) => {
                debug!(clinic_id, reason = ?reason, "Identificação recusada")
            }
        }
        Ok(outcome)
    }

    async fn resolve_card(
        &self,
        clinic_id: &str,
        digits: &str,
        today: NaiveDate,
    ) -> Result<IdentityOutcome, DbError> {
        if let Some(card) = self.directory.find_member_card(clinic_id, digits).await? {
            if let Some(rejection) = expired(&card, today) {
                return Ok(IdentityOutcome::Rejected(rejection));
            }
            return self.titular(clinic_id, card.patient_id, None, today).await;
        }

        let Some(card) = self.directory.find_dependent_card(clinic_id, digits).await? else {
            return Ok(IdentityOutcome::Rejected(IdentityRejection::CardNotFound));
        };
        if let Some(rejection) = expired(&card, today) {
            return Ok(IdentityOutcome::Rejected(rejection));
        }

        let dependent = match card.dependent_id {
            Some(id) => self.directory.find_dependent(id).await?,
            None => None,
        };
        let Some(dependent) = dependent else {
            return Ok(IdentityOutcome::Rejected(IdentityRejection::CardNotFound));
        };
        if !dependent.active {
            return Ok(IdentityOutcome::Rejected(IdentityRejection::InactiveDependent {
                name: dependent.name,
            }));
        }

        self.titular(clinic_id, dependent.patient_id, Some(dependent), today).await
    }

    async fn resolve_document(
        &self,
        clinic_id: &str,
        digits: &str,
        today: NaiveDate,
    ) -> Result<IdentityOutcome, DbError> {
        if !cpf::is_valid(digits) {
            return Ok(IdentityOutcome::Rejected(IdentityRejection::InvalidCpf));
        }

        let Some(patient) = self
            .directory
            .find_patient_by_cpf(clinic_id, digits, &cpf::format(digits))
            .await?
        else {
            return Ok(IdentityOutcome::Rejected(IdentityRejection::DocumentNotFound));
        };

        if let Some(rejection) = gate(&patient, today) {
            return Ok(IdentityOutcome::Rejected(rejection));
        }

        // Sem carteirinha digitada, a validade é conferida explicitamente
        match self.directory.card_validity(clinic_id, patient.id, today).await? {
            CardValidity::Valid => Ok(IdentityOutcome::Resolved(ResolvedIdentity {
                patient,
                dependent: None,
            })),
            CardValidity::Missing => Ok(IdentityOutcome::Rejected(IdentityRejection::MissingCard)),
            CardValidity::Expired { card_number, expires_at } => Ok(IdentityOutcome::Rejected(
                IdentityRejection::ExpiredCard { card_number, expires_at },
            )),
        }
    }

    async fn titular(
        &self,
        clinic_id: &str,
        patient_id: uuid::Uuid,
        dependent: Option<Dependent>,
        today: NaiveDate,
    ) -> Result<IdentityOutcome, DbError> {
        let Some(patient) = self.directory.find_patient(clinic_id, patient_id).await? else {
            return Ok(IdentityOutcome::Rejected(IdentityRejection::CardNotFound));
        };
        if let Some(rejection) = gate(&patient, today) {
            return Ok(IdentityOutcome::Rejected(rejection));
        }
        Ok(IdentityOutcome::Resolved(ResolvedIdentity { patient, dependent }))
    }
}

fn expired(card: &MemberCard, today: NaiveDate) -> Option<IdentityRejection> {
    match card.expires_at {
        Some(expires_at) if card.is_expired_on(today) => Some(IdentityRejection::ExpiredCard {
            card_number: card.card_number.clone(),
            expires_at,
        }),
        _ => None,
    }
}

/// Titular ativo e sem bloqueio por faltas
fn gate(patient: &Patient, today: NaiveDate) -> Option<IdentityRejection> {
    if !patient.active {
        return Some(IdentityRejection::Inactive {
            name: patient.name.clone(),
        });
    }
    if patient.is_blocked_on(today) {
        return patient
            .no_show_block_until
            .map(|until| IdentityRejection::Blocked { until });
    }
    None
}

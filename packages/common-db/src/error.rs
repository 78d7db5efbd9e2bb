//! Definições de erro para a biblioteca common-db
//!
//! Este módulo define os tipos de erro usados pela biblioteca. As violações de
//! regra de negócio disparadas pelos triggers do banco chegam como mensagens de
//! texto e são convertidas aqui, uma única vez, para [`RuleViolation`].

use std::fmt;
use thiserror::Error;

/// Regras de negócio verificadas pelos triggers na inserção de agendamentos
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleViolation {
    /// Limite mensal de agendamentos do titular atingido
    MonthlyLimitMember,
    /// Limite mensal de agendamentos do dependente atingido
    MonthlyLimitDependent,
    /// Nenhuma carteirinha válida na data da consulta
    ExpiredCard,
    /// Horário já ocupado ou fora da agenda
    InvalidTimeSlot,
    /// A data coincide com um feriado
    Holiday,
    /// Paciente com bloqueio por falta
    PatientBlocked,
}

impl RuleViolation {
    const ALL: [RuleViolation; 6] = [
        RuleViolation::MonthlyLimitDependent,
        RuleViolation::MonthlyLimitMember,
        RuleViolation::ExpiredCard,
        RuleViolation::InvalidTimeSlot,
        RuleViolation::Holiday,
        RuleViolation::PatientBlocked,
    ];

    /// Código levantado pelo trigger (`RAISE(ABORT, '<CODIGO>: ...')`)
    pub fn code(&self) -> &'static str {
        match self {
            RuleViolation::MonthlyLimitMember => "LIMITE_AGENDAMENTO_CPF",
            RuleViolation::MonthlyLimitDependent => "LIMITE_AGENDAMENTO_DEPENDENTE",
            RuleViolation::ExpiredCard => "CARTEIRINHA_VENCIDA",
            RuleViolation::InvalidTimeSlot => "HORARIO_INVALIDO",
            RuleViolation::Holiday => "FERIADO",
            RuleViolation::PatientBlocked => "PACIENTE_BLOQUEADO",
        }
    }

    /// Identifica o código dentro da mensagem de erro do banco
    pub fn from_message(message: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|rule| message.contains(rule.code()))
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Erros específicos para operações de banco de dados
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Erro de conexão com banco de dados: {0}")]
    ConnectionError(String),

    #[error("Erro de consulta: {0}")]
    QueryError(String),

    #[error("Entidade não encontrada: {0}")]
    NotFound(String),

    #[error("Violação de restrição: {0}")]
    ConstraintViolation(String),

    #[error("Regra de negócio violada: {0}")]
    RuleViolation(RuleViolation),

    #[error("Dados inválidos: {0}")]
    InvalidData(String),

    #[error("Erro interno: {0}")]
    InternalError(String),
}

/// Conversão de erros específicos do SQLx para nossos tipos de erro
impl From<sqlx::Error> for DbError {
    fn from(error: sqlx::Error) -> Self {
        match error {
            sqlx::Error::RowNotFound => DbError::NotFound("Registro não encontrado".to_string()),
            sqlx::Error::Database(dbe) => {
                if let Some(rule) = RuleViolation::from_message(dbe.message()) {
                    return DbError::RuleViolation(rule);
                }
                if let Some(code) = dbe.code() {
                    if code.as_ref() == "23000" || code.as_ref() == "2067" || code.as_ref() == "1555" {
                        return DbError::ConstraintViolation(dbe.message().to_string());
                    }
                }
                DbError::QueryError(dbe.message().to_string())
            }
            sqlx::Error::ColumnNotFound(col) => {
                DbError::QueryError(format!("Coluna não encontrada: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::QueryError(format!("Erro ao decodificar coluna {}: {}", index, source))
            }
            sqlx::Error::Io(io_err) => DbError::ConnectionError(io_err.to_string()),
            sqlx::Error::Configuration(conf_err) => DbError::ConnectionError(conf_err.to_string()),
            sqlx::Error::PoolClosed => {
                DbError::ConnectionError("Pool de conexões fechado".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                DbError::ConnectionError("Timeout no pool de conexões".to_string())
            }
            sqlx::Error::WorkerCrashed => {
                DbError::InternalError("Worker do banco de dados falhou".to_string())
            }
            _ => DbError::InternalError(format!("Erro inesperado: {:?}", error)),
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(error: serde_json::Error) -> Self {
        DbError::InvalidData(error.to_string())
    }
}

//! Serviço de agendamento de consultas por conversa (WhatsApp/web-chat)
//!
//! O paciente se identifica por CPF ou carteirinha, escolhe para quem é a
//! consulta, o profissional, a data e o horário, e confirma. O estado da
//! conversa vive no banco, numa sessão por (clínica, telefone).

pub mod availability;
pub mod clock;
pub mod config;
pub mod cpf;
pub mod dependents;
pub mod dialogue;
pub mod error;
pub mod http;
pub mod identity;
pub mod schedule;

#[cfg(test)]
pub(crate) mod test_support;

/// Informações geradas em tempo de compilação pelo `built`
#[allow(dead_code)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub use dialogue::{BookingEngine, Reply};
pub use error::AppError;
pub use http::{build_router, AppState};

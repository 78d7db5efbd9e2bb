//! Erros do serviço e sua tradução para respostas HTTP

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common_db::DbError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Texto enviado ao usuário quando algo falha do nosso lado
pub const GENERIC_APOLOGY: &str =
    "Desculpe, tivemos um problema ao processar sua mensagem. Por favor, tente novamente em instantes.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Requisição inválida: {0}")]
    BadRequest(String),

    #[error("Configuração inválida: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] DbError),

    #[error("Erro interno: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            other => {
                error!(error = %other, "Falha ao processar requisição");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal_error", "response": GENERIC_APOLOGY })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let response = AppError::BadRequest("phone é obrigatório".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = AppError::Store(DbError::QueryError("falhou".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = AppError::Internal("pânico".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

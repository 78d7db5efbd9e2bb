//! Escolha de para quem é a consulta: o próprio titular ou um dependente

use common_db::models::{Dependent, DependentOption};
use common_db::{BookingDirectory, DbError};
use uuid::Uuid;

/// Resposta numérica na pergunta "para quem é a consulta"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingForChoice {
    Myself,
    Dependent,
}

impl BookingForChoice {
    pub const OPTIONS: usize = 2;

    pub fn from_position(position: usize) -> Option<Self> {
        match position {
            1 => Some(Self::Myself),
            2 => Some(Self::Dependent),
            _ => None,
        }
    }
}

pub struct DependentSelector<'a> {
    directory: &'a dyn BookingDirectory,
}

impl<'a> DependentSelector<'a> {
    pub fn new(directory: &'a dyn BookingDirectory) -> Self {
        Self { directory }
    }

    /// Fotografia dos dependentes ativos, na ordem em que serão listados
    pub async fn options(&self, patient_id: Uuid) -> Result<Vec<DependentOption>, DbError> {
        let dependents = self.directory.active_dependents(patient_id).await?;
        Ok(dependents.into_iter().map(to_option).collect())
    }
}

fn to_option(dependent: Dependent) -> DependentOption {
    DependentOption {
        id: dependent.id,
        name: dependent.name,
        document: dependent.cpf,
    }
}

/// Resolve a escolha 1-based contra a lista enviada
pub fn choose<'o>(options: &'o [DependentOption], position: usize) -> Option<&'o DependentOption> {
    position.checked_sub(1).and_then(|index| options.get(index))
}

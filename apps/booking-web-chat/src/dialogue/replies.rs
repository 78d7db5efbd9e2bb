//! Textos enviados ao usuário

use chrono::{Datelike, NaiveDate, Weekday};
use common_db::models::{BookingSession, BookingState, Professional};
use common_db::RuleViolation;

use crate::identity::IdentityRejection;

pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

fn weekday_name(date: NaiveDate) -> &'static str {
    match date.weekday() {
        Weekday::Mon => "segunda-feira",
        Weekday::Tue => "terça-feira",
        Weekday::Wed => "quarta-feira",
        Weekday::Thu => "quinta-feira",
        Weekday::Fri => "sexta-feira",
        Weekday::Sat => "sábado",
        Weekday::Sun => "domingo",
    }
}

/// Linhas `N - rótulo`
fn numbered<I, S>(labels: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .enumerate()
        .map(|(i, label)| format!("{} - {}", i + 1, label.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn welcome() -> String {
    "Olá! Para agendar sua consulta, informe seu **CPF** ou o número da sua **carteirinha**.".to_string()
}

fn confirm_identity(name: &str) -> String {
    format!("Você é **{}**?\n\n{}", name, numbered(["Sim", "Não"]))
}

fn booking_for() -> String {
    format!(
        "Para quem é a consulta?\n\n{}",
        numbered(["Para mim", "Para um dependente"])
    )
}

fn dependents(session: &BookingSession) -> String {
    let labels = session.available_dependents.iter().map(|d| format!("**{}**", d.name));
    format!("Escolha o dependente:\n\n{}", numbered(labels))
}

fn professionals(session: &BookingSession) -> String {
    let labels = session.available_professionals.iter().map(|p| match &p.specialty {
        Some(specialty) => format!("**{}** ({})", p.name, specialty),
        None => format!("**{}**", p.name),
    });
    let header = match (&session.selected_dependent_name, session.is_for_dependent()) {
        (Some(name), true) => format!("Consulta para **{}**. Escolha o profissional:", name),
        _ => "Escolha o profissional:".to_string(),
    };
    format!("{}\n\n{}", header, numbered(labels))
}

fn dates(session: &BookingSession) -> String {
    let labels = session
        .available_dates
        .iter()
        .map(|d| format!("{} ({})", format_date(*d), weekday_name(*d)));
    let professional = session.selected_professional_name.as_deref().unwrap_or_default();
    format!(
        "Datas disponíveis com **{}**:\n\n{}",
        professional,
        numbered(labels)
    )
}

fn times(session: &BookingSession) -> String {
    let date = session.selected_date.map(format_date).unwrap_or_default();
    format!(
        "Horários disponíveis em **{}**:\n\n{}",
        date,
        numbered(&session.available_times)
    )
}

/// Nome de quem será atendido
pub fn attendee(session: &BookingSession) -> &str {
    if session.is_for_dependent() {
        session.selected_dependent_name.as_deref().unwrap_or_default()
    } else {
        session.patient_name.as_deref().unwrap_or_default()
    }
}

fn summary(session: &BookingSession) -> String {
    format!(
        "**Paciente:** {}\n**Profissional:** {}\n**Data:** {}\n**Horário:** {}",
        attendee(session),
        session.selected_professional_name.as_deref().unwrap_or_default(),
        session.selected_date.map(format_date).unwrap_or_default(),
        session.selected_time.as_deref().unwrap_or_default(),
    )
}

fn confirm_appointment(session: &BookingSession) -> String {
    format!(
        "Confira os dados do agendamento:\n\n{}\n\n{}",
        summary(session),
        numbered(["Confirmar", "Cancelar"])
    )
}

/// Pergunta do estado atual, montada a partir das listas já enviadas
pub fn prompt(session: &BookingSession) -> String {
    match session.state {
        BookingState::WaitingCpf => welcome(),
        BookingState::ConfirmIdentity => {
            confirm_identity(session.patient_name.as_deref().unwrap_or_default())
        }
        BookingState::SelectBookingFor => booking_for(),
        BookingState::SelectDependent => dependents(session),
        BookingState::SelectProfessional => professionals(session),
        BookingState::SelectDate => dates(session),
        BookingState::SelectTime => times(session),
        BookingState::ConfirmAppointment => confirm_appointment(session),
        BookingState::Finished => {
            "Atendimento finalizado. Envie uma mensagem para iniciar um novo agendamento.".to_string()
        }
    }
}

pub fn out_of_range(session: &BookingSession, len: usize) -> String {
    format!(
        "Opção inválida. Responda com um número de 1 a {}.\n\n{}",
        len,
        prompt(session)
    )
}

pub fn identity_rejected(rejection: &IdentityRejection) -> String {
    match rejection {
        IdentityRejection::Malformed => "Não entendi. Informe seu **CPF** com 11 dígitos (ex.: 529.982.247-25) \
             ou o número da sua **carteirinha** (ex.: 000123 ou ABC-000123)."
            .to_string(),
        IdentityRejection::InvalidCpf => {
            "O CPF informado não é válido. Confira os números e tente novamente.".to_string()
        }
        IdentityRejection::CardNotFound => "Não encontramos carteirinha ativa com esse número. \
             Confira e tente novamente ou informe seu CPF."
            .to_string(),
        IdentityRejection::DocumentNotFound => "Não encontramos cadastro com esse CPF. \
             Confira os números ou procure a secretaria da clínica."
            .to_string(),
        IdentityRejection::ExpiredCard { card_number, expires_at } => format!(
            "A carteirinha **{}** está vencida desde **{}**. Procure a secretaria para renová-la.",
            card_number,
            format_date(*expires_at)
        ),
        IdentityRejection::MissingCard => "Não encontramos carteirinha ativa no seu cadastro. \
             Procure a secretaria para regularizar."
            .to_string(),
        IdentityRejection::Inactive { name } => format!(
            "O cadastro de **{}** está inativo. Procure a secretaria da clínica.",
            name
        ),
        IdentityRejection::InactiveDependent { name } => format!(
            "O cadastro do dependente **{}** está inativo. Procure a secretaria da clínica.",
            name
        ),
        IdentityRejection::Blocked { until } => format!(
            "Seu cadastro está bloqueado para novos agendamentos até **{}** por faltas anteriores.",
            format_date(*until)
        ),
    }
}

pub fn identity_denied() -> String {
    format!("Tudo bem, vamos recomeçar.\n\n{}", welcome())
}

pub fn cancelled() -> String {
    format!("Agendamento cancelado.\n\n{}", welcome())
}

pub fn lost_context() -> String {
    format!(
        "Desculpe, não conseguimos recuperar os dados da sua conversa. Vamos recomeçar.\n\n{}",
        welcome()
    )
}

pub fn no_professionals() -> String {
    "No momento não há profissionais disponíveis para agendamento. Tente novamente mais tarde.".to_string()
}

pub fn professional_without_dates(name: &str, session: &BookingSession) -> String {
    format!(
        "**{}** não tem datas disponíveis nos próximos dias. Escolha outro profissional.\n\n{}",
        name,
        prompt(session)
    )
}

pub fn date_without_times(date: NaiveDate, session: &BookingSession) -> String {
    format!(
        "Não há mais horários disponíveis em **{}**. Escolha outra data.\n\n{}",
        format_date(date),
        prompt(session)
    )
}

pub fn booked(session: &BookingSession) -> String {
    format!(
        "Agendamento confirmado!\n\n{}\n\nChegue com 15 minutos de antecedência e leve sua carteirinha.",
        summary(session)
    )
}

pub fn commit_rejected(violation: RuleViolation, professional: &Professional) -> String {
    let limit = professional
        .monthly_booking_limit
        .map(|n| format!("{} agendamento(s) por mês", n))
        .unwrap_or_else(|| "agendamentos mensais".to_string());

    match violation {
        RuleViolation::MonthlyLimitMember => format!(
            "Não foi possível agendar: o limite de **{}** com **{}** já foi atingido para este titular.",
            limit, professional.name
        ),
        RuleViolation::MonthlyLimitDependent => format!(
            "Não foi possível agendar: o limite de **{}** com **{}** já foi atingido para este dependente.",
            limit, professional.name
        ),
        RuleViolation::ExpiredCard => {
            "Não foi possível agendar: não há carteirinha válida para a data escolhida. \
             Procure a secretaria para renová-la."
                .to_string()
        }
        RuleViolation::InvalidTimeSlot => {
            "Não foi possível agendar: o horário escolhido não está mais disponível. \
             Envie uma nova mensagem para escolher outro horário."
                .to_string()
        }
        RuleViolation::Holiday => {
            "Não foi possível agendar: a data escolhida é feriado. \
             Envie uma nova mensagem para escolher outra data."
                .to_string()
        }
        RuleViolation::PatientBlocked => {
            "Não foi possível agendar: seu cadastro está bloqueado para novos agendamentos por faltas anteriores."
                .to_string()
        }
    }
}

pub fn commit_failed() -> String {
    "Desculpe, não foi possível concluir o agendamento agora. Tente novamente mais tarde \
     ou entre em contato com a clínica."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbered_list() {
        assert_eq!(numbered(["A", "B"]), "1 - A\n2 - B");
        assert_eq!(numbered(Vec::<String>::new()), "");
    }

    #[test]
    fn test_date_label() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(format_date(date), "04/03/2024");
        assert_eq!(weekday_name(date), "segunda-feira");
    }
}

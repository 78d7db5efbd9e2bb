//! Máquina de estados da conversa de agendamento
//!
//! Cada mensagem recebida é tratada pelo estado atual da sessão:
//!
//! `WAITING_CPF → CONFIRM_IDENTITY → [SELECT_BOOKING_FOR → SELECT_DEPENDENT]
//! → SELECT_PROFESSIONAL → SELECT_DATE → SELECT_TIME → CONFIRM_APPOINTMENT
//! → FINISHED`
//!
//! A sessão é lida, alterada e gravada de volta dentro da mesma requisição;
//! nenhum estado fica em memória entre mensagens.

pub mod commit;
pub mod replies;

use chrono::{DateTime, NaiveDate, Utc};
use common_db::models::{BookingSession, BookingState, Professional, ProfessionalOption};
use common_db::{BookingDirectory, SessionStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::availability::{AvailabilityCalculator, LocalNow};
use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::dependents::{self, BookingForChoice, DependentSelector};
use crate::error::AppError;
use crate::identity::{IdentityOutcome, IdentityResolver};
use crate::schedule::parse_hhmm;
use commit::{BookingRequest, CommitOutcome};

/// Resposta de um turno da conversa
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub state: BookingState,
    /// Verdadeiro apenas quando o agendamento foi gravado
    pub booking_complete: bool,
}

/// Como o turno termina para a sessão
enum Turn {
    /// Grava a sessão (alterada ou não) e responde
    Continue(String),
    /// Apaga a sessão e recomeça em `WAITING_CPF`
    Reset(String),
    /// Encerra em `FINISHED`
    Finish { text: String, booked: bool },
}

/// "1" ou qualquer resposta começando com "sim"/"yes"
pub fn is_affirmative(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    text == "1" || text.starts_with("sim") || text.starts_with("yes")
}

/// Escolha numérica 1-based dentro de `[1, len]`
pub fn parse_choice(text: &str, len: usize) -> Option<usize> {
    text.trim()
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=len).contains(n))
}

pub struct BookingEngine {
    sessions: Arc<dyn SessionStore>,
    directory: Arc<dyn BookingDirectory>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
}

impl BookingEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn BookingDirectory>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            sessions,
            directory,
            clock,
            settings,
        }
    }

    /// Processa uma mensagem; mensagem vazia só repete a pergunta do estado atual
    pub async fn handle(&self, clinic_id: &str, phone: &str, message: &str) -> Result<Reply, AppError> {
        let now = self.clock.now();
        let mut session = self.load_session(clinic_id, phone, now).await?;
        let previous = session.state;

        let text = message.trim();
        let turn = if text.is_empty() {
            Turn::Continue(replies::prompt(&session))
        } else {
            self.dispatch(&mut session, text, now).await?
        };

        let reply = match turn {
            Turn::Continue(text) => {
                session.touch(now, self.settings.session_ttl);
                self.sessions.upsert(&session).await?;
                Reply {
                    text,
                    state: session.state,
                    booking_complete: false,
                }
            }
            Turn::Reset(text) => {
                self.sessions.delete(clinic_id, phone).await?;
                let fresh = self.fresh_session(clinic_id, phone, now);
                self.sessions.upsert(&fresh).await?;
                Reply {
                    text,
                    state: fresh.state,
                    booking_complete: false,
                }
            }
            Turn::Finish { text, booked } => {
                session.state = BookingState::Finished;
                session.touch(now, self.settings.session_ttl);
                self.sessions.upsert(&session).await?;
                Reply {
                    text,
                    state: session.state,
                    booking_complete: booked,
                }
            }
        };

        info!(
            clinic_id,
            from = %previous,
            to = %reply.state,
            booking_complete = reply.booking_complete,
            "Mensagem processada"
        );
        Ok(reply)
    }

    fn fresh_session(&self, clinic_id: &str, phone: &str, now: DateTime<Utc>) -> BookingSession {
        BookingSession::new(clinic_id, phone, now + self.settings.session_ttl)
    }

    /// Sessão vigente da chave; vencidas ou finalizadas são apagadas e substituídas
    async fn load_session(
        &self,
        clinic_id: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<BookingSession, AppError> {
        match self.sessions.get(clinic_id, phone).await? {
            Some(session) if !session.is_expired(now) && !session.state.is_terminal() => Ok(session),
            Some(stale) => {
                debug!(clinic_id, state = %stale.state, "Sessão anterior descartada");
                self.sessions.delete(clinic_id, phone).await?;
                Ok(self.fresh_session(clinic_id, phone, now))
            }
            None => Ok(self.fresh_session(clinic_id, phone, now)),
        }
    }

    fn local_now(&self, now: DateTime<Utc>) -> LocalNow {
        LocalNow::from_utc(now, self.settings.utc_offset)
    }

    async fn dispatch(
        &self,
        session: &mut BookingSession,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<Turn, AppError> {
        let local = self.local_now(now);
        match session.state {
            BookingState::WaitingCpf => self.on_identity(session, text, local.date).await,
            BookingState::ConfirmIdentity => self.on_confirm_identity(session, text).await,
            BookingState::SelectBookingFor => self.on_booking_for(session, text).await,
            BookingState::SelectDependent => self.on_dependent(session, text).await,
            BookingState::SelectProfessional => self.on_professional(session, text, local).await,
            BookingState::SelectDate => self.on_date(session, text, local).await,
            BookingState::SelectTime => Ok(self.on_time(session, text)),
            BookingState::ConfirmAppointment => self.on_confirm_appointment(session, text).await,
            BookingState::Finished => Ok(Turn::Continue(replies::prompt(session))),
        }
    }

    async fn on_identity(
        &self,
        session: &mut BookingSession,
        text: &str,
        today: NaiveDate,
    ) -> Result<Turn, AppError> {
        let resolver = IdentityResolver::new(self.directory.as_ref());
        let identity = match resolver.resolve(&session.clinic_id, text, today).await? {
            IdentityOutcome::Resolved(identity) => identity,
            IdentityOutcome::Rejected(rejection) => {
                return Ok(Turn::Continue(replies::identity_rejected(&rejection)));
            }
        };

        session.patient_id = Some(identity.patient.id);
        session.patient_name = Some(identity.patient.name);
        if let Some(dependent) = identity.dependent {
            session.select_dependent(dependent.id, &dependent.name);
        }
        session.state = BookingState::ConfirmIdentity;
        Ok(Turn::Continue(replies::prompt(session)))
    }

    async fn on_confirm_identity(&self, session: &mut BookingSession, text: &str) -> Result<Turn, AppError> {
        if !is_affirmative(text) {
            return Ok(Turn::Reset(replies::identity_denied()));
        }
        let Some(patient_id) = session.patient_id else {
            return Ok(lost_context(session, "patient_id"));
        };

        if session.is_for_dependent() {
            return self.offer_professionals(session).await;
        }

        let options = DependentSelector::new(self.directory.as_ref())
            .options(patient_id)
            .await?;
        if options.is_empty() {
            session.select_self();
            return self.offer_professionals(session).await;
        }

        session.available_dependents = options;
        session.state = BookingState::SelectBookingFor;
        Ok(Turn::Continue(replies::prompt(session)))
    }

    async fn on_booking_for(&self, session: &mut BookingSession, text: &str) -> Result<Turn, AppError> {
        let Some(choice) =
            parse_choice(text, BookingForChoice::OPTIONS).and_then(BookingForChoice::from_position)
        else {
            return Ok(Turn::Continue(replies::out_of_range(session, BookingForChoice::OPTIONS)));
        };

        match choice {
            BookingForChoice::Myself => {
                session.select_self();
                self.offer_professionals(session).await
            }
            BookingForChoice::Dependent if session.available_dependents.is_empty() => {
                Ok(lost_context(session, "available_dependents"))
            }
            BookingForChoice::Dependent => {
                session.state = BookingState::SelectDependent;
                Ok(Turn::Continue(replies::prompt(session)))
            }
        }
    }

    async fn on_dependent(&self, session: &mut BookingSession, text: &str) -> Result<Turn, AppError> {
        let len = session.available_dependents.len();
        if len == 0 {
            return Ok(lost_context(session, "available_dependents"));
        }
        let Some(option) = parse_choice(text, len)
            .and_then(|position| dependents::choose(&session.available_dependents, position))
            .cloned()
        else {
            return Ok(Turn::Continue(replies::out_of_range(session, len)));
        };

        session.select_dependent(option.id, &option.name);
        self.offer_professionals(session).await
    }

    async fn offer_professionals(&self, session: &mut BookingSession) -> Result<Turn, AppError> {
        let professionals = self.directory.active_professionals(&session.clinic_id).await?;
        if professionals.is_empty() {
            warn!(clinic_id = %session.clinic_id, "Clínica sem profissionais ativos");
            return Ok(Turn::Finish {
                text: replies::no_professionals(),
                booked: false,
            });
        }

        session.available_professionals = professionals
            .into_iter()
            .map(|p| ProfessionalOption {
                id: p.id,
                name: p.name,
                specialty: p.specialty,
            })
            .collect();
        session.state = BookingState::SelectProfessional;
        Ok(Turn::Continue(replies::prompt(session)))
    }

    async fn on_professional(
        &self,
        session: &mut BookingSession,
        text: &str,
        now: LocalNow,
    ) -> Result<Turn, AppError> {
        let len = session.available_professionals.len();
        if len == 0 {
            return Ok(lost_context(session, "available_professionals"));
        }
        let Some(option) = parse_choice(text, len)
            .map(|position| session.available_professionals[position - 1].clone())
        else {
            return Ok(Turn::Continue(replies::out_of_range(session, len)));
        };

        let dates = match self.current_professional(session, option.id).await? {
            Some(professional) => {
                AvailabilityCalculator::new(self.directory.as_ref())
                    .available_dates(&session.clinic_id, &professional, now)
                    .await?
            }
            None => Vec::new(),
        };
        if dates.is_empty() {
            return Ok(Turn::Continue(replies::professional_without_dates(&option.name, session)));
        }

        session.selected_professional_id = Some(option.id);
        session.selected_professional_name = Some(option.name);
        session.available_dates = dates;
        session.state = BookingState::SelectDate;
        Ok(Turn::Continue(replies::prompt(session)))
    }

    async fn on_date(&self, session: &mut BookingSession, text: &str, now: LocalNow) -> Result<Turn, AppError> {
        let Some(professional_id) = session.selected_professional_id else {
            return Ok(lost_context(session, "selected_professional_id"));
        };

        let len = session.available_dates.len();
        if len == 0 {
            return Ok(lost_context(session, "available_dates"));
        }
        let Some(date) = parse_choice(text, len).map(|position| session.available_dates[position - 1]) else {
            return Ok(Turn::Continue(replies::out_of_range(session, len)));
        };

        let Some(professional) = self.current_professional(session, professional_id).await? else {
            return Ok(lost_context(session, "professional"));
        };
        let times = AvailabilityCalculator::new(self.directory.as_ref())
            .available_times(&session.clinic_id, &professional, date, now)
            .await?;
        if times.is_empty() {
            return Ok(Turn::Continue(replies::date_without_times(date, session)));
        }

        session.selected_date = Some(date);
        session.available_times = times;
        session.state = BookingState::SelectTime;
        Ok(Turn::Continue(replies::prompt(session)))
    }

    fn on_time(&self, session: &mut BookingSession, text: &str) -> Turn {
        if session.selected_professional_id.is_none() || session.selected_date.is_none() {
            return lost_context(session, "selected_date");
        }

        let len = session.available_times.len();
        if len == 0 {
            return lost_context(session, "available_times");
        }
        let Some(time) = parse_choice(text, len).map(|position| session.available_times[position - 1].clone())
        else {
            return Turn::Continue(replies::out_of_range(session, len));
        };

        session.selected_time = Some(time);
        session.state = BookingState::ConfirmAppointment;
        Turn::Continue(replies::prompt(session))
    }

    async fn on_confirm_appointment(&self, session: &mut BookingSession, text: &str) -> Result<Turn, AppError> {
        let (Some(patient_id), Some(professional_id), Some(date), Some(start)) = (
            session.patient_id,
            session.selected_professional_id,
            session.selected_date,
            session.selected_time.as_deref().and_then(parse_hhmm),
        ) else {
            return Ok(lost_context(session, "selected_time"));
        };

        if !is_affirmative(text) {
            return Ok(Turn::Reset(replies::cancelled()));
        }

        let Some(professional) = self.current_professional(session, professional_id).await? else {
            return Ok(lost_context(session, "professional"));
        };

        let request = BookingRequest {
            clinic_id: &session.clinic_id,
            patient_id,
            dependent_id: if session.is_for_dependent() {
                session.selected_dependent_id
            } else {
                None
            },
            professional: &professional,
            date,
            start,
        };

        let turn = match commit::commit(self.directory.as_ref(), &request).await {
            CommitOutcome::Booked(_) => Turn::Finish {
                text: replies::booked(session),
                booked: true,
            },
            CommitOutcome::Rejected(violation) => Turn::Finish {
                text: replies::commit_rejected(violation, &professional),
                booked: false,
            },
            CommitOutcome::Failed => Turn::Finish {
                text: replies::commit_failed(),
                booked: false,
            },
        };
        Ok(turn)
    }

    /// Profissional ainda ativo na clínica
    async fn current_professional(
        &self,
        session: &BookingSession,
        professional_id: uuid::Uuid,
    ) -> Result<Option<Professional>, AppError> {
        let professional = self
            .directory
            .find_professional(&session.clinic_id, professional_id)
            .await?;
        Ok(professional.filter(|p| p.active))
    }
}

fn lost_context(session: &BookingSession, missing: &str) -> Turn {
    warn!(clinic_id = %session.clinic_id, state = %session.state, missing, "Contexto da conversa perdido");
    Turn::Reset(replies::lost_context())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Fixture, CLINIC};
    use chrono::{Duration, TimeZone};
    use common_db::models::{AppointmentStatus, BookingFor};
    use serde_json::json;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    const PHONE: &str = "5511999990000";

    /// Segunda-feira 2024-03-04, 10:00 no horário da clínica
    fn monday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, 13, 0, 0).unwrap()
    }

    /// Sexta-feira 2024-03-01, 09:00 no horário da clínica
    fn friday_morning() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn weekdays(start: &str, end: &str) -> serde_json::Value {
        let day = json!([{ "start": start, "end": end }]);
        json!({
            "monday": day, "tuesday": day, "wednesday": day,
            "thursday": day, "friday": day
        })
    }

    async fn say(engine: &BookingEngine, message: &str) -> Reply {
        assert_ok!(engine.handle(CLINIC, PHONE, message).await)
    }

    async fn session(fixture: &Fixture) -> anyhow::Result<BookingSession> {
        let session = fixture.sessions.get(CLINIC, PHONE).await?;
        Ok(session.expect("sessão gravada"))
    }

    #[test]
    fn test_affirmative_and_choice_parsing() {
        assert!(is_affirmative("1"));
        assert!(is_affirmative("Sim, sou eu"));
        assert!(is_affirmative("YES"));
        assert!(!is_affirmative("2"));
        assert!(!is_affirmative("não"));

        assert_eq!(parse_choice(" 2 ", 3), Some(2));
        assert_eq!(parse_choice("0", 3), None);
        assert_eq!(parse_choice("4", 3), None);
        assert_eq!(parse_choice("dois", 3), None);
    }

    #[tokio::test]
    async fn test_document_without_dependents_goes_to_professionals() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        fixture.professional("Dra. Ana", Some(weekdays("08:00", "12:00")), Some(30)).await?;
        fixture.patient("Maria Souza", "529.982.247-25").await?;
        let engine = fixture.engine(monday_morning());

        let reply = say(&engine, "").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);

        let reply = say(&engine, "529.982.247-25").await;
        assert_eq!(reply.state, BookingState::ConfirmIdentity);
        assert!(reply.text.contains("**Maria Souza**"));

        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::SelectProfessional);
        assert!(reply.text.contains("1 - **Dra. Ana** (Clínico Geral)"));

        let stored = session(&fixture).await?;
        assert_eq!(stored.booking_for, Some(BookingFor::Myself));
        assert!(stored.available_dependents.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_card_keeps_waiting_for_identity() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let patient = fixture.patient("Maria Souza", "52998224725").await?;
        fixture
            .card(patient, None, "000123", NaiveDate::from_ymd_opt(2024, 1, 31))
            .await?;
        let engine = fixture.engine(monday_morning());

        let reply = say(&engine, "000123").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);
        assert!(reply.text.contains("000123"));
        assert!(reply.text.contains("31/01/2024"));
        assert!(session(&fixture).await?.patient_id.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_dependent_sub_path() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        fixture.professional("Dra. Ana", Some(weekdays("08:00", "12:00")), Some(30)).await?;
        let patient = fixture.patient("Maria Souza", "52998224725").await?;
        let first = fixture.dependent(patient, "Ana Souza").await?;
        fixture.dependent(patient, "João Souza").await?;
        let engine = fixture.engine(monday_morning());

        say(&engine, "52998224725").await;
        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::SelectBookingFor);
        assert_eq!(session(&fixture).await?.available_dependents.len(), 2);

        let reply = say(&engine, "2").await;
        assert_eq!(reply.state, BookingState::SelectDependent);
        assert!(reply.text.contains("1 - **Ana Souza**\n2 - **João Souza**"));

        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::SelectProfessional);
        assert!(reply.text.contains("Consulta para **Ana Souza**"));

        let stored = session(&fixture).await?;
        assert_eq!(stored.booking_for, Some(BookingFor::Dependent));
        assert_eq!(stored.selected_dependent_id, Some(first));
        Ok(())
    }

    #[tokio::test]
    async fn test_dependent_card_skips_sub_path() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        fixture.professional("Dra. Ana", Some(weekdays("08:00", "12:00")), Some(30)).await?;
        let patient = fixture.patient("Maria Souza", "52998224725").await?;
        let dependent = fixture.dependent(patient, "João Souza").await?;
        fixture.dependent(patient, "Ana Souza").await?;
        fixture.card(patient, Some(dependent), "DEP-004455", None).await?;
        let engine = fixture.engine(monday_morning());

        let reply = say(&engine, "dep-004455").await;
        assert_eq!(reply.state, BookingState::ConfirmIdentity);
        assert!(reply.text.contains("Maria Souza"));

        let reply = say(&engine, "sim").await;
        assert_eq!(reply.state, BookingState::SelectProfessional);
        let stored = session(&fixture).await?;
        assert_eq!(stored.selected_dependent_id, Some(dependent));
        assert!(stored.is_for_dependent());
        Ok(())
    }

    /// Conduz a conversa até `SELECT_TIME` com três horários em 2024-03-04
    async fn walk_to_times(fixture: &Fixture, engine: &BookingEngine) -> anyhow::Result<Uuid> {
        let professional = fixture.professional("Dra. Ana", Some(weekdays("08:00", "09:30")), Some(30)).await?;
        fixture.patient("Maria Souza", "52998224725").await?;

        say(engine, "52998224725").await;
        say(engine, "1").await;
        let reply = say(engine, "1").await;
        assert_eq!(reply.state, BookingState::SelectDate);
        assert!(reply.text.starts_with("Datas disponíveis com **Dra. Ana**"));
        assert!(reply.text.contains("1 - 04/03/2024 (segunda-feira)"));

        let reply = say(engine, "1").await;
        assert_eq!(reply.state, BookingState::SelectTime);
        assert!(reply.text.contains("1 - 08:00\n2 - 08:30\n3 - 09:00"));
        Ok(professional.id)
    }

    #[tokio::test]
    async fn test_out_of_range_time_is_idempotent() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let engine = fixture.engine(friday_morning());
        walk_to_times(&fixture, &engine).await?;
        let before = session(&fixture).await?;

        let first = say(&engine, "5").await;
        assert_eq!(first.state, BookingState::SelectTime);
        assert!(first.text.contains("de 1 a 3"));
        let after_first = session(&fixture).await?;

        let second = say(&engine, "5").await;
        let after_second = session(&fixture).await?;

        assert_eq!(first, second);
        assert_eq!(after_first, after_second);
        assert_eq!(before, after_first);
        assert!(after_second.selected_time.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_confirmed_booking_finishes_and_restarts() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let engine = fixture.engine(friday_morning());
        walk_to_times(&fixture, &engine).await?;

        let reply = say(&engine, "2").await;
        assert_eq!(reply.state, BookingState::ConfirmAppointment);
        assert!(reply.text.contains("**Horário:** 08:30"));

        let reply = say(&engine, "Sim").await;
        assert_eq!(reply.state, BookingState::Finished);
        assert!(reply.booking_complete);
        assert_eq!(fixture.appointment_count().await?, 1);
        let end: String = sqlx::query_scalar("SELECT end_time FROM appointments")
            .fetch_one(&fixture.pool)
            .await?;
        assert_eq!(end, "09:00");

        // Próxima mensagem abre uma conversa nova
        let reply = say(&engine, "").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);
        Ok(())
    }

    #[tokio::test]
    async fn test_monthly_limit_rejection_names_limit() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let engine = fixture.engine(friday_morning());
        let professional_id = walk_to_times(&fixture, &engine).await?;

        let patient = session(&fixture).await?.patient_id.expect("titular");
        let same_month = NaiveDate::from_ymd_opt(2024, 3, 20).unwrap();
        fixture
            .appointment(patient, professional_id, same_month, "08:00", AppointmentStatus::Scheduled)
            .await?;
        fixture.set_monthly_limit(professional_id, 1).await?;

        say(&engine, "1").await;
        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::Finished);
        assert!(!reply.booking_complete);
        assert!(reply.text.contains("1 agendamento(s) por mês"));
        assert!(reply.text.contains("Dra. Ana"));
        assert_eq!(fixture.appointment_count().await?, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancellation_resets_session() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let engine = fixture.engine(friday_morning());
        walk_to_times(&fixture, &engine).await?;
        say(&engine, "1").await;

        let reply = say(&engine, "não").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);
        assert!(reply.text.starts_with("Agendamento cancelado"));
        assert_eq!(fixture.appointment_count().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_identity_denied_clears_everything() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        fixture.patient("Maria Souza", "52998224725").await?;
        let now = monday_morning();
        let engine = fixture.engine(now);

        say(&engine, "52998224725").await;
        let reply = say(&engine, "2").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);

        let expected = BookingSession::new(CLINIC, PHONE, now + Duration::minutes(30));
        assert_eq!(session(&fixture).await?, expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_lost_context_resets_with_apology() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let now = monday_morning();
        let engine = fixture.engine(now);

        let mut broken = BookingSession::new(CLINIC, PHONE, now + Duration::minutes(10));
        broken.state = BookingState::SelectTime;
        broken.available_times = vec!["08:00".to_string()];
        fixture.sessions.upsert(&broken).await?;

        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);
        assert!(reply.text.starts_with("Desculpe"));

        let stored = session(&fixture).await?;
        assert!(stored.available_times.is_empty());
        assert!(stored.selected_time.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_choice_list_resets_instead_of_looping() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let patient = fixture.patient("Maria Souza", "52998224725").await?;
        let now = monday_morning();
        let engine = fixture.engine(now);

        for state in [
            BookingState::SelectDependent,
            BookingState::SelectProfessional,
            BookingState::SelectDate,
            BookingState::SelectTime,
        ] {
            let mut stale = BookingSession::new(CLINIC, PHONE, now + Duration::minutes(10));
            stale.state = state;
            stale.patient_id = Some(patient);
            stale.booking_for = Some(BookingFor::Myself);
            stale.selected_professional_id = Some(Uuid::new_v4());
            stale.selected_date = NaiveDate::from_ymd_opt(2024, 3, 5);
            fixture.sessions.upsert(&stale).await?;

            let reply = say(&engine, "1").await;
            assert_eq!(reply.state, BookingState::WaitingCpf, "estado {}", state);
            assert!(reply.text.starts_with("Desculpe"));
            assert_eq!(session(&fixture).await?.state, BookingState::WaitingCpf);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_session_starts_over() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        let now = monday_morning();
        let engine = fixture.engine(now);

        let mut old = BookingSession::new(CLINIC, PHONE, now - Duration::minutes(1));
        old.state = BookingState::SelectProfessional;
        fixture.sessions.upsert(&old).await?;

        let reply = say(&engine, "").await;
        assert_eq!(reply.state, BookingState::WaitingCpf);
        assert_eq!(session(&fixture).await?.expires_at, now + Duration::minutes(30));
        Ok(())
    }

    #[tokio::test]
    async fn test_professional_without_dates_stays() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        fixture.professional("Dr. Sem Agenda", None, None).await?;
        fixture.professional("Dra. Ana", Some(weekdays("08:00", "12:00")), Some(30)).await?;
        fixture.patient("Maria Souza", "52998224725").await?;
        let engine = fixture.engine(monday_morning());

        say(&engine, "52998224725").await;
        say(&engine, "1").await;
        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::SelectProfessional);
        assert!(reply.text.starts_with("**Dr. Sem Agenda** não tem datas"));
        assert!(session(&fixture).await?.selected_professional_id.is_none());

        let reply = say(&engine, "2").await;
        assert_eq!(reply.state, BookingState::SelectDate);
        Ok(())
    }

    #[tokio::test]
    async fn test_clinic_without_professionals_finishes() -> anyhow::Result<()> {
        let fixture = Fixture::new().await?;
        fixture.patient("Maria Souza", "52998224725").await?;
        let engine = fixture.engine(monday_morning());

        say(&engine, "52998224725").await;
        let reply = say(&engine, "1").await;
        assert_eq!(reply.state, BookingState::Finished);
        assert!(!reply.booking_complete);
        Ok(())
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn invalid_choice() -> impl Strategy<Value = String> {
            prop_oneof![
                Just("0".to_string()),
                (4usize..10_000).prop_map(|n| n.to_string()),
                "[a-z]{1,8}",
            ]
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(12))]

            #[test]
            fn test_invalid_time_choice_leaves_session_untouched(choice in invalid_choice()) {
                let runtime = tokio::runtime::Runtime::new().unwrap();
                let (before, after, reply) = runtime
                    .block_on(async {
                        let fixture = Fixture::new().await?;
                        let engine = fixture.engine(friday_morning());
                        walk_to_times(&fixture, &engine).await?;
                        let before = session(&fixture).await?;
                        let reply = say(&engine, &choice).await;
                        let after = session(&fixture).await?;
                        anyhow::Ok((before, after, reply))
                    })
                    .unwrap();

                prop_assert_eq!(reply.state, BookingState::SelectTime);
                prop_assert!(reply.text.contains("de 1 a 3"));
                prop_assert_eq!(before, after);
            }
        }
    }
}

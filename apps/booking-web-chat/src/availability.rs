//! Cálculo de datas e horários disponíveis
//!
//! O resultado é uma antecipação: a inserção do agendamento é validada de novo
//! pelos triggers do banco.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use common_db::models::Professional;
use common_db::{BookingDirectory, DbError};
use std::collections::HashSet;
use tracing::debug;

use crate::schedule::{apply_exception, format_hhmm, parse_hhmm, DayPlan, Minutes, ProfessionalSchedule};

/// Dias varridos a partir de hoje (hoje + 14)
pub const SCAN_DAYS: i64 = 15;
/// Máximo de datas oferecidas
pub const MAX_DATES: usize = 5;
/// Máximo de horários oferecidos
pub const MAX_TIMES: usize = 10;
/// Antecedência mínima para horários no mesmo dia
pub const LEAD_TIME_MINUTES: Minutes = 30;

/// "Agora" no fuso da clínica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalNow {
    pub date: NaiveDate,
    pub minutes: Minutes,
}

impl LocalNow {
    pub fn from_utc(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let local = now.with_timezone(&offset);
        Self {
            date: local.date_naive(),
            minutes: local.hour() * 60 + local.minute(),
        }
    }

    /// Primeiro minuto que ainda não pode ser oferecido hoje
    fn lead_limit(&self) -> Minutes {
        self.minutes + LEAD_TIME_MINUTES
    }
}

/// Horários livres de um dia, em ordem: candidatos da agenda menos os já
/// ocupados e, se for hoje, menos os que não respeitam a antecedência mínima
pub fn open_starts<'a>(
    plan: &'a DayPlan,
    duration: Minutes,
    not_before: Option<Minutes>,
    booked: &'a HashSet<Minutes>,
) -> impl Iterator<Item = Minutes> + 'a {
    plan.candidate_starts(duration)
        .into_iter()
        .filter(move |start| not_before.map_or(true, |limit| *start > limit))
        .filter(move |start| !booked.contains(start))
}

pub struct AvailabilityCalculator<'a> {
    directory: &'a dyn BookingDirectory,
}

impl<'a> AvailabilityCalculator<'a> {
    pub fn new(directory: &'a dyn BookingDirectory) -> Self {
        Self { directory }
    }

    /// Janelas do dia após agenda, exceção e feriado
    async fn day_plan(
        &self,
        clinic_id: &str,
        professional: &Professional,
        schedule: &ProfessionalSchedule,
        date: NaiveDate,
    ) -> Result<Option<DayPlan>, DbError> {
        let exception = self.directory.schedule_exception(professional.id, date).await?;
        let Some(plan) = apply_exception(schedule.day_plan(date), exception.as_ref()) else {
            return Ok(None);
        };
        if plan.is_empty() || self.directory.is_holiday(clinic_id, date).await? {
            return Ok(None);
        }
        Ok(Some(plan))
    }

    async fn booked(&self, professional: &Professional, date: NaiveDate) -> Result<HashSet<Minutes>, DbError> {
        let times = self.directory.booked_start_times(professional.id, date).await?;
        Ok(times.iter().filter_map(|t| parse_hhmm(t)).collect())
    }

    /// Próximas datas com ao menos um horário livre (até [`MAX_DATES`])
    pub async fn available_dates(
        &self,
        clinic_id: &str,
        professional: &Professional,
        now: LocalNow,
    ) -> Result<Vec<NaiveDate>, DbError> {
        let schedule = ProfessionalSchedule::from_json(professional.schedule.as_ref());
        let duration = professional.duration_minutes();
        let mut dates = Vec::new();

        for offset in 0..SCAN_DAYS {
            if dates.len() >= MAX_DATES {
                break;
            }
            let date = now.date + Duration::days(offset);

            let Some(plan) = self.day_plan(clinic_id, professional, &schedule, date).await? else {
                continue;
            };

            let is_today = date == now.date;
            if is_today
                && !plan
                    .windows
                    .iter()
                    .any(|w| w.end > now.lead_limit().saturating_add(duration))
            {
                debug!(professional_id = %professional.id, %date, "Hoje sem janela após a antecedência mínima");
                continue;
            }

            let booked = self.booked(professional, date).await?;
            let not_before = is_today.then(|| now.lead_limit());
            if open_starts(&plan, duration, not_before, &booked).next().is_some() {
                dates.push(date);
            }
        }

        debug!(professional_id = %professional.id, count = dates.len(), "Datas disponíveis calculadas");
        Ok(dates)
    }

    /// Horários livres ("HH:MM") da data (até [`MAX_TIMES`])
    pub async fn available_times(
        &self,
        clinic_id: &str,
        professional: &Professional,
        date: NaiveDate,
        now: LocalNow,
    ) -> Result<Vec<String>, DbError> {
        if date < now.date {
            return Ok(Vec::new());
        }

        let schedule = ProfessionalSchedule::from_json(professional.schedule.as_ref());
        let Some(plan) = self.day_plan(clinic_id, professional, &schedule, date).await? else {
            return Ok(Vec::new());
        };

        let booked = self.booked(professional, date).await?;
        let not_before = (date == now.date).then(|| now.lead_limit());
        let times = open_starts(&plan, professional.duration_minutes(), not_before, &booked)
            .take(MAX_TIMES)
            .map(format_hhmm)
            .collect();
        Ok(times)
    }
}

//! Agenda dos profissionais
//!
//! A agenda chega como JSON livre com um modelo semanal (`"monday": [...]`) e/ou
//! uma lista de blocos irregulares (`"blocks": [...]`). Ela é convertida uma vez
//! em [`ProfessionalSchedule`], e cada data vira um [`DayPlan`] normalizado com
//! as janelas de atendimento e o passo entre horários.
//!
//! ```json
//! {
//!   "blocks": [
//!     { "days": [1, 3], "start_date": "2024-03-01", "end_date": "2024-06-30",
//!       "start_time": "08:00", "end_time": "12:00", "granularity": 20 }
//!   ],
//!   "monday": { "enabled": true, "slots": [{ "start": "08:00", "end": "12:00" }] },
//!   "friday": [{ "start": "14:00", "end": "18:00" }]
//! }
//! ```

use chrono::{Datelike, NaiveDate};
use common_db::models::ScheduleException;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Minutos desde a meia-noite
pub type Minutes = u32;

/// Passo ou duração maiores que um dia não cabem em nenhuma janela
pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Converte "HH:MM" (ou "HH:MM:SS") em minutos
pub fn parse_hhmm(value: &str) -> Option<Minutes> {
    let mut parts = value.trim().split(':');
    let hours: Minutes = parts.next()?.trim().parse().ok()?;
    let minutes: Minutes = parts.next()?.trim().parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

pub fn format_hhmm(minutes: Minutes) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Janela de atendimento; `step` vem do bloco, senão usa a duração da consulta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWindow {
    pub start: Minutes,
    pub end: Minutes,
    pub step: Option<Minutes>,
}

/// Janelas de um dia já resolvidas
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DayPlan {
    pub windows: Vec<SlotWindow>,
}

impl DayPlan {
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Horários de início candidatos: `início + duração <= fim`, em ordem e sem repetição
    pub fn candidate_starts(&self, duration: Minutes) -> Vec<Minutes> {
        if duration == 0 || duration > MINUTES_PER_DAY {
            return Vec::new();
        }

        let mut starts = Vec::new();
        for window in &self.windows {
            let step = window.step.filter(|s| *s > 0).unwrap_or(duration);
            let mut next = Some(window.start);
            while let Some(start) = next {
                match start.checked_add(duration) {
                    Some(end) if end <= window.end => starts.push(start),
                    _ => break,
                }
                next = start.checked_add(step);
            }
        }
        starts.sort_unstable();
        starts.dedup();
        starts
    }
}

/// Janela bruta do modelo, antes de receber o passo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Minutes,
    pub end: Minutes,
}

/// Bloco irregular de atendimento
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleBlock {
    /// Dias da semana (0 = domingo); vazio vale para todos
    weekdays: Vec<u32>,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
    windows: Vec<Window>,
    step: Option<Minutes>,
}

impl ScheduleBlock {
    fn applies_to(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday().num_days_from_sunday();
        let weekday_ok = self.weekdays.is_empty() || self.weekdays.contains(&weekday);
        let after_start = self.start_date.map_or(true, |start| date >= start);
        let before_end = self.end_date.map_or(true, |end| date <= end);
        weekday_ok && after_start && before_end
    }
}

/// Modelo de agenda: semanal fixo ou lista de blocos
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleTemplate {
    /// Chave 0 = domingo ... 6 = sábado
    PerWeekday(BTreeMap<u32, Vec<Window>>),
    BlockList(Vec<ScheduleBlock>),
}

impl ScheduleTemplate {
    fn plan_for(&self, date: NaiveDate) -> DayPlan {
        let windows = match self {
            ScheduleTemplate::PerWeekday(days) => days
                .get(&date.weekday().num_days_from_sunday())
                .map(|windows| {
                    windows
                        .iter()
                        .map(|w| SlotWindow { start: w.start, end: w.end, step: None })
                        .collect()
                })
                .unwrap_or_default(),
            ScheduleTemplate::BlockList(blocks) => blocks
                .iter()
                .filter(|block| block.applies_to(date))
                .flat_map(|block| {
                    block.windows.iter().map(move |w| SlotWindow {
                        start: w.start,
                        end: w.end,
                        step: block.step,
                    })
                })
                .collect(),
        };
        DayPlan { windows }
    }
}

/// Agenda completa, com os modelos em ordem de precedência (blocos antes do semanal)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProfessionalSchedule {
    templates: Vec<ScheduleTemplate>,
}

#[derive(Debug, Deserialize)]
struct RawWindow {
    #[serde(alias = "start_time")]
    start: String,
    #[serde(alias = "end_time")]
    end: String,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDay {
    Windows(Vec<RawWindow>),
    Detailed {
        #[serde(default = "enabled_by_default")]
        enabled: bool,
        #[serde(default)]
        slots: Vec<RawWindow>,
    },
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default, alias = "weekdays")]
    days: Vec<u32>,
    #[serde(default)]
    start_date: Option<NaiveDate>,
    #[serde(default)]
    end_date: Option<NaiveDate>,
    #[serde(default)]
    start_time: Option<String>,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    slots: Vec<RawWindow>,
    #[serde(default, alias = "step")]
    granularity: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawSchedule {
    #[serde(default)]
    blocks: Vec<RawBlock>,
    #[serde(flatten)]
    days: BTreeMap<String, serde_json::Value>,
}

fn weekday_key(key: &str) -> Option<u32> {
    match key.trim().to_ascii_lowercase().as_str() {
        "sunday" | "0" => Some(0),
        "monday" | "1" => Some(1),
        "tuesday" | "2" => Some(2),
        "wednesday" | "3" => Some(3),
        "thursday" | "4" => Some(4),
        "friday" | "5" => Some(5),
        "saturday" | "6" => Some(6),
        _ => None,
    }
}

fn window(start: &str, end: &str) -> Option<Window> {
    let start = parse_hhmm(start)?;
    let end = parse_hhmm(end)?;
    (start < end).then_some(Window { start, end })
}

fn windows(raw: &[RawWindow]) -> Vec<Window> {
    raw.iter().filter_map(|w| window(&w.start, &w.end)).collect()
}

impl ProfessionalSchedule {
    /// Interpreta o JSON da agenda; formatos desconhecidos resultam em agenda vazia
    pub fn from_json(value: Option<&serde_json::Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };

        let raw: RawSchedule = match serde_json::from_value(value.clone()) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Agenda em formato não reconhecido");
                return Self::default();
            }
        };

        let mut templates = Vec::new();

        let blocks: Vec<ScheduleBlock> = raw
            .blocks
            .iter()
            .map(|block| {
                let mut block_windows = windows(&block.slots);
                if let (Some(start), Some(end)) = (&block.start_time, &block.end_time) {
                    block_windows.extend(window(start, end));
                }
                ScheduleBlock {
                    weekdays: block.days.clone(),
                    start_date: block.start_date,
                    end_date: block.end_date,
                    windows: block_windows,
                    step: block.granularity.filter(|g| (1..=MINUTES_PER_DAY).contains(g)),
                }
            })
            .filter(|block| !block.windows.is_empty())
            .collect();
        if !blocks.is_empty() {
            templates.push(ScheduleTemplate::BlockList(blocks));
        }

        let mut days = BTreeMap::new();
        for (key, value) in raw.days {
            let Some(weekday) = weekday_key(&key) else {
                continue;
            };
            match serde_json::from_value::<RawDay>(value) {
                Ok(RawDay::Windows(raw_windows)) => {
                    days.insert(weekday, windows(&raw_windows));
                }
                Ok(RawDay::Detailed { enabled: true, slots }) => {
                    days.insert(weekday, windows(&slots));
                }
                Ok(RawDay::Detailed { enabled: false, .. }) => {}
                Err(e) => warn!(day = %key, error = %e, "Dia da agenda ignorado"),
            }
        }
        days.retain(|_, windows| !windows.is_empty());
        if !days.is_empty() {
            templates.push(ScheduleTemplate::PerWeekday(days));
        }

        Self { templates }
    }

    /// Primeiro modelo que produz janelas para a data
    pub fn day_plan(&self, date: NaiveDate) -> Option<DayPlan> {
        self.templates
            .iter()
            .map(|template| template.plan_for(date))
            .find(|plan| !plan.is_empty())
    }
}

/// Aplica a exceção da data: folga cancela o dia, horários substituem as janelas
pub fn apply_exception(plan: Option<DayPlan>, exception: Option<&ScheduleException>) -> Option<DayPlan> {
    let Some(exception) = exception else {
        return plan;
    };
    if exception.day_off {
        return None;
    }

    let replacement = match (&exception.start_time, &exception.end_time) {
        (Some(start), Some(end)) => window(start, end),
        _ => None,
    };
    match replacement {
        Some(w) => {
            let step = plan
                .as_ref()
                .and_then(|p| p.windows.first())
                .and_then(|first| first.step);
            Some(DayPlan {
                windows: vec![SlotWindow { start: w.start, end: w.end, step }],
            })
        }
        None => plan,
    }
}

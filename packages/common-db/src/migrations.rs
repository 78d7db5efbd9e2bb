//! Sistema de migrações para banco de dados
//!
//! Este módulo gerencia as migrações do banco de dados SQLite. As regras de
//! negócio do agendamento ficam em triggers: são a palavra final na inserção,
//! mesmo quando duas conversas disputam o mesmo horário.

use anyhow::{Context, Result};
use sqlx::{Executor, SqlitePool};
use tracing::{error, info};

/// Lista de migrações SQL a serem aplicadas
const MIGRATIONS: &[&str] = &[
    // 001_cadastro.sql
    r#"
    -- Titulares
    CREATE TABLE IF NOT EXISTS patients (
        id TEXT PRIMARY KEY NOT NULL,
        clinic_id TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        name TEXT NOT NULL,
        cpf TEXT,
        phone TEXT,
        active BOOLEAN NOT NULL DEFAULT 1,
        no_show_block_until DATE,
        no_show_block_lifted BOOLEAN NOT NULL DEFAULT 0
    );

    -- Dependentes do titular
    CREATE TABLE IF NOT EXISTS patient_dependents (
        id TEXT PRIMARY KEY NOT NULL,
        patient_id TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        name TEXT NOT NULL,
        cpf TEXT,
        relationship TEXT,
        active BOOLEAN NOT NULL DEFAULT 1,
        FOREIGN KEY (patient_id) REFERENCES patients (id) ON DELETE CASCADE
    );

    -- Carteirinhas (dependent_id preenchido = carteirinha de dependente)
    CREATE TABLE IF NOT EXISTS member_cards (
        id TEXT PRIMARY KEY NOT NULL,
        clinic_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        dependent_id TEXT,
        card_number TEXT NOT NULL,
        active BOOLEAN NOT NULL DEFAULT 1,
        expires_at DATE,
        FOREIGN KEY (patient_id) REFERENCES patients (id) ON DELETE CASCADE,
        FOREIGN KEY (dependent_id) REFERENCES patient_dependents (id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_patients_clinic_cpf ON patients (clinic_id, cpf);
    CREATE INDEX IF NOT EXISTS idx_dependents_patient_id ON patient_dependents (patient_id);
    CREATE INDEX IF NOT EXISTS idx_member_cards_clinic_number ON member_cards (clinic_id, card_number);
    CREATE INDEX IF NOT EXISTS idx_member_cards_patient_id ON member_cards (patient_id);
    "#,
    // 002_agenda.sql
    r#"
    -- Profissionais; schedule guarda a agenda em JSON
    CREATE TABLE IF NOT EXISTS professionals (
        id TEXT PRIMARY KEY NOT NULL,
        clinic_id TEXT NOT NULL,
        name TEXT NOT NULL,
        specialty TEXT,
        active BOOLEAN NOT NULL DEFAULT 1,
        appointment_duration INTEGER,
        monthly_booking_limit INTEGER,
        schedule TEXT
    );

    -- Exceções por data (folga ou janela alternativa)
    CREATE TABLE IF NOT EXISTS schedule_exceptions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        professional_id TEXT NOT NULL,
        date DATE NOT NULL,
        day_off BOOLEAN NOT NULL DEFAULT 0,
        start_time TEXT,
        end_time TEXT,
        FOREIGN KEY (professional_id) REFERENCES professionals (id) ON DELETE CASCADE
    );

    -- Feriados; clinic_id nulo vale para todas as clínicas
    CREATE TABLE IF NOT EXISTS holidays (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        clinic_id TEXT,
        date DATE NOT NULL,
        name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS appointments (
        id TEXT PRIMARY KEY NOT NULL,
        clinic_id TEXT NOT NULL,
        patient_id TEXT NOT NULL,
        dependent_id TEXT,
        professional_id TEXT NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        appointment_date DATE NOT NULL,
        start_time TEXT NOT NULL,
        end_time TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'scheduled' CHECK (status IN ('scheduled', 'confirmed', 'in_progress', 'completed', 'canceled', 'no_show')),
        source TEXT NOT NULL,
        FOREIGN KEY (patient_id) REFERENCES patients (id) ON DELETE CASCADE,
        FOREIGN KEY (dependent_id) REFERENCES patient_dependents (id) ON DELETE SET NULL,
        FOREIGN KEY (professional_id) REFERENCES professionals (id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_professionals_clinic ON professionals (clinic_id, active);
    CREATE INDEX IF NOT EXISTS idx_schedule_exceptions_date ON schedule_exceptions (professional_id, date);
    CREATE INDEX IF NOT EXISTS idx_holidays_date ON holidays (date);
    CREATE INDEX IF NOT EXISTS idx_appointments_professional_date ON appointments (professional_id, appointment_date);
    CREATE INDEX IF NOT EXISTS idx_appointments_patient_id ON appointments (patient_id);
    "#,
    // 003_regras_agendamento.sql
    r#"
    CREATE TRIGGER IF NOT EXISTS trg_appointments_holiday
    BEFORE INSERT ON appointments
    WHEN EXISTS (
        SELECT 1 FROM holidays h
        WHERE h.date = NEW.appointment_date
          AND (h.clinic_id IS NULL OR h.clinic_id = NEW.clinic_id)
    )
    BEGIN
        SELECT RAISE(ABORT, 'FERIADO: a data escolhida é feriado');
    END;

    CREATE TRIGGER IF NOT EXISTS trg_appointments_blocked
    BEFORE INSERT ON appointments
    WHEN EXISTS (
        SELECT 1 FROM patients p
        WHERE p.id = NEW.patient_id
          AND p.no_show_block_until IS NOT NULL
          AND p.no_show_block_until >= date('now', '-3 hours')
          AND p.no_show_block_lifted = 0
    )
    BEGIN
        SELECT RAISE(ABORT, 'PACIENTE_BLOQUEADO: paciente com bloqueio por faltas');
    END;

    CREATE TRIGGER IF NOT EXISTS trg_appointments_card
    BEFORE INSERT ON appointments
    WHEN NOT EXISTS (
        SELECT 1 FROM member_cards c
        WHERE c.patient_id = NEW.patient_id
          AND c.active = 1
          AND (c.expires_at IS NULL OR c.expires_at >= NEW.appointment_date)
    )
    BEGIN
        SELECT RAISE(ABORT, 'CARTEIRINHA_VENCIDA: nenhuma carteirinha válida');
    END;

    CREATE TRIGGER IF NOT EXISTS trg_appointments_slot
    BEFORE INSERT ON appointments
    WHEN EXISTS (
        SELECT 1 FROM appointments a
        WHERE a.professional_id = NEW.professional_id
          AND a.appointment_date = NEW.appointment_date
          AND a.start_time = NEW.start_time
          AND a.status IN ('scheduled', 'confirmed')
    )
    BEGIN
        SELECT RAISE(ABORT, 'HORARIO_INVALIDO: horário já ocupado');
    END;

    CREATE TRIGGER IF NOT EXISTS trg_appointments_limit_member
    BEFORE INSERT ON appointments
    WHEN NEW.dependent_id IS NULL AND EXISTS (
        SELECT 1 FROM professionals pr
        WHERE pr.id = NEW.professional_id
          AND pr.monthly_booking_limit IS NOT NULL
          AND (
              SELECT COUNT(*) FROM appointments a
              WHERE a.patient_id = NEW.patient_id
                AND a.dependent_id IS NULL
                AND a.professional_id = NEW.professional_id
                AND strftime('%Y-%m', a.appointment_date) = strftime('%Y-%m', NEW.appointment_date)
                AND a.status IN ('scheduled', 'confirmed', 'in_progress', 'completed')
          ) >= pr.monthly_booking_limit
    )
    BEGIN
        SELECT RAISE(ABORT, 'LIMITE_AGENDAMENTO_CPF: limite mensal do titular atingido');
    END;

    CREATE TRIGGER IF NOT EXISTS trg_appointments_limit_dependent
    BEFORE INSERT ON appointments
    WHEN NEW.dependent_id IS NOT NULL AND EXISTS (
        SELECT 1 FROM professionals pr
        WHERE pr.id = NEW.professional_id
          AND pr.monthly_booking_limit IS NOT NULL
          AND (
              SELECT COUNT(*) FROM appointments a
              WHERE a.dependent_id = NEW.dependent_id
                AND a.professional_id = NEW.professional_id
                AND strftime('%Y-%m', a.appointment_date) = strftime('%Y-%m', NEW.appointment_date)
                AND a.status IN ('scheduled', 'confirmed', 'in_progress', 'completed')
          ) >= pr.monthly_booking_limit
    )
    BEGIN
        SELECT RAISE(ABORT, 'LIMITE_AGENDAMENTO_DEPENDENTE: limite mensal do dependente atingido');
    END;
    "#,
    // 004_sessoes.sql
    r#"
    CREATE TABLE IF NOT EXISTS booking_sessions (
        clinic_id TEXT NOT NULL,
        phone TEXT NOT NULL,
        state TEXT NOT NULL,
        patient_id TEXT,
        patient_name TEXT,
        booking_for TEXT CHECK (booking_for IN ('self', 'dependent')),
        selected_dependent_id TEXT,
        selected_dependent_name TEXT,
        available_dependents TEXT NOT NULL DEFAULT '[]',
        available_professionals TEXT NOT NULL DEFAULT '[]',
        available_dates TEXT NOT NULL DEFAULT '[]',
        available_times TEXT NOT NULL DEFAULT '[]',
        selected_professional_id TEXT,
        selected_professional_name TEXT,
        selected_date DATE,
        selected_time TEXT,
        expires_at TIMESTAMP NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (clinic_id, phone),
        CHECK (booking_for IS NULL OR booking_for <> 'dependent' OR selected_dependent_id IS NOT NULL),
        CHECK (booking_for IS NULL OR booking_for <> 'self' OR selected_dependent_id IS NULL)
    );

    CREATE INDEX IF NOT EXISTS idx_booking_sessions_expires_at ON booking_sessions (expires_at);
    "#,
];

/// Executa todas as migrações pendentes no banco de dados
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Aplicando migrações de banco de dados...");

    let mut version: i64 = 0;
    match sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await
    {
        Ok(v) => version = v,
        Err(e) => {
            // Continuar mesmo assim, pois pode ser a primeira execução
            error!("Erro ao obter versão do banco: {}", e);
        }
    }

    info!("Versão atual do banco: {}", version);

    for (i, migration_sql) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as i64;

        if migration_version <= version {
            info!("Migração {} já aplicada", migration_version);
            continue;
        }

        info!("Aplicando migração {}...", migration_version);

        let mut transaction = pool
            .begin()
            .await
            .context(format!("Falha ao iniciar transação para migração {}", migration_version))?;

        // Texto com vários comandos: executado sem preparo via Executor
        (&mut *transaction)
            .execute(*migration_sql)
            .await
            .context(format!("Falha ao executar migração {}", migration_version))?;

        sqlx::query(&format!("PRAGMA user_version = {}", migration_version))
            .execute(&mut *transaction)
            .await
            .context(format!("Falha ao atualizar versão para {}", migration_version))?;

        transaction
            .commit()
            .await
            .context(format!("Falha ao confirmar transação para migração {}", migration_version))?;

        info!("Migração {} aplicada com sucesso", migration_version);
    }

    info!("Migrações concluídas. Versão atual: {}", MIGRATIONS.len());
    Ok(())
}

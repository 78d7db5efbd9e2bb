//! Validação e formatação de CPF

/// Extrai os dígitos de um CPF digitado com ou sem pontuação
pub fn digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Valida os dois dígitos verificadores; rejeita sequências repetidas
pub fn is_valid(cpf: &str) -> bool {
    let numbers: Vec<u32> = match cpf.chars().map(|c| c.to_digit(10)).collect::<Option<Vec<_>>>() {
        Some(numbers) if numbers.len() == 11 => numbers,
        _ => return false,
    };

    if numbers.iter().all(|&n| n == numbers[0]) {
        return false;
    }

    check_digit(&numbers[..9]) == numbers[9] && check_digit(&numbers[..10]) == numbers[10]
}

fn check_digit(base: &[u32]) -> u32 {
    let weight_start = base.len() as u32 + 1;
    let sum: u32 = base
        .iter()
        .enumerate()
        .map(|(i, n)| n * (weight_start - i as u32))
        .sum();
    let rest = (sum * 10) % 11;
    if rest == 10 {
        0
    } else {
        rest
    }
}

/// `52998224725` -> `529.982.247-25`
pub fn format(cpf: &str) -> String {
    if cpf.len() != 11 || !cpf.chars().all(|c| c.is_ascii_digit()) {
        return cpf.to_string();
    }
    format!("{}.{}.{}-{}", &cpf[0..3], &cpf[3..6], &cpf[6..9], &cpf[9..11])
}

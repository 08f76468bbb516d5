//! CSV lead import.
//!
//! Headers are matched case-insensitively in English or Spanish. A row needs a
//! name and at least one of phone or email; rows failing that are reported by
//! line and skipped while the rest of the file is imported.

use csv::{ReaderBuilder, StringRecord, Trim};
use shared::{error::ApiError, protocol::ImportRowError};
use storage::NewLead;

#[derive(Debug, Default, Clone, Copy)]
struct Columns {
    name: Option<usize>,
    phone: Option<usize>,
    email: Option<usize>,
    province: Option<usize>,
    city: Option<usize>,
    notes: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &StringRecord) -> Self {
        let mut columns = Columns::default();
        for (idx, header) in headers.iter().enumerate() {
            let header = header.trim_start_matches('\u{feff}').trim().to_lowercase();
            let slot = match header.as_str() {
                "name" | "nombre" | "full name" | "nombre completo" => &mut columns.name,
                "phone" | "telefono" | "teléfono" | "tel" | "celular" => &mut columns.phone,
                "email" | "e-mail" | "mail" | "correo" => &mut columns.email,
                "province" | "provincia" | "region" | "región" => &mut columns.province,
                "city" | "ciudad" | "localidad" => &mut columns.city,
                "notes" | "notas" | "observaciones" => &mut columns.notes,
                _ => continue,
            };
            slot.get_or_insert(idx);
        }
        columns
    }
}

#[derive(Debug, Default)]
pub struct ParsedImport {
    pub leads: Vec<NewLead>,
    pub errors: Vec<ImportRowError>,
}

/// Parses the upload. Only a missing name column fails the whole import.
pub fn parse_leads(bytes: &[u8]) -> Result<ParsedImport, ApiError> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);
    let headers = reader
        .headers()
        .map_err(|e| ApiError::validation(format!("unreadable CSV header: {e}")))?
        .clone();
    let columns = Columns::from_headers(&headers);
    let Some(name_col) = columns.name else {
        return Err(ApiError::validation("CSV must have a name column"));
    };

    let mut parsed = ParsedImport::default();
    for record in reader.records() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                parsed.errors.push(ImportRowError {
                    line,
                    message: format!("unreadable row: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        if record.iter().all(str::is_empty) {
            continue;
        }

        let field = |col: Option<usize>| {
            col.and_then(|idx| record.get(idx))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };

        let Some(name) = field(Some(name_col)) else {
            parsed.errors.push(ImportRowError {
                line,
                message: "missing name".into(),
            });
            continue;
        };
        let phone = field(columns.phone).and_then(|raw| normalize_phone(&raw));
        let email = field(columns.email).map(|raw| raw.to_lowercase());
        if let Some(email) = &email {
            if !looks_like_email(email) {
                parsed.errors.push(ImportRowError {
                    line,
                    message: format!("invalid email '{email}'"),
                });
                continue;
            }
        }
        if phone.is_none() && email.is_none() {
            parsed.errors.push(ImportRowError {
                line,
                message: "row needs a phone or an email".into(),
            });
            continue;
        }

        parsed.leads.push(NewLead {
            name,
            phone,
            email,
            province: field(columns.province),
            city: field(columns.city),
            notes: field(columns.notes).unwrap_or_default(),
        });
    }
    Ok(parsed)
}

/// Keeps digits and a leading `+`; `None` if no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}

fn looks_like_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.contains('@'),
        None => false,
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ValidationError;

/// Filter over the dataset. Either range mode (`start`/`end`, inclusive year
/// bounds) or window mode (`offset`/`limit`, positions), never both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    start: Option<u32>,
    end: Option<u32>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMode {
    All,
    Range { start: Option<u32>, end: Option<u32> },
    Window { offset: usize, limit: Option<usize> },
}

/// Unvalidated selector fields as they arrive from a query string or a JSON body.
#[derive(Debug, Default, Deserialize)]
pub struct RawSelector {
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub limit: Option<Value>,
    pub offset: Option<Value>,
}

impl RawSelector {
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        let field = |name: &str| params.get(name).map(|v| Value::String(v.clone()));
        Self {
            start: field("start"),
            end: field("end"),
            limit: field("limit"),
            offset: field("offset"),
        }
    }
}

impl Selector {
    pub fn range(start: Option<u32>, end: Option<u32>) -> Result<Self, ValidationError> {
        Self::validated(start, end, None, None)
    }

    pub fn window(offset: Option<usize>, limit: Option<usize>) -> Result<Self, ValidationError> {
        Self::validated(None, None, limit, offset)
    }

    /// The single record at position `id`.
    pub fn by_id(id: usize) -> Self {
        Self {
            limit: Some(1),
            offset: Some(id),
            ..Default::default()
        }
    }

    /// All records of one year.
    pub fn by_year(year: u32) -> Self {
        Self {
            start: Some(year),
            end: Some(year),
            ..Default::default()
        }
    }

    pub fn parse(raw: &RawSelector) -> Result<Self, ValidationError> {
        let mut errors = Vec::new();
        let start = parse_field(raw.start.as_ref(), "start", &mut errors);
        let end = parse_field(raw.end.as_ref(), "end", &mut errors);
        let limit = parse_field(raw.limit.as_ref(), "limit", &mut errors);
        let offset = parse_field(raw.offset.as_ref(), "offset", &mut errors);

        let has_range = raw.start.is_some() || raw.end.is_some();
        let has_window = raw.limit.is_some() || raw.offset.is_some();
        if let Err(e) = Self::check_combination(start, end, has_range, has_window) {
            errors.extend(e.into_messages());
        }
        if !errors.is_empty() {
            return Err(ValidationError::new(errors));
        }
        Ok(Self {
            start: start.map(narrow_year),
            end: end.map(narrow_year),
            limit: limit.map(|v| v as usize),
            offset: offset.map(|v| v as usize),
        })
    }

    fn validated(
        start: Option<u32>,
        end: Option<u32>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Self, ValidationError> {
        Self::check_combination(
            start.map(u64::from),
            end.map(u64::from),
            start.is_some() || end.is_some(),
            limit.is_some() || offset.is_some(),
        )?;
        Ok(Self {
            start,
            end,
            limit,
            offset,
        })
    }

    fn check_combination(
        start: Option<u64>,
        end: Option<u64>,
        has_range: bool,
        has_window: bool,
    ) -> Result<(), ValidationError> {
        let mut errors = Vec::new();
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                errors.push("'start' input cannot be larger than 'end'".to_owned());
            }
        }
        if has_range && has_window {
            errors.push("Start or end must be used independently of limit or offset".to_owned());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::new(errors))
        }
    }

    pub fn mode(&self) -> SelectorMode {
        if self.start.is_some() || self.end.is_some() {
            SelectorMode::Range {
                start: self.start,
                end: self.end,
            }
        } else if self.limit.is_some() || self.offset.is_some() {
            SelectorMode::Window {
                offset: self.offset.unwrap_or(0),
                limit: self.limit,
            }
        } else {
            SelectorMode::All
        }
    }

    pub fn start(&self) -> Option<u32> {
        self.start
    }

    pub fn end(&self) -> Option<u32> {
        self.end
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> Option<usize> {
        self.offset
    }
}

// Years are stored as u32; anything larger is clamped, which keeps the bound
// semantics for absurd inputs.
fn narrow_year(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

fn parse_field(value: Option<&Value>, name: &str, errors: &mut Vec<String>) -> Option<u64> {
    let parsed = match value? {
        Value::Number(n) => match (n.as_u64(), n.as_i64()) {
            (Some(v), _) => Ok(v),
            (None, Some(_)) => Err(format!("Input for '{name}' must be positive or 0")),
            _ => Err(format!("Input for '{name}' must be an int")),
        },
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(v) if v < 0 => Err(format!("Input for '{name}' must be positive or 0")),
            Ok(v) => Ok(v as u64),
            Err(_) => Err(format!("Input for '{name}' must be an int")),
        },
        _ => Err(format!("Input for '{name}' must be an int")),
    };
    match parsed {
        Ok(v) => Some(v),
        Err(message) => {
            errors.push(message);
            None
        }
    }
}

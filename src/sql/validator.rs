//! Lexical checks on generated SQL: SELECT presence and quote balance.
//!
//! Single and double quotes are tracked independently. A quote directly
//! after a backslash does not toggle its state. A statement that ends with
//! an open quote is repaired by appending the missing closing quote(s).

/// Outcome of [`validate_sql`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlCheck {
    Valid,
    /// Invalid, but `repaired` closes every open quote.
    Repairable { repaired: String, error: String },
    Invalid { error: String },
}

impl SqlCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// The statement to execute: the original when valid, the repaired one when offered.
    pub fn executable<'a>(&'a self, original: &'a str) -> Option<&'a str> {
        match self {
            Self::Valid => Some(original),
            Self::Repairable { repaired, .. } => Some(repaired),
            Self::Invalid { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Repairable { error, .. } | Self::Invalid { error } => Some(error),
        }
    }
}

/// Open quote state at the end of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuoteState {
    pub in_single: bool,
    pub in_double: bool,
}

impl QuoteState {
    pub fn is_balanced(&self) -> bool {
        !self.in_single && !self.in_double
    }
}

/// Scan `sql` and report which quote kinds are left open.
pub fn scan_quotes(sql: &str) -> QuoteState {
    let mut state = QuoteState::default();
    let mut previous = None;
    for ch in sql.chars() {
        if previous != Some('\\') {
            match ch {
                '\'' => state.in_single = !state.in_single,
                '"' => state.in_double = !state.in_double,
                _ => {}
            }
        }
        previous = Some(ch);
    }
    state
}

/// Validate one candidate statement.
pub fn validate_sql(sql: &str) -> SqlCheck {
    if sql.trim().is_empty() {
        return SqlCheck::Invalid {
            error: "Empty or invalid SQL query".to_string(),
        };
    }
    if !sql.to_uppercase().contains("SELECT") {
        return SqlCheck::Invalid {
            error: "Query must include a SELECT statement".to_string(),
        };
    }

    let state = scan_quotes(sql);
    if state.is_balanced() {
        return SqlCheck::Valid;
    }

    let mut repaired = sql.to_string();
    let mut error = String::from("Unbalanced quotes in SQL query");
    if state.in_single {
        repaired.push('\'');
    }
    if state.in_double {
        repaired.push('"');
        error.push_str(": missing closing double quote (\")");
    }
    if state.in_single {
        error.push_str(": missing closing single quote (')");
    }
    SqlCheck::Repairable { repaired, error }
}

//! Parsing of loosely formatted decimal quotes.
//!
//! Upstreams disagree on separators: the central bank writes `273,58610000`, some P2P
//! desks write `438.150` meaning a three-decimal fraction. No single rule reads both
//! correctly, so each adapter picks the [`NumberFormat`] that matches its upstream.

/// Separator convention used by an upstream when rendering a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    /// `.` followed by exactly three digits is a thousands separator, `,` is the decimal mark.
    Loose,
    /// `.` is always the decimal mark, `,` is dropped. For fixed 3-decimal quotes.
    Fixed3,
    /// Already machine formatted (`575.50`).
    Plain,
}

impl NumberFormat {
    /// Parses `input`, returning `f64::NAN` when it is not a finite number.
    pub fn parse(self, input: &str) -> f64 {
        match self {
            NumberFormat::Loose => parse_loose(input),
            NumberFormat::Fixed3 => parse_fixed3(input),
            NumberFormat::Plain => finite_or_nan(input.trim()),
        }
    }
}

/// General rule: strip whitespace, drop `.` thousands separators, turn the first `,` into `.`.
pub fn parse_loose(input: &str) -> f64 {
    let compact: Vec<char> = input.chars().filter(|c| !c.is_whitespace()).collect();

    let mut normalized = String::with_capacity(compact.len());
    for (i, &c) in compact.iter().enumerate() {
        if c == '.' && is_thousands_group(&compact[i + 1..]) {
            continue;
        }
        normalized.push(c);
    }

    finite_or_nan(&normalized.replacen(',', ".", 1))
}

/// Fixed 3-decimal rule: drop every `,`, never touch `.`.
pub fn parse_fixed3(input: &str) -> f64 {
    finite_or_nan(&input.trim().replace(',', ""))
}

/// Exactly three digits followed by a non-digit or the end of input.
fn is_thousands_group(rest: &[char]) -> bool {
    rest.len() >= 3
        && rest[..3].iter().all(char::is_ascii_digit)
        && rest.get(3).is_none_or(|c| !c.is_ascii_digit())
}

fn finite_or_nan(s: &str) -> f64 {
    // Rust accepts "inf"/"NaN" spellings; quotes never use them.
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b)) {
        return f64::NAN;
    }
    match s.parse::<f64>() {
        Ok(n) if n.is_finite() => n,
        _ => f64::NAN,
    }
}

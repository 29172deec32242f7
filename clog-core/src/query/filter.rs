//! Query language: free text mixed with `field:value` filters.
//!
//! ```text
//! deploy production              free text only
//! model:opus branch:main         two filters
//! deploy tokens:>10000           free text plus a numeric filter
//! age:<1h                        modified within the last hour
//! "fix the bug" | regression     phrase OR term
//! ```

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Value;

/// Filterable fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterField {
    Model,
    Branch,
    Project,
    Type,
    Tool,
    Tokens,
    Age,
}

impl FilterField {
    /// Recognize a field name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "model" => Some(FilterField::Model),
            "branch" => Some(FilterField::Branch),
            "project" => Some(FilterField::Project),
            "type" => Some(FilterField::Type),
            "tool" => Some(FilterField::Tool),
            "tokens" => Some(FilterField::Tokens),
            "age" => Some(FilterField::Age),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Equals,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub field: FilterField,
    pub op: FilterOp,
    pub value: String,
}

/// A parsed query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet {
    /// Free-text tokens rejoined with single spaces. May still compile to
    /// an empty MATCH expression (e.g. `|` alone).
    pub free_text: String,
    pub filters: Vec<Filter>,
}

/// SQL fragment for a [`FilterSet`]: conditions to AND together, with
/// positional parameters in order.
#[derive(Debug, Clone, Default)]
pub struct SqlFilter {
    pub conditions: Vec<String>,
    pub params: Vec<Value>,
}

impl SqlFilter {
    pub fn push(&mut self, condition: impl Into<String>, param: Value) {
        self.conditions.push(condition.into());
        self.params.push(param);
    }

    /// Conditions joined with AND, or `1=1` when there are none
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            "1=1".to_string()
        } else {
            self.conditions.join(" AND ")
        }
    }
}

impl FilterSet {
    /// True when the free text compiles to a non-empty MATCH expression
    pub fn has_fts(&self) -> bool {
        !fts_query(&self.free_text).is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_fts() && self.filters.is_empty()
    }

    pub fn has_filter(&self, field: FilterField) -> bool {
        self.filters.iter().any(|f| f.field == field)
    }

    /// Translate to SQL against `messages m` joined with `sessions s` (and
    /// `messages_fts` when [`Self::has_fts`]).
    pub fn to_sql(&self) -> SqlFilter {
        self.to_sql_at(Utc::now())
    }

    /// Like [`Self::to_sql`] with an explicit clock for `age` filters.
    pub fn to_sql_at(&self, now: DateTime<Utc>) -> SqlFilter {
        let mut sql = SqlFilter::default();

        let expr = fts_query(&self.free_text);
        if !expr.is_empty() {
            sql.push("messages_fts MATCH ?", Value::Text(expr));
        }

        for filter in &self.filters {
            if let Some((condition, param)) = filter_to_sql(filter, now) {
                sql.push(condition, param);
            }
        }

        sql
    }
}

/// Split a query on whitespace, keeping quoted spans (quotes included)
/// together as one token.
pub fn tokenize(query: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in query.chars() {
        if c == '"' {
            in_quote = !in_quote;
            current.push(c);
        } else if c.is_whitespace() && !in_quote {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Parse a query into free text and recognized filters.
///
/// Tokens naming an unknown field stay in the free text.
pub fn parse_query(query: &str) -> FilterSet {
    let mut set = FilterSet::default();
    let mut free = Vec::new();

    for token in tokenize(query) {
        match parse_filter(&token) {
            Some(filter) => set.filters.push(filter),
            None => free.push(token),
        }
    }

    set.free_text = free.join(" ");
    set
}

/// `field:value`, `field:>value` or `field:<value` with a known field and a
/// non-empty remainder.
fn parse_filter(token: &str) -> Option<Filter> {
    let idx = token.find(':')?;
    if idx == 0 || idx == token.len() - 1 {
        return None;
    }
    let field = FilterField::parse(&token[..idx])?;
    let value = &token[idx + 1..];

    let (op, value) = if let Some(rest) = value.strip_prefix('>') {
        (FilterOp::GreaterThan, rest)
    } else if let Some(rest) = value.strip_prefix('<') {
        (FilterOp::LessThan, rest)
    } else {
        (FilterOp::Equals, value)
    };

    Some(Filter {
        field,
        op,
        value: value.to_string(),
    })
}

fn filter_to_sql(filter: &Filter, now: DateTime<Utc>) -> Option<(String, Value)> {
    let value = filter.value.clone();

    match filter.field {
        // Case-sensitive containment
        FilterField::Model => Some(("instr(s.model, ?) > 0".into(), Value::Text(value))),
        FilterField::Branch if value.contains('*') => Some((
            "s.git_branch LIKE ?".into(),
            Value::Text(value.replace('*', "%")),
        )),
        FilterField::Branch => Some(("s.git_branch = ?".into(), Value::Text(value))),
        FilterField::Project => Some((
            "s.project LIKE ?".into(),
            Value::Text(format!("%{}%", value)),
        )),
        FilterField::Type => Some(("m.type = ?".into(), Value::Text(value))),
        FilterField::Tool => Some((
            "m.tool_calls LIKE ?".into(),
            Value::Text(format!("%{}%", value)),
        )),
        FilterField::Tokens => {
            let n: i64 = value.parse().ok()?;
            let cmp = match filter.op {
                FilterOp::GreaterThan => ">",
                FilterOp::LessThan => "<",
                FilterOp::Equals => "=",
            };
            Some((
                format!("(m.input_tokens + m.output_tokens) {} ?", cmp),
                Value::Integer(n),
            ))
        }
        FilterField::Age => {
            let cutoff = now.checked_sub_signed(parse_age(&value)?)?;
            let cutoff = cutoff.to_rfc3339_opts(SecondsFormat::Secs, true);
            // `age:<1h` is "younger than an hour": modified after the cutoff.
            let cmp = match filter.op {
                FilterOp::GreaterThan => "<",
                FilterOp::LessThan | FilterOp::Equals => ">",
            };
            Some((format!("s.modified_at {} ?", cmp), Value::Text(cutoff)))
        }
    }
}

/// Parse `<N><unit>` with unit one of `m`, `h`, `d`, `w`.
pub fn parse_age(s: &str) -> Option<Duration> {
    let unit = s.chars().last()?;
    let num: i64 = s[..s.len() - unit.len_utf8()].parse().ok()?;
    if num < 0 {
        return None;
    }
    match unit {
        'm' => Duration::try_minutes(num),
        'h' => Duration::try_hours(num),
        'd' => Duration::try_days(num),
        'w' => Duration::try_weeks(num),
        _ => None,
    }
}

/// Convert free text to an FTS5 MATCH expression.
///
/// `|` separates alternatives, which are joined with `OR`. Quoted phrases
/// pass through. Bare terms that FTS5 would read as syntax (`foo:bar`,
/// `a-b`, misplaced operators) are quoted so they match literally. Terms
/// with nothing searchable in them are dropped, so the result may be empty.
pub fn fts_query(input: &str) -> String {
    let groups: Vec<Vec<String>> = split_alternatives(input)
        .iter()
        .map(|part| fts_group(&tokenize(part)))
        .filter(|group| !group.is_empty())
        .collect();

    if groups.len() <= 1 {
        return groups
            .into_iter()
            .next()
            .map(|g| g.join(" "))
            .unwrap_or_default();
    }

    groups
        .into_iter()
        .map(|g| {
            if g.len() > 1 {
                format!("({})", g.join(" "))
            } else {
                g.join(" ")
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Split on `|` outside of quotes.
fn split_alternatives(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '|' if !in_quote => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// Render the terms of one alternative.
///
/// An operator survives only directly after a term and directly before a
/// non-operator; everywhere else it is searched for as a word.
fn fts_group(tokens: &[String]) -> Vec<String> {
    let terms: Vec<&str> = tokens
        .iter()
        .map(String::as_str)
        .filter(|t| t.chars().any(char::is_alphanumeric))
        .collect();

    let mut rendered = Vec::with_capacity(terms.len());
    let mut after_term = false;
    for (i, term) in terms.iter().enumerate() {
        if is_operator(term) {
            let before_term = terms.get(i + 1).is_some_and(|next| !is_operator(next));
            if after_term && before_term {
                rendered.push(term.to_string());
                after_term = false;
                continue;
            }
            rendered.push(quote(term));
        } else {
            rendered.push(fts_term(term));
        }
        after_term = true;
    }
    rendered
}

fn is_operator(term: &str) -> bool {
    matches!(term, "AND" | "OR" | "NOT")
}

/// Render one non-operator term.
fn fts_term(term: &str) -> String {
    let inner = term
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .filter(|_| term.len() >= 2);
    if let Some(phrase) = inner {
        return quote(phrase);
    }

    let body = term.strip_suffix('*').unwrap_or(term);
    let bare = !body.is_empty()
        && body
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || !c.is_ascii());
    if bare {
        term.to_string()
    } else {
        quote(term)
    }
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

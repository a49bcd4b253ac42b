use blade_spec::upper_first;

/// Filters for listing experiments. Empty strings mean "no filter".
#[derive(Debug, Clone, Default)]
pub struct ExperimentQuery {
    pub target: String,
    pub action: String,
    /// Substring matched against the stored flag string.
    pub flag: String,
    pub status: String,
    /// `"N"` or `"OFFSET,N"`.
    pub limit: String,
    pub asc: bool,
}

/// Filters for listing preparations. Empty strings mean "no filter".
#[derive(Debug, Clone, Default)]
pub struct PreparationQuery {
    pub program_type: String,
    pub status: String,
    pub limit: String,
    pub asc: bool,
}

/// Window parsed from a `limit` parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pagination {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

impl Pagination {
    /// Parts that are not non-negative integers within SQLite's 64-bit range
    /// are dropped silently.
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(',').collect();
        let num = |s: &str| s.trim().parse::<i64>().ok().filter(|n| *n >= 0);
        match parts.as_slice() {
            [limit] => Pagination {
                offset: None,
                limit: num(limit),
            },
            [offset, limit, ..] => Pagination {
                offset: num(offset),
                limit: num(limit),
            },
            [] => Pagination::default(),
        }
    }

    pub(crate) fn sql(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!(" LIMIT {l} OFFSET {o}"),
            (Some(l), None) => format!(" LIMIT {l}"),
            (None, Some(o)) => format!(" LIMIT -1 OFFSET {o}"),
            (None, None) => String::new(),
        }
    }
}

/// Accumulates `AND`-ed equality clauses with positional parameters.
#[derive(Default)]
pub(crate) struct Where {
    clauses: Vec<String>,
    pub(crate) params: Vec<String>,
}

impl Where {
    pub(crate) fn eq(&mut self, column: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        self.params.push(value.to_string());
        self.clauses.push(format!("{column} = ?{}", self.params.len()));
    }

    pub(crate) fn status(&mut self, value: &str) {
        self.eq("status", &upper_first(value));
    }

    pub(crate) fn like(&mut self, column: &str, needle: &str) {
        if needle.is_empty() {
            return;
        }
        self.params.push(format!("%{needle}%"));
        self.clauses.push(format!("{column} LIKE ?{}", self.params.len()));
    }

    pub(crate) fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

pub(crate) fn order(asc: bool) -> &'static str {
    if asc {
        " ORDER BY id ASC"
    } else {
        " ORDER BY id DESC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_forms() {
        assert_eq!(
            Pagination::parse("5"),
            Pagination {
                offset: None,
                limit: Some(5)
            }
        );
        assert_eq!(
            Pagination::parse("10,5"),
            Pagination {
                offset: Some(10),
                limit: Some(5)
            }
        );
        assert_eq!(Pagination::parse("").sql(), "");
        assert_eq!(Pagination::parse("x").sql(), "");
        assert_eq!(Pagination::parse("x,3").sql(), " LIMIT 3");
        assert_eq!(Pagination::parse("2,y").sql(), " LIMIT -1 OFFSET 2");
        assert_eq!(Pagination::parse(" 2 , 3 ").sql(), " LIMIT 3 OFFSET 2");
        assert_eq!(Pagination::parse("18446744073709551615").sql(), "");
        assert_eq!(Pagination::parse("-4").sql(), "");
        assert_eq!(
            Pagination::parse("18446744073709551615,3").sql(),
            " LIMIT 3"
        );
    }

    #[test]
    fn where_skips_empty_filters_and_numbers_params() {
        let mut w = Where::default();
        w.eq("command", "os");
        w.eq("sub_command", "");
        w.status("running");
        w.like("flag", "cpu");
        assert_eq!(
            w.sql(),
            " WHERE command = ?1 AND status = ?2 AND flag LIKE ?3"
        );
        assert_eq!(w.params, vec!["os", "Running", "%cpu%"]);
    }
}

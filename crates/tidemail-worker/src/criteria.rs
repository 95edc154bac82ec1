//! Sort and search criteria carried by directory actions

use crate::models::{Address, Flags, MessageInfo};
use crate::{WorkerError, WorkerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field a listing can be sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortField {
    Arrival,
    Cc,
    Date,
    From,
    Read,
    Size,
    Subject,
    To,
}

impl SortField {
    /// All supported field names, for completion
    pub const NAMES: [&'static str; 8] =
        ["arrival", "cc", "date", "from", "read", "size", "subject", "to"];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "arrival" => Some(SortField::Arrival),
            "cc" => Some(SortField::Cc),
            "date" => Some(SortField::Date),
            "from" => Some(SortField::From),
            "read" => Some(SortField::Read),
            "size" => Some(SortField::Size),
            "subject" => Some(SortField::Subject),
            "to" => Some(SortField::To),
            _ => None,
        }
    }
}

/// One sort key with its direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortCriterion {
    pub field: SortField,
    pub reverse: bool,
}

impl SortCriterion {
    pub fn new(field: SortField) -> Self {
        Self {
            field,
            reverse: false,
        }
    }

    pub fn reversed(field: SortField) -> Self {
        Self {
            field,
            reverse: true,
        }
    }

    /// Parse command arguments such as `["-r", "date", "from"]`.
    ///
    /// `-r` reverses the criterion that follows it.
    pub fn parse_args<S: AsRef<str>>(args: &[S]) -> WorkerResult<Vec<SortCriterion>> {
        let mut criteria = Vec::with_capacity(args.len());
        let mut reverse = false;
        for arg in args {
            let arg = arg.as_ref();
            if arg == "-r" {
                reverse = true;
                continue;
            }
            let field = SortField::from_name(arg)
                .ok_or_else(|| WorkerError::InvalidAction(format!("unknown sort criterion: {}", arg)))?;
            criteria.push(SortCriterion { field, reverse });
            reverse = false;
        }
        if reverse {
            return Err(WorkerError::InvalidAction(
                "-r must be followed by a sort criterion".to_string(),
            ));
        }
        Ok(criteria)
    }

    /// Parse a single string such as `"-r date from"`
    pub fn parse_str(s: &str) -> WorkerResult<Vec<SortCriterion>> {
        let args: Vec<&str> = s.split_whitespace().collect();
        Self::parse_args(&args)
    }
}

/// Search or filter terms for a directory
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Flags every match must carry
    pub with_flags: Flags,
    /// Flags no match may carry
    pub without_flags: Flags,
    /// Substrings of a From address
    pub from: Vec<String>,
    /// Substrings of a To address
    pub to: Vec<String>,
    /// Substrings of a Cc address
    pub cc: Vec<String>,
    /// Free-text terms matched against the subject
    pub terms: Vec<String>,
    /// Match terms against the body as well (backend-side only)
    pub search_body: bool,
    /// Match terms against the whole message (backend-side only)
    pub search_all: bool,
    /// Earliest message date
    pub start_date: Option<DateTime<Utc>>,
    /// Latest message date
    pub end_date: Option<DateTime<Utc>>,
}

impl SearchCriteria {
    /// Free-text search on subjects
    pub fn terms<S: Into<String>>(terms: impl IntoIterator<Item = S>) -> Self {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Combine two criteria so that a match must satisfy both
    pub fn combine(self, other: SearchCriteria) -> SearchCriteria {
        SearchCriteria {
            with_flags: self.with_flags | other.with_flags,
            without_flags: self.without_flags | other.without_flags,
            from: [self.from, other.from].concat(),
            to: [self.to, other.to].concat(),
            cc: [self.cc, other.cc].concat(),
            terms: [self.terms, other.terms].concat(),
            search_body: self.search_body || other.search_body,
            search_all: self.search_all || other.search_all,
            start_date: later(self.start_date, other.start_date),
            end_date: earlier(self.end_date, other.end_date),
        }
    }

    /// Evaluate the criteria against cached metadata.
    ///
    /// Body and whole-message searches need the content and only match on
    /// the subject here.
    pub fn matches(&self, info: &MessageInfo) -> bool {
        if !info.flags.contains(self.with_flags) || info.flags.intersects(self.without_flags) {
            return false;
        }

        let Some(envelope) = info.envelope.as_ref() else {
            // Nothing to match header terms against
            return self.from.is_empty()
                && self.to.is_empty()
                && self.cc.is_empty()
                && self.terms.is_empty()
                && self.start_date.is_none()
                && self.end_date.is_none();
        };

        if !self.from.iter().all(|needle| any_address(&envelope.from, needle))
            || !self.to.iter().all(|needle| any_address(&envelope.to, needle))
            || !self.cc.iter().all(|needle| any_address(&envelope.cc, needle))
        {
            return false;
        }

        let subject = envelope.subject.to_lowercase();
        if !self
            .terms
            .iter()
            .all(|term| subject.contains(&term.to_lowercase()))
        {
            return false;
        }

        let date = envelope.date.or(info.internal_date);
        match (date, self.start_date, self.end_date) {
            (Some(d), Some(start), _) if d < start => false,
            (Some(d), _, Some(end)) if d > end => false,
            (None, Some(_), _) | (None, _, Some(_)) => false,
            _ => true,
        }
    }
}

fn any_address(addresses: &[Address], needle: &str) -> bool {
    let needle = needle.to_lowercase();
    addresses.iter().any(|a| {
        a.address.to_lowercase().contains(&needle)
            || a.name
                .as_deref()
                .map(|n| n.to_lowercase().contains(&needle))
                .unwrap_or(false)
    })
}

fn later(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

fn earlier(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Envelope;
    use chrono::TimeZone;

    #[test]
    fn test_parse_sort_args() {
        let criteria = SortCriterion::parse_str("-r date from").unwrap();
        assert_eq!(
            criteria,
            vec![
                SortCriterion::reversed(SortField::Date),
                SortCriterion::new(SortField::From),
            ]
        );

        assert!(SortCriterion::parse_str("date bogus").is_err());
        assert!(SortCriterion::parse_str("date -r").is_err());
        assert!(SortCriterion::parse_str("").unwrap().is_empty());
    }

    #[test]
    fn test_combine_is_conjunction() {
        let first = SearchCriteria {
            with_flags: Flags::FLAGGED,
            terms: vec!["invoice".into()],
            start_date: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let second = SearchCriteria {
            without_flags: Flags::SEEN,
            from: vec!["billing".into()],
            start_date: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        let combined = first.combine(second);

        assert_eq!(combined.with_flags, Flags::FLAGGED);
        assert_eq!(combined.without_flags, Flags::SEEN);
        assert_eq!(combined.terms, vec!["invoice".to_string()]);
        assert_eq!(combined.from, vec!["billing".to_string()]);
        assert_eq!(
            combined.start_date,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_matches() {
        let info = MessageInfo {
            uid: 1,
            flags: Flags::FLAGGED,
            envelope: Some(Envelope {
                subject: "Your Invoice for May".into(),
                from: vec![Address::new(Some("Billing".into()), "billing@shop.example".into())],
                date: Some(Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap()),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert!(SearchCriteria::terms(["invoice"]).matches(&info));
        assert!(!SearchCriteria::terms(["receipt"]).matches(&info));

        let unread_flagged = SearchCriteria {
            with_flags: Flags::FLAGGED,
            without_flags: Flags::SEEN,
            from: vec!["shop.example".into()],
            ..Default::default()
        };
        assert!(unread_flagged.matches(&info));

        let too_late = SearchCriteria {
            start_date: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        };
        assert!(!too_late.matches(&info));

        // Unfetched messages only match criteria without header terms
        assert!(SearchCriteria::default().matches(&MessageInfo::new(9)));
        assert!(!SearchCriteria::terms(["x"]).matches(&MessageInfo::new(9)));
    }
}

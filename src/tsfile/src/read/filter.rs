//! Predicates pushed into the scan: a time filter evaluated against
//! timestamps and statistics ranges, and a single-column value filter
//! evaluated against materialized rows.

use tsfile_common::value::Value;

/// Time predicate.  `satisfy_range` answers "may any timestamp in
/// `[start, end]` satisfy this filter" and backs the chunk/page pruning.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeFilter {
    Eq(i64),
    Gt(i64),
    GtEq(i64),
    Lt(i64),
    LtEq(i64),
    /// Closed interval.
    Between(i64, i64),
}

impl TimeFilter {
    pub fn satisfy(&self, time: i64) -> bool {
        match self {
            TimeFilter::Eq(v) => time == *v,
            TimeFilter::Gt(v) => time > *v,
            TimeFilter::GtEq(v) => time >= *v,
            TimeFilter::Lt(v) => time < *v,
            TimeFilter::LtEq(v) => time <= *v,
            TimeFilter::Between(lo, hi) => time >= *lo && time <= *hi,
        }
    }

    pub fn satisfy_range(&self, start: i64, end: i64) -> bool {
        match self {
            TimeFilter::Eq(v) => *v >= start && *v <= end,
            TimeFilter::Gt(v) => end > *v,
            TimeFilter::GtEq(v) => end >= *v,
            TimeFilter::Lt(v) => start < *v,
            TimeFilter::LtEq(v) => start <= *v,
            TimeFilter::Between(lo, hi) => *lo <= end && start <= *hi,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

/// Row filter over one FIELD column of the result.  Rows whose column value
/// is null, or of a different runtime kind, do not satisfy the filter.
#[derive(Debug, Clone)]
pub struct ValueFilter {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

impl ValueFilter {
    pub fn new(column: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn satisfy(&self, value: &Value) -> bool {
        use std::cmp::Ordering;
        let Some(ord) = value.partial_cmp_same_type(&self.value) else {
            return false;
        };
        match self.op {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::NotEq => ord != Ordering::Equal,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::GtEq => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::LtEq => ord != Ordering::Greater,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_filter_points() {
        assert!(TimeFilter::Gt(5).satisfy(6));
        assert!(!TimeFilter::Gt(5).satisfy(5));
        assert!(TimeFilter::Between(2, 4).satisfy(2));
        assert!(TimeFilter::Between(2, 4).satisfy(4));
        assert!(!TimeFilter::Between(2, 4).satisfy(5));
    }

    #[test]
    fn test_time_filter_ranges() {
        assert!(TimeFilter::Between(10, 20).satisfy_range(15, 30));
        assert!(!TimeFilter::Between(10, 20).satisfy_range(21, 30));
        assert!(TimeFilter::Lt(5).satisfy_range(0, 100));
        assert!(!TimeFilter::Lt(5).satisfy_range(5, 100));
        assert!(TimeFilter::Eq(7).satisfy_range(7, 7));
        assert!(!TimeFilter::Eq(7).satisfy_range(8, 9));
    }

    #[test]
    fn test_value_filter() {
        let f = ValueFilter::new("s1", CompareOp::GtEq, Value::Int32(10));
        assert!(f.satisfy(&Value::Int32(10)));
        assert!(f.satisfy(&Value::Int32(11)));
        assert!(!f.satisfy(&Value::Int32(9)));
        // nulls and foreign kinds never match
        assert!(!f.satisfy(&Value::Null));
        assert!(!f.satisfy(&Value::Int64(100)));
    }
}

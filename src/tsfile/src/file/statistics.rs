//! Rolling per-series statistics: time range, count and a typed value
//! summary.  The wire layout is `{count uvarint, startTime i64 LE,
//! endTime i64 LE, typed payload}` and must stay bit-stable.

use tsfile_common::datatype::TSDataType;
use tsfile_common::value::Value;

use crate::error::{Result, TsFileError};
use crate::file::marshal::{
    write_f64_le, write_i64_le, write_u8, write_var_bytes, write_var_u64, ByteReader,
};

/// Typed value summary.  DATE shares the INT32 summary and TIMESTAMP the
/// INT64 one; TEXT, STRING and BLOB share the binary summary; the time-only
/// summary backs VECTOR (aligned time) columns.
#[derive(Debug, Clone, PartialEq)]
pub enum Summary {
    Boolean {
        first: bool,
        last: bool,
        sum_true: i64,
    },
    Int32 {
        min: i32,
        max: i32,
        first: i32,
        last: i32,
        sum: i64,
    },
    Int64 {
        min: i64,
        max: i64,
        first: i64,
        last: i64,
        sum: f64,
    },
    Float {
        min: f32,
        max: f32,
        first: f32,
        last: f32,
        sum: f64,
    },
    Double {
        min: f64,
        max: f64,
        first: f64,
        last: f64,
        sum: f64,
    },
    Binary {
        first: Vec<u8>,
        last: Vec<u8>,
    },
    Time,
}

impl Summary {
    fn empty(data_type: TSDataType) -> Self {
        match data_type {
            TSDataType::Boolean => Summary::Boolean {
                first: false,
                last: false,
                sum_true: 0,
            },
            TSDataType::Int32 | TSDataType::Date => Summary::Int32 {
                min: i32::MAX,
                max: i32::MIN,
                first: 0,
                last: 0,
                sum: 0,
            },
            TSDataType::Int64 | TSDataType::Timestamp => Summary::Int64 {
                min: i64::MAX,
                max: i64::MIN,
                first: 0,
                last: 0,
                sum: 0.0,
            },
            TSDataType::Float => Summary::Float {
                min: f32::INFINITY,
                max: f32::NEG_INFINITY,
                first: 0.0,
                last: 0.0,
                sum: 0.0,
            },
            TSDataType::Double => Summary::Double {
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                first: 0.0,
                last: 0.0,
                sum: 0.0,
            },
            TSDataType::Text | TSDataType::String | TSDataType::Blob => Summary::Binary {
                first: Vec::new(),
                last: Vec::new(),
            },
            TSDataType::Vector => Summary::Time,
        }
    }

    fn same_kind(&self, other: &Summary) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Statistics over one page, chunk or whole series.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics {
    count: u64,
    start_time: i64,
    end_time: i64,
    summary: Summary,
}

impl Statistics {
    pub fn new(data_type: TSDataType) -> Self {
        Self {
            count: 0,
            start_time: i64::MAX,
            end_time: i64::MIN,
            summary: Summary::empty(data_type),
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn end_time(&self) -> i64 {
        self.end_time
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True iff statistics of `from` can be merged into statistics of `to`.
    /// TEXT chunks never carry STRING statistics, so that pair is forbidden.
    pub fn can_merge(from: TSDataType, to: TSDataType) -> bool {
        if from == TSDataType::Text && to == TSDataType::String {
            return false;
        }
        std::mem::discriminant(&Summary::empty(from)) == std::mem::discriminant(&Summary::empty(to))
    }

    fn update_range(&mut self, time: i64) {
        if time < self.start_time {
            self.start_time = time;
        }
        if time > self.end_time {
            self.end_time = time;
        }
    }

    /// Records a timestamp with no value; only valid for the time-only
    /// summary.
    pub fn update_time(&mut self, time: i64) -> Result<()> {
        match self.summary {
            Summary::Time => {
                self.update_range(time);
                self.count += 1;
                Ok(())
            }
            _ => Err(TsFileError::InvalidArg(
                "update_time on a typed statistics".to_string(),
            )),
        }
    }

    /// Extends the range and value summary with one point.  The value's
    /// runtime kind must match the summary kind.  first/last always belong
    /// to the boundary timestamps, even under out-of-order input.
    pub fn update(&mut self, time: i64, value: &Value) -> Result<()> {
        let is_first = self.count == 0 || time < self.start_time;
        let is_last = self.count == 0 || time >= self.end_time;
        match (&mut self.summary, value) {
            (
                Summary::Boolean {
                    first,
                    last,
                    sum_true,
                },
                Value::Boolean(v),
            ) => {
                if is_first {
                    *first = *v;
                }
                if is_last {
                    *last = *v;
                }
                if *v {
                    *sum_true += 1;
                }
            }
            (
                Summary::Int32 {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Value::Int32(v),
            ) => {
                if is_first {
                    *first = *v;
                }
                if is_last {
                    *last = *v;
                }
                if *v < *min {
                    *min = *v;
                }
                if *v > *max {
                    *max = *v;
                }
                *sum += *v as i64;
            }
            (
                Summary::Int64 {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Value::Int64(v),
            ) => {
                if is_first {
                    *first = *v;
                }
                if is_last {
                    *last = *v;
                }
                if *v < *min {
                    *min = *v;
                }
                if *v > *max {
                    *max = *v;
                }
                *sum += *v as f64;
            }
            (
                Summary::Float {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Value::Float(v),
            ) => {
                if is_first {
                    *first = *v;
                }
                if is_last {
                    *last = *v;
                }
                if *v < *min {
                    *min = *v;
                }
                if *v > *max {
                    *max = *v;
                }
                *sum += *v as f64;
            }
            (
                Summary::Double {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Value::Double(v),
            ) => {
                if is_first {
                    *first = *v;
                }
                if is_last {
                    *last = *v;
                }
                if *v < *min {
                    *min = *v;
                }
                if *v > *max {
                    *max = *v;
                }
                *sum += *v;
            }
            (Summary::Binary { first, last }, Value::Binary(v)) => {
                if is_first {
                    *first = v.clone();
                }
                if is_last {
                    *last = v.clone();
                }
            }
            (Summary::Time, _) => {
                return Err(TsFileError::InvalidArg(
                    "typed update on time-only statistics".to_string(),
                ))
            }
            _ => {
                return Err(TsFileError::InvalidDataPoint(format!(
                    "value {:?} does not match statistics kind",
                    value
                )))
            }
        }
        self.update_range(time);
        self.count += 1;
        Ok(())
    }

    /// Merges `other` into `self`.  The two must share the summary kind and
    /// have disjoint or adjacent time ranges; an overlap is refused.
    pub fn merge(&mut self, other: &Statistics) -> Result<()> {
        if other.count == 0 {
            return Ok(());
        }
        if !self.summary.same_kind(&other.summary) {
            return Err(TsFileError::StatisticsClassMismatch(format!(
                "cannot merge {:?} into {:?}",
                other.summary, self.summary
            )));
        }
        if self.count > 0 && other.start_time <= self.end_time && self.start_time <= other.end_time
        {
            return Err(TsFileError::InvalidArg(format!(
                "overlapping statistics ranges: [{}, {}] and [{}, {}]",
                self.start_time, self.end_time, other.start_time, other.end_time
            )));
        }

        let self_first = self.count == 0 || other.start_time < self.start_time;
        let self_last = self.count == 0 || other.end_time > self.end_time;
        match (&mut self.summary, &other.summary) {
            (
                Summary::Boolean {
                    first,
                    last,
                    sum_true,
                },
                Summary::Boolean {
                    first: of,
                    last: ol,
                    sum_true: os,
                },
            ) => {
                if self_first {
                    *first = *of;
                }
                if self_last {
                    *last = *ol;
                }
                *sum_true += os;
            }
            (
                Summary::Int32 {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Summary::Int32 {
                    min: omin,
                    max: omax,
                    first: of,
                    last: ol,
                    sum: os,
                },
            ) => {
                if *omin < *min {
                    *min = *omin;
                }
                if *omax > *max {
                    *max = *omax;
                }
                if self_first {
                    *first = *of;
                }
                if self_last {
                    *last = *ol;
                }
                *sum += os;
            }
            (
                Summary::Int64 {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Summary::Int64 {
                    min: omin,
                    max: omax,
                    first: of,
                    last: ol,
                    sum: os,
                },
            ) => {
                if *omin < *min {
                    *min = *omin;
                }
                if *omax > *max {
                    *max = *omax;
                }
                if self_first {
                    *first = *of;
                }
                if self_last {
                    *last = *ol;
                }
                *sum += os;
            }
            (
                Summary::Float {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Summary::Float {
                    min: omin,
                    max: omax,
                    first: of,
                    last: ol,
                    sum: os,
                },
            ) => {
                if *omin < *min {
                    *min = *omin;
                }
                if *omax > *max {
                    *max = *omax;
                }
                if self_first {
                    *first = *of;
                }
                if self_last {
                    *last = *ol;
                }
                *sum += os;
            }
            (
                Summary::Double {
                    min,
                    max,
                    first,
                    last,
                    sum,
                },
                Summary::Double {
                    min: omin,
                    max: omax,
                    first: of,
                    last: ol,
                    sum: os,
                },
            ) => {
                if *omin < *min {
                    *min = *omin;
                }
                if *omax > *max {
                    *max = *omax;
                }
                if self_first {
                    *first = *of;
                }
                if self_last {
                    *last = *ol;
                }
                *sum += os;
            }
            (Summary::Binary { first, last }, Summary::Binary { first: of, last: ol }) => {
                if self_first {
                    *first = of.clone();
                }
                if self_last {
                    *last = ol.clone();
                }
            }
            (Summary::Time, Summary::Time) => {}
            _ => unreachable!("kind checked above"),
        }

        if self_first {
            self.start_time = other.start_time;
        }
        if self_last {
            self.end_time = other.end_time;
        }
        self.count += other.count;
        Ok(())
    }

    pub fn serialize_to(&self, out: &mut Vec<u8>) {
        write_var_u64(self.count, out);
        write_i64_le(self.start_time, out);
        write_i64_le(self.end_time, out);
        match &self.summary {
            Summary::Boolean {
                first,
                last,
                sum_true,
            } => {
                write_u8(*first as u8, out);
                write_u8(*last as u8, out);
                write_i64_le(*sum_true, out);
            }
            Summary::Int32 {
                min,
                max,
                first,
                last,
                sum,
            } => {
                out.extend_from_slice(&min.to_le_bytes());
                out.extend_from_slice(&max.to_le_bytes());
                out.extend_from_slice(&first.to_le_bytes());
                out.extend_from_slice(&last.to_le_bytes());
                write_i64_le(*sum, out);
            }
            Summary::Int64 {
                min,
                max,
                first,
                last,
                sum,
            } => {
                write_i64_le(*min, out);
                write_i64_le(*max, out);
                write_i64_le(*first, out);
                write_i64_le(*last, out);
                write_f64_le(*sum, out);
            }
            Summary::Float {
                min,
                max,
                first,
                last,
                sum,
            } => {
                out.extend_from_slice(&min.to_le_bytes());
                out.extend_from_slice(&max.to_le_bytes());
                out.extend_from_slice(&first.to_le_bytes());
                out.extend_from_slice(&last.to_le_bytes());
                write_f64_le(*sum, out);
            }
            Summary::Double {
                min,
                max,
                first,
                last,
                sum,
            } => {
                write_f64_le(*min, out);
                write_f64_le(*max, out);
                write_f64_le(*first, out);
                write_f64_le(*last, out);
                write_f64_le(*sum, out);
            }
            Summary::Binary { first, last } => {
                write_var_bytes(first, out);
                write_var_bytes(last, out);
            }
            Summary::Time => {}
        }
    }

    pub fn deserialize_from(reader: &mut ByteReader<'_>, data_type: TSDataType) -> Result<Self> {
        let count = reader.read_var_u64()?;
        let start_time = reader.read_i64_le()?;
        let end_time = reader.read_i64_le()?;
        let summary = match Summary::empty(data_type) {
            Summary::Boolean { .. } => Summary::Boolean {
                first: reader.read_bool()?,
                last: reader.read_bool()?,
                sum_true: reader.read_i64_le()?,
            },
            Summary::Int32 { .. } => Summary::Int32 {
                min: reader.read_i32_le()?,
                max: reader.read_i32_le()?,
                first: reader.read_i32_le()?,
                last: reader.read_i32_le()?,
                sum: reader.read_i64_le()?,
            },
            Summary::Int64 { .. } => Summary::Int64 {
                min: reader.read_i64_le()?,
                max: reader.read_i64_le()?,
                first: reader.read_i64_le()?,
                last: reader.read_i64_le()?,
                sum: reader.read_f64_le()?,
            },
            Summary::Float { .. } => Summary::Float {
                min: reader.read_f32_le()?,
                max: reader.read_f32_le()?,
                first: reader.read_f32_le()?,
                last: reader.read_f32_le()?,
                sum: reader.read_f64_le()?,
            },
            Summary::Double { .. } => Summary::Double {
                min: reader.read_f64_le()?,
                max: reader.read_f64_le()?,
                first: reader.read_f64_le()?,
                last: reader.read_f64_le()?,
                sum: reader.read_f64_le()?,
            },
            Summary::Binary { .. } => Summary::Binary {
                first: reader.read_var_bytes()?,
                last: reader.read_var_bytes()?,
            },
            Summary::Time => Summary::Time,
        };
        Ok(Self {
            count,
            start_time,
            end_time,
            summary,
        })
    }

    /// Serialized size upper bound, used by memory estimation.
    pub fn max_serialized_size(data_type: TSDataType) -> usize {
        // count varint + two i64 time bounds
        let base = 10 + 16;
        let payload = match data_type {
            TSDataType::Boolean => 10,
            TSDataType::Int32 | TSDataType::Date => 24,
            TSDataType::Int64 | TSDataType::Timestamp => 40,
            TSDataType::Float => 24,
            TSDataType::Double => 40,
            // binary first/last are unbounded; this is an estimate only
            TSDataType::Text | TSDataType::String | TSDataType::Blob => 64,
            TSDataType::Vector => 0,
        };
        base + payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int32_update() {
        let mut stats = Statistics::new(TSDataType::Int32);
        for (t, v) in [(1i64, 10i32), (2, 20), (3, 30)] {
            stats.update(t, &Value::Int32(v)).unwrap();
        }
        assert_eq!(stats.count(), 3);
        assert_eq!(stats.start_time(), 1);
        assert_eq!(stats.end_time(), 3);
        match stats.summary() {
            Summary::Int32 {
                min,
                max,
                first,
                last,
                sum,
            } => {
                assert_eq!((*min, *max, *first, *last, *sum), (10, 30, 10, 30, 60));
            }
            other => panic!("unexpected summary {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let mut stats = Statistics::new(TSDataType::Int32);
        let err = stats.update(1, &Value::Int64(1)).unwrap_err();
        assert!(matches!(err, TsFileError::InvalidDataPoint(_)));
    }

    #[test]
    fn test_merge_disjoint() {
        let mut a = Statistics::new(TSDataType::Int64);
        a.update(1, &Value::Int64(5)).unwrap();
        a.update(2, &Value::Int64(1)).unwrap();
        let mut b = Statistics::new(TSDataType::Int64);
        b.update(10, &Value::Int64(9)).unwrap();
        a.merge(&b).unwrap();
        assert_eq!(a.count(), 3);
        assert_eq!(a.start_time(), 1);
        assert_eq!(a.end_time(), 10);
        match a.summary() {
            Summary::Int64 {
                min,
                max,
                first,
                last,
                ..
            } => assert_eq!((*min, *max, *first, *last), (1, 9, 5, 9)),
            other => panic!("unexpected summary {:?}", other),
        }
    }

    #[test]
    fn test_merge_out_of_order_ranges() {
        // merging an earlier range into a later one keeps first/last honest
        let mut late = Statistics::new(TSDataType::Int32);
        late.update(10, &Value::Int32(100)).unwrap();
        let mut early = Statistics::new(TSDataType::Int32);
        early.update(1, &Value::Int32(7)).unwrap();
        late.merge(&early).unwrap();
        match late.summary() {
            Summary::Int32 { first, last, .. } => assert_eq!((*first, *last), (7, 100)),
            other => panic!("unexpected summary {:?}", other),
        }
    }

    #[test]
    fn test_merge_overlap_refused() {
        let mut a = Statistics::new(TSDataType::Int64);
        a.update(1, &Value::Int64(1)).unwrap();
        a.update(5, &Value::Int64(2)).unwrap();
        let mut b = Statistics::new(TSDataType::Int64);
        b.update(3, &Value::Int64(3)).unwrap();
        assert!(matches!(a.merge(&b), Err(TsFileError::InvalidArg(_))));
    }

    #[test]
    fn test_merge_kind_mismatch() {
        let mut a = Statistics::new(TSDataType::Int64);
        a.update(1, &Value::Int64(1)).unwrap();
        let mut b = Statistics::new(TSDataType::Double);
        b.update(5, &Value::Double(1.0)).unwrap();
        assert!(matches!(
            a.merge(&b),
            Err(TsFileError::StatisticsClassMismatch(_))
        ));
    }

    #[test]
    fn test_can_merge_text_to_string_forbidden() {
        assert!(!Statistics::can_merge(TSDataType::Text, TSDataType::String));
        assert!(Statistics::can_merge(TSDataType::Text, TSDataType::Text));
        assert!(Statistics::can_merge(TSDataType::Int32, TSDataType::Date));
        assert!(!Statistics::can_merge(TSDataType::Int32, TSDataType::Int64));
    }

    #[test]
    fn test_serialize_round_trip_all_types() {
        let cases: Vec<(TSDataType, Vec<(i64, Value)>)> = vec![
            (
                TSDataType::Boolean,
                vec![(1, Value::Boolean(true)), (2, Value::Boolean(false))],
            ),
            (TSDataType::Int32, vec![(1, Value::Int32(-5)), (9, Value::Int32(5))]),
            (TSDataType::Int64, vec![(1, Value::Int64(i64::MIN)), (2, Value::Int64(7))]),
            (TSDataType::Float, vec![(1, Value::Float(1.25)), (2, Value::Float(-3.5))]),
            (TSDataType::Double, vec![(4, Value::Double(6.5))]),
            (
                TSDataType::Text,
                vec![(1, Value::Binary(b"aa".to_vec())), (2, Value::Binary(b"zz".to_vec()))],
            ),
        ];
        for (dt, points) in cases {
            let mut stats = Statistics::new(dt);
            for (t, v) in &points {
                stats.update(*t, v).unwrap();
            }
            let mut out = Vec::new();
            stats.serialize_to(&mut out);
            let mut r = ByteReader::new(&out);
            let back = Statistics::deserialize_from(&mut r, dt).unwrap();
            assert_eq!(back, stats, "round trip for {:?}", dt);
            assert!(!r.has_remaining(), "trailing bytes for {:?}", dt);
        }
    }

    #[test]
    fn test_time_only_statistics() {
        let mut stats = Statistics::new(TSDataType::Vector);
        for t in [100, 101, 102] {
            stats.update_time(t).unwrap();
        }
        assert_eq!(stats.count(), 3);
        let mut out = Vec::new();
        stats.serialize_to(&mut out);
        let mut r = ByteReader::new(&out);
        let back = Statistics::deserialize_from(&mut r, TSDataType::Vector).unwrap();
        assert_eq!(back, stats);
    }
}

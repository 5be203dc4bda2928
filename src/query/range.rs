//! Range extraction over a stream, by index or by timestamp
//!
//! Stored timestamps are non-decreasing in index order (the stream rejects or
//! restamps anything else), so every timestamp lookup is a binary search over
//! the index-ordered sequence.

use crate::data::Datapoint;
use crate::storage::Stream;

/// Datapoints with index in `[i1, i2)`
pub fn index_range(stream: &Stream, i1: i64, i2: i64) -> Vec<Datapoint> {
    stream.read_index_range(i1, i2)
}

/// Datapoints with `t1 <= timestamp < t2`, in index order. A positive
/// `limit` caps the number returned; zero or negative means unbounded.
pub fn time_range(stream: &Stream, t1: f64, t2: f64, limit: i64) -> Vec<Datapoint> {
    stream.with_snapshot(|stored| {
        let start = lower_bound(stored, t1);
        let mut end = lower_bound(stored, t2).max(start);
        if limit > 0 {
            end = end.min(start.saturating_add(limit as usize));
        }
        stored[start..end].to_vec()
    })
}

/// Smallest index whose timestamp is `>= t`, or the stream length if none
pub fn time_to_index(stream: &Stream, t: f64) -> usize {
    stream.with_snapshot(|stored| lower_bound(stored, t))
}

/// First position whose timestamp is not below `t`. NaN sorts past the end.
fn lower_bound(stored: &[Datapoint], t: f64) -> usize {
    if t.is_nan() {
        return stored.len();
    }
    stored.partition_point(|dp| dp.timestamp < t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StreamPath;
    use crate::storage::StreamConfig;

    fn stream_with(points: &[(f64, i64)]) -> Stream {
        let stream = Stream::new(StreamConfig::new(StreamPath::parse("alice/phone/steps").unwrap()));
        let datapoints = points.iter().map(|(t, v)| Datapoint::new(*t, *v)).collect();
        stream.insert(datapoints, false).unwrap();
        stream
    }

    fn values(datapoints: &[Datapoint]) -> Vec<i64> {
        datapoints
            .iter()
            .map(|dp| match dp.value {
                crate::data::Value::Int64(v) => v,
                _ => panic!("unexpected value"),
            })
            .collect()
    }

    #[test]
    fn test_empty_stream() {
        let stream = stream_with(&[]);
        assert!(index_range(&stream, 0, 10).is_empty());
        assert!(time_range(&stream, 0.0, 100.0, 0).is_empty());
        assert_eq!(time_to_index(&stream, 5.0), 0);
    }

    #[test]
    fn test_time_range_half_open() {
        let stream = stream_with(&[(1.0, 1), (2.0, 2)]);

        assert_eq!(values(&time_range(&stream, 0.0, 2.0, 0)), vec![1]);
        assert_eq!(values(&time_range(&stream, 1.0, 2.5, 0)), vec![1, 2]);
        assert!(time_range(&stream, 2.5, 10.0, 0).is_empty());
        assert!(time_range(&stream, 2.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_time_range_limit() {
        let stream = stream_with(&[(1.0, 1), (2.0, 2), (3.0, 3), (4.0, 4)]);

        assert_eq!(values(&time_range(&stream, 1.5, 10.0, 2)), vec![2, 3]);
        assert_eq!(values(&time_range(&stream, 0.0, 10.0, -1)).len(), 4);
        assert_eq!(values(&time_range(&stream, 0.0, f64::INFINITY, 100)).len(), 4);
    }

    #[test]
    fn test_time_range_with_repeated_timestamps() {
        let stream = stream_with(&[(1.0, 1), (2.0, 2), (2.0, 3), (2.0, 4), (3.0, 5)]);

        assert_eq!(values(&time_range(&stream, 2.0, 3.0, 0)), vec![2, 3, 4]);
        assert_eq!(time_to_index(&stream, 2.0), 1);
        assert_eq!(time_to_index(&stream, 2.5), 4);
    }

    #[test]
    fn test_time_to_index() {
        let stream = stream_with(&[(1.0, 1), (2.0, 2)]);

        assert_eq!(time_to_index(&stream, 0.0), 0);
        assert_eq!(time_to_index(&stream, 1.0), 0);
        assert_eq!(time_to_index(&stream, 1.5), 1);
        assert_eq!(time_to_index(&stream, 2.0), 1);
        assert_eq!(time_to_index(&stream, 2.5), 2);
    }

    #[test]
    fn test_time_to_index_monotonic() {
        let stream = stream_with(&[(0.5, 1), (1.0, 2), (1.0, 3), (4.0, 4), (9.0, 5)]);

        let targets: Vec<f64> = (-4..40).map(|i| i as f64 * 0.25).collect();
        let indices: Vec<usize> = targets.iter().map(|t| time_to_index(&stream, *t)).collect();
        assert!(indices.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*indices.last().unwrap(), stream.len());
    }

    #[test]
    fn test_nan_bounds() {
        let stream = stream_with(&[(1.0, 1)]);
        assert_eq!(time_to_index(&stream, f64::NAN), 1);
        assert!(time_range(&stream, f64::NAN, 2.0, 0).is_empty());
    }
}

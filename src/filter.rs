use crate::types::{Record, Selector, SelectorMode};

/// Narrows a dataset snapshot with a selector, preserving order.
pub fn filter(records: &[Record], selector: &Selector) -> Vec<Record> {
    match selector.mode() {
        SelectorMode::All => records.to_vec(),
        SelectorMode::Range { start, end } => records
            .iter()
            .filter(|r| start.map_or(true, |start| r.year >= start))
            .filter(|r| end.map_or(true, |end| r.year <= end))
            .copied()
            .collect(),
        SelectorMode::Window { offset, limit } => records
            .iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .copied()
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{record::reindex, NewRecord};

    fn dataset() -> Vec<Record> {
        reindex(
            (1770..1870)
                .map(|year| NewRecord {
                    year,
                    spots: year % 97,
                })
                .collect(),
        )
    }

    #[test]
    fn test_no_selector_is_identity() {
        let data = dataset();
        assert_eq!(filter(&data, &Selector::default()), data);
    }

    #[test]
    fn test_range_bounds_inclusive() {
        let data = dataset();
        for (start, end) in [
            (Some(1790), Some(1840)),
            (Some(1830), None),
            (None, Some(1820)),
            (Some(1900), None),
            (Some(1799), Some(1799)),
        ] {
            let selector = Selector::range(start, end).unwrap();
            let result = filter(&data, &selector);
            let expected: Vec<_> = data
                .iter()
                .filter(|r| start.map_or(true, |s| r.year >= s))
                .filter(|r| end.map_or(true, |e| r.year <= e))
                .copied()
                .collect();
            assert_eq!(result, expected, "range {start:?}..={end:?}");
            assert!(result.windows(2).all(|w| w[0].id < w[1].id));
        }
        let result = filter(&data, &Selector::range(Some(1790), Some(1840)).unwrap());
        assert_eq!(result.first().map(|r| r.year), Some(1790));
        assert_eq!(result.last().map(|r| r.year), Some(1840));
        assert_eq!(result.len(), 51);
    }

    #[test]
    fn test_window_slices_by_position() {
        let data = dataset();
        for (offset, limit) in [
            (None, Some(20)),
            (Some(15), None),
            (Some(15), Some(20)),
            (Some(95), Some(20)),
            (Some(500), Some(1)),
            (Some(0), Some(0)),
        ] {
            let selector = Selector::window(offset, limit).unwrap();
            let from = offset.unwrap_or(0).min(data.len());
            let to = limit.map_or(data.len(), |l| (from + l).min(data.len()));
            assert_eq!(filter(&data, &selector), data[from..to].to_vec());
        }
    }

    #[test]
    fn test_by_id_and_year() {
        let data = dataset();
        assert_eq!(filter(&data, &Selector::by_id(30)), vec![data[30]]);
        assert_eq!(filter(&data, &Selector::by_year(1800)), vec![data[30]]);
        assert!(filter(&data, &Selector::by_id(100)).is_empty());
    }
}

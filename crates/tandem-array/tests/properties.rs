//! Property tests for capacity and tag bookkeeping

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::recording_group;
use proptest::prelude::*;
use tandem_array::{DataDirective, Directive};

/// One step a caller may take on a rank-2 array.
#[derive(Debug, Clone)]
enum Step {
    Shape(usize, usize, f64),
    Length(usize, f64),
    Free,
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (0usize..12, 0usize..12, 1.0f64..=2.0).prop_map(|(a, b, o)| Step::Shape(a, b, o)),
        3 => (1usize..12, 1.0f64..=2.0).prop_map(|(n, o)| Step::Length(n, o)),
        1 => Just(Step::Free),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Whatever happens, the window fits the allocation, the tag never
    /// goes backwards, and it moves exactly when an Alloc is sent.
    #[test]
    fn capacity_and_tag_invariants(steps in prop::collection::vec(step(), 1..24)) {
        let Some((group, channel)) = recording_group("prop") else {
            return Ok(());
        };
        let mut data = group.create_data::<f32>(2).expect("create");

        for step in steps {
            channel.clear();
            let tag_before = data.tag();
            let result = match step {
                Step::Shape(a, b, oversize) => data.set_shape(&[a, b], oversize),
                Step::Length(n, oversize) => data.set_length(n, oversize),
                Step::Free => data.free_memory(),
            };
            prop_assert!(result.is_ok(), "{step:?} failed: {result:?}");

            prop_assert!(data.size() <= data.alloc_size());
            prop_assert!(data.tag() >= tag_before);

            let allocs = channel
                .launched()
                .iter()
                .filter(|d| **d == Directive::Data(DataDirective::Alloc))
                .count() as u64;
            prop_assert_eq!(data.tag() - tag_before, allocs);
        }
    }

    /// A reallocation never reserves more than `oversize` times the
    /// requested size.
    #[test]
    fn oversize_bounds_capacity(rows in 1usize..40, cols in 1usize..40, oversize in 1.0f64..=2.0) {
        let Some((group, _channel)) = recording_group("bound") else {
            return Ok(());
        };
        let mut data = group.create_data::<u8>(2).expect("create");
        data.set_shape(&[rows, cols], oversize).expect("alloc");

        let required = rows * cols;
        let capacity = (required as f64 * oversize).floor() as usize;
        prop_assert_eq!(data.alloc_size(), capacity);
        prop_assert!(capacity >= required);
        prop_assert_eq!(data.tag(), 1);
    }
}

//! Property-based invariant tests for synchronous stream operators and
//! change-gated signals.
//!
//! 1. `filter` forwards exactly the accepted values, in order
//! 2. `distinct_until_changed` equals `Vec::dedup` of the input
//! 3. `scan` emits one running accumulator per input, never the seed
//! 4. `merge` preserves arrival order and each input's own order
//! 5. `map` then `filter` composes like the iterator equivalent
//! 6. `Signal::set` notifies exactly once per actual change
//! 7. `Emitter::one` delivers at most once however often the event fires

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use patchwire_reactive::{Emitter, Signal, Stream, Subscription, merge};
use proptest::prelude::*;

// ── Helpers ──────────────────────────────────────────────────────────

fn record<T: Clone + 'static>(stream: &Stream<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let seen_clone = Rc::clone(&seen);
    let sub = stream.subscribe(move |v, _| seen_clone.borrow_mut().push(v.clone()));
    (seen, sub)
}

fn arb_values() -> impl Strategy<Value = Vec<i32>> {
    proptest::collection::vec(-50i32..50, 0..=64)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. filter
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn filter_forwards_exactly_accepted_values(values in arb_values(), modulus in 1i32..8) {
        let source = Stream::new();
        let filtered = source.filter(move |v: &i32| v.rem_euclid(modulus) == 0);
        let (seen, _sub) = record(&filtered);

        for v in &values {
            source.emit_value(*v).unwrap();
        }

        let expected: Vec<i32> = values
            .iter()
            .copied()
            .filter(|v| v.rem_euclid(modulus) == 0)
            .collect();
        prop_assert_eq!(seen.borrow().clone(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. distinct_until_changed
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn distinct_matches_dedup(values in proptest::collection::vec(0i32..4, 0..=64)) {
        let source = Stream::new();
        let distinct = source.distinct_until_changed();
        let (seen, _sub) = record(&distinct);

        for v in &values {
            source.emit_value(*v).unwrap();
        }

        let mut expected = values.clone();
        expected.dedup();
        let seen = seen.borrow();
        prop_assert_eq!(&*seen, &expected);
        prop_assert!(seen.windows(2).all(|pair| pair[0] != pair[1]));
        if let Some(first) = values.first() {
            prop_assert_eq!(seen.first(), Some(first));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. scan
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn scan_emits_running_fold(values in arb_values(), seed in -100i64..100) {
        let source = Stream::new();
        let sums = source.scan(|acc: &i64, v: &i32| acc + i64::from(*v), seed);
        let (seen, _sub) = record(&sums);

        for v in &values {
            source.emit_value(*v).unwrap();
        }

        let mut acc = seed;
        let expected: Vec<i64> = values
            .iter()
            .map(|v| {
                acc += i64::from(*v);
                acc
            })
            .collect();
        prop_assert_eq!(seen.borrow().len(), values.len());
        prop_assert_eq!(seen.borrow().clone(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. merge
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn merge_preserves_arrival_and_per_input_order(
        schedule in proptest::collection::vec((0usize..3, any::<i16>()), 0..=64)
    ) {
        let inputs: Vec<Stream<(usize, i16)>> = (0..3).map(|_| Stream::new()).collect();
        let merged = merge(&inputs);
        let (seen, _sub) = record(&merged);

        for (input, value) in &schedule {
            inputs[*input].emit_value((*input, *value)).unwrap();
        }

        prop_assert_eq!(seen.borrow().clone(), schedule.clone());
        for input in 0..3 {
            let from_merge: Vec<i16> = seen
                .borrow()
                .iter()
                .filter(|(i, _)| *i == input)
                .map(|(_, v)| *v)
                .collect();
            let emitted: Vec<i16> = schedule
                .iter()
                .filter(|(i, _)| *i == input)
                .map(|(_, v)| *v)
                .collect();
            prop_assert_eq!(from_merge, emitted);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. map ∘ filter
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn map_then_filter_composes(values in arb_values()) {
        let source = Stream::new();
        let out = source.map(|v: &i32| v * 3).filter(|v: &i32| *v > 0);
        let (seen, _sub) = record(&out);

        for v in &values {
            source.emit_value(*v).unwrap();
        }

        let expected: Vec<i32> = values.iter().map(|v| v * 3).filter(|v| *v > 0).collect();
        prop_assert_eq!(seen.borrow().clone(), expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Signal change gating
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn signal_notifies_once_per_change(initial in 0u8..4, updates in proptest::collection::vec(0u8..4, 0..=64)) {
        let signal = Signal::new(initial);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = signal.subscribe(move |v| seen_clone.borrow_mut().push(*v));
        seen.borrow_mut().clear();

        let mut current = initial;
        let mut expected = Vec::new();
        for v in &updates {
            let changed = signal.set(*v).unwrap();
            prop_assert_eq!(changed, *v != current);
            if changed {
                expected.push(*v);
                current = *v;
            }
        }
        prop_assert_eq!(seen.borrow().clone(), expected.clone());
        prop_assert_eq!(signal.version(), expected.len() as u64);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Emitter::one
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn one_delivers_at_most_once(fires in 0usize..16) {
        let emitter = Emitter::<usize>::new();
        let hits = Rc::new(Cell::new(0));
        let hits_clone = Rc::clone(&hits);
        let _sub = emitter.one("tick", move |_| hits_clone.set(hits_clone.get() + 1));

        for n in 0..fires {
            emitter.emit("tick", n).unwrap();
        }
        prop_assert_eq!(hits.get(), fires.min(1));
        prop_assert_eq!(emitter.listener_count("tick"), usize::from(fires == 0));
    }
}
